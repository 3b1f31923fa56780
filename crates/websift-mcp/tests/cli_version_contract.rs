#[test]
fn websift_version_contract() {
    let bin = assert_cmd::cargo::cargo_bin!("websift");
    let out = std::process::Command::new(bin)
        .args(["version"])
        // Disable env-file autoload so this contract stays hermetic.
        .env_remove("WEBSIFT_ENV_FILE")
        .output()
        .expect("run websift version");

    assert!(out.status.success(), "websift version failed");
    let s = String::from_utf8_lossy(&out.stdout);
    let v: serde_json::Value = serde_json::from_str(&s).expect("parse version json");

    assert_eq!(v["schema_version"].as_u64(), Some(1));
    assert_eq!(v["kind"].as_str(), Some("version"));
    assert_eq!(v["ok"].as_bool(), Some(true));
    assert_eq!(v["name"].as_str(), Some("websift"));
    assert!(!v["version"].as_str().unwrap_or("").is_empty());
}
