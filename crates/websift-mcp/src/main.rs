#![recursion_limit = "256"]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "websift")]
#[command(about = "Search-snippet context compaction (CLI + MCP stdio server)", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[allow(clippy::large_enum_variant)]
enum Commands {
    /// Run as an MCP stdio server (for Cursor / MCP clients).
    #[cfg(feature = "stdio")]
    McpStdio,
    /// Render compacted context from a records file (offline; no provider keys).
    Render(RenderCmd),
    /// Diagnose configuration/launch issues (json; no secrets).
    Doctor(DoctorCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug)]
struct RenderCmd {
    /// Records file: a JSON array of {title, url, age?, snippets}. Pass "-" to read stdin.
    #[arg(long)]
    records: String,
    /// Query used for relevance scoring and empty-result messages.
    #[arg(long)]
    query: String,
    /// Keep only the source whose URL matches exactly (compact mode only).
    #[arg(long)]
    url: Option<String>,
    /// Response mode. Allowed: compact, full
    #[arg(long, default_value = "compact")]
    response_mode: String,
    /// Relevance threshold mode. Allowed: disabled, lenient, balanced, strict
    #[arg(long)]
    relevance_mode: Option<String>,
    #[arg(long)]
    count: Option<usize>,
    #[arg(long)]
    max_urls: Option<usize>,
    #[arg(long)]
    max_tokens: Option<usize>,
    #[arg(long)]
    max_snippets: Option<usize>,
    #[arg(long)]
    max_tokens_per_url: Option<usize>,
    #[arg(long)]
    max_snippets_per_url: Option<usize>,
    #[arg(long)]
    max_snippet_chars: Option<usize>,
    #[arg(long)]
    max_output_chars: Option<usize>,
}

#[derive(clap::Args, Debug)]
struct DoctorCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
    /// Attempt a local stdio MCP handshake (list_tools) to prove clients can start the server.
    ///
    /// This is a self-check: it spawns a child `websift mcp-stdio` process and calls
    /// `list_tools`. It performs no network search and prints no secret values.
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    check_stdio: bool,
    /// Timeout for the stdio handshake (ms).
    #[arg(long, default_value_t = 3000)]
    timeout_ms: u64,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[cfg(feature = "stdio")]
mod mcp {
    use super::*;
    use rmcp::{
        handler::server::router::tool::ToolRouter as RmcpToolRouter,
        handler::server::wrapper::Parameters,
        model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
        tool, tool_handler, tool_router,
        transport::stdio,
        ErrorData as McpError, ServiceExt,
    };
    use schemars::JsonSchema;
    use serde::Deserialize;
    use std::sync::Arc;
    use tracing::debug;
    use websift_core::{
        EffectiveLimits, RelevanceMode, RequestedLimits, ResponseMode, SnippetQuery, SnippetSource,
    };
    use websift_local::{render_context, BraveSnippetSource};

    const SCHEMA_VERSION: u64 = 1;
    const MAX_QUERY_CHARS: usize = 400;

    #[path = "envelope.rs"]
    mod envelope;
    use envelope::*;

    fn has_env(k: &str) -> bool {
        std::env::var(k).ok().is_some_and(|v| !v.trim().is_empty())
    }

    fn now_epoch_s() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_else(|_| std::time::Duration::from_secs(0))
            .as_secs()
    }

    fn is_http_status(msg: &str, code: u16) -> bool {
        msg.contains(&format!("HTTP {code}")) || msg.contains(&format!("{code} Too Many Requests"))
    }

    fn search_failed_hint(msg: &str) -> &'static str {
        if is_http_status(msg, 429) {
            return "brave is rate-limiting (HTTP 429). Retry later or lower count.";
        }
        "Search request failed. Check network reachability, and WEBSIFT_BRAVE_ENDPOINT if overridden."
    }

    fn tool_result(payload: serde_json::Value) -> CallToolResult {
        // Structured content for machine consumers, plus a text fallback for
        // clients/tests that only read `content[0].text`.
        let mut r = CallToolResult::structured(payload.clone());
        r.content = vec![Content::text(payload.to_string())];
        r
    }

    #[derive(Debug, Clone, Default, serde::Serialize)]
    struct ProviderUsage {
        calls: u64,
        ok: u64,
        elapsed_ms_sum: u64,
        http_429: u64,
    }

    #[derive(Debug, Clone, serde::Serialize)]
    struct UsageStats {
        started_at_epoch_s: u64,
        tool_calls: std::collections::BTreeMap<String, u64>,
        search_providers: std::collections::BTreeMap<String, ProviderUsage>,
    }

    impl UsageStats {
        fn new(now_epoch_s: u64) -> Self {
            Self {
                started_at_epoch_s: now_epoch_s,
                tool_calls: std::collections::BTreeMap::new(),
                search_providers: std::collections::BTreeMap::new(),
            }
        }
    }

    #[derive(Debug, Deserialize, JsonSchema, Default)]
    struct WebSearchContextArgs {
        /// Search query (required; at most 400 chars).
        query: String,
        /// Exact source URL to keep; its host terms are also fed to the search
        /// backend. Applies in compact mode only.
        #[serde(default)]
        url: Option<String>,
        /// Results to request from the search backend (compact cap: 8).
        #[serde(default)]
        count: Option<usize>,
        /// Max sources rendered (compact cap: 8).
        #[serde(default)]
        max_urls: Option<usize>,
        /// Advisory total token budget for callers that meter tokens (compact cap: 2048).
        #[serde(default)]
        max_tokens: Option<usize>,
        /// Max snippets across all sources (compact cap: 16).
        #[serde(default)]
        max_snippets: Option<usize>,
        /// Advisory per-source token budget (compact cap: 512).
        #[serde(default)]
        max_tokens_per_url: Option<usize>,
        /// Max snippets kept per source (compact cap: 2).
        #[serde(default)]
        max_snippets_per_url: Option<usize>,
        /// Max characters per snippet before "..." truncation (compact cap: 400).
        #[serde(default)]
        max_snippet_chars: Option<usize>,
        /// Max characters of rendered output (compact cap: 8000).
        #[serde(default)]
        max_output_chars: Option<usize>,
        /// Relevance threshold mode. Allowed: disabled, lenient, balanced, strict
        /// (compact default: strict).
        #[serde(default)]
        relevance_mode: Option<String>,
        /// Response mode (default: compact). Allowed: compact, full
        #[serde(default)]
        response_mode: Option<String>,
        /// Search timeout in ms (clamped to 1000..=60000; default 20000).
        #[serde(default)]
        timeout_ms: Option<u64>,
    }

    #[derive(Debug, Deserialize, JsonSchema, Default)]
    struct WebsiftUsageArgs {}

    /// Bound caller-supplied limits to the full-mode schema ceilings. Compact
    /// ceilings are applied afterwards by `EffectiveLimits::resolve`.
    fn clamp_requested(args: &WebSearchContextArgs) -> RequestedLimits {
        fn schema_clamp(v: Option<usize>, max: usize) -> Option<usize> {
            v.map(|n| n.clamp(1, max))
        }

        let b = EffectiveLimits::FULL;
        RequestedLimits {
            count: schema_clamp(args.count, b.count),
            max_urls: schema_clamp(args.max_urls, b.max_urls),
            max_tokens: schema_clamp(args.max_tokens, b.max_tokens),
            max_snippets: schema_clamp(args.max_snippets, b.max_snippets),
            max_tokens_per_url: schema_clamp(args.max_tokens_per_url, b.max_tokens_per_url),
            max_snippets_per_url: schema_clamp(args.max_snippets_per_url, b.max_snippets_per_url),
            max_snippet_chars: schema_clamp(args.max_snippet_chars, b.max_snippet_chars),
            max_output_chars: schema_clamp(args.max_output_chars, b.max_output_chars),
        }
    }

    #[derive(Clone)]
    pub(crate) struct WebsiftMcp {
        tool_router: RmcpToolRouter<Self>,
        http: reqwest::Client,
        stats: Arc<std::sync::Mutex<UsageStats>>,
    }

    #[tool_router]
    impl WebsiftMcp {
        pub(crate) fn new() -> Result<Self, McpError> {
            Ok(Self {
                tool_router: Self::tool_router(),
                http: reqwest::Client::builder()
                    .user_agent("websift-mcp/0.1")
                    .build()
                    .map_err(|e| McpError::internal_error(e.to_string(), None))?,
                stats: Arc::new(std::sync::Mutex::new(UsageStats::new(now_epoch_s()))),
            })
        }

        fn stats_lock(&self) -> std::sync::MutexGuard<'_, UsageStats> {
            self.stats.lock().unwrap_or_else(|e| e.into_inner())
        }

        fn stats_inc_tool(&self, kind: &str) {
            let mut s = self.stats_lock();
            *s.tool_calls.entry(kind.to_string()).or_insert(0) += 1;
        }

        fn stats_record_provider(&self, name: &str, ok: bool, elapsed_ms: u64, err: Option<&str>) {
            let http_429 = err.is_some_and(|m| is_http_status(m, 429));
            let mut s = self.stats_lock();
            let entry = s.search_providers.entry(name.to_string()).or_default();
            entry.calls += 1;
            if ok {
                entry.ok += 1;
            }
            entry.elapsed_ms_sum = entry.elapsed_ms_sum.saturating_add(elapsed_ms);
            if http_429 {
                entry.http_429 += 1;
            }
        }

        #[tool(
            description = "Search the web and return deduplicated, budget-bounded context snippets (plain text)"
        )]
        async fn web_search_context(
            &self,
            params: Parameters<Option<WebSearchContextArgs>>,
        ) -> Result<CallToolResult, McpError> {
            let kind = "web_search_context";
            let t0 = std::time::Instant::now();
            self.stats_inc_tool(kind);

            let args = params.0.unwrap_or_default();
            let query = args.query.trim().to_string();
            let url_filter = args
                .url
                .as_deref()
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string);

            let request = serde_json::json!({
                "query": &query,
                "url": url_filter.as_deref(),
                "response_mode": args.response_mode.as_deref(),
                "relevance_mode": args.relevance_mode.as_deref()
            });

            if query.is_empty() {
                let mut payload = serde_json::json!({
                    "ok": false,
                    "request": request,
                    "error": error_obj(
                        ErrorCode::InvalidParams,
                        "query must be non-empty",
                        "Pass a non-empty search query."
                    )
                });
                add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
                return Ok(tool_result(payload));
            }
            if query.chars().count() > MAX_QUERY_CHARS {
                let mut payload = serde_json::json!({
                    "ok": false,
                    "request": request,
                    "error": error_obj(
                        ErrorCode::InvalidParams,
                        format!("query exceeds {MAX_QUERY_CHARS} characters"),
                        "Shorten the query; very long queries dilute snippet relevance."
                    )
                });
                add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
                return Ok(tool_result(payload));
            }

            let mode = match args.response_mode.as_deref() {
                None => ResponseMode::Compact,
                Some(s) => match ResponseMode::parse(s) {
                    Some(m) => m,
                    None => {
                        let mut payload = serde_json::json!({
                            "ok": false,
                            "request": request,
                            "error": error_obj(
                                ErrorCode::InvalidParams,
                                format!("unknown response_mode: {s}"),
                                "response_mode must be one of: compact, full"
                            )
                        });
                        add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
                        return Ok(tool_result(payload));
                    }
                },
            };
            let relevance = match args.relevance_mode.as_deref() {
                None => None,
                Some(s) => match RelevanceMode::parse(s) {
                    Some(m) => Some(m),
                    None => {
                        let mut payload = serde_json::json!({
                            "ok": false,
                            "request": request,
                            "error": error_obj(
                                ErrorCode::InvalidParams,
                                format!("unknown relevance_mode: {s}"),
                                "relevance_mode must be one of: disabled, lenient, balanced, strict"
                            )
                        });
                        add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
                        return Ok(tool_result(payload));
                    }
                },
            };

            let limits = EffectiveLimits::resolve(&clamp_requested(&args), mode, relevance);

            let provider = match BraveSnippetSource::from_env(self.http.clone()) {
                Ok(p) => p,
                Err(e) => {
                    let mut payload = serde_json::json!({
                        "ok": false,
                        "request": request,
                        "error": error_obj(
                            ErrorCode::NotConfigured,
                            e.to_string(),
                            "Set WEBSIFT_BRAVE_API_KEY (or BRAVE_SEARCH_API_KEY)."
                        )
                    });
                    add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
                    return Ok(tool_result(payload));
                }
            };

            // The backend sees the URL filter as extra query terms so results
            // lean toward the filtered site.
            let fetch_query = match &url_filter {
                Some(u) => format!("{query} {u}"),
                None => query.clone(),
            };
            let q = SnippetQuery {
                query: fetch_query,
                count: Some(limits.count),
                timeout_ms: args.timeout_ms,
            };

            let pt0 = std::time::Instant::now();
            let resp = match provider.fetch_snippets(&q).await {
                Ok(r) => {
                    self.stats_record_provider(
                        provider.name(),
                        true,
                        pt0.elapsed().as_millis() as u64,
                        None,
                    );
                    r
                }
                Err(e) => {
                    let msg = e.to_string();
                    self.stats_record_provider(
                        provider.name(),
                        false,
                        pt0.elapsed().as_millis() as u64,
                        Some(&msg),
                    );
                    let mut payload = serde_json::json!({
                        "ok": false,
                        "provider": provider.name(),
                        "request": request,
                        "error": error_obj(ErrorCode::SearchFailed, &msg, search_failed_hint(&msg))
                    });
                    add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
                    return Ok(tool_result(payload));
                }
            };

            let context = render_context(&query, url_filter.as_deref(), &resp.records, mode, &limits);
            debug!(
                mode = mode.as_str(),
                records = resp.records.len(),
                chars = context.chars().count(),
                elapsed_ms = t0.elapsed().as_millis() as u64,
                "web_search_context rendered"
            );
            // The rendered context is the tool output itself, not a JSON envelope.
            Ok(CallToolResult::success(vec![Content::text(context)]))
        }

        #[tool(description = "Report websift configuration + version (no secrets)")]
        async fn websift_meta(&self) -> Result<CallToolResult, McpError> {
            let kind = "websift_meta";
            let t0 = std::time::Instant::now();
            self.stats_inc_tool(kind);

            // Only report booleans / key names, never values.
            let brave_configured =
                has_env("WEBSIFT_BRAVE_API_KEY") || has_env("BRAVE_SEARCH_API_KEY");
            let endpoint_overridden = has_env("WEBSIFT_BRAVE_ENDPOINT");

            // Help debug "which binary is the client actually running?" without
            // leaking anything; only a short tail of the path.
            let exe = std::env::current_exe().ok().map(|p| {
                let comps: Vec<String> = p
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().to_string())
                    .collect();
                let n = 3usize;
                if comps.len() <= n {
                    comps.join("/")
                } else {
                    format!(".../{}", comps[comps.len() - n..].join("/"))
                }
            });

            let mut payload = serde_json::json!({
                "ok": true,
                "name": "websift",
                "version": env!("CARGO_PKG_VERSION"),
                "binary": { "exe": exe },
                "configured": {
                    "providers": { "brave": brave_configured },
                    "brave_endpoint_override": endpoint_overridden
                },
                "supported": {
                    "mcp_tools": ["websift_meta", "websift_usage", "web_search_context"],
                    "response_modes": ["compact", "full"],
                    "relevance_modes": ["disabled", "lenient", "balanced", "strict"]
                },
                "limits": {
                    "compact": EffectiveLimits::COMPACT,
                    "full_max": EffectiveLimits::FULL
                },
                "defaults": {
                    "web_search_context": {
                        "response_mode": "compact",
                        "relevance_mode": "strict",
                        "max_query_chars": MAX_QUERY_CHARS,
                        "timeout_ms": 20_000,
                        "timeout_ms_min": 1_000,
                        "timeout_ms_max": 60_000
                    }
                }
            });
            add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
            Ok(tool_result(payload))
        }

        #[tool(description = "Report in-process usage stats since server start (no secrets)")]
        async fn websift_usage(
            &self,
            _params: Parameters<Option<WebsiftUsageArgs>>,
        ) -> Result<CallToolResult, McpError> {
            let kind = "websift_usage";
            let t0 = std::time::Instant::now();
            self.stats_inc_tool(kind);

            let s = self.stats_lock();
            let started_at_epoch_s = s.started_at_epoch_s;
            let tool_calls = s.tool_calls.clone();
            let search_providers = s.search_providers.clone();
            drop(s);

            let mut payload = serde_json::json!({
                "ok": true,
                "started_at_epoch_s": started_at_epoch_s,
                "now_epoch_s": now_epoch_s(),
                "tool_calls": tool_calls,
                "usage": {
                    "search_providers": search_providers
                }
            });
            add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
            Ok(tool_result(payload))
        }
    }

    #[tool_handler]
    impl rmcp::ServerHandler for WebsiftMcp {
        fn get_info(&self) -> ServerInfo {
            ServerInfo {
                instructions: Some(
                    "Search-snippet context compaction. web_search_context returns plain context \
                     text (one JSON object line per source, or a no-results sentence); \
                     websift_meta/websift_usage return schema-versioned JSON."
                        .to_string(),
                ),
                capabilities: ServerCapabilities::builder().enable_tools().build(),
                ..Default::default()
            }
        }
    }

    pub(crate) async fn serve_stdio() -> Result<(), McpError> {
        let svc = WebsiftMcp::new()?;
        let running = svc
            .serve(stdio())
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        // Keep the stdio server alive until the client closes.
        running
            .waiting()
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(())
    }

}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    // stdout carries tool/CLI output (and MCP JSON-RPC); logs go to stderr.
    let filter = tracing_subscriber::EnvFilter::try_from_env("WEBSIFT_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("websift=info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .try_init();
}

fn run_render(args: RenderCmd) -> Result<()> {
    let raw = if args.records == "-" {
        use std::io::Read;
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read records from stdin")?;
        buf
    } else {
        std::fs::read_to_string(&args.records)
            .with_context(|| format!("read records file {}", args.records))?
    };
    let records: Vec<websift_core::SourceRecord> =
        serde_json::from_str(&raw).context("records must be a JSON array of source records")?;

    let mode = websift_core::ResponseMode::parse(&args.response_mode)
        .ok_or_else(|| anyhow::anyhow!("unknown response_mode (allowed: compact, full)"))?;
    let relevance = match args.relevance_mode.as_deref() {
        None => None,
        Some(s) => Some(websift_core::RelevanceMode::parse(s).ok_or_else(|| {
            anyhow::anyhow!("unknown relevance_mode (allowed: disabled, lenient, balanced, strict)")
        })?),
    };
    let requested = websift_core::RequestedLimits {
        count: args.count,
        max_urls: args.max_urls,
        max_tokens: args.max_tokens,
        max_snippets: args.max_snippets,
        max_tokens_per_url: args.max_tokens_per_url,
        max_snippets_per_url: args.max_snippets_per_url,
        max_snippet_chars: args.max_snippet_chars,
        max_output_chars: args.max_output_chars,
    };
    let limits = websift_core::EffectiveLimits::resolve(&requested, mode, relevance);
    let url = args.url.as_deref().map(str::trim).filter(|u| !u.is_empty());

    println!(
        "{}",
        websift_local::render_context(args.query.trim(), url, &records, mode, &limits)
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Optional env-file loader (opt-in).
    //
    // MCP server environments often aren't interactive shells, so users want a
    // single place to keep keys without exporting them manually.
    //
    // Safety:
    // - opt-in only (WEBSIFT_ENV_FILE)
    // - sets vars only if not already set in the process environment
    // - does not log values
    if let Ok(p) = std::env::var("WEBSIFT_ENV_FILE") {
        let p = p.trim();
        if !p.is_empty() {
            if let Ok(txt) = std::fs::read_to_string(p) {
                for raw in txt.lines() {
                    let s = raw.trim();
                    if s.is_empty() || s.starts_with('#') {
                        continue;
                    }
                    let Some((k, v)) = s.split_once('=') else {
                        continue;
                    };
                    let k = k.trim();
                    let v = v.trim();
                    if k.is_empty() {
                        continue;
                    }
                    // Don't override explicit process env.
                    if std::env::var_os(k).is_none() {
                        std::env::set_var(k, v);
                    }
                }
            }
        }
    }

    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        #[cfg(feature = "stdio")]
        Commands::McpStdio => {
            mcp::serve_stdio()
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        }
        Commands::Render(args) => {
            run_render(args)?;
        }
        Commands::Doctor(args) => {
            fn has_env(k: &str) -> bool {
                std::env::var(k).ok().is_some_and(|v| !v.trim().is_empty())
            }

            let t0 = std::time::Instant::now();

            // Env presence (booleans only; never print values).
            let brave_configured =
                has_env("WEBSIFT_BRAVE_API_KEY") || has_env("BRAVE_SEARCH_API_KEY");
            let endpoint_overridden = has_env("WEBSIFT_BRAVE_ENDPOINT");

            let mut checks: Vec<serde_json::Value> = Vec::new();

            // Check: the compaction engine renders a context line end to end.
            let engine_ok = {
                let rec = websift_core::SourceRecord {
                    title: "websift doctor".to_string(),
                    url: "https://example.com/doctor".to_string(),
                    age: None,
                    snippets: vec!["doctor probe snippet with enough text to keep".to_string()],
                };
                let limits = websift_core::EffectiveLimits::resolve(
                    &websift_core::RequestedLimits::default(),
                    websift_core::ResponseMode::Compact,
                    Some(websift_core::RelevanceMode::Disabled),
                );
                websift_local::render_context(
                    "doctor probe",
                    None,
                    &[rec],
                    websift_core::ResponseMode::Compact,
                    &limits,
                )
                .starts_with('{')
            };
            checks.push(serde_json::json!({
                "name": "engine_render",
                "ok": engine_ok,
                "message": if engine_ok { "compaction engine rendered a context line" } else { "compaction engine produced no context line" },
                "hint": if engine_ok { "" } else { "This binary is broken; reinstall websift." },
            }));

            // Check: stdio MCP handshake (optional).
            let mut stdio_ok: Option<bool> = None;
            let mut stdio_tool_count: Option<usize> = None;
            let mut stdio_error: Option<serde_json::Value> = None;
            let mut stdio_elapsed_ms: Option<u128> = None;

            #[cfg(feature = "stdio")]
            if args.check_stdio {
                use rmcp::service::ServiceExt;
                use rmcp::transport::{ConfigureCommandExt, TokioChildProcess};
                use tokio::process::Command;

                let exe =
                    std::env::current_exe().unwrap_or_else(|_| std::path::PathBuf::from("websift"));
                let child = TokioChildProcess::new(Command::new(exe).configure(|cmd| {
                    cmd.args(["mcp-stdio"]);
                    // Avoid accidentally inheriting provider keys for this probe.
                    cmd.env_remove("WEBSIFT_BRAVE_API_KEY");
                    cmd.env_remove("BRAVE_SEARCH_API_KEY");
                    cmd.env_remove("WEBSIFT_BRAVE_ENDPOINT");
                    // Keep stderr quiet-ish for this probe unless explicitly enabled.
                    cmd.env("WEBSIFT_LOG", "error");
                }))?;

                let service = ().serve(child).await?;
                let check_t0 = std::time::Instant::now();
                let res = tokio::time::timeout(
                    std::time::Duration::from_millis(args.timeout_ms),
                    service.list_tools(Default::default()),
                )
                .await;
                stdio_elapsed_ms = Some(check_t0.elapsed().as_millis());

                match res {
                    Ok(Ok(tools)) => {
                        stdio_ok = Some(true);
                        stdio_tool_count = Some(tools.tools.len());
                    }
                    Ok(Err(e)) => {
                        stdio_ok = Some(false);
                        let msg = e.to_string();
                        let hint = if msg.contains("ConnectionClosed")
                            || msg.contains("initialized request")
                            || msg.contains("TransportClosed")
                        {
                            "The child process closed the stdio transport early. Common causes: stdout contamination (printing logs to stdout), wrong args (not running mcp-stdio), or a crash on startup."
                        } else {
                            "Stdio MCP handshake failed. Verify your client's mcp config points at this binary with args: [\"mcp-stdio\"]."
                        };
                        stdio_error = Some(serde_json::json!({
                            "code": "handshake_failed",
                            "message": msg,
                            "hint": hint
                        }));
                    }
                    Err(_elapsed) => {
                        stdio_ok = Some(false);
                        stdio_error = Some(serde_json::json!({
                            "code": "timeout",
                            "message": format!("stdio handshake timed out after {}ms", args.timeout_ms),
                            "hint": "The child did not respond to list_tools in time. Check for a stuck startup."
                        }));
                    }
                }

                let _ = service.cancel().await;
            }

            #[cfg(not(feature = "stdio"))]
            if args.check_stdio {
                stdio_ok = Some(false);
            }

            checks.push(serde_json::json!({
                "name": "mcp_stdio_handshake",
                "ok": if args.check_stdio { stdio_ok.unwrap_or(false) } else { true },
                "skipped": !args.check_stdio,
                "message": if !args.check_stdio {
                    "stdio MCP handshake skipped"
                } else if stdio_ok.unwrap_or(false) {
                    "stdio MCP handshake succeeded"
                } else {
                    "stdio MCP handshake failed"
                },
                "hint": if !args.check_stdio || stdio_ok.unwrap_or(false) {
                    ""
                } else if cfg!(feature = "stdio") {
                    "Check that your client runs this `websift` binary with args [\"mcp-stdio\"]. If needed, reinstall: `cargo install --path crates/websift-mcp --bin websift --force`."
                } else {
                    "`mcp-stdio` requires building with feature `stdio`."
                },
                "tool_count": stdio_tool_count,
                "elapsed_ms": stdio_elapsed_ms,
                "error": stdio_error,
            }));

            let ok = checks.iter().all(|c| c["ok"].as_bool().unwrap_or(false));
            let payload = serde_json::json!({
                "schema_version": 1,
                "kind": "doctor",
                "ok": ok,
                "name": "websift",
                "version": env!("CARGO_PKG_VERSION"),
                "platform": {
                    "os": std::env::consts::OS,
                    "arch": std::env::consts::ARCH,
                },
                "features": {
                    "stdio": cfg!(feature = "stdio"),
                },
                "elapsed_ms": t0.elapsed().as_millis(),
                "configured": {
                    "providers": {
                        "brave": brave_configured,
                    },
                    "brave_endpoint_override": endpoint_overridden,
                },
                "checks": checks,
            });
            match args.output.to_ascii_lowercase().as_str() {
                "text" => {
                    println!("websift {} (ok={})", env!("CARGO_PKG_VERSION"), ok);
                    println!(
                        "providers: brave={}",
                        payload["configured"]["providers"]["brave"]
                            .as_bool()
                            .unwrap_or(false),
                    );
                    println!("checks:");
                    if let Some(arr) = payload["checks"].as_array() {
                        for c in arr {
                            let name = c["name"].as_str().unwrap_or("?");
                            let ok = c["ok"].as_bool().unwrap_or(false);
                            let skipped = c["skipped"].as_bool().unwrap_or(false);
                            if skipped {
                                println!("- {}: skipped", name);
                            } else {
                                println!("- {}: {}", name, if ok { "ok" } else { "fail" });
                            }
                        }
                    }
                }
                _ => println!("{payload}"),
            }
        }
        Commands::Version(args) => {
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "version",
                "ok": true,
                "name": "websift",
                "version": env!("CARGO_PKG_VERSION"),
            });
            match args.output.to_ascii_lowercase().as_str() {
                "text" => println!("websift {}", env!("CARGO_PKG_VERSION")),
                _ => println!("{}", v),
            }
        }
    }

    Ok(())
}
