pub mod compact;
pub mod rank;
pub mod sanitize;
pub mod search;

pub use compact::{empty_context_message, render_context, SnippetValue};
pub use search::BraveSnippetSource;
