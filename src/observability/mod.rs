//! Tracing spans for runs and tool executions.
//!
//! The crate only emits spans and events. Installing a subscriber is left to
//! the embedding application.

mod spans;

pub use spans::{record_tool_result, run_span, tool_span};

/// Installs an `env-filter` subscriber for the current test thread.
///
/// Honors `RUST_LOG`. Output goes through the test writer, so it only shows
/// for failing tests.
#[cfg(test)]
pub(crate) fn init_test_tracing() -> tracing::subscriber::DefaultGuard {
    use tracing_subscriber::EnvFilter;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("agent_gate=debug")),
        )
        .with_test_writer()
        .finish();
    tracing::subscriber::set_default(subscriber)
}
