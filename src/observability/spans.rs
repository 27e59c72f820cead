//! Structured span definitions for tracing.

use tracing::{Level, Span, field, span};

use crate::session::{RunId, SessionId};
use crate::tools::ToolKind;

/// Span the run driver is instrumented with.
pub fn run_span(session_id: SessionId, run_id: RunId) -> Span {
    span!(
        Level::INFO,
        "run",
        session_id = %session_id,
        run_id = %run_id,
        status = field::Empty,
    )
}

/// Span around one tool execution. `is_error` and `duration_ms` are filled
/// in by [`record_tool_result`].
pub fn tool_span(call_id: &str, kind: ToolKind) -> Span {
    span!(
        Level::DEBUG,
        "tool.execute",
        call_id = call_id,
        kind = kind.as_str(),
        is_error = field::Empty,
        duration_ms = field::Empty,
    )
}

pub fn record_tool_result(span: &Span, is_error: bool, duration_ms: u64) {
    span.record("is_error", is_error);
    span.record("duration_ms", duration_ms);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_accept_fields() {
        let _guard = crate::observability::init_test_tracing();
        let run = run_span(SessionId::new(), RunId::new());
        run.record("status", "completed");

        let tool = tool_span("call_1", ToolKind::Write);
        record_tool_result(&tool, false, 12);
    }
}
