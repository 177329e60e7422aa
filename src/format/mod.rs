//! Output formatting for `kanban_rust`.
//!
//! Commands print JSON with `--json`; otherwise they use the plain text
//! renderers here.

mod text;

pub use text::{
    BLOCKED_ICON, format_audit, format_board, format_cfd, format_metrics, format_stats,
    format_sync_report, terminal_width, truncate_title,
};
