//! Report → human/json/raw string formatting.
//!
//! Three modes:
//! - **Human** (default): aligned table plus a summary line
//! - **JSON** (`--json`): `serde_json::to_string_pretty`
//! - **Raw** (`--raw`): `level\tanomaly\texpected\tobserved\tclean`, one line per cell

use isolation_harness::MatrixReport;

/// Output formatting mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
    Raw,
}

/// Format a finished matrix report.
pub fn format_report(report: &MatrixReport, mode: OutputMode) -> String {
    match mode {
        OutputMode::Human => report.to_string(),
        OutputMode::Json => serde_json::to_string_pretty(report)
            .unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e)),
        OutputMode::Raw => report
            .cells
            .iter()
            .map(|cell| {
                let observed = cell
                    .agreed()
                    .map(|o| o.to_string())
                    .unwrap_or_else(|| "-".to_string());
                format!(
                    "{}\t{}\t{}\t{}\t{}",
                    cell.level, cell.anomaly, cell.expected, observed, cell.matches_guarantee
                )
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Format an error.
pub fn format_error(err: &dyn std::fmt::Display, mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => serde_json::to_string_pretty(&serde_json::json!({
            "error": err.to_string()
        }))
        .unwrap_or_else(|_| format!("{{\"error\": \"{}\"}}", err)),
        OutputMode::Raw => err.to_string(),
        OutputMode::Human => format!("(error) {}", err),
    }
}
