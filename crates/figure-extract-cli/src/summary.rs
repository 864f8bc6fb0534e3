//! Per-page summary printed at the end of a run

use figure_extract_core::PageOutcome;
use std::fmt::Write as _;

/// One line per page plus a totals line
pub fn render(outcomes: &[PageOutcome]) -> String {
    let mut out = String::from("=== Summary ===\n");
    let mut figures = 0;
    let mut failed = 0;

    for outcome in outcomes {
        match outcome {
            PageOutcome::Completed(report) => {
                figures += report.figures.len();
                let _ = writeln!(
                    out,
                    "{}: {} figures (layout={}, zero-shot only={})",
                    report.page,
                    report.figures.len(),
                    report.layout_count,
                    report.zero_shot_kept
                );
            }
            PageOutcome::Failed { path, error } => {
                failed += 1;
                let _ = writeln!(out, "{}: FAILED ({})", path.display(), error);
            }
        }
    }

    let _ = write!(
        out,
        "Total: {} figures from {} pages ({} failed)",
        figures,
        outcomes.len() - failed,
        failed
    );
    out
}
