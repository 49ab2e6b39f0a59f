//! CLI output: error mapping from domain errors to the CLI surface.

/// Render an error with its full cause chain on one line.
pub fn map_error(e: &anyhow::Error) -> String {
    format!("error: {:#}", e)
}
