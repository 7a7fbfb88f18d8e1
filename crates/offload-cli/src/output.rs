//! Argument parsing and result printing shared by the commands.

use anyhow::Context;
use offload_core::ExecutionResult;
use serde_json::Value;

use crate::colors;

/// Parse `--arg` values as JSON.
pub fn parse_args(raw: &[String]) -> anyhow::Result<Vec<Value>> {
    raw.iter()
        .enumerate()
        .map(|(i, arg)| {
            serde_json::from_str(arg)
                .with_context(|| format!("Argument {} is not valid JSON: {}", i + 1, arg))
        })
        .collect()
}

/// Print the result as JSON on stdout and a one-line summary on stderr.
///
/// Returns `result.success`.
pub fn print_result(result: &ExecutionResult) -> anyhow::Result<bool> {
    println!("{}", serde_json::to_string_pretty(result)?);
    colors::flush_stdout();

    if result.success {
        eprintln!(
            "{}Completed{} in {}ms{}",
            colors::GREEN,
            colors::RESET,
            result.duration_ms,
            worker_suffix(result)
        );
    } else {
        let kind = result
            .error_kind
            .map(|kind| format!("{:?}", kind))
            .unwrap_or_else(|| "Error".to_string());
        eprintln!(
            "{}Failed{} ({}): {}{}",
            colors::RED,
            colors::RESET,
            kind,
            result.error_message.as_deref().unwrap_or("unknown error"),
            worker_suffix(result)
        );
    }

    Ok(result.success)
}

fn worker_suffix(result: &ExecutionResult) -> String {
    match result.worker_pid {
        Some(pid) => format!(" {}(worker {}){}", colors::DIM, pid, colors::RESET),
        None => String::new(),
    }
}
