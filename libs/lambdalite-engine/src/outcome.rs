/// Outcome Classification - Pure Result Shaping
///
/// **Core Responsibility:**
/// Turn what happened to a run (exited, timed out, broke) into the
/// status/output/error-flag triple reported to callers and stored in metrics.
///
/// **Critical Properties:**
/// - Knows nothing about Docker or the pool
/// - Pure function: (run outcome, timeout) → classification
///
/// **Rules:**
/// - A stream is empty only when it has no bytes at all
/// - `output` is stdout if non-empty, else stderr; only the chosen stream is
///   trimmed of trailing whitespace
/// - Exit 0: `Completed`, error flag set only when stderr is the sole output
/// - Non-zero exit: `Failed`, falling back to "Process exited with code N"
/// - Exit 137/139 annotate stderr (memory limit / segfault)
/// - Deadline exceeded: `TimedOut`
/// - Runtime failure after delivery: `Failed`, reason surfaced as output
use crate::runtime::ProcessOutput;
use lambdalite_common::types::InvocationStatus;

/// What happened to one run once the code had been delivered
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Exited(ProcessOutput),
    TimedOut,
    /// The runtime broke mid-run (exec/wait error)
    Broken(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub status: InvocationStatus,
    pub output: String,
    pub error: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Preferred stream for `output`, or `None` if both are empty
fn select_output(stdout: &str, stderr: &str) -> Option<String> {
    if !stdout.is_empty() {
        Some(stdout.trim_end().to_string())
    } else if !stderr.is_empty() {
        Some(stderr.trim_end().to_string())
    } else {
        None
    }
}

fn annotate_exit(stderr: &mut String, code: i64) {
    let note = match code {
        137 => "[Container killed: likely OOM or exceeded memory limit]",
        139 => "[Container killed: segmentation fault]",
        _ => return,
    };
    if !stderr.is_empty() && !stderr.ends_with('\n') {
        stderr.push('\n');
    }
    stderr.push_str(note);
}

pub fn classify(outcome: RunOutcome, timeout_seconds: u64) -> Classification {
    match outcome {
        RunOutcome::Exited(process) => {
            let ProcessOutput { stdout, mut stderr, exit_code } = process;
            // no exit code means the runtime could not report one; the
            // process finished without being killed, so treat it as success
            let code = exit_code.unwrap_or(0);

            if code == 0 {
                let error = stdout.is_empty() && !stderr.is_empty();
                let output = select_output(&stdout, &stderr).unwrap_or_default();
                Classification {
                    status: InvocationStatus::Completed,
                    output,
                    error,
                    stdout,
                    stderr,
                }
            } else {
                annotate_exit(&mut stderr, code);
                let output = select_output(&stdout, &stderr)
                    .unwrap_or_else(|| format!("Process exited with code {}", code));
                Classification {
                    status: InvocationStatus::Failed,
                    output,
                    error: true,
                    stdout,
                    stderr,
                }
            }
        }
        RunOutcome::TimedOut => Classification {
            status: InvocationStatus::TimedOut,
            output: format!("Execution timed out after {} seconds.", timeout_seconds),
            error: true,
            stdout: String::new(),
            stderr: String::new(),
        },
        RunOutcome::Broken(reason) => Classification {
            status: InvocationStatus::Failed,
            output: format!("Execution failed: {}", reason),
            error: true,
            stdout: String::new(),
            stderr: reason,
        },
    }
}
