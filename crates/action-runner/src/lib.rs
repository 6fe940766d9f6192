//! `action-runner` — process-per-invocation driver for Node.js actions.
//!
//! Each invocation spawns a fresh `node` process in the action's source
//! directory, passes the request parameters as a single JSON argument, and
//! parses a structured result from the process's stdout:
//!
//! ```text
//! InvocationTarget + params
//!     │
//!     ▼
//! ActionProcess   ← spawns `node -e <launcher> <params-json>`
//!     │              scans stdout for the `RESULT:<json>` marker line
//!     ▼
//! ActionResponse  ← { statusCode?, body }
//! ```
//!
//! The fresh-process model trades throughput for isolation: no module
//! caches, open handles, or mutated globals survive between requests.

pub mod error;

pub(crate) mod process;

use std::path::PathBuf;

use serde::Deserialize;
use tokio::process::Command;

pub use error::ActionError;
pub use process::RESULT_MARKER;

use crate::process::{ActionProcess, OutputLine};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, ActionError>;

// ─── InvocationTarget ─────────────────────────────────────────────────────

/// Everything the runner needs to know about the function being invoked.
#[derive(Debug, Clone)]
pub struct InvocationTarget {
    /// Working directory for the spawned process; module resolution is
    /// relative to it.
    pub source_dir: PathBuf,
    /// Module passed to `require`, without the leading `./`.
    pub entry_module: String,
    /// Name of the exported function to call.
    pub main_export: String,
}

// ─── ActionResponse ───────────────────────────────────────────────────────

/// The structured result parsed from a `RESULT:` line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    /// HTTP status to respond with; callers default this to 200.
    #[serde(default)]
    pub status_code: Option<u16>,
    /// Response payload, written verbatim as JSON.
    #[serde(default)]
    pub body: serde_json::Value,
}

// ─── Public API ───────────────────────────────────────────────────────────

/// Whether a `node` executable is reachable on PATH.
pub fn node_available() -> bool {
    which::which("node").is_ok()
}

/// Invoke the target's exported function with `params` in a fresh process.
///
/// The last `RESULT:`-marked stdout line becomes the invocation result;
/// every other non-empty stdout line is forwarded to the host log. A
/// non-zero exit, a missing marker line, or an unparsable payload all fail
/// the invocation — a clean exit with no result is never treated as
/// success.
pub async fn invoke(
    target: &InvocationTarget,
    params: &serde_json::Value,
) -> Result<ActionResponse> {
    run_process(build_command(target, params)?).await
}

// ─── Internal ─────────────────────────────────────────────────────────────

/// Consume a spawned action process to completion and extract the result.
///
/// Split from [`invoke`] so tests can inject arbitrary commands instead of
/// spawning a real Node.js process.
pub(crate) async fn run_process(cmd: Command) -> Result<ActionResponse> {
    let mut process = ActionProcess::from_command(cmd)?;

    let mut result_payload: Option<String> = None;
    while let Some(line) = process.next_line().await? {
        match line {
            // Last marker line wins if the function printed several.
            OutputLine::Result(payload) => result_payload = Some(payload),
            OutputLine::Diagnostic(text) => tracing::info!(line = %text, "action output"),
        }
    }

    if let Some(exit_err) = process.wait_exit_error().await {
        return Err(exit_err);
    }

    let payload = result_payload.ok_or(ActionError::MissingResult)?;
    serde_json::from_str(&payload).map_err(|source| ActionError::Parse {
        line: payload.clone(),
        source,
    })
}

fn build_command(target: &InvocationTarget, params: &serde_json::Value) -> Result<Command> {
    let params_json = serde_json::to_string(params)
        .map_err(|e| ActionError::Process(format!("failed to serialize params: {e}")))?;

    let mut cmd = Command::new("node");
    cmd.arg("-e")
        .arg(launcher_script(&target.entry_module, &target.main_export))
        .arg(params_json)
        .current_dir(&target.source_dir);
    Ok(cmd)
}

/// Generate the inline launcher the `node` process evaluates.
///
/// Module and export names are embedded as JSON string literals so
/// arbitrary descriptor values cannot break out of the generated source.
fn launcher_script(entry_module: &str, main_export: &str) -> String {
    let module = serde_json::Value::from(format!("./{entry_module}")).to_string();
    let export = serde_json::Value::from(main_export).to_string();
    format!(
        r#"const params = JSON.parse(process.argv[1] || "{{}}");
const fn = require({module})[{export}];
if (typeof fn !== "function") {{
  console.error("export " + {export} + " is not a function");
  process.exit(1);
}}
Promise.resolve(fn(params)).then((result) => {{
  console.log("RESULT:" + JSON.stringify(result));
}}).catch((err) => {{
  console.error(err && err.stack ? err.stack : String(err));
  process.exit(1);
}});
"#
    )
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", script]);
        cmd
    }

    #[tokio::test]
    async fn round_trip_parses_status_and_body() {
        let response = run_process(sh(
            "echo 'RESULT:{\"statusCode\":201,\"body\":{\"y\":2}}'",
        ))
        .await
        .unwrap();

        assert_eq!(response.status_code, Some(201));
        assert_eq!(response.body, serde_json::json!({"y": 2}));
    }

    #[tokio::test]
    async fn status_code_absent_defaults_to_none() {
        let response = run_process(sh("echo 'RESULT:{\"body\":\"ok\"}'"))
            .await
            .unwrap();
        assert_eq!(response.status_code, None);
        assert_eq!(response.body, serde_json::json!("ok"));
    }

    #[tokio::test]
    async fn diagnostic_lines_do_not_disturb_result() {
        let response = run_process(sh(
            "echo connecting; echo 'RESULT:{\"body\":[1,2]}'; echo closing",
        ))
        .await
        .unwrap();
        assert_eq!(response.body, serde_json::json!([1, 2]));
    }

    #[tokio::test]
    async fn last_result_line_wins() {
        let response = run_process(sh(
            "echo 'RESULT:{\"body\":\"first\"}'; echo 'RESULT:{\"body\":\"second\"}'",
        ))
        .await
        .unwrap();
        assert_eq!(response.body, serde_json::json!("second"));
    }

    #[tokio::test]
    async fn clean_exit_without_result_is_error() {
        let err = run_process(sh("echo just chatting")).await.unwrap_err();
        assert!(matches!(err, ActionError::MissingResult));
    }

    #[tokio::test]
    async fn nonzero_exit_is_process_error_with_stderr() {
        let err = run_process(sh("echo kaboom >&2; exit 1")).await.unwrap_err();
        match err {
            ActionError::Process(msg) => {
                assert!(msg.contains("code 1"), "got: {msg}");
                assert!(msg.contains("kaboom"), "got: {msg}");
            }
            other => panic!("expected Process error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn nonzero_exit_wins_over_result_line() {
        // A process that prints a result but then fails must not be
        // treated as a success.
        let err = run_process(sh("echo 'RESULT:{\"body\":1}'; exit 1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Process(_)));
    }

    #[tokio::test]
    async fn malformed_result_payload_is_parse_error() {
        let err = run_process(sh("echo 'RESULT:not json'")).await.unwrap_err();
        match err {
            ActionError::Parse { line, .. } => assert_eq!(line, "not json"),
            other => panic!("expected Parse error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn spawn_failure_is_io_error() {
        let err = run_process(Command::new("__no_such_binary_wisp__"))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Io(_)));
    }

    #[test]
    fn launcher_escapes_identifiers() {
        let script = launcher_script("dist/\"weird\".js", "ma'in");
        assert!(script.contains(r#"require("./dist/\"weird\".js")"#));
        assert!(script.contains(r#"["ma'in"]"#));
    }

    #[test]
    fn response_rejects_non_object_payload() {
        let parsed = serde_json::from_str::<ActionResponse>("42");
        assert!(parsed.is_err());
    }
}
