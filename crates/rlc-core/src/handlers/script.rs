//! `builtin.script.run` - runs an external program for `Script` tasks.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::process::Command;

use crate::domain::{Payload, SCRIPT_HANDLER_KEY};
use crate::error::HandlerError;
use crate::typed::{HandlerParams, ParamsHandler};

const STDOUT_TAIL: usize = 4000;
const STDERR_TAIL: usize = 2000;

#[derive(Debug, Deserialize)]
pub struct ScriptParams {
    pub script: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory; inherits the daemon's when unset.
    #[serde(default)]
    pub cwd: Option<String>,
}

impl HandlerParams for ScriptParams {
    const KEY: &'static str = SCRIPT_HANDLER_KEY;
}

pub struct ScriptHandler;

#[async_trait]
impl ParamsHandler<ScriptParams> for ScriptHandler {
    async fn handle(&self, params: ScriptParams) -> Result<Payload, HandlerError> {
        let mut cmd = Command::new(&params.script);
        cmd.args(&params.args).kill_on_drop(true);
        if let Some(dir) = &params.cwd {
            cmd.current_dir(dir);
        }

        tracing::debug!(script = %params.script, args = ?params.args, "spawning script");
        let output = cmd
            .output()
            .await
            .map_err(|e| HandlerError::failed(format!("failed to start {}: {e}", params.script)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code();

        if !output.status.success() {
            let code = exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(HandlerError::failed(format!(
                "{} exited with {code}: {}",
                params.script,
                tail(stderr.trim_end(), STDERR_TAIL)
            )));
        }

        let result = json!({
            "exit_code": exit_code,
            "stdout_tail": tail(&stdout, STDOUT_TAIL),
        });
        Ok(result.as_object().cloned().unwrap_or_default())
    }
}

/// Last `max` bytes of `s`, moved forward to a char boundary.
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let start = (s.len() - max..s.len())
        .find(|&i| s.is_char_boundary(i))
        .unwrap_or(s.len());
    &s[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(script: &str, args: &[&str]) -> ScriptParams {
        ScriptParams {
            script: script.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            cwd: None,
        }
    }

    #[test]
    fn tail_respects_char_boundaries() {
        assert_eq!(tail("abc", 10), "abc");
        assert_eq!(tail("abcdef", 3), "def");
        // 'é' is two bytes; a cut through it moves forward.
        assert_eq!(tail("aéb", 2), "b");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn zero_exit_returns_stdout_tail() {
        let out = ScriptHandler
            .handle(params("sh", &["-c", "echo collected 42 rows"]))
            .await
            .unwrap();
        assert_eq!(out["exit_code"], 0);
        assert_eq!(out["stdout_tail"], "collected 42 rows\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_fails_with_stderr_tail() {
        let err = ScriptHandler
            .handle(params("sh", &["-c", "echo 'login expired' >&2; exit 3"]))
            .await
            .unwrap_err();
        assert_eq!(err, HandlerError::failed("sh exited with 3: login expired"));
    }

    #[tokio::test]
    async fn missing_program_fails() {
        let err = ScriptHandler
            .handle(params("/nonexistent/rlc-collector", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Failed(msg) if msg.starts_with("failed to start")));
    }
}
