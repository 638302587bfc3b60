//! Remote command execution — local shell for this host, SSH for the rest.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;

use crate::cluster::ClusterNode;
use crate::config::SshConfig;

/// Characters of captured output embedded in an error.
const ERROR_OUTPUT_TAIL: usize = 2000;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to launch command for {node}: {source}")]
    Spawn {
        node: String,
        #[source]
        source: std::io::Error,
    },

    #[error("reading output of command on {node}: {source}")]
    Output {
        node: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command on {node} timed out after {secs}s\n{output}")]
    Timeout {
        node: String,
        secs: u64,
        output: String,
    },

    #[error("command on {node} failed ({status})\n{output}")]
    Failed {
        node: String,
        status: ExitStatus,
        output: String,
    },
}

#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `command` on `node` and return its stdout.
    async fn execute(
        &self,
        node: &ClusterNode,
        command: &str,
        timeout: Duration,
    ) -> Result<String, ExecError>;
}

/// Runs through `bash -c` locally or `ssh` with host-key checking disabled.
pub struct ShellExecutor {
    local_node: String,
    user: Option<String>,
    connect_timeout_secs: u64,
}

impl ShellExecutor {
    pub fn new(config: &SshConfig) -> Self {
        Self {
            local_node: config.local_node(),
            user: config.user.clone(),
            connect_timeout_secs: config.connect_timeout_secs,
        }
    }

    fn command_for(&self, node: &ClusterNode, command: &str) -> Command {
        if node.name == self.local_node {
            let mut cmd = Command::new("bash");
            cmd.args(["-c", command]);
            return cmd;
        }

        let host = node.address.as_deref().unwrap_or(&node.name);
        let target = match &self.user {
            Some(user) => format!("{user}@{host}"),
            None => host.to_string(),
        };

        let connect_timeout = format!("ConnectTimeout={}", self.connect_timeout_secs);
        let mut cmd = Command::new("ssh");
        cmd.args([
            "-o",
            "BatchMode=yes",
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "UserKnownHostsFile=/dev/null",
            "-o",
            connect_timeout.as_str(),
            target.as_str(),
            command,
        ]);
        cmd
    }
}

#[async_trait]
impl RemoteExecutor for ShellExecutor {
    async fn execute(
        &self,
        node: &ClusterNode,
        command: &str,
        timeout: Duration,
    ) -> Result<String, ExecError> {
        debug!(node = %node.name, command, "executing");

        let mut child = self
            .command_for(node, command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Spawn {
                node: node.name.clone(),
                source,
            })?;

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let mut out = Vec::new();
        let mut err = Vec::new();

        let run = async {
            let (read_out, read_err, status) = tokio::join!(
                drain_pipe(stdout.as_mut(), &mut out),
                drain_pipe(stderr.as_mut(), &mut err),
                child.wait()
            );
            let status = status.map_err(|source| ExecError::Spawn {
                node: node.name.clone(),
                source,
            })?;
            read_out.and(read_err).map_err(|source| {
                debug!(node = %node.name, error = %source, "lost command output");
                ExecError::Output {
                    node: node.name.clone(),
                    source,
                }
            })?;
            Ok::<_, ExecError>(status)
        };

        let outcome = tokio::time::timeout(timeout, run).await;

        match outcome {
            Err(_) => {
                let _ = child.kill().await;
                Err(ExecError::Timeout {
                    node: node.name.clone(),
                    secs: timeout.as_secs(),
                    output: captured(&out, &err),
                })
            }
            Ok(Err(e)) => Err(e),
            Ok(Ok(status)) if !status.success() => Err(ExecError::Failed {
                node: node.name.clone(),
                status,
                output: captured(&out, &err),
            }),
            Ok(Ok(_)) => Ok(String::from_utf8_lossy(&out).into_owned()),
        }
    }
}

/// Read `pipe` to EOF into `buf`. A missing pipe reads as empty.
async fn drain_pipe<R: AsyncRead + Unpin>(
    pipe: Option<&mut R>,
    buf: &mut Vec<u8>,
) -> std::io::Result<()> {
    match pipe {
        Some(pipe) => pipe.read_to_end(buf).await.map(drop),
        None => Ok(()),
    }
}

fn captured(out: &[u8], err: &[u8]) -> String {
    let mut text = String::from_utf8_lossy(out).into_owned();
    let err = String::from_utf8_lossy(err);
    if !err.trim().is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&err);
    }
    tail_chars(&text, ERROR_OUTPUT_TAIL).to_string()
}

/// The last `max` characters of `s`, split on a char boundary.
pub fn tail_chars(s: &str, max: usize) -> &str {
    let count = s.chars().count();
    if count <= max {
        return s;
    }
    match s.char_indices().nth(count - max) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::NodeRole;

    fn local() -> (ShellExecutor, ClusterNode) {
        let executor = ShellExecutor {
            local_node: "self".into(),
            user: None,
            connect_timeout_secs: 10,
        };
        let node = ClusterNode {
            name: "self".into(),
            role: NodeRole::ControlPlane,
            address: None,
            runtime_version: None,
            arch: None,
        };
        (executor, node)
    }

    #[test]
    fn tail_respects_char_boundaries() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("ab", 3), "ab");
        assert_eq!(tail_chars("→→→x", 2), "→x");
    }

    #[tokio::test]
    async fn local_command_returns_stdout() {
        let (executor, node) = local();
        let out = executor
            .execute(&node, "echo hello", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn non_zero_exit_embeds_output() {
        let (executor, node) = local();
        let err = executor
            .execute(&node, "echo partial; echo broken >&2; exit 3", Duration::from_secs(5))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, ExecError::Failed { .. }));
        assert!(message.contains("partial"));
        assert!(message.contains("broken"));
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let (executor, node) = local();
        let err = executor
            .execute(&node, "sleep 5", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }));
    }

    struct BrokenPipe;

    impl AsyncRead for BrokenPipe {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _: &mut std::task::Context<'_>,
            _: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "pipe closed",
            )))
        }
    }

    #[tokio::test]
    async fn pipe_read_errors_are_reported() {
        let mut buf = Vec::new();
        let err = drain_pipe(Some(&mut BrokenPipe), &mut buf).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
        assert!(drain_pipe(None::<&mut BrokenPipe>, &mut buf).await.is_ok());
    }

    #[tokio::test]
    async fn large_output_is_captured_whole() {
        let (executor, node) = local();
        let out = executor
            .execute(&node, "head -c 200000 /dev/zero | tr '\\0' a", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.len(), 200_000);
        assert!(out.bytes().all(|b| b == b'a'));
    }

    #[test]
    fn remote_nodes_go_over_ssh() {
        let executor = ShellExecutor {
            local_node: "self".into(),
            user: Some("ops".into()),
            connect_timeout_secs: 7,
        };
        let node = ClusterNode {
            name: "agent1".into(),
            role: NodeRole::Worker,
            address: Some("10.0.0.2".into()),
            runtime_version: None,
            arch: None,
        };
        let cmd = executor.command_for(&node, "uptime");
        let std = cmd.as_std();
        assert_eq!(std.get_program(), "ssh");
        let args: Vec<_> = std.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(args.contains(&"StrictHostKeyChecking=no".to_string()));
        assert!(args.contains(&"ConnectTimeout=7".to_string()));
        assert!(args.contains(&"ops@10.0.0.2".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("uptime"));
    }
}
