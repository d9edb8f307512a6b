//! Child process transport: frames travel over the child's stdin and stdout.
//!
//! The child's stderr is inherited so device logs stay visible.

use std::process::Stdio;

use tokio::process::Child;
use tokio::process::ChildStdin;
use tokio::process::ChildStdout;
use tokio::process::Command;
use tokio::sync::Mutex;

use super::Error;
use super::Result;
use super::StreamTransport;
use super::Transport;

/// Length-prefixed frames over a spawned child's standard streams.
///
/// The child is killed when the transport is closed or dropped.
pub struct ProcessTransport {
    inner: StreamTransport<ChildStdout, ChildStdin>,
    child: Mutex<Child>,
}

impl ProcessTransport {
    /// Spawns `argv[0]` with the remaining arguments.
    pub fn spawn<S: AsRef<str>>(argv: &[S]) -> Result<Self> {
        let Some((program, args)) = argv.split_first() else {
            return Err(Error::InvalidConfig("empty command line".into()));
        };
        let program = program.as_ref();
        let mut child = Command::new(program)
            .args(args.iter().map(|a| a.as_ref()))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Unavailable(format!("spawn {}: {}", program, e)))?;

        if let Ok(Some(status)) = child.try_wait() {
            return Err(Error::Unavailable(format!("{} exited immediately: {}", program, status)));
        }

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
            return Err(Error::Unavailable(format!("{}: standard streams not captured", program)));
        };

        Ok(Self {
            inner: StreamTransport::new(stdout, stdin),
            child: Mutex::new(child),
        })
    }

    /// OS process id of the child, if it is still running.
    pub async fn id(&self) -> Option<u32> {
        self.child.lock().await.id()
    }
}

#[async_trait::async_trait]
impl Transport for ProcessTransport {
    async fn send(&self, frame: &[u8]) -> Result<()> {
        self.inner.send(frame).await
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>> {
        self.inner.recv().await
    }

    async fn close(&self) -> Result<()> {
        let _ = self.inner.close().await;
        let mut child = self.child.lock().await;
        if child.try_wait()?.is_none() {
            child.kill().await?;
        }
        Ok(())
    }
}
