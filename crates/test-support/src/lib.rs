//! Process and network plumbing shared by the `restbridge` integration tests.

use anyhow::Context as _;
use serde_json::Value;
use std::net::TcpListener;
use std::process::{Child, ChildStdin, ChildStdout, ExitStatus};
use std::time::{Duration, Instant};

const EXIT_POLL: Duration = Duration::from_millis(25);
const HEALTH_POLL: Duration = Duration::from_millis(100);

/// A spawned `restbridge` process. Killed and reaped on drop unless it already exited.
pub struct BridgeProcess {
    child: Child,
}

impl BridgeProcess {
    #[must_use]
    pub fn new(child: Child) -> Self {
        Self { child }
    }

    /// Detach the piped stdin and stdout; each can be taken once.
    ///
    /// # Errors
    ///
    /// Returns an error if either pipe was not configured or was already taken.
    pub fn take_stdio(&mut self) -> anyhow::Result<(ChildStdin, ChildStdout)> {
        let stdin = self.child.stdin.take().context("stdin is not piped")?;
        let stdout = self.child.stdout.take().context("stdout is not piped")?;
        Ok((stdin, stdout))
    }

    /// Block until the process stops by itself.
    ///
    /// # Errors
    ///
    /// Returns an error if it is still alive after `limit`.
    pub fn wait_exit(&mut self, limit: Duration) -> anyhow::Result<ExitStatus> {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if let Some(status) = self.child.try_wait().context("poll restbridge status")? {
                return Ok(status);
            }
            std::thread::sleep(EXIT_POLL);
        }
        anyhow::bail!("restbridge (pid {}) still running after {limit:?}", self.child.id())
    }
}

impl Drop for BridgeProcess {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(Some(_))) {
            return;
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// A localhost port that was free a moment ago. Not reserved: bind it promptly.
///
/// # Errors
///
/// Returns an error if no ephemeral port can be bound.
pub fn free_local_port() -> anyhow::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").context("bind ephemeral port")?;
    Ok(listener.local_addr()?.port())
}

/// Poll `<base>/health` until the SSE server answers, returning the decoded body.
///
/// # Errors
///
/// Returns an error if no successful answer arrives within `limit` or the body is not JSON.
pub async fn wait_for_health(base: &str, limit: Duration) -> anyhow::Result<Value> {
    let url = format!("{}/health", base.trim_end_matches('/'));
    let client = reqwest::Client::new();
    let deadline = Instant::now() + limit;
    loop {
        if let Ok(resp) = client.get(&url).send().await
            && resp.status().is_success()
        {
            return resp.json().await.with_context(|| format!("decode {url}"));
        }
        if Instant::now() >= deadline {
            anyhow::bail!("{url} not healthy after {limit:?}");
        }
        tokio::time::sleep(HEALTH_POLL).await;
    }
}
