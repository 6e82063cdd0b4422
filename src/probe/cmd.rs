use std::process::Stdio;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use tokio::{io::AsyncWriteExt as _, process::Command};

/// Runs a command, optionally feeding bytes on stdin, and returns its
/// stdout only for a clean exit.
#[async_trait]
pub trait CheckCommandOutput {
    async fn run(&mut self) -> Result<Vec<u8>>;

    async fn run_with_input(&mut self, input_bytes: Option<&[u8]>) -> Result<Vec<u8>>;
}

#[async_trait]
impl CheckCommandOutput for Command {
    async fn run(&mut self) -> Result<Vec<u8>> {
        self.run_with_input(None).await
    }

    async fn run_with_input(&mut self, input_bytes: Option<&[u8]>) -> Result<Vec<u8>> {
        // reset all locale settings for this command
        self.env("LC_ALL", "C");

        tracing::trace!(cmd = ?self.as_std(), "run external cmd");

        let output = async {
            if input_bytes.is_some() {
                self.stdin(Stdio::piped());
            } else {
                self.stdin(Stdio::null());
            }
            self.stdout(Stdio::piped());
            self.stderr(Stdio::piped());

            let mut child = self.kill_on_drop(true).spawn()?;

            if let Some(input_bytes) = input_bytes {
                let mut stdin = child.stdin.take().context("No stdin")?;
                stdin.write_all(input_bytes).await?;
                stdin.shutdown().await?;
            }

            child.wait_with_output().await.map_err(anyhow::Error::from)
        }
        .await
        .with_context(|| format!("Failed to execute external command: {:?}", self.as_std()))?;

        match output.status.code() {
            Some(0) => Ok(output.stdout),
            Some(code) => bail!(
                "Bad exit code {code}\ncmd: {:?}\nstderr: {}",
                self.as_std(),
                String::from_utf8_lossy(&output.stderr),
            ),
            None => Err(anyhow!("killed by signal")),
        }
    }
}
