//! SSH provisioner glue.
//!
//! The actual configuration scripts (Kubernetes, container runtime) are an
//! external concern; this is the narrow interface they are reached through:
//! credentials and a host in, run a script, fetch one remote file.

use anyhow::{Context, bail};
use skiff_cloud::retry;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

pub struct SshProvisioner {
    private_key_path: PathBuf,
    username: String,
    host: String,
}

impl SshProvisioner {
    pub fn new(private_key_path: PathBuf, username: String, host: String) -> Self {
        Self {
            private_key_path,
            username,
            host,
        }
    }

    fn target(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }

    fn ssh_command(&self) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-i")
            .arg(&self.private_key_path)
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("ConnectTimeout=10")
            .arg(self.target());
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd
    }

    /// Wait until sshd accepts a session. A freshly booted instance takes a
    /// while between "running" and a reachable sshd.
    pub async fn wait_ready(&self, timeout: Duration) -> anyhow::Result<()> {
        let attempts = (timeout.as_secs() / 10).max(1) as u32;
        retry(
            || async {
                let output = self
                    .ssh_command()
                    .arg("true")
                    .output()
                    .await
                    .context("spawning ssh")?;
                if output.status.success() {
                    Ok(())
                } else {
                    bail!(
                        "ssh not ready: {}",
                        String::from_utf8_lossy(&output.stderr).trim()
                    )
                }
            },
            attempts,
            Duration::from_secs(5),
            Duration::from_secs(10),
        )
        .await
    }

    /// Run a local script on the host over a remote shell session.
    pub async fn run_script(&self, script: &Path) -> anyhow::Result<()> {
        let content = tokio::fs::read(script)
            .await
            .with_context(|| format!("reading {}", script.display()))?;

        let mut cmd = self.ssh_command();
        cmd.arg("bash -s").stdin(Stdio::piped());
        let mut child = cmd.spawn().context("spawning ssh")?;

        use tokio::io::AsyncWriteExt;
        let mut stdin = child.stdin.take().context("ssh stdin unavailable")?;
        stdin.write_all(&content).await?;
        drop(stdin);

        let output = child.wait_with_output().await?;
        debug!(
            script = %script.display(),
            status = %output.status,
            "remote script finished"
        );
        if !output.status.success() {
            bail!(
                "remote script {} failed: {}",
                script.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    /// Copy one remote file to a local path (e.g. a generated kubeconfig).
    pub async fn fetch_file(&self, remote: &str, local: &Path) -> anyhow::Result<()> {
        let output = Command::new("scp")
            .arg("-i")
            .arg(&self.private_key_path)
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg(format!("{}:{}", self.target(), remote))
            .arg(local)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("spawning scp")?;

        if !output.status.success() {
            bail!(
                "fetching {} failed: {}",
                remote,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}
