use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::{info, warn};

/// Starts a redeploy without waiting for it.
pub trait RedeployTrigger: Send + Sync {
    /// `Ok` once the redeploy has been started; its outcome is not observed.
    fn trigger(&self, reference: &str) -> std::io::Result<()>;
}

/// Re-executes this binary as `easyblog redeploy <ref>` in its own process
/// group with null stdio, so it outlives both the request and a restart of
/// the service that received the webhook.
#[derive(Debug, Clone)]
pub struct SpawnRedeploy {
    exe: PathBuf,
    config_path: Option<String>,
}

impl SpawnRedeploy {
    pub fn new(exe: impl Into<PathBuf>, config_path: Option<String>) -> Self {
        Self {
            exe: exe.into(),
            config_path,
        }
    }

    /// Trigger backed by the running executable.
    pub fn current(config_path: Option<String>) -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, config_path))
    }
}

impl RedeployTrigger for SpawnRedeploy {
    fn trigger(&self, reference: &str) -> std::io::Result<()> {
        let mut cmd = Command::new(&self.exe);
        if let Some(ref path) = self.config_path {
            cmd.arg("--config").arg(path);
        }
        cmd.arg("redeploy")
            .arg(reference)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn()?;
        let pid = child.id();
        info!(%reference, pid, "redeploy process spawned");

        // Reap the child so it does not linger as a zombie.
        std::thread::spawn(move || match child.wait() {
            Ok(status) if status.success() => info!(pid, "redeploy process finished"),
            Ok(status) => warn!(pid, %status, "redeploy process failed; see the redeploy error log"),
            Err(e) => warn!(pid, error = %e, "cannot wait for redeploy process"),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_executable_is_a_spawn_error() {
        let trigger = SpawnRedeploy::new("/nonexistent/easyblog", None);
        assert!(trigger.trigger("abc123").is_err());
    }

    #[test]
    fn spawn_returns_without_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-easyblog");
        let marker = dir.path().join("args");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\nsleep 1\necho \"$@\" > {m}.tmp && mv {m}.tmp {m}\n",
                m = marker.display()
            ),
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let started = std::time::Instant::now();
        SpawnRedeploy::new(&script, Some("/etc/easyblog.toml".into()))
            .trigger("abc123")
            .unwrap();
        assert!(started.elapsed() < std::time::Duration::from_millis(900));

        // The detached process still runs to completion.
        for _ in 0..50 {
            if marker.exists() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(100));
        }
        let args = std::fs::read_to_string(&marker).unwrap();
        assert_eq!(args.trim(), "--config /etc/easyblog.toml redeploy abc123");
    }
}
