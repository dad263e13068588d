//! External collaborators: the hardware monitor and the thumbnailer.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use beacon_core::BeaconError;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Client of the process that owns mount and eject privileges.
#[async_trait]
pub trait HardwareClient: Send + Sync {
    /// Mount a block device.
    async fn mount(&self, device: &Path) -> Result<(), BeaconError>;

    /// Eject the media in a device.
    async fn eject(&self, device: &Path) -> Result<(), BeaconError>;
}

/// Generates preview images for files.
///
/// Requests are fire-and-forget; implementations queue their own work.
pub trait Thumbnailer: Send + Sync {
    fn request(&self, path: &Path);
}

/// Hardware client running the system `mount` and `eject` programs.
#[derive(Debug, Clone)]
pub struct CommandHardware {
    mount: OsString,
    eject: OsString,
}

impl CommandHardware {
    /// Use `mount` and `eject` from `PATH`.
    pub fn new() -> Self {
        Self::with_programs("mount", "eject")
    }

    /// Use custom programs, each called with the device path as its only
    /// argument.
    pub fn with_programs(mount: impl Into<OsString>, eject: impl Into<OsString>) -> Self {
        Self {
            mount: mount.into(),
            eject: eject.into(),
        }
    }

    async fn run(program: &OsString, device: &Path) -> Result<(), BeaconError> {
        debug!(program = ?program, device = %device.display(), "running hardware command");
        let status = Command::new(program)
            .arg(device)
            .status()
            .await
            .map_err(|e| BeaconError::io(program.clone(), e))?;
        if !status.success() {
            return Err(BeaconError::Other {
                message: format!(
                    "{} {} failed: {status}",
                    program.to_string_lossy(),
                    device.display()
                ),
            });
        }
        Ok(())
    }
}

impl Default for CommandHardware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HardwareClient for CommandHardware {
    async fn mount(&self, device: &Path) -> Result<(), BeaconError> {
        Self::run(&self.mount, device).await?;
        info!(device = %device.display(), "mounted");
        Ok(())
    }

    async fn eject(&self, device: &Path) -> Result<(), BeaconError> {
        Self::run(&self.eject, device).await?;
        info!(device = %device.display(), "ejected");
        Ok(())
    }
}

/// Thumbnailer running an external program with the file path as its only
/// argument. Must be used within a tokio runtime.
#[derive(Debug, Clone)]
pub struct CommandThumbnailer {
    program: PathBuf,
}

impl CommandThumbnailer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Thumbnailer for CommandThumbnailer {
    fn request(&self, path: &Path) {
        let mut command = Command::new(&self.program);
        command.arg(path);
        let program = self.program.clone();
        let path = path.to_path_buf();
        tokio::spawn(async move {
            match command.status().await {
                Ok(status) if status.success() => {
                    debug!(path = %path.display(), "thumbnail refreshed");
                }
                Ok(status) => {
                    warn!(program = %program.display(), path = %path.display(), %status, "thumbnailer failed");
                }
                Err(e) => {
                    warn!(program = %program.display(), error = %e, "cannot run thumbnailer");
                }
            }
        });
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_command_exit_status() {
        let hardware = CommandHardware::with_programs("true", "false");
        let device = Path::new("/dev/null");

        assert!(hardware.mount(device).await.is_ok());
        let err = hardware.eject(device).await.unwrap_err();
        assert!(matches!(err, BeaconError::Other { .. }));
    }

    #[tokio::test]
    async fn test_thumbnailer_runs_program() {
        let temp = tempfile::TempDir::new().unwrap();
        let preview = temp.path().join("a.jpg");
        CommandThumbnailer::new("touch").request(&preview);

        for _ in 0..50 {
            if preview.exists() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("thumbnailer program did not run");
    }

    #[tokio::test]
    async fn test_missing_program() {
        let hardware = CommandHardware::with_programs("/nonexistent/mount", "eject");
        let err = hardware.mount(Path::new("/dev/null")).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
