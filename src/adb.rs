//! `adb shell` device-control transport.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use power_core::capabilities::DeviceControl;
use power_core::error::{DriverError, DriverErrorKind};
use tokio::process::Command;

use crate::config::DeviceControlConfig;

const DRIVER_TYPE: &str = "adb";

/// Sends handset commands through `adb [-s serial] shell <command>`.
#[derive(Debug, Clone)]
pub struct AdbDeviceControl {
    adb_path: PathBuf,
    serial: Option<String>,
}

impl AdbDeviceControl {
    /// Transport for the configured adb binary and serial.
    pub fn new(config: &DeviceControlConfig) -> Self {
        Self {
            adb_path: config.adb_path.clone(),
            serial: config.serial.clone(),
        }
    }

    fn command(&self, shell_command: &str) -> Command {
        let mut command = Command::new(&self.adb_path);
        if let Some(serial) = &self.serial {
            command.arg("-s").arg(serial);
        }
        command
            .arg("shell")
            .arg(shell_command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl DeviceControl for AdbDeviceControl {
    async fn send(&self, command: &str, timeout: Duration) -> Result<String, DriverError> {
        tracing::debug!(command, serial = ?self.serial, "adb shell");
        let output = tokio::time::timeout(timeout, self.command(command).output())
            .await
            .map_err(|_| {
                DriverError::new(
                    DRIVER_TYPE,
                    DriverErrorKind::Timeout,
                    format!("'{command}' did not finish within {timeout:?}"),
                )
            })?
            .map_err(|e| {
                let kind = match e.kind() {
                    std::io::ErrorKind::NotFound => DriverErrorKind::Initialization,
                    std::io::ErrorKind::PermissionDenied => DriverErrorKind::Permission,
                    _ => DriverErrorKind::Communication,
                };
                DriverError::new(
                    DRIVER_TYPE,
                    kind,
                    format!("failed to run {}: {e}", self.adb_path.display()),
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::Communication,
                format!("'{command}' exited with {}: {}", output.status, stderr.trim()),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_adb_binary() {
        let adb = AdbDeviceControl::new(&DeviceControlConfig {
            adb_path: PathBuf::from("/nonexistent/adb-for-tests"),
            ..DeviceControlConfig::default()
        });
        let err = adb
            .send("input keyevent KEYCODE_HOME", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Initialization);
    }

    #[test]
    fn test_serial_is_passed() {
        let adb = AdbDeviceControl::new(&DeviceControlConfig {
            serial: Some("R58M123".into()),
            ..DeviceControlConfig::default()
        });
        let command = adb.command("dumpsys battery");
        let args: Vec<_> = command.as_std().get_args().collect();
        assert_eq!(args, ["-s", "R58M123", "shell", "dumpsys battery"]);
    }
}
