//! Simulated device-control bridge.
//!
//! Records every command and answers from a list of scripted replies matched
//! by substring. `dumpsys battery` answers with a plausible battery dump unless
//! a script overrides it.

use crate::common::{ErrorConfig, MockMode};
use async_trait::async_trait;
use parking_lot::Mutex;
use power_core::capabilities::DeviceControl;
use power_core::error::{DriverError, DriverErrorKind};
use std::time::Duration;

const DRIVER_TYPE: &str = "mock_device_control";

const BATTERY_DUMP: &str = "Current Battery Service state:\n  AC powered: false\n  USB powered: true\n  status: 2\n  level: 87\n  scale: 100\n  voltage: 4012\n";

/// Scriptable device-control collaborator.
#[derive(Debug)]
pub struct MockDeviceControl {
    replies: Vec<(String, String)>,
    commands: Mutex<Vec<String>>,
    latency: Duration,
    mode: MockMode,
    error_config: ErrorConfig,
}

impl MockDeviceControl {
    /// Bridge that answers every command with an empty reply.
    pub fn new() -> Self {
        Self {
            replies: vec![("dumpsys battery".to_string(), BATTERY_DUMP.to_string())],
            commands: Mutex::new(Vec::new()),
            latency: Duration::from_millis(20),
            mode: MockMode::Instant,
            error_config: ErrorConfig::none(),
        }
    }

    /// Reply with `reply` to any command containing `pattern`.
    ///
    /// Later scripts take precedence over earlier ones.
    pub fn reply(mut self, pattern: impl Into<String>, reply: impl Into<String>) -> Self {
        self.replies.insert(0, (pattern.into(), reply.into()));
        self
    }

    /// Simulated round-trip time in paced modes.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Set the operational mode.
    pub fn with_mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Inject errors on `send`.
    pub fn with_error_config(mut self, config: ErrorConfig) -> Self {
        self.error_config = config;
        self
    }

    /// Commands received so far, including failed ones.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    /// Number of received commands containing `pattern`.
    pub fn count_matching(&self, pattern: &str) -> usize {
        self.commands
            .lock()
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }
}

impl Default for MockDeviceControl {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceControl for MockDeviceControl {
    async fn send(&self, command: &str, timeout: Duration) -> Result<String, DriverError> {
        self.commands.lock().push(command.to_string());
        self.error_config.check_operation(DRIVER_TYPE, "send")?;

        if self.mode.is_paced() {
            if self.latency > timeout {
                tokio::time::sleep(timeout).await;
                return Err(DriverError::new(
                    DRIVER_TYPE,
                    DriverErrorKind::Timeout,
                    format!("no reply to '{command}' within {timeout:?}"),
                ));
            }
            tokio::time::sleep(self.latency).await;
        }

        let reply = self
            .replies
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_default();
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_replies() {
        let control = MockDeviceControl::new().reply("getprop", "14");
        let timeout = Duration::from_secs(1);
        assert_eq!(
            control
                .send("getprop ro.build.version.release", timeout)
                .await
                .unwrap(),
            "14"
        );
        assert!(control
            .send("dumpsys battery", timeout)
            .await
            .unwrap()
            .contains("level: 87"));
        assert_eq!(control.send("input keyevent 3", timeout).await.unwrap(), "");
        assert_eq!(control.commands().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_beyond_timeout() {
        let control = MockDeviceControl::new()
            .with_mode(MockMode::Realistic)
            .with_latency(Duration::from_secs(5));
        let err = control
            .send("input keyevent 3", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Timeout);
    }
}
