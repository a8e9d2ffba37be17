//! Host reboot over the admin channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::traits::CommandExecutor;

/// Runs the configured reboot command once per process.
///
/// Later calls return immediately, so overlapping admin messages cannot
/// trigger a second reboot.
#[derive(Debug)]
pub struct SystemCommandExecutor {
    program: String,
    args: Vec<String>,
    delay: Duration,
    fired: AtomicBool,
}

impl Default for SystemCommandExecutor {
    fn default() -> Self {
        Self::new("sudo", ["reboot"])
    }
}

impl SystemCommandExecutor {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            delay: Duration::from_secs(2),
            fired: AtomicBool::new(false),
        }
    }

    /// Pause before running the command, giving log output time to flush.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Whether a reboot has already been requested.
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn execute_reboot(&self) -> Result<()> {
        if self.fired.swap(true, Ordering::SeqCst) {
            info!("Reboot already requested; ignoring");
            return Ok(());
        }

        warn!("Executing system reboot: {} {}", self.program, self.args.join(" "));
        tokio::time::sleep(self.delay).await;

        let status = Command::new(&self.program)
            .args(&self.args)
            .status()
            .await
            .map_err(|e| Error::Command {
                program: self.program.clone(),
                message: e.to_string(),
            })?;

        if status.success() {
            Ok(())
        } else {
            error!("Reboot command exited with {}", status);
            Err(Error::Command {
                program: self.program.clone(),
                message: status.to_string(),
            })
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_runs_once() {
        let executor = SystemCommandExecutor::new("true", Vec::<String>::new())
            .with_delay(Duration::ZERO);
        assert!(!executor.has_fired());

        executor.execute_reboot().await.unwrap();
        assert!(executor.has_fired());

        // Second call is a no-op even though the command would succeed again.
        executor.execute_reboot().await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_command_reports_error() {
        let executor =
            SystemCommandExecutor::new("false", Vec::<String>::new()).with_delay(Duration::ZERO);
        let err = executor.execute_reboot().await.unwrap_err();
        assert!(matches!(err, Error::Command { .. }));
    }

    #[tokio::test]
    async fn test_missing_program_reports_error() {
        let executor = SystemCommandExecutor::new("/nonexistent/ratsensor-reboot", ["now"])
            .with_delay(Duration::ZERO);
        assert!(executor.execute_reboot().await.is_err());
    }
}
