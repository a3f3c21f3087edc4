//! Everything a session needs from the process, built once at start-up.

use std::path::PathBuf;
use std::time::Duration;

use crate::config::AppConfig;
use crate::connectivity::DEFAULT_CONNECT_TIMEOUT;
use crate::host::{HostLauncher, ProcessKiller};
use crate::notifier::{Notify, Status};
use crate::retry::RetryPolicies;
use crate::secret::SecretCodec;

pub struct Context {
    pub config: AppConfig,
    pub codec: SecretCodec,
    pub launcher: Box<dyn HostLauncher>,
    pub killer: Box<dyn ProcessKiller>,
    pub notifier: Box<dyn Notify>,
    pub retries: RetryPolicies,
    pub connect_timeout: Duration,
}

impl Context {
    pub fn new(
        config: AppConfig,
        codec: SecretCodec,
        launcher: Box<dyn HostLauncher>,
        killer: Box<dyn ProcessKiller>,
        notifier: Box<dyn Notify>,
    ) -> Self {
        Self {
            config,
            codec,
            launcher,
            killer,
            notifier,
            retries: RetryPolicies::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_retries(mut self, retries: RetryPolicies) -> Self {
        self.retries = retries;
        self
    }

    /// Send a notification; a delivery failure is only logged.
    pub fn notify(&self, status: Status, process: &str, message: &str) {
        if let Err(e) = self.notifier.notify(status, process, message) {
            tracing::warn!("{e}");
        }
    }

    /// Where a report file lives.
    pub fn report_path(&self, filename: &str) -> PathBuf {
        self.config.settings.data_directory.join(filename)
    }
}
