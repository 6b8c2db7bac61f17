//! Deferred restart after a self-update.
//!
//! Restarting synchronously would cut the connection carrying the update
//! response, so the dispatcher only returns a [`RestartPlan`]. The listener
//! executes it after the response is flushed and then stops; the runner's
//! own respawn belongs to its supervisor (`Restart=always` in its unit).

use std::time::Duration;

use tracing::{error, info};

use crate::executor::{Executor, Invocation};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPlan {
    /// Peer units restarted through the service manager.
    pub units: Vec<String>,
    /// Pause before acting.
    pub delay: Duration,
}

impl RestartPlan {
    /// Restart the peer units. Failures are logged; nobody is left to
    /// report them to.
    pub async fn execute(&self, systemctl: &str, executor: &dyn Executor) {
        info!(units = ?self.units, delay = ?self.delay, "Restart scheduled");
        tokio::time::sleep(self.delay).await;

        for unit in &self.units {
            let result = executor
                .run(&Invocation::new([systemctl, "restart", unit.as_str()]))
                .await;
            if !result.succeeded {
                error!(
                    unit = %unit,
                    error = result.error_message.as_deref().unwrap_or_default(),
                    stderr = %result.stderr.trim(),
                    "Failed to restart unit"
                );
            }
        }

        info!("Peer units restarted, runner exiting for supervisor restart");
    }
}
