//! Background eviction of idle rate table entries.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::clock::Clock;
use super::table::RateTable;

/// Handle to a running sweeper task.
///
/// Dropping the handle stops the task as well.
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Spawn a task that sweeps `table` every `interval`.
///
/// Must be called from within a tokio runtime.
pub fn spawn_sweeper(
    table: Arc<RateTable>,
    clock: Arc<dyn Clock>,
    interval: Duration,
) -> SweeperHandle {
    let (tx, mut rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; nothing is idle yet.
        ticker.tick().await;

        info!(interval_ms = interval.as_millis() as u64, "Rate table sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = table.sweep(clock.now());
                    debug!(removed, tracked = table.len(), "Sweep tick");
                }
                _ = &mut rx => {
                    break;
                }
            }
        }

        info!("Rate table sweeper stopped");
    });

    SweeperHandle {
        shutdown: Some(tx),
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::key::ClientKey;
    use crate::ratelimit::window::WindowPolicy;

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_idle_keys() {
        let clock = Arc::new(ManualClock::new());
        let policy = WindowPolicy::new(Duration::from_secs(1), 5).unwrap();
        let table = Arc::new(RateTable::new(policy));

        table.evaluate(&ClientKey::new("idle"), clock.now());
        assert_eq!(table.len(), 1);

        let handle = spawn_sweeper(table.clone(), clock.clone(), Duration::from_secs(10));

        clock.advance(Duration::from_secs(2));
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert!(table.is_empty());
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_keeps_active_keys() {
        let clock = Arc::new(ManualClock::new());
        let policy = WindowPolicy::new(Duration::from_secs(60), 5).unwrap();
        let table = Arc::new(RateTable::new(policy));

        table.evaluate(&ClientKey::new("active"), clock.now());

        let handle = spawn_sweeper(table.clone(), clock.clone(), Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(table.len(), 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweeper_shutdown() {
        let policy = WindowPolicy::new(Duration::from_secs(1), 5).unwrap();
        let table = Arc::new(RateTable::new(policy));
        let clock: Arc<dyn Clock> = Arc::new(crate::ratelimit::clock::SystemClock);

        let handle = spawn_sweeper(table, clock, Duration::from_millis(10));
        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .expect("sweeper should stop promptly");
    }
}
