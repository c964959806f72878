use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// One unit of periodic work. Tests call `tick` directly; production code
/// drives it through [`run_periodic`].
#[async_trait]
pub trait Tick: Send + Sync {
    fn name(&self) -> &str;

    async fn tick(&self) -> Result<()>;
}

/// Sender half used to stop every periodic task.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Calls `task.tick()` every `period` until `shutdown` flips to true.
/// A failed tick is logged and the schedule continues.
pub async fn run_periodic(
    task: Arc<dyn Tick>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    log::info!("{} started, period {:?}", task.name(), period);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = task.tick().await {
                    log::error!("{} tick failed: {:#}", task.name(), e);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    log::info!("{} stopped", task.name());
}
