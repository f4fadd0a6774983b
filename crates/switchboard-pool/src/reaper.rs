//! Background idle reaper

use crate::client::ConnectionFactory;
use crate::pool::SessionPool;
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// Spawn the reaper loop.
///
/// Only a weak reference is held, so dropping the last [`SessionPool`]
/// ends the task at its next tick.
pub(crate) fn spawn<F: ConnectionFactory>(pool: Weak<SessionPool<F>>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(?period, "Idle reaper started");
        loop {
            ticker.tick().await;

            let Some(pool) = pool.upgrade() else {
                debug!("Connection pool dropped, stopping idle reaper");
                break;
            };
            pool.reap_idle().await;
        }
    })
}
