use std::{future::Future, time::Duration};
use tokio::{
    task::{JoinHandle, JoinSet},
    time::{interval, MissedTickBehavior},
};
use tracing::*;

pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_secs(30);

// tokio refuses a zero period
const MIN_POLL_PERIOD: Duration = Duration::from_millis(1);

/// Run `callback` right away and then every `period` until the returned
/// handle is cancelled or dropped.
///
/// Ticks follow the wall clock. The future produced by a tick is spawned and
/// not awaited, so a slow poll never pushes the next tick back. Missed ticks
/// are skipped rather than fired in a burst.
pub fn start_polling<F, Fut>(mut callback: F, period: Duration) -> PollHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let period = period.max(MIN_POLL_PERIOD);
    let task = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // dropping the set when this task is aborted aborts the ticks still running
        let mut in_flight = JoinSet::new();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    trace!("Polling tick");
                    in_flight.spawn(callback());
                }
                Some(finished) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = finished {
                        if e.is_panic() {
                            error!("Polling tick panicked {}", e);
                        }
                    }
                }
            }
        }
    });
    debug!("Started polling every {:?}", period);
    PollHandle { task }
}

/// Owner of a running poll loop.
#[derive(Debug)]
pub struct PollHandle {
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Stop the loop. Calling this more than once is fine.
    pub fn cancel(&self) {
        if !self.task.is_finished() {
            debug!("Cancelling polling");
        }
        self.task.abort();
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
