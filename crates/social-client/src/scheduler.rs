use std::{
    future::Future,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug)]
struct RunningFlushTask {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

/// Repeating timer that drives automatic event flushes.
///
/// The period can change at any time; zero parks the loop until a positive
/// period is set. A tick already running is never interrupted.
#[derive(Debug)]
pub struct FlushScheduler {
    interval_tx: watch::Sender<Duration>,
    running: Mutex<Option<RunningFlushTask>>,
}

impl FlushScheduler {
    pub fn new(interval: Duration) -> Self {
        let (interval_tx, _) = watch::channel(interval);
        Self {
            interval_tx,
            running: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        *self.interval_tx.borrow()
    }

    /// Change the period; a running loop re-arms with the new value.
    pub fn set_interval(&self, interval: Duration) {
        let previous = self.interval_tx.send_replace(interval);
        if previous != interval {
            debug!(?previous, ?interval, "flush interval changed");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    /// Spawn the timer loop. `tick` returns `false` to end the loop.
    ///
    /// A loop that is already running is replaced.
    pub fn start<F, Fut>(&self, tick: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let stop = CancellationToken::new();
        let stop_child = stop.child_token();
        let interval_rx = self.interval_tx.subscribe();
        let task = tokio::spawn(run_flush_loop(interval_rx, stop_child, tick));

        let previous = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(RunningFlushTask { stop, task });
        if let Some(previous) = previous {
            previous.stop.cancel();
        }
        debug!("flush timer started");
    }

    /// Cancel the timer loop without waiting for an in-flight tick.
    pub fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = running {
            running.stop.cancel();
            debug!("flush timer stopped");
        }
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_flush_loop<F, Fut>(
    mut interval_rx: watch::Receiver<Duration>,
    stop: CancellationToken,
    tick: F,
) where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    loop {
        let period = *interval_rx.borrow_and_update();
        if period.is_zero() {
            tokio::select! {
                _ = stop.cancelled() => return,
                changed = interval_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    continue;
                }
            }
        }

        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = stop.cancelled() => return,
                changed = interval_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    break;
                }
                _ = ticker.tick() => {
                    if !tick().await {
                        return;
                    }
                }
            }
        }
    }
}
