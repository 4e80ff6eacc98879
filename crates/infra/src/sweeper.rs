use std::io;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, warn};

use cabinet_events::{EventBus, NotificationEnvelope};

use crate::engine::ReconciliationEngine;

/// Periodic expiry of correlations whose webhook never arrived.
#[derive(Debug, Clone)]
pub struct CorrelationSweeper {
    pub interval: Duration,
}

impl Default for CorrelationSweeper {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

impl CorrelationSweeper {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Spawn the sweep thread. It runs every `interval` and on demand via
    /// [`CorrelationSweeperHandle::trigger`].
    pub fn spawn<B>(
        &self,
        name: &'static str,
        engine: Arc<ReconciliationEngine<B>>,
    ) -> io::Result<CorrelationSweeperHandle>
    where
        B: EventBus<NotificationEnvelope> + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let (trigger_tx, trigger_rx) = mpsc::sync_channel::<()>(1);

        let interval = self.interval.max(Duration::from_millis(1));
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || sweep_loop(name, interval, shutdown_rx, trigger_rx, engine))?;

        Ok(CorrelationSweeperHandle {
            shutdown: shutdown_tx,
            trigger: trigger_tx,
            join: Some(join),
        })
    }
}

#[derive(Debug)]
pub struct CorrelationSweeperHandle {
    shutdown: mpsc::Sender<()>,
    trigger: mpsc::SyncSender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl CorrelationSweeperHandle {
    /// Request a sweep ahead of schedule. Coalesced with any pending request.
    pub fn trigger(&self) {
        let _ = self.trigger.try_send(());
    }

    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

fn sweep_loop<B>(
    name: &'static str,
    interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
    trigger_rx: mpsc::Receiver<()>,
    engine: Arc<ReconciliationEngine<B>>,
) where
    B: EventBus<NotificationEnvelope>,
{
    info!(runner = name, interval_ms = interval.as_millis() as u64, "correlation sweeper started");

    let mut next_tick = Instant::now() + interval;
    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        let now = Instant::now();
        let mut due = false;
        if now >= next_tick {
            due = true;
            while next_tick <= now {
                next_tick += interval;
            }
        }
        while trigger_rx.try_recv().is_ok() {
            due = true;
        }

        if !due {
            let sleep_for = next_tick
                .saturating_duration_since(Instant::now())
                .min(Duration::from_millis(50));
            thread::sleep(sleep_for);
            continue;
        }

        let expired = engine.sweep_expired(Utc::now());
        if !expired.is_empty() {
            warn!(runner = name, count = expired.len(), "expired pending operations");
        }
    }

    info!(runner = name, "correlation sweeper stopped");
}
