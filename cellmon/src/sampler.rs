use crate::{
    modem::ModemSession,
    reading::{Observation, Reading},
};
use chrono::{Local, NaiveDateTime};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const DEFAULT_SAMPLE_COUNT: usize = 10;
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Granularity at which a pending delay notices cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Collects a bounded batch of readings at a fixed cadence.
///
/// Not a background task: [`SamplingLoop::run`] returns once the batch is
/// complete or the token is cancelled, and can simply be called again.
#[derive(Debug, Clone)]
pub struct SamplingLoop {
    pub count: usize,
    pub interval: Duration,
}

impl Default for SamplingLoop {
    fn default() -> Self {
        Self {
            count: DEFAULT_SAMPLE_COUNT,
            interval: DEFAULT_SAMPLE_INTERVAL,
        }
    }
}

impl SamplingLoop {
    pub fn new(count: usize, interval: Duration) -> Self {
        Self { count, interval }
    }

    /// Runs the batch. Readings carry sequence ids `1..=count`.
    ///
    /// Cancellation is checked before every sample and during the delay; the
    /// readings collected so far are returned.
    pub fn run(&self, session: &ModemSession, cancel: &CancellationToken) -> Vec<Reading> {
        self.run_with_clock(session, cancel, || Local::now().naive_local())
    }

    pub fn run_with_clock(
        &self,
        session: &ModemSession,
        cancel: &CancellationToken,
        mut now: impl FnMut() -> NaiveDateTime,
    ) -> Vec<Reading> {
        let mut readings = Vec::with_capacity(self.count);

        for seq in 1..=self.count {
            if cancel.is_cancelled() {
                info!(collected = readings.len(), "sampling cancelled");
                break;
            }

            let timestamp = now();
            let observation = Observation::new(
                session.signal_strength(),
                session.operator(),
                session.network_type(),
                session.location(),
            );
            debug!(seq, ?observation, "collected sample");

            readings.push(Reading {
                id: seq as u64,
                timestamp,
                observation,
            });

            if seq < self.count && !sleep_unless_cancelled(self.interval, cancel) {
                info!(collected = readings.len(), "sampling cancelled");
                break;
            }
        }

        readings
    }
}

/// Returns false if cancelled before `delay` elapsed.
fn sleep_unless_cancelled(delay: Duration, cancel: &CancellationToken) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return true;
        }
        std::thread::sleep(remaining.min(CANCEL_POLL));
    }
}
