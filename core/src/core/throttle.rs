/// Per-platform request admission.
///
/// Every HTTP attempt made on behalf of one platform asks the platform's
/// `RateLimiter` for admission first. A single background task owns the
/// admission clock and lets at most one request through per interval, in
/// FIFO order, no matter how many workers are waiting. There is no burst
/// capacity: a hard ceiling is what keeps aggressive WAFs quiet.
///
/// The task is spawned on construction and exits once every handle to the
/// limiter has been dropped.

use std::time::Duration;

use log::debug;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

use crate::error::{PollError, Result};
use crate::modules::Platform;

const QUEUE_CAPACITY: usize = 1024;

type Ticket = oneshot::Sender<Instant>;

#[derive(Debug, Clone)]
pub struct RateLimiter {
    platform: Platform,
    interval: Duration,
    admissions: Option<mpsc::Sender<Ticket>>,
}

impl RateLimiter {
    /// Starts the admission task for `platform`. Must be called inside a tokio runtime.
    pub fn spawn(platform: Platform, interval: Duration) -> Self {
        if interval.is_zero() {
            return Self::unlimited(platform);
        }

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        tokio::spawn(admission_loop(platform, interval, rx));
        debug!("rate limiter for {} started ({}ms)", platform, interval.as_millis());

        Self {
            platform,
            interval,
            admissions: Some(tx),
        }
    }

    /// A limiter that admits every request immediately.
    pub fn unlimited(platform: Platform) -> Self {
        Self {
            platform,
            interval: Duration::ZERO,
            admissions: None,
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_limited(&self) -> bool {
        self.admissions.is_some()
    }

    /// Waits until this caller may start its request and returns the admission instant.
    pub async fn admit(&self) -> Result<Instant> {
        let Some(admissions) = &self.admissions else {
            return Ok(Instant::now());
        };

        let (ticket, admitted) = oneshot::channel();
        admissions
            .send(ticket)
            .await
            .map_err(|_| PollError::LimiterClosed(self.platform))?;
        admitted
            .await
            .map_err(|_| PollError::LimiterClosed(self.platform))
    }
}

async fn admission_loop(platform: Platform, interval: Duration, mut rx: mpsc::Receiver<Ticket>) {
    let mut last_admitted: Option<Instant> = None;

    while let Some(ticket) = rx.recv().await {
        if let Some(previous) = last_admitted {
            sleep_until(previous + interval).await;
        }
        let now = Instant::now();
        last_admitted = Some(now);

        if ticket.send(now).is_err() {
            // the caller gave up waiting; the slot is still spent
            debug!("{} admission dropped by caller", platform);
        }
    }

    debug!("rate limiter for {} stopped", platform);
}
