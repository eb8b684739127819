// limitwatch/src/scheduler.rs
//
// Rate-paced, bounded-concurrency task scheduler.
//
// Every outbound log-store call goes through one shared RateScheduler, no
// matter how deep the caller sits (export pagination, per-occurrence fan-out).
//
// Model:
//   queued      — job sits in the FIFO channel, not yet admitted
//   dispatched  — dispatcher took a concurrency slot and spawned the job
//   completed   — job finished (Ok or Err); its slot is held for one pacing
//                 interval (60s / rate) before the dispatcher may reuse it
//
// Ceiling == rate per minute. Holding a finished job's slot through the pacing
// interval means any C+1 consecutive admissions span at least one interval.
//
// No priority, no cancellation, no per-task timeout: a hung task pins its slot.
// A failed task reports to its own caller only; siblings are unaffected.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, warn};

use crate::error::{ConfigError, SchedulerError};

/// Boxed unit of work; settles its own stats before reporting to the caller.
type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub queued:    u64,
    pub in_flight: u64,
    pub completed: u64,
    pub failed:    u64,
}

struct Shared {
    ceiling: usize,
    pace:    Duration,
    stats:   Mutex<SchedulerStats>,
}

impl Shared {
    fn settle(&self, ok: bool) {
        let mut s = self.stats.lock();
        s.in_flight -= 1;
        if ok { s.completed += 1 } else { s.failed += 1 }
    }
}

/// Cloneable handle; all clones feed the same queue and dispatcher.
#[derive(Clone)]
pub struct RateScheduler {
    tx:     mpsc::UnboundedSender<Job>,
    shared: Arc<Shared>,
}

impl RateScheduler {
    /// Spawns the dispatcher onto the current tokio runtime.
    /// The dispatcher exits once every handle has been dropped and the queue drained.
    pub fn new(rate_per_minute: u32) -> Result<Self, ConfigError> {
        if rate_per_minute == 0 {
            return Err(ConfigError::ZeroRate);
        }
        let shared = Arc::new(Shared {
            ceiling: rate_per_minute as usize,
            pace:    Duration::from_micros(60_000_000 / rate_per_minute as u64),
            stats:   Mutex::new(SchedulerStats::default()),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch_loop(rx, Arc::clone(&shared)));
        Ok(Self { tx, shared })
    }

    pub fn ceiling(&self) -> usize { self.shared.ceiling }

    /// Delay a finished task's slot is held before reuse.
    pub fn pace(&self) -> Duration { self.shared.pace }

    pub fn stats(&self) -> SchedulerStats { *self.shared.stats.lock() }

    /// Enqueue `task` now and return a future for its outcome.
    ///
    /// Admission order is call order. The task's own error comes back untouched;
    /// scheduler-side failures are converted into `E`.
    pub fn submit<F, T, E>(&self, task: F) -> impl Future<Output = Result<T, E>> + Send + 'static
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<SchedulerError> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel::<Result<T, E>>();
        let shared = Arc::clone(&self.shared);
        let job: Job = Box::pin(async move {
            let outcome = task.await;
            shared.settle(outcome.is_ok());
            // Caller may have stopped waiting; the work still counts against pacing.
            let _ = done_tx.send(outcome);
        });

        let admitted = self.enqueue(job);
        async move {
            admitted?;
            match done_rx.await {
                Ok(outcome) => outcome,
                Err(_)      => Err(SchedulerError::TaskLost.into()),
            }
        }
    }

    fn enqueue(&self, job: Job) -> Result<(), SchedulerError> {
        self.shared.stats.lock().queued += 1;
        if self.tx.send(job).is_err() {
            self.shared.stats.lock().queued -= 1;
            return Err(SchedulerError::Closed);
        }
        Ok(())
    }
}

async fn dispatch_loop(mut rx: mpsc::UnboundedReceiver<Job>, shared: Arc<Shared>) {
    let slots = Arc::new(Semaphore::new(shared.ceiling));

    while let Some(job) = rx.recv().await {
        // Head of line waits here; later jobs stay queued behind it.
        let permit = match Arc::clone(&slots).acquire_owned().await {
            Ok(p)  => p,
            Err(_) => break,
        };
        {
            let mut s = shared.stats.lock();
            s.queued    -= 1;
            s.in_flight += 1;
            debug!(in_flight = s.in_flight, queued = s.queued, "dispatch");
        }

        let shared = Arc::clone(&shared);
        tokio::spawn(async move {
            // Inner spawn isolates a panicking task so the slot still gets paced and released.
            if let Err(e) = tokio::spawn(job).await {
                warn!("Scheduled task aborted: {}", e);
                shared.settle(false);
            }
            tokio::time::sleep(shared.pace).await;
            drop(permit);
        });
    }
    debug!("Scheduler dispatcher stopped");
}
