use crate::config::SchedulerConfig;
use crate::scheduler::RateLimitedTask;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

type TaskQueue = Arc<Mutex<VecDeque<Box<dyn RateLimitedTask>>>>;

/// Runs at most one queued task per tick period
///
/// The tick loop lives on the tokio runtime the scheduler was started on.
/// Missed ticks are delayed rather than bursted, so the invocation rate never
/// exceeds one per period.
pub struct RateLimitedScheduler {
    /// Tasks waiting for a tick, front runs next
    tasks: TaskQueue,

    /// Number of ticks that ran a task
    invocations: Arc<AtomicU64>,

    shutdown_tx: watch::Sender<bool>,

    handle: Mutex<Option<JoinHandle<()>>>,

    period: Duration,
}

impl RateLimitedScheduler {
    /// Starts a scheduler with the configured timing
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: &SchedulerConfig) -> Self {
        Self::with_timing(config.tick_period(), config.initial_delay())
    }

    /// Starts a scheduler firing every `period` after `initial_delay`
    pub fn with_timing(period: Duration, initial_delay: Duration) -> Self {
        let tasks: TaskQueue = Arc::new(Mutex::new(VecDeque::new()));
        let invocations = Arc::new(AtomicU64::new(0));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(tick_loop(
            Arc::clone(&tasks),
            Arc::clone(&invocations),
            shutdown_rx,
            period,
            initial_delay,
        ));

        info!(
            period_ms = period.as_millis() as u64,
            initial_delay_ms = initial_delay.as_millis() as u64,
            "Rate-limited scheduler started"
        );

        Self {
            tasks,
            invocations,
            shutdown_tx,
            handle: Mutex::new(Some(handle)),
            period,
        }
    }

    /// Enqueues a task at the tail of the queue
    pub fn schedule(&self, task: Box<dyn RateLimitedTask>) {
        if self.is_closed() {
            warn!(task = task.name(), "Scheduler is closed, task not scheduled");
            return;
        }
        debug!(task = task.name(), "Task scheduled");
        lock(&self.tasks).push_back(task);
    }

    /// Number of tasks waiting for a tick
    pub fn pending_tasks(&self) -> usize {
        lock(&self.tasks).len()
    }

    /// Number of task invocations so far
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Stops future ticks
    ///
    /// A task invocation in progress finishes, asynchronous work it started
    /// is not cancelled.
    pub fn close(&self) {
        if !self.shutdown_tx.send_replace(true) {
            info!(
                invocations = self.invocations(),
                pending = self.pending_tasks(),
                "Rate-limited scheduler closed"
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Waits for the tick loop to exit after [`close`](Self::close)
    pub async fn join(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Scheduler tick loop failed: {}", e);
            }
        }
    }
}

impl Drop for RateLimitedScheduler {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn tick_loop(
    tasks: TaskQueue,
    invocations: Arc<AtomicU64>,
    mut shutdown_rx: watch::Receiver<bool>,
    period: Duration,
    initial_delay: Duration,
) {
    let mut ticker = time::interval_at(Instant::now() + initial_delay, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if *shutdown_rx.borrow() {
                    break;
                }
                if run_next(&tasks) {
                    invocations.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    debug!("Scheduler tick loop exited");
}

/// Runs the task at the front of the queue, returns whether one ran
fn run_next(tasks: &TaskQueue) -> bool {
    let Some(mut task) = lock(tasks).pop_front() else {
        return false;
    };

    match panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(task = task.name(), "Task invocation failed: {}", e),
        Err(_) => error!(task = task.name(), "Task invocation panicked"),
    }

    if task.repeat() {
        lock(tasks).push_back(task);
    } else {
        debug!(task = task.name(), "Task finished, not re-queued");
    }

    true
}
