//! Fixed-period task scheduler guarding the remote API quota
//!
//! A [`RateLimitedScheduler`] fires once per tick period. Each tick takes at
//! most one task from the front of its queue, runs it, and puts it back at
//! the tail if the task asks to repeat. Several tasks therefore share the
//! tick budget round-robin instead of multiplying it.

mod rate_limited;

pub use rate_limited::RateLimitedScheduler;

/// A unit of work run on a scheduler tick
///
/// `run` executes on the scheduler's tick loop and must not block on network
/// I/O. Asynchronous work it starts keeps running after the tick ends.
pub trait RateLimitedTask: Send {
    /// Performs one invocation of the task
    fn run(&mut self) -> crate::Result<()>;

    /// Whether the task should be queued again after this invocation
    fn repeat(&self) -> bool;

    /// Name used in log messages
    fn name(&self) -> &str {
        "task"
    }
}
