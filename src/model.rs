use std::{fmt, time::Duration};


/// Blocking contract requested by the submitting thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitMode {
    NoWait,
    WaitUntilStart,
    WaitUntilFinish,
}

impl WaitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoWait => "no-wait",
            Self::WaitUntilStart => "wait-until-start",
            Self::WaitUntilFinish => "wait-until-finish",
        }
    }
}

impl fmt::Display for WaitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of a single submission.
///
/// The happy path is `Created -> Started -> Completed`. `TimedOut` and
/// `Rejected` are terminal exits taken only from `Created`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkState {
    Created,
    Started,
    Completed,
    TimedOut,
    Rejected,
}

impl WorkState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::TimedOut | Self::Rejected)
    }

    /// True once a waiter blocked in `mode` may return.
    #[inline]
    pub fn releases(&self, mode: WaitMode) -> bool {
        match mode {
            WaitMode::NoWait => true,
            WaitMode::WaitUntilStart => *self != Self::Created,
            WaitMode::WaitUntilFinish => self.is_terminal(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::Completed => "completed",
            Self::TimedOut => "timed-out",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for WorkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct PoolMetrics {
    pub active_tasks: usize,
    pub idle_workers: usize,
    pub queued_tasks: usize,
    pub total_enqueued: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub rejected_tasks: usize,
}

impl PoolMetrics {
    pub fn utilization(&self) -> f64 {
        if self.active_tasks + self.idle_workers == 0 {
            return 0.0;
        }
        self.active_tasks as f64 / (self.active_tasks + self.idle_workers) as f64
    }

    pub fn queue_pressure(&self) -> f64 {
        self.queued_tasks as f64
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.completed_tasks + self.failed_tasks;
        if total == 0 {
            return 1.0;
        }
        self.completed_tasks as f64 / total as f64
    }
}

/// Point-in-time copy of a work manager's statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkStatsSnapshot {
    pub submitted: u64,
    pub queued: u64,
    pub dequeued: u64,
    pub rejected: u64,
    pub timed_out: u64,
    pub in_progress: u64,
    pub completed: u64,
    /// Number of queue-wait samples behind `total_wait`.
    pub waits: u64,
    pub total_wait: Duration,
    pub max_wait: Duration,
}

impl WorkStatsSnapshot {
    /// Mean time spent in the queue by dequeued work.
    pub fn mean_wait(&self) -> Duration {
        if self.waits == 0 {
            return Duration::ZERO;
        }
        self.total_wait / u32::try_from(self.waits).unwrap_or(u32::MAX)
    }
}
