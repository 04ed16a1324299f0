/// Adaptive poll interval policy.
///
/// The interval starts at `base_ms` and widens by `step_ms` per quiet
/// tick once no new messages have been seen for `idle_after_ms`, up to
/// `max_ms`. Any tick that finds new messages snaps back to `base_ms`.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    base_ms: u64,
    step_ms: u64,
    max_ms: u64,
    idle_after_ms: u64,
}

impl PollPolicy {
    pub fn new(base_ms: u64, step_ms: u64, max_ms: u64, idle_after_ms: u64) -> Self {
        let base_ms = base_ms.max(1);
        Self {
            base_ms,
            step_ms: step_ms.max(1),
            max_ms: max_ms.max(base_ms),
            idle_after_ms,
        }
    }

    pub fn base_ms(&self) -> u64 {
        self.base_ms
    }

    pub fn max_ms(&self) -> u64 {
        self.max_ms
    }

    /// Next interval after a successful tick.
    ///
    /// `found_new` marks whether the tick merged new messages and
    /// `idle_for_ms` is the time since the last detected activity. The
    /// result always stays within `[base_ms, max_ms]`.
    pub fn next_interval_ms(&self, current_ms: u64, found_new: bool, idle_for_ms: u64) -> u64 {
        if found_new {
            return self.base_ms;
        }

        let current = current_ms.clamp(self.base_ms, self.max_ms);
        if idle_for_ms >= self.idle_after_ms {
            current.saturating_add(self.step_ms).min(self.max_ms)
        } else {
            current
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(3_000, 1_000, 10_000, 30_000)
    }
}
