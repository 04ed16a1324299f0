use crate::{
    error::SyncError,
    interval::PollPolicy,
    types::{PollerState, StopReason},
};

/// Result of one poll tick, fed back into the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Fetch succeeded and the merge produced new or updated messages.
    NewMessages,
    /// Fetch succeeded but nothing changed.
    NoChange,
    /// Tick fired while the app was backgrounded; no fetch was made.
    Skipped,
    /// Fetch failed. `auth` marks 401/403 failures.
    Failed {
        /// Whether the failure was an authorization failure.
        auth: bool,
    },
}

/// What the driving task should do after a finished tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDirective {
    /// Sleep for `interval_ms`, then run the next tick.
    Sleep {
        /// Interval until the next tick.
        interval_ms: u64,
    },
    /// Terminate the poll task.
    Stop {
        /// Why the poller stopped.
        reason: StopReason,
    },
}

/// Explicit poller state machine.
///
/// Replaces the self-rescheduling timer-callback pattern: the driving
/// task calls `start`, then alternates `begin_tick`/`finish_tick`, and
/// `stop` is safe to call from any state, any number of times. Time is
/// passed in as milliseconds so the machine stays clock-free.
#[derive(Debug, Clone)]
pub struct PollerStateMachine {
    state: PollerState,
    policy: PollPolicy,
    failure_threshold: u32,
    interval_ms: u64,
    consecutive_failures: u32,
    last_activity_ms: u64,
    stop_reason: Option<StopReason>,
}

impl PollerStateMachine {
    /// Create an idle poller with the given interval policy.
    ///
    /// `failure_threshold` is the number of consecutive failed ticks
    /// tolerated before the poller stops itself (`>= 1`).
    pub fn new(policy: PollPolicy, failure_threshold: u32) -> Self {
        Self {
            state: PollerState::Idle,
            interval_ms: policy.base_ms(),
            policy,
            failure_threshold: failure_threshold.max(1),
            consecutive_failures: 0,
            last_activity_ms: 0,
            stop_reason: None,
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    /// Current poll interval in milliseconds.
    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// Why the poller stopped, once it has.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    /// Arm the poller. Valid only from `Idle`; a stopped machine is
    /// terminal and a fresh one must be created to poll again.
    pub fn start(&mut self, now_ms: u64) -> Result<(), SyncError> {
        if self.state != PollerState::Idle {
            return Err(SyncError::invalid_transition(self.state, "start"));
        }

        self.state = PollerState::Scheduled;
        self.interval_ms = self.policy.base_ms();
        self.consecutive_failures = 0;
        self.last_activity_ms = now_ms;
        Ok(())
    }

    /// Mark the scheduled tick as running.
    pub fn begin_tick(&mut self) -> Result<(), SyncError> {
        if self.state != PollerState::Scheduled {
            return Err(SyncError::invalid_transition(self.state, "begin_tick"));
        }

        self.state = PollerState::Running;
        Ok(())
    }

    /// Feed the tick result back and learn what to do next.
    ///
    /// `Skipped` ticks leave both the interval and the failure streak
    /// untouched; failures accumulate until the threshold stops the
    /// poller, with the reason reflecting whether the final failure was
    /// an auth failure.
    pub fn finish_tick(
        &mut self,
        outcome: TickOutcome,
        now_ms: u64,
    ) -> Result<PollDirective, SyncError> {
        if self.state != PollerState::Running {
            return Err(SyncError::invalid_transition(self.state, "finish_tick"));
        }

        match outcome {
            TickOutcome::NewMessages => {
                self.consecutive_failures = 0;
                self.last_activity_ms = now_ms;
                self.interval_ms = self.policy.next_interval_ms(self.interval_ms, true, 0);
            }
            TickOutcome::NoChange => {
                self.consecutive_failures = 0;
                let idle_for_ms = now_ms.saturating_sub(self.last_activity_ms);
                self.interval_ms = self.policy.next_interval_ms(self.interval_ms, false, idle_for_ms);
            }
            TickOutcome::Skipped => {}
            TickOutcome::Failed { auth } => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures >= self.failure_threshold {
                    let reason = if auth {
                        StopReason::AuthExpired
                    } else {
                        StopReason::Failed
                    };
                    self.state = PollerState::Stopped;
                    self.stop_reason = Some(reason);
                    return Ok(PollDirective::Stop { reason });
                }
            }
        }

        self.state = PollerState::Scheduled;
        Ok(PollDirective::Sleep {
            interval_ms: self.interval_ms,
        })
    }

    /// Stop the poller. Idempotent: callable from any state, including
    /// `Stopped` and never-started, without error.
    pub fn stop(&mut self) {
        if self.state == PollerState::Stopped {
            return;
        }

        self.state = PollerState::Stopped;
        self.stop_reason = Some(StopReason::Requested);
    }
}
