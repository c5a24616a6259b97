use crate::auction::types::{AuctionSession, AuctionStatus};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const MS_PER_SECOND: i64 = 1_000;
const MS_PER_MINUTE: i64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;
pub const ENDED_LABEL: &str = "ENDED";
pub const COMPUTING_LABEL: &str = "computing";

pub trait WallClock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now_ms(&self) -> i64 {
        now_unix_ms()
    }
}

/// Clock that only moves when told to; used by simulations and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn advance(&self, delta_ms: i64) -> i64 {
        self.now_ms.fetch_add(delta_ms, Ordering::Relaxed) + delta_ms
    }
}

impl WallClock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::Relaxed)
    }
}

pub fn now_unix_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CountdownPhase {
    Computing,
    Active,
    EndingSoon,
    Ended,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CountdownTick {
    pub phase: CountdownPhase,
    pub remaining_ms: i64,
    pub label: String,
    pub disable_bidding: bool,
}

#[derive(Debug, Clone)]
pub struct CountdownClock {
    end_time_ms: Option<i64>,
    ending_soon_threshold_ms: i64,
    phase: CountdownPhase,
    ended_by_status: bool,
    disable_signalled: bool,
}

impl CountdownClock {
    pub fn new(ending_soon_threshold_ms: i64) -> Self {
        Self {
            end_time_ms: None,
            ending_soon_threshold_ms,
            phase: CountdownPhase::Computing,
            ended_by_status: false,
            disable_signalled: false,
        }
    }

    pub fn phase(&self) -> CountdownPhase {
        self.phase
    }

    pub fn end_time_ms(&self) -> Option<i64> {
        self.end_time_ms
    }

    /// Restarts the machine from `Computing` when the end time moves. Returns whether it did.
    pub fn set_end_time(&mut self, end_time_ms: i64) -> bool {
        if self.end_time_ms == Some(end_time_ms) {
            return false;
        }
        self.end_time_ms = Some(end_time_ms);
        self.phase = CountdownPhase::Computing;
        self.ended_by_status = false;
        self.disable_signalled = false;
        true
    }

    pub fn observe_session(&mut self, session: &AuctionSession) -> bool {
        let restarted = self.set_end_time(session.end_time_ms);
        if session.status == AuctionStatus::Ended {
            self.ended_by_status = true;
        }
        restarted
    }

    /// Advances the machine to `now_ms`. Returns `None` once frozen in `Ended` or before an end time is known.
    pub fn tick(&mut self, now_ms: i64) -> Option<CountdownTick> {
        if self.phase == CountdownPhase::Ended {
            return None;
        }
        let end_time_ms = self.end_time_ms?;

        let remaining_ms = end_time_ms.saturating_sub(now_ms);
        let next_phase = if remaining_ms <= 0 || self.ended_by_status {
            CountdownPhase::Ended
        } else if remaining_ms <= self.ending_soon_threshold_ms {
            CountdownPhase::EndingSoon
        } else {
            CountdownPhase::Active
        };

        let disable_bidding = next_phase == CountdownPhase::Ended && !self.disable_signalled;
        if disable_bidding {
            self.disable_signalled = true;
        }
        self.phase = next_phase;

        let remaining_ms = if next_phase == CountdownPhase::Ended {
            0
        } else {
            remaining_ms
        };

        Some(CountdownTick {
            phase: next_phase,
            remaining_ms,
            label: format_remaining(next_phase, remaining_ms),
            disable_bidding,
        })
    }
}

pub fn format_remaining(phase: CountdownPhase, remaining_ms: i64) -> String {
    match phase {
        CountdownPhase::Computing => COMPUTING_LABEL.to_string(),
        CountdownPhase::Ended => ENDED_LABEL.to_string(),
        CountdownPhase::Active | CountdownPhase::EndingSoon => {
            let remaining_ms = remaining_ms.max(0);
            let days = remaining_ms / MS_PER_DAY;
            let hours = (remaining_ms % MS_PER_DAY) / MS_PER_HOUR;
            if days > 0 {
                return format!("{days}d {hours}h");
            }
            let minutes = (remaining_ms % MS_PER_HOUR) / MS_PER_MINUTE;
            let seconds = (remaining_ms % MS_PER_MINUTE) / MS_PER_SECOND;
            format!("{hours:02}:{minutes:02}:{seconds:02}")
        }
    }
}
