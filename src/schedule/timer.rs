use chrono::{DateTime, Duration, Local, LocalResult, Offset, TimeZone};

use crate::schedule::time_of_day::UpdateTime;

pub const WATCHDOG_INTERVAL_SECS: i64 = 60;

/// The single outstanding daily update timer.
#[derive(Debug, Default)]
pub struct UpdateTimer {
    deadline: Option<DateTime<Local>>,
}

impl UpdateTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any previously armed deadline.
    pub fn arm(&mut self, time: &UpdateTime, now: DateTime<Local>) -> DateTime<Local> {
        let deadline = next_update_after(time, &now, &Local);
        self.deadline = Some(deadline);
        deadline
    }

    /// Arms from a raw settings string, or disarms when it does not validate.
    pub fn rearm(&mut self, raw: &str, now: DateTime<Local>) -> Option<DateTime<Local>> {
        match raw.parse::<UpdateTime>() {
            Ok(time) => Some(self.arm(&time, now)),
            Err(err) => {
                log::warn!("update timer disarmed: {err}");
                self.disarm();
                None
            }
        }
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<DateTime<Local>> {
        self.deadline
    }

    #[cfg(test)]
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Consumes the deadline once it has passed. The caller re-arms.
    pub fn take_due(&mut self, now: DateTime<Local>) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Fixed-interval timer that re-asserts the last status message.
#[derive(Debug, Default)]
pub struct Watchdog {
    deadline: Option<DateTime<Local>>,
}

impl Watchdog {
    pub fn start(&mut self, now: DateTime<Local>) {
        self.deadline = Some(now + Duration::seconds(WATCHDOG_INTERVAL_SECS));
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<DateTime<Local>> {
        self.deadline
    }

    pub fn take_due(&mut self, now: DateTime<Local>) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.start(now);
                true
            }
            _ => false,
        }
    }
}

fn offset_seconds<Tz: TimeZone>(dt: &DateTime<Tz>) -> i64 {
    i64::from(dt.offset().fix().local_minus_utc())
}

/// Today's occurrence of `time`, or tomorrow's when today's is not in the
/// future. Rolling over adds a raw 24 hours and then compensates for any UTC
/// offset change between the two instants, so the wall-clock time holds
/// across DST transitions. A wall-clock time inside a DST gap resolves with
/// the offset in force before the gap.
pub fn next_update_after<Tz>(time: &UpdateTime, now: &DateTime<Tz>, timezone: &Tz) -> DateTime<Tz>
where
    Tz: TimeZone,
    Tz::Offset: Copy,
{
    let naive = now.date_naive().and_time(time.as_naive_time());
    let candidate = match timezone.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(first, _second) => first,
        LocalResult::None => (naive - Duration::seconds(offset_seconds(now)))
            .and_utc()
            .with_timezone(timezone),
    };
    if candidate > *now {
        return candidate;
    }

    let shifted = candidate + Duration::hours(24);
    let drift = offset_seconds(&candidate) - offset_seconds(&shifted);
    let corrected = shifted + Duration::seconds(drift);
    if corrected.naive_local().time() == time.as_naive_time() {
        corrected
    } else {
        // Tomorrow's wall-clock time does not exist; fire right after the gap.
        shifted
    }
}
