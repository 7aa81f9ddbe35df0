use std::fmt;
use std::str::FromStr;

use chrono::{NaiveTime, Timelike};
use thiserror::Error;

pub const TIME_FORMAT_HINT: &str = "Time should conform to format: hh:mm[am|pm]";

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum TimeOfDayError {
    #[error("time '{0}' is not of the form hh:mm[am|pm]")]
    Malformed(String),
    #[error("hour {hour} is out of range for '{input}'")]
    HourOutOfRange { input: String, hour: u32 },
    #[error("minute {minute} is out of range for '{input}'")]
    MinuteOutOfRange { input: String, minute: u32 },
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Meridiem {
    Am,
    Pm,
}

/// A validated daily update time.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct UpdateTime {
    time: NaiveTime,
}

impl UpdateTime {
    pub fn from_hm(hours: u32, minutes: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hours, minutes, 0).map(|time| Self { time })
    }

    pub fn parse(raw: &str) -> Result<Self, TimeOfDayError> {
        let input = raw.trim().to_ascii_lowercase();
        let malformed = || TimeOfDayError::Malformed(raw.to_string());

        let (clock, meridiem) = if let Some(rest) = input.strip_suffix("am") {
            (rest, Some(Meridiem::Am))
        } else if let Some(rest) = input.strip_suffix("pm") {
            (rest, Some(Meridiem::Pm))
        } else {
            (input.as_str(), None)
        };

        let (hour_text, minute_text) = clock.split_once(':').ok_or_else(malformed)?;
        if hour_text.is_empty()
            || hour_text.len() > 2
            || minute_text.len() != 2
            || !hour_text.bytes().all(|b| b.is_ascii_digit())
            || !minute_text.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(malformed());
        }
        let hour: u32 = hour_text.parse().map_err(|_| malformed())?;
        let minute: u32 = minute_text.parse().map_err(|_| malformed())?;

        if minute > 59 {
            return Err(TimeOfDayError::MinuteOutOfRange {
                input: raw.to_string(),
                minute,
            });
        }

        let hour_out_of_range = || TimeOfDayError::HourOutOfRange {
            input: raw.to_string(),
            hour,
        };
        let hours = match meridiem {
            None if hour <= 23 => hour,
            None => return Err(hour_out_of_range()),
            Some(_) if !(1..=12).contains(&hour) => return Err(hour_out_of_range()),
            Some(Meridiem::Am) => hour % 12,
            Some(Meridiem::Pm) => hour % 12 + 12,
        };

        Self::from_hm(hours, minute).ok_or_else(malformed)
    }

    #[cfg(test)]
    pub fn hours(&self) -> u32 {
        self.time.hour()
    }

    pub fn minutes(&self) -> u32 {
        self.time.minute()
    }

    pub fn as_naive_time(&self) -> NaiveTime {
        self.time
    }
}

impl FromStr for UpdateTime {
    type Err = TimeOfDayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Canonical 12-hour rendering, e.g. `2:30pm`. It parses back to the same
/// time.
impl fmt::Display for UpdateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (is_pm, hour12) = self.time.hour12();
        let meridiem = if is_pm { "pm" } else { "am" };
        write!(f, "{}:{:02}{}", hour12, self.minutes(), meridiem)
    }
}
