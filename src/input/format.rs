//! mIRC formatting codes and small text helpers shared by the renderers.

use chrono::{DateTime, TimeDelta, Utc};

/// Control byte that starts and ends a colored span.
pub const COLOR: char = '\x03';

/// mIRC palette entries used in notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Color {
    /// Green.
    Green = 3,
    /// Red.
    Red = 4,
    /// Brown (maroon).
    Brown = 5,
    /// Purple.
    Purple = 6,
    /// Orange.
    Orange = 7,
    /// Yellow.
    Yellow = 8,
    /// Light blue.
    LightBlue = 12,
    /// Pink.
    Pink = 13,
    /// Grey.
    Grey = 14,
    /// Light grey.
    LightGrey = 15,
}

/// Wrap `text` in a color span.
pub fn paint(color: Color, text: impl std::fmt::Display) -> String {
    format!("{COLOR}{:02}{text}{COLOR}", color as u8)
}

/// First seven characters of a commit hash.
pub fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}

/// First line of a possibly multi-line message.
pub fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim_end()
}

/// Human relative age, e.g. `since 5 minutes`.
pub fn since(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let age = now.signed_duration_since(then).max(TimeDelta::zero());

    // Months are 30 days, years 365.
    let (count, unit) = if age.num_seconds() == 0 {
        return "since now".to_owned();
    } else if age.num_minutes() == 0 {
        (age.num_seconds(), "second")
    } else if age.num_hours() == 0 {
        (age.num_minutes(), "minute")
    } else if age.num_days() == 0 {
        (age.num_hours(), "hour")
    } else if age.num_weeks() == 0 {
        (age.num_days(), "day")
    } else if age.num_days() < 30 {
        (age.num_weeks(), "week")
    } else if age.num_days() < 365 {
        (age.num_days() / 30, "month")
    } else {
        (age.num_days() / 365, "year")
    };
    let plural = if count == 1 { "" } else { "s" };
    format!("since {count} {unit}{plural}")
}
