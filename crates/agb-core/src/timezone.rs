//! Civil time ↔ instant conversion against the IANA zone database.
//!
//! The conversion deliberately uses a single guess-and-shift pass instead of
//! a fixed-point iteration: take the intended wall clock as if it were UTC,
//! observe what wall clock that instant shows in the target zone, and shift
//! by the difference. The shift is exact whenever the zone offset is the same
//! at the guessed and the shifted instant, which holds everywhere except
//! within one offset-width of a DST transition. Around a transition the
//! result can land one step off, and a nonexistent civil time resolves to a
//! nearby instant rather than an error. Known approximation.

use chrono::{DateTime, NaiveDate, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

use crate::{
    domain::TimeOfDay,
    errors::Error,
    Result,
};

/// Parse an IANA zone name. An unknown zone is tenant misconfiguration and
/// therefore fatal, not a user-input problem.
pub fn parse_zone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| Error::Config(format!("unknown IANA timezone: {name}")))
}

/// Convert a civil (date, HH:MM) in `zone` to an absolute instant.
pub fn to_instant(zone: Tz, date: NaiveDate, time: TimeOfDay) -> Result<DateTime<Utc>> {
    let intended = date
        .and_hms_opt(time.hour as u32, time.minute as u32, 0)
        .ok_or_else(|| Error::Validation(format!("invalid civil time {date} {time}")))?;

    let guess = Utc.from_utc_datetime(&intended);
    let observed = guess.with_timezone(&zone).naive_local();
    let delta = intended - observed;
    Ok(guess + delta)
}

/// Calendar date the instant falls on in `zone`.
pub fn civil_date(instant: DateTime<Utc>, zone: Tz) -> NaiveDate {
    instant.with_timezone(&zone).date_naive()
}

/// Weekday the instant falls on in `zone`.
pub fn civil_weekday(instant: DateTime<Utc>, zone: Tz) -> Weekday {
    use chrono::Datelike;
    instant.with_timezone(&zone).weekday()
}

/// Wall-clock HH:MM the instant shows in `zone`.
pub fn civil_time(instant: DateTime<Utc>, zone: Tz) -> TimeOfDay {
    use chrono::Timelike;
    let local = instant.with_timezone(&zone);
    TimeOfDay {
        hour: local.hour() as u8,
        minute: local.minute() as u8,
    }
}

/// Instant range `[midnight, next midnight)` of `date` in `zone`. On DST
/// transition days the range is 23 or 25 hours long.
pub fn day_bounds(zone: Tz, date: NaiveDate) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let midnight = TimeOfDay { hour: 0, minute: 0 };
    let next = date
        .succ_opt()
        .ok_or_else(|| Error::Validation(format!("date out of range: {date}")))?;
    Ok((to_instant(zone, date, midnight)?, to_instant(zone, next, midnight)?))
}
