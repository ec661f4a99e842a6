//! Domain records for the scheduling engine.
//!
//! Everything here is tenant-scoped: no record is ever read or written
//! without a [`TenantId`], and no cross-tenant query exists anywhere in the
//! store ports.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc, Weekday};
use serde::Serialize;

use crate::{errors::Error, Result};

/// An independent business account. All scheduling data is partitioned by it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TenantId(pub i64);

/// Channel-provided conversation key (one per customer chat).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConversationId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AppointmentId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ServiceId(pub i64);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for AppointmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Civil wall-clock time within a day (`HH:MM`, minute precision).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
}

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(Error::Validation(format!(
                "invalid time of day: {hour:02}:{minute:02}"
            )));
        }
        Ok(Self { hour, minute })
    }

    /// Minutes since midnight.
    pub fn minutes(&self) -> u32 {
        self.hour as u32 * 60 + self.minute as u32
    }

    pub fn from_minutes(total: u32) -> Result<Self> {
        Self::new((total / 60) as u8, (total % 60) as u8)
    }
}

impl FromStr for TimeOfDay {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (h, m) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| Error::Validation(format!("invalid time of day: {s}")))?;
        let hour = h
            .parse::<u8>()
            .map_err(|_| Error::Validation(format!("invalid time of day: {s}")))?;
        let minute = m
            .parse::<u8>()
            .map_err(|_| Error::Validation(format!("invalid time of day: {s}")))?;
        Self::new(hour, minute)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// A contiguous open interval of civil time within a single day.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl TimeWindow {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Result<Self> {
        if start >= end {
            return Err(Error::Validation(format!(
                "window start {start} must be before end {end}"
            )));
        }
        Ok(Self { start, end })
    }
}

/// A day carries at most two disjoint open windows.
pub const MAX_WINDOWS_PER_DAY: usize = 2;

/// Validate the per-day window invariant: at most two ranges, each
/// `start < end`, and no overlap between them.
pub fn validate_windows(windows: &[TimeWindow]) -> Result<()> {
    if windows.len() > MAX_WINDOWS_PER_DAY {
        return Err(Error::Validation(format!(
            "at most {MAX_WINDOWS_PER_DAY} windows per day, got {}",
            windows.len()
        )));
    }
    for w in windows {
        if w.start >= w.end {
            return Err(Error::Validation(format!(
                "window start {} must be before end {}",
                w.start, w.end
            )));
        }
    }
    if let [a, b] = windows {
        let (first, second) = if a.start <= b.start { (a, b) } else { (b, a) };
        if second.start < first.end {
            return Err(Error::Validation(format!(
                "windows {}-{} and {}-{} overlap",
                a.start, a.end, b.start, b.end
            )));
        }
    }
    Ok(())
}

/// Recurring weekly hours: one row per (tenant, weekday). Missing rows read
/// as closed; rows are reset to closed rather than deleted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusinessHours {
    pub tenant: TenantId,
    pub weekday: Weekday,
    pub is_open: bool,
    pub windows: Vec<TimeWindow>,
}

impl BusinessHours {
    pub fn closed(tenant: TenantId, weekday: Weekday) -> Self {
        Self {
            tenant,
            weekday,
            is_open: false,
            windows: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_windows(&self.windows)
    }
}

/// Date-specific override (holiday, one-off schedule change). Takes
/// precedence over [`BusinessHours`] for that exact date.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HoursException {
    pub tenant: TenantId,
    pub date: NaiveDate,
    pub is_open: bool,
    pub windows: Vec<TimeWindow>,
}

impl HoursException {
    pub fn validate(&self) -> Result<()> {
        validate_windows(&self.windows)
    }
}

/// A bookable service offered by a tenant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Service {
    pub id: ServiceId,
    pub tenant: TenantId,
    pub name: String,
    /// Falls back to [`BookingPolicy::default_duration_min`] when absent.
    pub duration_min: Option<u32>,
    pub price_min: Option<i64>,
    pub price_max: Option<i64>,
    pub aliases: Vec<String>,
    pub enabled: bool,
}

/// Per-tenant booking rules. The timezone is parsed at load time; an invalid
/// IANA name never reaches this struct.
#[derive(Clone, Debug)]
pub struct BookingPolicy {
    pub tenant: TenantId,
    pub timezone: chrono_tz::Tz,
    pub buffer_min: u32,
    pub min_notice_hours: u32,
    pub booking_window_days: u32,
    pub allow_same_day: bool,
    pub max_daily_appointments: Option<u32>,
    pub blackout_dates: Vec<NaiveDate>,
    pub require_confirmation: bool,
    pub default_duration_min: u32,
}

impl BookingPolicy {
    pub fn is_blackout(&self, date: NaiveDate) -> bool {
        self.blackout_dates.contains(&date)
    }

    /// Initial status for a freshly booked appointment.
    pub fn initial_status(&self) -> AppointmentStatus {
        if self.require_confirmation {
            AppointmentStatus::Pending
        } else {
            AppointmentStatus::Confirmed
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Rescheduled,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Rescheduled => "rescheduled",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    /// Active appointments block the calendar; cancelled and no-show rows are
    /// kept for audit but never conflict.
    pub fn is_active(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::NoShow)
    }
}

impl FromStr for AppointmentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(AppointmentStatus::Pending),
            "confirmed" => Ok(AppointmentStatus::Confirmed),
            "rescheduled" => Ok(AppointmentStatus::Rescheduled),
            "cancelled" => Ok(AppointmentStatus::Cancelled),
            "no_show" => Ok(AppointmentStatus::NoShow),
            other => Err(Error::Validation(format!(
                "unknown appointment status: {other}"
            ))),
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A committed appointment. Rows are soft-deleted only: cancellation sets
/// `status` and `deleted_at` but the row persists.
#[derive(Clone, Debug)]
pub struct Appointment {
    pub id: AppointmentId,
    pub tenant: TenantId,
    pub conversation: Option<ConversationId>,
    pub customer_name: String,
    pub customer_phone: String,
    pub service_name: String,
    /// Absolute instants; never an ambiguous civil time.
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    /// IANA zone the booking was made in, kept for display.
    pub timezone: String,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Appointment {
    pub fn is_active(&self) -> bool {
        self.status.is_active() && self.deleted_at.is_none()
    }

    pub fn duration_min(&self) -> u32 {
        (self.end_at - self.start_at).num_minutes().max(0) as u32
    }

    /// The interval this appointment blocks, expanded by the tenant buffer.
    pub fn blocked_range(&self, buffer_min: u32) -> (DateTime<Utc>, DateTime<Utc>) {
        let buffer = Duration::minutes(buffer_min as i64);
        (self.start_at - buffer, self.end_at + buffer)
    }
}

/// Input for creating an appointment row. The store assigns the id.
#[derive(Clone, Debug)]
pub struct AppointmentDraft {
    pub tenant: TenantId,
    pub conversation: Option<ConversationId>,
    pub customer_name: String,
    pub customer_phone: String,
    pub service_name: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub timezone: String,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
}

/// Structured payload handed to notification collaborators after a booking.
#[derive(Clone, Debug, Serialize)]
pub struct BookingConfirmation {
    pub appointment_id: i64,
    pub service_name: String,
    pub start_label: String,
    pub status: String,
}

/// One curated slot as presented to the user, with its stable 1-based index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotOffer {
    pub index: usize,
    pub start: DateTime<Utc>,
}
