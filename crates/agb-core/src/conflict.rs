//! Overlap checking against a tenant's active appointments.
//!
//! A candidate interval is expanded by the tenant buffer on both sides and
//! compared against every active appointment's raw `[start, end)` under the
//! half-open rule `a.start < b.end && a.end > b.start`. The same query backs
//! the informational check during slot enumeration and the authoritative
//! re-check inside the booking transaction.

use chrono::{DateTime, Duration, Utc};

use crate::{
    domain::{AppointmentId, TenantId},
    ports::SchedulingStore,
    Result,
};

/// True when the buffer-expanded candidate interval touches no active
/// appointment. `exclude` skips one appointment id so a reschedule does not
/// collide with itself.
pub async fn is_free(
    store: &dyn SchedulingStore,
    tenant: TenantId,
    candidate_start: DateTime<Utc>,
    duration_min: u32,
    buffer_min: u32,
    exclude: Option<AppointmentId>,
) -> Result<bool> {
    let (range_start, range_end) = expanded_range(candidate_start, duration_min, buffer_min);
    let overlapping = store
        .count_active_overlapping(tenant, range_start, range_end, exclude)
        .await?;
    Ok(overlapping == 0)
}

/// `[start - buffer, start + duration + buffer)`.
pub fn expanded_range(
    candidate_start: DateTime<Utc>,
    duration_min: u32,
    buffer_min: u32,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let buffer = Duration::minutes(buffer_min as i64);
    let duration = Duration::minutes(duration_min as i64);
    (candidate_start - buffer, candidate_start + duration + buffer)
}
