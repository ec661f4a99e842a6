//! Candidate slot search and presentation curation.
//!
//! The search scans calendar dates forward from a hint, walks each open
//! window on a fixed 15-minute grid, and keeps candidates that clear the
//! policy gates (same-day allowance, blackout, booking horizon, daily cap,
//! minimum notice) and the conflict check. The search is unbounded except
//! for `max_results`; the small, well-distributed list shown to a user is
//! produced separately by [`curate`], so presentation limits never leak into
//! availability logic.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::{
    conflict,
    domain::{BookingPolicy, SlotOffer, TenantId, TimeOfDay},
    hours,
    ports::SchedulingStore,
    timezone, Result,
};

/// Grid step for candidate starts.
pub const SLOT_STEP_MIN: u32 = 15;

/// Offered-list bounds: at most 2 morning + 2 afternoon per day, 6 overall.
pub const MAX_PER_HALF_DAY: usize = 2;
pub const MAX_OFFERED_SLOTS: usize = 6;

/// Civil hour before which a slot counts as "morning".
const MORNING_END_HOUR: u8 = 12;

#[derive(Clone, Copy, Debug)]
pub struct SlotSearch {
    /// First date to consider; clamped to today in the tenant zone.
    pub from: NaiveDate,
    pub duration_min: u32,
    /// Raw-candidate cap across all scanned days.
    pub max_results: usize,
}

/// Enumerate acceptable start instants, chronologically.
///
/// "Today" and the booking horizon are both evaluated against the tenant's
/// civil zone; minimum notice compares absolute instants against `now`, so
/// the two gates cannot disagree near midnight.
pub async fn find_slots(
    store: &dyn SchedulingStore,
    tenant: TenantId,
    policy: &BookingPolicy,
    search: &SlotSearch,
    now: DateTime<Utc>,
) -> Result<Vec<DateTime<Utc>>> {
    let zone = policy.timezone;
    let today = timezone::civil_date(now, zone);
    let horizon_end = today + Duration::days(policy.booking_window_days as i64);
    let notice_cutoff = now + Duration::hours(policy.min_notice_hours as i64);

    let mut date = search.from.max(today);
    let mut found: Vec<DateTime<Utc>> = Vec::new();

    while date <= horizon_end && found.len() < search.max_results {
        if accept_date(policy, tenant, store, date, today).await? {
            scan_date(
                store,
                tenant,
                policy,
                zone,
                date,
                search,
                notice_cutoff,
                &mut found,
            )
            .await?;
        }
        date = match date.succ_opt() {
            Some(d) => d,
            None => break,
        };
    }

    tracing::debug!(
        tenant = tenant.0,
        hint = %search.from,
        candidates = found.len(),
        "slot search finished"
    );
    Ok(found)
}

/// Date-level gates: same-day allowance, blackout, daily cap.
async fn accept_date(
    policy: &BookingPolicy,
    tenant: TenantId,
    store: &dyn SchedulingStore,
    date: NaiveDate,
    today: NaiveDate,
) -> Result<bool> {
    if date == today && !policy.allow_same_day {
        return Ok(false);
    }
    if policy.is_blackout(date) {
        return Ok(false);
    }
    if let Some(cap) = policy.max_daily_appointments {
        let (day_start, day_end) = timezone::day_bounds(policy.timezone, date)?;
        let booked = store.count_active_between(tenant, day_start, day_end).await?;
        if booked >= cap as u64 {
            return Ok(false);
        }
    }
    Ok(true)
}

#[allow(clippy::too_many_arguments)]
async fn scan_date(
    store: &dyn SchedulingStore,
    tenant: TenantId,
    policy: &BookingPolicy,
    zone: Tz,
    date: NaiveDate,
    search: &SlotSearch,
    notice_cutoff: DateTime<Utc>,
    found: &mut Vec<DateTime<Utc>>,
) -> Result<()> {
    let windows = hours::open_windows_for(store, tenant, date).await?;

    for window in windows {
        let mut minute = window.start.minutes();
        // A candidate whose end lands exactly on the window end is valid.
        while minute + search.duration_min <= window.end.minutes() {
            if found.len() >= search.max_results {
                return Ok(());
            }

            let time = TimeOfDay::from_minutes(minute)?;
            let start = timezone::to_instant(zone, date, time)?;

            if start >= notice_cutoff
                && conflict::is_free(
                    store,
                    tenant,
                    start,
                    search.duration_min,
                    policy.buffer_min,
                    None,
                )
                .await?
            {
                found.push(start);
            }

            minute += SLOT_STEP_MIN;
        }
    }
    Ok(())
}

/// Reduce raw candidates to the short list a conversation can present:
/// grouped by day, at most two morning and two afternoon starts per day,
/// capped at six overall, chronological, with stable 1-based indices.
pub fn curate(zone: Tz, candidates: &[DateTime<Utc>]) -> Vec<SlotOffer> {
    let mut sorted = candidates.to_vec();
    sorted.sort();

    let mut offers: Vec<SlotOffer> = Vec::new();
    let mut current_day: Option<NaiveDate> = None;
    let mut morning_taken = 0usize;
    let mut afternoon_taken = 0usize;

    for start in sorted {
        if offers.len() >= MAX_OFFERED_SLOTS {
            break;
        }

        let day = timezone::civil_date(start, zone);
        if current_day != Some(day) {
            current_day = Some(day);
            morning_taken = 0;
            afternoon_taken = 0;
        }

        let is_morning = timezone::civil_time(start, zone).hour < MORNING_END_HOUR;
        let taken = if is_morning {
            &mut morning_taken
        } else {
            &mut afternoon_taken
        };
        if *taken >= MAX_PER_HALF_DAY {
            continue;
        }
        *taken += 1;

        offers.push(SlotOffer {
            index: offers.len() + 1,
            start,
        });
    }

    offers
}
