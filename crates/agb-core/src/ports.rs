//! Hexagonal ports for the collaborators the scheduling core does not own:
//! the persistent store and the wall clock. Adapters live in sibling crates
//! (`agb-storage` for SQLite); [`crate::memstore::MemoryStore`] is the
//! in-process implementation used by tests and single-node deployments.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc, Weekday};

use crate::{
    domain::{
        Appointment, AppointmentDraft, AppointmentId, BookingPolicy, BusinessHours,
        HoursException, Service, TenantId,
    },
    Result,
};

/// Persistence port. Every query is scoped by tenant; implementations must
/// never let one tenant observe another's rows.
///
/// The three appointment mutations are each a single atomic operation:
/// `create_appointment` and `reschedule_appointment` re-run the overlap
/// check inside their transactional scope, which is what closes the
/// book-time race on a single store.
#[async_trait]
pub trait SchedulingStore: Send + Sync {
    // --- tenant configuration, reads ---

    /// `NotFound` when the tenant has no policy row.
    async fn booking_policy(&self, tenant: TenantId) -> Result<BookingPolicy>;

    async fn services(&self, tenant: TenantId) -> Result<Vec<Service>>;

    /// Weekly hours for one weekday; `None` reads as closed.
    async fn business_hours(
        &self,
        tenant: TenantId,
        weekday: Weekday,
    ) -> Result<Option<BusinessHours>>;

    async fn hours_exception(
        &self,
        tenant: TenantId,
        date: NaiveDate,
    ) -> Result<Option<HoursException>>;

    // --- tenant configuration, writes ---

    async fn upsert_policy(&self, policy: BookingPolicy) -> Result<()>;

    async fn upsert_service(&self, service: Service) -> Result<Service>;

    async fn upsert_business_hours(&self, hours: BusinessHours) -> Result<()>;

    async fn upsert_hours_exception(&self, exception: HoursException) -> Result<()>;

    // --- appointments ---

    async fn appointment(
        &self,
        tenant: TenantId,
        id: AppointmentId,
    ) -> Result<Option<Appointment>>;

    /// Count active appointments whose `[start, end)` intersects
    /// `[range_start, range_end)` under the half-open rule
    /// `start < range_end && end > range_start`. `exclude` removes one id
    /// from consideration (reschedule checks against everyone but itself).
    async fn count_active_overlapping(
        &self,
        tenant: TenantId,
        range_start: DateTime<Utc>,
        range_end: DateTime<Utc>,
        exclude: Option<AppointmentId>,
    ) -> Result<u64>;

    /// Count active appointments starting within `[start, end)`; used for
    /// the per-day cap.
    async fn count_active_between(
        &self,
        tenant: TenantId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64>;

    /// Atomically validate and insert. Fails with `Conflict` when the
    /// buffer-expanded interval overlaps an active appointment; returns the
    /// existing row unchanged when the same tenant + phone + exact start is
    /// already active (duplicate-submission guard).
    async fn create_appointment(
        &self,
        draft: AppointmentDraft,
        buffer_min: u32,
    ) -> Result<Appointment>;

    /// Atomically move an appointment, re-checking overlap against everyone
    /// except itself, and mark it rescheduled. `NotFound` for unknown or
    /// soft-deleted ids.
    async fn reschedule_appointment(
        &self,
        tenant: TenantId,
        id: AppointmentId,
        new_start: DateTime<Utc>,
        new_end: DateTime<Utc>,
        buffer_min: u32,
    ) -> Result<Appointment>;

    /// Cancel a batch of ids in one update: set status cancelled and
    /// `deleted_at = now`, never removing rows. Already-cancelled ids are
    /// no-op successes; unknown ids are `NotFound`.
    async fn cancel_appointments(
        &self,
        tenant: TenantId,
        ids: &[AppointmentId],
        now: DateTime<Utc>,
    ) -> Result<Vec<Appointment>>;
}

/// Wall-clock port so policy checks are testable with a pinned now.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// A clock pinned to a settable instant.
    pub struct FixedClock(Mutex<DateTime<Utc>>);

    impl FixedClock {
        pub fn at(now: DateTime<Utc>) -> Self {
            Self(Mutex::new(now))
        }

        pub fn set(&self, now: DateTime<Utc>) {
            *self.0.lock().unwrap() = now;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }
}
