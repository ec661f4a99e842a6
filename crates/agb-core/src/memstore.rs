//! In-memory [`SchedulingStore`] for tests and single-node deployments.
//!
//! One mutex guards all tables, so each mutation is naturally atomic: the
//! overlap re-check and the insert that follows it happen under the same
//! lock, which is the in-process equivalent of the SQL transaction the
//! SQLite adapter uses.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc, Weekday};
use tokio::sync::Mutex;

use crate::{
    domain::{
        Appointment, AppointmentDraft, AppointmentId, AppointmentStatus, BookingPolicy,
        BusinessHours, HoursException, Service, ServiceId, TenantId,
    },
    errors::Error,
    ports::SchedulingStore,
    Result,
};

#[derive(Default)]
struct Inner {
    policies: HashMap<i64, BookingPolicy>,
    services: HashMap<i64, Vec<Service>>,
    weekly_hours: HashMap<(i64, Weekday), BusinessHours>,
    exceptions: HashMap<(i64, NaiveDate), HoursException>,
    appointments: Vec<Appointment>,
    next_appointment_id: i64,
    next_service_id: i64,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_appointment_id: 1,
                next_service_id: 1,
                ..Inner::default()
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

const ALL_WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

fn overlaps(
    appt: &Appointment,
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
) -> bool {
    appt.start_at < range_end && appt.end_at > range_start
}

#[async_trait]
impl SchedulingStore for MemoryStore {
    async fn booking_policy(&self, tenant: TenantId) -> Result<BookingPolicy> {
        let inner = self.inner.lock().await;
        inner
            .policies
            .get(&tenant.0)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no booking policy for tenant {tenant}")))
    }

    async fn services(&self, tenant: TenantId) -> Result<Vec<Service>> {
        let inner = self.inner.lock().await;
        Ok(inner.services.get(&tenant.0).cloned().unwrap_or_default())
    }

    async fn business_hours(
        &self,
        tenant: TenantId,
        weekday: Weekday,
    ) -> Result<Option<BusinessHours>> {
        let inner = self.inner.lock().await;
        Ok(inner.weekly_hours.get(&(tenant.0, weekday)).cloned())
    }

    async fn hours_exception(
        &self,
        tenant: TenantId,
        date: NaiveDate,
    ) -> Result<Option<HoursException>> {
        let inner = self.inner.lock().await;
        Ok(inner.exceptions.get(&(tenant.0, date)).cloned())
    }

    async fn upsert_policy(&self, policy: BookingPolicy) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let tenant = policy.tenant;
        inner.policies.insert(tenant.0, policy);
        // Lazily seed missing weekdays to closed so the weekly schedule is
        // always fully defined for a configured tenant.
        for weekday in ALL_WEEKDAYS {
            inner
                .weekly_hours
                .entry((tenant.0, weekday))
                .or_insert_with(|| BusinessHours::closed(tenant, weekday));
        }
        Ok(())
    }

    async fn upsert_service(&self, mut service: Service) -> Result<Service> {
        let mut inner = self.inner.lock().await;
        if service.id.0 == 0 {
            service.id = ServiceId(inner.next_service_id);
            inner.next_service_id += 1;
        }
        let list = inner.services.entry(service.tenant.0).or_default();
        match list.iter_mut().find(|s| s.id == service.id) {
            Some(existing) => *existing = service.clone(),
            None => list.push(service.clone()),
        }
        Ok(service)
    }

    async fn upsert_business_hours(&self, hours: BusinessHours) -> Result<()> {
        hours.validate()?;
        let mut inner = self.inner.lock().await;
        inner
            .weekly_hours
            .insert((hours.tenant.0, hours.weekday), hours);
        Ok(())
    }

    async fn upsert_hours_exception(&self, exception: HoursException) -> Result<()> {
        exception.validate()?;
        let mut inner = self.inner.lock().await;
        inner
            .exceptions
            .insert((exception.tenant.0, exception.date), exception);
        Ok(())
    }

    async fn appointment(
        &self,
        tenant: TenantId,
        id: AppointmentId,
    ) -> Result<Option<Appointment>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .appointments
            .iter()
            .find(|a| a.tenant == tenant && a.id == id)
            .cloned())
    }

    async fn count_active_overlapping(
        &self,
        tenant: TenantId,
        range_start: DateTime<Utc>,
        range_end: DateTime<Utc>,
        exclude: Option<AppointmentId>,
    ) -> Result<u64> {
        let inner = self.inner.lock().await;
        Ok(inner
            .appointments
            .iter()
            .filter(|a| a.tenant == tenant && a.is_active())
            .filter(|a| Some(a.id) != exclude)
            .filter(|a| overlaps(a, range_start, range_end))
            .count() as u64)
    }

    async fn count_active_between(
        &self,
        tenant: TenantId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64> {
        let inner = self.inner.lock().await;
        Ok(inner
            .appointments
            .iter()
            .filter(|a| a.tenant == tenant && a.is_active())
            .filter(|a| a.start_at >= start && a.start_at < end)
            .count() as u64)
    }

    async fn create_appointment(
        &self,
        draft: AppointmentDraft,
        buffer_min: u32,
    ) -> Result<Appointment> {
        let mut inner = self.inner.lock().await;

        // Duplicate-submission guard: same tenant + phone + exact start.
        if let Some(existing) = inner.appointments.iter().find(|a| {
            a.tenant == draft.tenant
                && a.is_active()
                && a.customer_phone == draft.customer_phone
                && a.start_at == draft.start_at
        }) {
            return Ok(existing.clone());
        }

        let buffer = Duration::minutes(buffer_min as i64);
        let range = (draft.start_at - buffer, draft.end_at + buffer);
        let conflict = inner
            .appointments
            .iter()
            .any(|a| a.tenant == draft.tenant && a.is_active() && overlaps(a, range.0, range.1));
        if conflict {
            return Err(Error::Conflict(format!(
                "slot at {} is no longer available",
                draft.start_at
            )));
        }

        let id = AppointmentId(inner.next_appointment_id);
        inner.next_appointment_id += 1;
        let appt = Appointment {
            id,
            tenant: draft.tenant,
            conversation: draft.conversation,
            customer_name: draft.customer_name,
            customer_phone: draft.customer_phone,
            service_name: draft.service_name,
            start_at: draft.start_at,
            end_at: draft.end_at,
            timezone: draft.timezone,
            status: draft.status,
            notes: draft.notes,
            deleted_at: None,
            created_at: Utc::now(),
        };
        inner.appointments.push(appt.clone());
        Ok(appt)
    }

    async fn reschedule_appointment(
        &self,
        tenant: TenantId,
        id: AppointmentId,
        new_start: DateTime<Utc>,
        new_end: DateTime<Utc>,
        buffer_min: u32,
    ) -> Result<Appointment> {
        let mut inner = self.inner.lock().await;

        let idx = inner
            .appointments
            .iter()
            .position(|a| a.tenant == tenant && a.id == id && a.deleted_at.is_none())
            .ok_or_else(|| Error::NotFound(format!("appointment {id} not found")))?;

        let buffer = Duration::minutes(buffer_min as i64);
        let range = (new_start - buffer, new_end + buffer);
        let conflict = inner.appointments.iter().any(|a| {
            a.tenant == tenant && a.id != id && a.is_active() && overlaps(a, range.0, range.1)
        });
        if conflict {
            return Err(Error::Conflict(format!(
                "slot at {new_start} is no longer available"
            )));
        }

        let appt = &mut inner.appointments[idx];
        appt.start_at = new_start;
        appt.end_at = new_end;
        appt.status = AppointmentStatus::Rescheduled;
        Ok(appt.clone())
    }

    async fn cancel_appointments(
        &self,
        tenant: TenantId,
        ids: &[AppointmentId],
        now: DateTime<Utc>,
    ) -> Result<Vec<Appointment>> {
        let mut inner = self.inner.lock().await;

        let mut indices = Vec::with_capacity(ids.len());
        for id in ids {
            let idx = inner
                .appointments
                .iter()
                .position(|a| a.tenant == tenant && a.id == *id)
                .ok_or_else(|| Error::NotFound(format!("appointment {id} not found")))?;
            indices.push(idx);
        }

        let mut out = Vec::with_capacity(indices.len());
        for idx in indices {
            let appt = &mut inner.appointments[idx];
            if appt.status != AppointmentStatus::Cancelled {
                appt.status = AppointmentStatus::Cancelled;
                appt.deleted_at = Some(now);
            }
            out.push(appt.clone());
        }
        Ok(out)
    }
}
