//! Booking, rescheduling and cancellation on top of the store's atomic
//! operations.
//!
//! The store re-validates non-overlap inside the same transactional scope
//! that performs the write, so two racing requests for one slot resolve to
//! exactly one success and one `Conflict`. This layer resolves durations and
//! initial status from policy, guards inputs, and logs outcomes.

use chrono::{DateTime, Duration, Utc};

use crate::{
    domain::{
        Appointment, AppointmentDraft, AppointmentId, BookingPolicy, ConversationId, Service,
        TenantId,
    },
    errors::Error,
    ports::SchedulingStore,
    Result,
};

#[derive(Clone, Debug)]
pub struct BookingRequest {
    pub tenant: TenantId,
    pub conversation: Option<ConversationId>,
    pub service: Service,
    pub start_at: DateTime<Utc>,
    pub customer_name: String,
    pub customer_phone: String,
    pub notes: Option<String>,
}

/// Create an appointment. Initial status follows
/// `policy.require_confirmation`; a repeated identical request returns the
/// already-created appointment instead of double-booking.
pub async fn book(
    store: &dyn SchedulingStore,
    policy: &BookingPolicy,
    req: BookingRequest,
) -> Result<Appointment> {
    if req.customer_name.trim().is_empty() {
        return Err(Error::Validation("customer name is required".into()));
    }
    if req.customer_phone.trim().is_empty() {
        return Err(Error::Validation("customer phone is required".into()));
    }

    let duration_min = req
        .service
        .duration_min
        .unwrap_or(policy.default_duration_min);
    let end_at = req.start_at + Duration::minutes(duration_min as i64);

    let draft = AppointmentDraft {
        tenant: req.tenant,
        conversation: req.conversation,
        customer_name: req.customer_name.trim().to_string(),
        customer_phone: req.customer_phone.trim().to_string(),
        service_name: req.service.name.clone(),
        start_at: req.start_at,
        end_at,
        timezone: policy.timezone.name().to_string(),
        status: policy.initial_status(),
        notes: req.notes,
    };

    let appt = store.create_appointment(draft, policy.buffer_min).await?;
    tracing::info!(
        tenant = appt.tenant.0,
        appointment = appt.id.0,
        service = %appt.service_name,
        start = %appt.start_at,
        status = %appt.status,
        "appointment booked"
    );
    Ok(appt)
}

/// Move an existing appointment to a new start, keeping its duration. The
/// overlap re-check excludes the appointment itself; on success the status
/// becomes `rescheduled`.
pub async fn reschedule(
    store: &dyn SchedulingStore,
    policy: &BookingPolicy,
    tenant: TenantId,
    id: AppointmentId,
    new_start: DateTime<Utc>,
) -> Result<Appointment> {
    let current = store
        .appointment(tenant, id)
        .await?
        .filter(|a| a.deleted_at.is_none())
        .ok_or_else(|| Error::NotFound(format!("appointment {id} not found")))?;

    let duration_min = match current.duration_min() {
        0 => policy.default_duration_min,
        d => d,
    };
    let new_end = new_start + Duration::minutes(duration_min as i64);

    let appt = store
        .reschedule_appointment(tenant, id, new_start, new_end, policy.buffer_min)
        .await?;
    tracing::info!(
        tenant = tenant.0,
        appointment = id.0,
        start = %appt.start_at,
        "appointment rescheduled"
    );
    Ok(appt)
}

/// Cancel one appointment; soft-delete only. Cancelling an
/// already-cancelled appointment is a no-op success.
pub async fn cancel(
    store: &dyn SchedulingStore,
    tenant: TenantId,
    id: AppointmentId,
    now: DateTime<Utc>,
) -> Result<Appointment> {
    let mut cancelled = store.cancel_appointments(tenant, &[id], now).await?;
    let appt = cancelled
        .pop()
        .ok_or_else(|| Error::NotFound(format!("appointment {id} not found")))?;
    tracing::info!(tenant = tenant.0, appointment = id.0, "appointment cancelled");
    Ok(appt)
}

/// Cancel a batch of ids in one store update.
pub async fn cancel_many(
    store: &dyn SchedulingStore,
    tenant: TenantId,
    ids: &[AppointmentId],
    now: DateTime<Utc>,
) -> Result<Vec<Appointment>> {
    let cancelled = store.cancel_appointments(tenant, ids, now).await?;
    tracing::info!(tenant = tenant.0, count = cancelled.len(), "appointments cancelled");
    Ok(cancelled)
}
