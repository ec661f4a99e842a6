//! Conformance tests for the SQLite store: the same booking semantics the
//! in-memory store guarantees, exercised end-to-end against a real (in
//! memory) database.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, Utc, Weekday};

use agb_core::{
    conversation::{BookingConversation, InboundTurn},
    domain::{
        AppointmentDraft, AppointmentId, AppointmentStatus, BookingPolicy, BusinessHours,
        ConversationId, HoursException, Service, ServiceId, TenantId, TimeOfDay, TimeWindow,
    },
    hours,
    ports::{SchedulingStore, SystemClock},
    session::SessionStore,
    Error,
};
use agb_storage::SqliteStore;

const TENANT: TenantId = TenantId(1);

fn at(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339)
        .unwrap()
        .with_timezone(&Utc)
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn window(sh: u8, eh: u8) -> TimeWindow {
    TimeWindow {
        start: TimeOfDay::new(sh, 0).unwrap(),
        end: TimeOfDay::new(eh, 0).unwrap(),
    }
}

fn policy() -> BookingPolicy {
    BookingPolicy {
        tenant: TENANT,
        timezone: chrono_tz::UTC,
        buffer_min: 10,
        min_notice_hours: 0,
        booking_window_days: 14,
        allow_same_day: true,
        max_daily_appointments: Some(8),
        blackout_dates: vec![date(2026, 12, 25)],
        require_confirmation: true,
        default_duration_min: 30,
    }
}

fn draft(start: &str, end: &str, phone: &str) -> AppointmentDraft {
    AppointmentDraft {
        tenant: TENANT,
        conversation: Some(ConversationId("c1".into())),
        customer_name: "Maria Lopez".into(),
        customer_phone: phone.into(),
        service_name: "Haircut".into(),
        start_at: at(start),
        end_at: at(end),
        timezone: "UTC".into(),
        status: AppointmentStatus::Confirmed,
        notes: None,
    }
}

async fn store() -> SqliteStore {
    SqliteStore::connect("sqlite::memory:").await.unwrap()
}

#[tokio::test]
async fn policy_round_trips_and_seeds_closed_weekdays() {
    let store = store().await;
    store.upsert_policy(policy()).await.unwrap();

    let loaded = store.booking_policy(TENANT).await.unwrap();
    assert_eq!(loaded.timezone, chrono_tz::UTC);
    assert_eq!(loaded.buffer_min, 10);
    assert_eq!(loaded.max_daily_appointments, Some(8));
    assert_eq!(loaded.blackout_dates, vec![date(2026, 12, 25)]);
    assert!(loaded.require_confirmation);

    for weekday in [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ] {
        let row = store.business_hours(TENANT, weekday).await.unwrap().unwrap();
        assert!(!row.is_open, "{weekday} should be seeded closed");
    }

    // Unknown tenant is a plain not-found.
    assert!(matches!(
        store.booking_policy(TenantId(99)).await.unwrap_err(),
        Error::NotFound(_)
    ));
}

#[tokio::test]
async fn hours_and_exceptions_round_trip_through_window_columns() {
    let store = store().await;
    store
        .upsert_business_hours(BusinessHours {
            tenant: TENANT,
            weekday: Weekday::Mon,
            is_open: true,
            windows: vec![window(9, 12), window(14, 18)],
        })
        .await
        .unwrap();
    store
        .upsert_hours_exception(HoursException {
            tenant: TENANT,
            date: date(2026, 3, 2),
            is_open: true,
            windows: vec![window(10, 13)],
        })
        .await
        .unwrap();

    let weekly = store
        .business_hours(TENANT, Weekday::Mon)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(weekly.windows, vec![window(9, 12), window(14, 18)]);

    // The provider resolves the exception for the exact date and the weekly
    // row for any other Monday.
    let windows = hours::open_windows_for(&store, TENANT, date(2026, 3, 2))
        .await
        .unwrap();
    assert_eq!(windows, vec![window(10, 13)]);
    let windows = hours::open_windows_for(&store, TENANT, date(2026, 3, 9))
        .await
        .unwrap();
    assert_eq!(windows, vec![window(9, 12), window(14, 18)]);
}

#[tokio::test]
async fn services_round_trip_with_aliases() {
    let store = store().await;
    let created = store
        .upsert_service(Service {
            id: ServiceId(0),
            tenant: TENANT,
            name: "Manicure".into(),
            duration_min: Some(60),
            price_min: Some(300),
            price_max: Some(450),
            aliases: vec!["uñas".into(), "nails".into()],
            enabled: true,
        })
        .await
        .unwrap();
    assert_ne!(created.id.0, 0);

    let mut updated = created.clone();
    updated.enabled = false;
    store.upsert_service(updated).await.unwrap();

    let services = store.services(TENANT).await.unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].aliases, vec!["uñas", "nails"]);
    assert!(!services[0].enabled);

    // Other tenants see nothing.
    assert!(store.services(TenantId(2)).await.unwrap().is_empty());
}

#[tokio::test]
async fn create_rejects_overlap_and_dedupes_identical_submissions() {
    let store = store().await;
    let first = store
        .create_appointment(
            draft("2026-03-02T10:00:00Z", "2026-03-02T10:30:00Z", "111"),
            10,
        )
        .await
        .unwrap();
    assert_eq!(first.status, AppointmentStatus::Confirmed);
    assert!(first.deleted_at.is_none());

    // Identical resubmission returns the same row.
    let again = store
        .create_appointment(
            draft("2026-03-02T10:00:00Z", "2026-03-02T10:30:00Z", "111"),
            10,
        )
        .await
        .unwrap();
    assert_eq!(again.id, first.id);

    // A different customer inside the buffered interval conflicts.
    let err = store
        .create_appointment(
            draft("2026-03-02T10:35:00Z", "2026-03-02T11:05:00Z", "222"),
            10,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    // Outside the buffered interval it goes through.
    store
        .create_appointment(
            draft("2026-03-02T10:40:00Z", "2026-03-02T11:10:00Z", "222"),
            10,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn concurrent_creates_for_one_slot_serialize_to_one_winner() {
    let store = Arc::new(store().await);

    let a = store.create_appointment(
        draft("2026-03-02T10:00:00Z", "2026-03-02T10:30:00Z", "111"),
        10,
    );
    let b = store.create_appointment(
        draft("2026-03-02T10:00:00Z", "2026-03-02T10:30:00Z", "222"),
        10,
    );
    let (ra, rb) = tokio::join!(a, b);

    let outcomes = [ra, rb];
    let successes = outcomes.iter().filter(|r| r.is_ok()).count();
    let conflicts = outcomes
        .iter()
        .filter(|r| matches!(r, Err(Error::Conflict(_))))
        .count();
    assert_eq!((successes, conflicts), (1, 1));
}

#[tokio::test]
async fn reschedule_checks_everyone_but_itself() {
    let store = store().await;
    let appt = store
        .create_appointment(
            draft("2026-03-02T10:00:00Z", "2026-03-02T10:30:00Z", "111"),
            10,
        )
        .await
        .unwrap();
    store
        .create_appointment(
            draft("2026-03-02T12:00:00Z", "2026-03-02T12:30:00Z", "222"),
            10,
        )
        .await
        .unwrap();

    // Sliding within its own old footprint is fine.
    let moved = store
        .reschedule_appointment(
            TENANT,
            appt.id,
            at("2026-03-02T10:15:00Z"),
            at("2026-03-02T10:45:00Z"),
            10,
        )
        .await
        .unwrap();
    assert_eq!(moved.status, AppointmentStatus::Rescheduled);

    // Landing on the other appointment conflicts.
    let err = store
        .reschedule_appointment(
            TENANT,
            appt.id,
            at("2026-03-02T11:45:00Z"),
            at("2026-03-02T12:15:00Z"),
            10,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    // Unknown id.
    let err = store
        .reschedule_appointment(
            TENANT,
            AppointmentId(999),
            at("2026-03-03T10:00:00Z"),
            at("2026-03-03T10:30:00Z"),
            10,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn cancellation_soft_deletes_idempotently_and_in_batches() {
    let store = store().await;
    let a = store
        .create_appointment(
            draft("2026-03-02T10:00:00Z", "2026-03-02T10:30:00Z", "111"),
            0,
        )
        .await
        .unwrap();
    let b = store
        .create_appointment(
            draft("2026-03-03T10:00:00Z", "2026-03-03T10:30:00Z", "222"),
            0,
        )
        .await
        .unwrap();

    let cancelled = store
        .cancel_appointments(TENANT, &[a.id, b.id], at("2026-03-01T09:00:00Z"))
        .await
        .unwrap();
    assert_eq!(cancelled.len(), 2);
    assert!(cancelled
        .iter()
        .all(|x| x.status == AppointmentStatus::Cancelled && x.deleted_at.is_some()));

    // Second cancellation is a no-op success that keeps the original
    // deleted_at.
    let again = store
        .cancel_appointments(TENANT, &[a.id], at("2026-03-01T11:00:00Z"))
        .await
        .unwrap();
    assert_eq!(again[0].deleted_at, cancelled[0].deleted_at);

    // The row still exists for audit.
    let kept = store.appointment(TENANT, a.id).await.unwrap().unwrap();
    assert_eq!(kept.status, AppointmentStatus::Cancelled);

    // And the slot is bookable again.
    store
        .create_appointment(
            draft("2026-03-02T10:00:00Z", "2026-03-02T10:30:00Z", "333"),
            0,
        )
        .await
        .unwrap();

    // Unknown ids fail the whole batch.
    let err = store
        .cancel_appointments(TENANT, &[AppointmentId(999)], at("2026-03-01T09:00:00Z"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn tenants_are_isolated() {
    let store = store().await;
    let appt = store
        .create_appointment(
            draft("2026-03-02T10:00:00Z", "2026-03-02T10:30:00Z", "111"),
            0,
        )
        .await
        .unwrap();

    // Another tenant can book the same instant and cannot see the row.
    let mut other = draft("2026-03-02T10:00:00Z", "2026-03-02T10:30:00Z", "111");
    other.tenant = TenantId(2);
    store.create_appointment(other, 0).await.unwrap();
    assert!(store
        .appointment(TenantId(2), appt.id)
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        store
            .count_active_overlapping(
                TenantId(3),
                at("2026-03-02T00:00:00Z"),
                at("2026-03-03T00:00:00Z"),
                None
            )
            .await
            .unwrap(),
        0
    );
}

/// Drives the full dialogue against the SQLite store: the same entry point
/// the channel adapter uses in production.
#[tokio::test]
async fn conversation_books_through_the_sqlite_store() {
    let store = Arc::new(store().await);
    let mut p = policy();
    // Keep the dialogue deterministic regardless of the real weekday.
    p.require_confirmation = false;
    store.upsert_policy(p).await.unwrap();
    for weekday in [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ] {
        store
            .upsert_business_hours(BusinessHours {
                tenant: TENANT,
                weekday,
                is_open: true,
                windows: vec![window(9, 18)],
            })
            .await
            .unwrap();
    }
    store
        .upsert_service(Service {
            id: ServiceId(0),
            tenant: TENANT,
            name: "Haircut".into(),
            duration_min: Some(30),
            price_min: Some(200),
            price_max: None,
            aliases: vec!["corte".into()],
            enabled: true,
        })
        .await
        .unwrap();

    let flow = BookingConversation::new(
        store.clone(),
        Arc::new(SessionStore::new(StdDuration::from_secs(1800))),
        Arc::new(SystemClock),
        48,
    );
    let say = |text: &str| {
        let flow = &flow;
        let text = text.to_string();
        async move {
            flow.handle_turn(InboundTurn {
                tenant: TENANT,
                conversation: ConversationId("chat-1".into()),
                text,
                caller_phone: None,
            })
            .await
            .unwrap()
        }
    };

    let reply = say("I'd like a haircut tomorrow").await;
    assert!(reply.text.contains("1)"), "expected slots, got: {}", reply.text);

    let reply = say("1").await;
    assert!(reply.text.contains("name"));

    let reply = say("Maria Lopez, +52 55 1234 5678").await;
    let confirmation = reply.confirmation.expect("confirmation payload");
    assert_eq!(confirmation.service_name, "Haircut");
    assert_eq!(confirmation.status, "confirmed");

    let appt = store
        .appointment(TENANT, AppointmentId(confirmation.appointment_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(appt.customer_name, "Maria Lopez");
    assert!(appt.end_at - appt.start_at == Duration::minutes(30));
}
