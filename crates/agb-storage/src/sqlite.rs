//! SQLite implementation of the scheduling store.
//!
//! The pool is capped at a single connection, so every transaction
//! serializes with every other writer: the overlap re-count inside
//! `create_appointment`/`reschedule_appointment` runs in the same
//! transaction as the write it guards, which closes the book-time race for
//! a single-store deployment. Scaling to multiple store replicas needs a
//! stronger mechanism (a unique canonical slot key or pessimistic locks).
//!
//! Instants are stored as unix seconds; `HH:MM` window bounds, statuses and
//! IANA zone names as text; alias and blackout lists as JSON text.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc, Weekday};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use agb_core::{
    domain::{
        Appointment, AppointmentDraft, AppointmentId, AppointmentStatus, BookingPolicy,
        BusinessHours, HoursException, Service, ServiceId, TenantId, TimeOfDay, TimeWindow,
    },
    ports::SchedulingStore,
    timezone, Error, Result,
};

const ACTIVE: &str = "status NOT IN ('cancelled', 'no_show') AND deleted_at IS NULL";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating the file if needed) and migrate the database.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| Error::Config(format!("invalid DATABASE_URL: {e}")))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::info!(url, "sqlite store ready");
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS booking_policies (
                tenant_id INTEGER PRIMARY KEY,
                timezone TEXT NOT NULL,
                buffer_min INTEGER NOT NULL DEFAULT 0,
                min_notice_hours INTEGER NOT NULL DEFAULT 0,
                booking_window_days INTEGER NOT NULL DEFAULT 14,
                allow_same_day INTEGER NOT NULL DEFAULT 1,
                max_daily_appointments INTEGER,
                blackout_dates TEXT NOT NULL DEFAULT '[]',
                require_confirmation INTEGER NOT NULL DEFAULT 1,
                default_duration_min INTEGER NOT NULL DEFAULT 30
            )",
            "CREATE TABLE IF NOT EXISTS services (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                duration_min INTEGER,
                price_min INTEGER,
                price_max INTEGER,
                aliases TEXT NOT NULL DEFAULT '[]',
                enabled INTEGER NOT NULL DEFAULT 1
            )",
            "CREATE TABLE IF NOT EXISTS business_hours (
                tenant_id INTEGER NOT NULL,
                weekday INTEGER NOT NULL,
                is_open INTEGER NOT NULL DEFAULT 0,
                start1 TEXT, end1 TEXT, start2 TEXT, end2 TEXT,
                PRIMARY KEY (tenant_id, weekday)
            )",
            "CREATE TABLE IF NOT EXISTS hours_exceptions (
                tenant_id INTEGER NOT NULL,
                date TEXT NOT NULL,
                is_open INTEGER NOT NULL DEFAULT 0,
                start1 TEXT, end1 TEXT, start2 TEXT, end2 TEXT,
                PRIMARY KEY (tenant_id, date)
            )",
            "CREATE TABLE IF NOT EXISTS appointments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id INTEGER NOT NULL,
                conversation_id TEXT,
                customer_name TEXT NOT NULL,
                customer_phone TEXT NOT NULL,
                service_name TEXT NOT NULL,
                start_at INTEGER NOT NULL,
                end_at INTEGER NOT NULL,
                timezone TEXT NOT NULL,
                status TEXT NOT NULL,
                notes TEXT,
                deleted_at INTEGER,
                created_at INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_appointments_tenant_start
               ON appointments (tenant_id, start_at)",
        ];
        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }
}

fn db_err(e: sqlx::Error) -> Error {
    Error::Storage(e.to_string())
}

fn weekday_code(weekday: Weekday) -> i64 {
    weekday.num_days_from_monday() as i64
}

fn weekday_from_code(code: i64) -> Result<Weekday> {
    match code {
        0 => Ok(Weekday::Mon),
        1 => Ok(Weekday::Tue),
        2 => Ok(Weekday::Wed),
        3 => Ok(Weekday::Thu),
        4 => Ok(Weekday::Fri),
        5 => Ok(Weekday::Sat),
        6 => Ok(Weekday::Sun),
        other => Err(Error::Storage(format!("invalid weekday code {other}"))),
    }
}

fn instant_from_secs(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| Error::Storage(format!("timestamp out of range: {secs}")))
}

fn windows_from_columns(
    cols: [(Option<String>, Option<String>); 2],
) -> Result<Vec<TimeWindow>> {
    let mut windows = Vec::new();
    for (start, end) in cols {
        if let (Some(start), Some(end)) = (start, end) {
            windows.push(TimeWindow {
                start: TimeOfDay::from_str(&start)?,
                end: TimeOfDay::from_str(&end)?,
            });
        }
    }
    Ok(windows)
}

fn window_columns(windows: &[TimeWindow]) -> [Option<String>; 4] {
    let mut cols = [None, None, None, None];
    for (i, w) in windows.iter().take(2).enumerate() {
        cols[i * 2] = Some(w.start.to_string());
        cols[i * 2 + 1] = Some(w.end.to_string());
    }
    cols
}

#[derive(sqlx::FromRow)]
struct AppointmentRow {
    id: i64,
    tenant_id: i64,
    conversation_id: Option<String>,
    customer_name: String,
    customer_phone: String,
    service_name: String,
    start_at: i64,
    end_at: i64,
    timezone: String,
    status: String,
    notes: Option<String>,
    deleted_at: Option<i64>,
    created_at: i64,
}

impl AppointmentRow {
    fn into_appointment(self) -> Result<Appointment> {
        Ok(Appointment {
            id: AppointmentId(self.id),
            tenant: TenantId(self.tenant_id),
            conversation: self
                .conversation_id
                .map(agb_core::domain::ConversationId),
            customer_name: self.customer_name,
            customer_phone: self.customer_phone,
            service_name: self.service_name,
            start_at: instant_from_secs(self.start_at)?,
            end_at: instant_from_secs(self.end_at)?,
            timezone: self.timezone,
            status: self.status.parse::<AppointmentStatus>()?,
            notes: self.notes,
            deleted_at: self.deleted_at.map(instant_from_secs).transpose()?,
            created_at: instant_from_secs(self.created_at)?,
        })
    }
}

const APPOINTMENT_COLUMNS: &str = "id, tenant_id, conversation_id, customer_name, \
     customer_phone, service_name, start_at, end_at, timezone, status, notes, \
     deleted_at, created_at";

#[async_trait]
impl SchedulingStore for SqliteStore {
    async fn booking_policy(&self, tenant: TenantId) -> Result<BookingPolicy> {
        let row = sqlx::query(
            "SELECT timezone, buffer_min, min_notice_hours, booking_window_days,
                    allow_same_day, max_daily_appointments, blackout_dates,
                    require_confirmation, default_duration_min
             FROM booking_policies WHERE tenant_id = ?",
        )
        .bind(tenant.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| Error::NotFound(format!("no booking policy for tenant {tenant}")))?;

        let zone_name: String = row.try_get("timezone").map_err(db_err)?;
        let blackout_json: String = row.try_get("blackout_dates").map_err(db_err)?;
        let blackout_dates: Vec<NaiveDate> = serde_json::from_str(&blackout_json)?;

        Ok(BookingPolicy {
            tenant,
            timezone: timezone::parse_zone(&zone_name)?,
            buffer_min: row.try_get::<i64, _>("buffer_min").map_err(db_err)? as u32,
            min_notice_hours: row.try_get::<i64, _>("min_notice_hours").map_err(db_err)? as u32,
            booking_window_days: row
                .try_get::<i64, _>("booking_window_days")
                .map_err(db_err)? as u32,
            allow_same_day: row.try_get::<bool, _>("allow_same_day").map_err(db_err)?,
            max_daily_appointments: row
                .try_get::<Option<i64>, _>("max_daily_appointments")
                .map_err(db_err)?
                .map(|n| n as u32),
            blackout_dates,
            require_confirmation: row
                .try_get::<bool, _>("require_confirmation")
                .map_err(db_err)?,
            default_duration_min: row
                .try_get::<i64, _>("default_duration_min")
                .map_err(db_err)? as u32,
        })
    }

    async fn services(&self, tenant: TenantId) -> Result<Vec<Service>> {
        let rows = sqlx::query(
            "SELECT id, name, duration_min, price_min, price_max, aliases, enabled
             FROM services WHERE tenant_id = ? ORDER BY id",
        )
        .bind(tenant.0)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut services = Vec::with_capacity(rows.len());
        for row in rows {
            let aliases_json: String = row.try_get("aliases").map_err(db_err)?;
            services.push(Service {
                id: ServiceId(row.try_get::<i64, _>("id").map_err(db_err)?),
                tenant,
                name: row.try_get("name").map_err(db_err)?,
                duration_min: row
                    .try_get::<Option<i64>, _>("duration_min")
                    .map_err(db_err)?
                    .map(|n| n as u32),
                price_min: row.try_get("price_min").map_err(db_err)?,
                price_max: row.try_get("price_max").map_err(db_err)?,
                aliases: serde_json::from_str(&aliases_json)?,
                enabled: row.try_get("enabled").map_err(db_err)?,
            });
        }
        Ok(services)
    }

    async fn business_hours(
        &self,
        tenant: TenantId,
        weekday: Weekday,
    ) -> Result<Option<BusinessHours>> {
        let row = sqlx::query(
            "SELECT is_open, start1, end1, start2, end2
             FROM business_hours WHERE tenant_id = ? AND weekday = ?",
        )
        .bind(tenant.0)
        .bind(weekday_code(weekday))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(BusinessHours {
            tenant,
            weekday,
            is_open: row.try_get("is_open").map_err(db_err)?,
            windows: windows_from_columns([
                (
                    row.try_get("start1").map_err(db_err)?,
                    row.try_get("end1").map_err(db_err)?,
                ),
                (
                    row.try_get("start2").map_err(db_err)?,
                    row.try_get("end2").map_err(db_err)?,
                ),
            ])?,
        }))
    }

    async fn hours_exception(
        &self,
        tenant: TenantId,
        date: NaiveDate,
    ) -> Result<Option<HoursException>> {
        let row = sqlx::query(
            "SELECT is_open, start1, end1, start2, end2
             FROM hours_exceptions WHERE tenant_id = ? AND date = ?",
        )
        .bind(tenant.0)
        .bind(date.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(HoursException {
            tenant,
            date,
            is_open: row.try_get("is_open").map_err(db_err)?,
            windows: windows_from_columns([
                (
                    row.try_get("start1").map_err(db_err)?,
                    row.try_get("end1").map_err(db_err)?,
                ),
                (
                    row.try_get("start2").map_err(db_err)?,
                    row.try_get("end2").map_err(db_err)?,
                ),
            ])?,
        }))
    }

    async fn upsert_policy(&self, policy: BookingPolicy) -> Result<()> {
        let blackout_json = serde_json::to_string(&policy.blackout_dates)?;
        sqlx::query(
            "INSERT INTO booking_policies (tenant_id, timezone, buffer_min,
                 min_notice_hours, booking_window_days, allow_same_day,
                 max_daily_appointments, blackout_dates, require_confirmation,
                 default_duration_min)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (tenant_id) DO UPDATE SET
                 timezone = excluded.timezone,
                 buffer_min = excluded.buffer_min,
                 min_notice_hours = excluded.min_notice_hours,
                 booking_window_days = excluded.booking_window_days,
                 allow_same_day = excluded.allow_same_day,
                 max_daily_appointments = excluded.max_daily_appointments,
                 blackout_dates = excluded.blackout_dates,
                 require_confirmation = excluded.require_confirmation,
                 default_duration_min = excluded.default_duration_min",
        )
        .bind(policy.tenant.0)
        .bind(policy.timezone.name())
        .bind(policy.buffer_min as i64)
        .bind(policy.min_notice_hours as i64)
        .bind(policy.booking_window_days as i64)
        .bind(policy.allow_same_day)
        .bind(policy.max_daily_appointments.map(|n| n as i64))
        .bind(blackout_json)
        .bind(policy.require_confirmation)
        .bind(policy.default_duration_min as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        // Lazily seed missing weekdays to closed so a configured tenant
        // always has a fully defined weekly schedule.
        for code in 0..7i64 {
            sqlx::query(
                "INSERT OR IGNORE INTO business_hours (tenant_id, weekday, is_open)
                 VALUES (?, ?, 0)",
            )
            .bind(policy.tenant.0)
            .bind(code)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }

    async fn upsert_service(&self, mut service: Service) -> Result<Service> {
        let aliases_json = serde_json::to_string(&service.aliases)?;
        if service.id.0 == 0 {
            let result = sqlx::query(
                "INSERT INTO services (tenant_id, name, duration_min, price_min,
                     price_max, aliases, enabled)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(service.tenant.0)
            .bind(&service.name)
            .bind(service.duration_min.map(|n| n as i64))
            .bind(service.price_min)
            .bind(service.price_max)
            .bind(&aliases_json)
            .bind(service.enabled)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            service.id = ServiceId(result.last_insert_rowid());
        } else {
            sqlx::query(
                "INSERT OR REPLACE INTO services (id, tenant_id, name, duration_min,
                     price_min, price_max, aliases, enabled)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(service.id.0)
            .bind(service.tenant.0)
            .bind(&service.name)
            .bind(service.duration_min.map(|n| n as i64))
            .bind(service.price_min)
            .bind(service.price_max)
            .bind(&aliases_json)
            .bind(service.enabled)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        }
        Ok(service)
    }

    async fn upsert_business_hours(&self, hours: BusinessHours) -> Result<()> {
        hours.validate()?;
        let [start1, end1, start2, end2] = window_columns(&hours.windows);
        sqlx::query(
            "INSERT OR REPLACE INTO business_hours
                 (tenant_id, weekday, is_open, start1, end1, start2, end2)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(hours.tenant.0)
        .bind(weekday_code(hours.weekday))
        .bind(hours.is_open)
        .bind(start1)
        .bind(end1)
        .bind(start2)
        .bind(end2)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn upsert_hours_exception(&self, exception: HoursException) -> Result<()> {
        exception.validate()?;
        let [start1, end1, start2, end2] = window_columns(&exception.windows);
        sqlx::query(
            "INSERT OR REPLACE INTO hours_exceptions
                 (tenant_id, date, is_open, start1, end1, start2, end2)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(exception.tenant.0)
        .bind(exception.date.to_string())
        .bind(exception.is_open)
        .bind(start1)
        .bind(end1)
        .bind(start2)
        .bind(end2)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn appointment(
        &self,
        tenant: TenantId,
        id: AppointmentId,
    ) -> Result<Option<Appointment>> {
        let row: Option<AppointmentRow> = sqlx::query_as(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE tenant_id = ? AND id = ?"
        ))
        .bind(tenant.0)
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(AppointmentRow::into_appointment).transpose()
    }

    async fn count_active_overlapping(
        &self,
        tenant: TenantId,
        range_start: DateTime<Utc>,
        range_end: DateTime<Utc>,
        exclude: Option<AppointmentId>,
    ) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM appointments
             WHERE tenant_id = ? AND {ACTIVE}
               AND start_at < ? AND end_at > ?
               AND id != ?"
        ))
        .bind(tenant.0)
        .bind(range_end.timestamp())
        .bind(range_start.timestamp())
        .bind(exclude.map(|id| id.0).unwrap_or(-1))
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(count as u64)
    }

    async fn count_active_between(
        &self,
        tenant: TenantId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM appointments
             WHERE tenant_id = ? AND {ACTIVE}
               AND start_at >= ? AND start_at < ?"
        ))
        .bind(tenant.0)
        .bind(start.timestamp())
        .bind(end.timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(count as u64)
    }

    async fn create_appointment(
        &self,
        draft: AppointmentDraft,
        buffer_min: u32,
    ) -> Result<Appointment> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Duplicate-submission guard: same tenant + phone + exact start.
        let existing: Option<AppointmentRow> = sqlx::query_as(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments
             WHERE tenant_id = ? AND {ACTIVE} AND customer_phone = ? AND start_at = ?"
        ))
        .bind(draft.tenant.0)
        .bind(&draft.customer_phone)
        .bind(draft.start_at.timestamp())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        if let Some(row) = existing {
            tx.commit().await.map_err(db_err)?;
            return row.into_appointment();
        }

        // Authoritative overlap re-check, inside the same transaction as the
        // insert below.
        let buffer = Duration::minutes(buffer_min as i64);
        let range_start = draft.start_at - buffer;
        let range_end = draft.end_at + buffer;
        let overlapping: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM appointments
             WHERE tenant_id = ? AND {ACTIVE} AND start_at < ? AND end_at > ?"
        ))
        .bind(draft.tenant.0)
        .bind(range_end.timestamp())
        .bind(range_start.timestamp())
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        if overlapping > 0 {
            return Err(Error::Conflict(format!(
                "slot at {} is no longer available",
                draft.start_at
            )));
        }

        let result = sqlx::query(
            "INSERT INTO appointments (tenant_id, conversation_id, customer_name,
                 customer_phone, service_name, start_at, end_at, timezone, status,
                 notes, deleted_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?)",
        )
        .bind(draft.tenant.0)
        .bind(draft.conversation.as_ref().map(|c| c.0.clone()))
        .bind(&draft.customer_name)
        .bind(&draft.customer_phone)
        .bind(&draft.service_name)
        .bind(draft.start_at.timestamp())
        .bind(draft.end_at.timestamp())
        .bind(&draft.timezone)
        .bind(draft.status.as_str())
        .bind(&draft.notes)
        .bind(Utc::now().timestamp())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        let id = result.last_insert_rowid();

        let row: AppointmentRow = sqlx::query_as(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?"
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        row.into_appointment()
    }

    async fn reschedule_appointment(
        &self,
        tenant: TenantId,
        id: AppointmentId,
        new_start: DateTime<Utc>,
        new_end: DateTime<Utc>,
        buffer_min: u32,
    ) -> Result<Appointment> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let exists: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM appointments
             WHERE tenant_id = ? AND id = ? AND deleted_at IS NULL",
        )
        .bind(tenant.0)
        .bind(id.0)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        if exists == 0 {
            return Err(Error::NotFound(format!("appointment {id} not found")));
        }

        let buffer = Duration::minutes(buffer_min as i64);
        let overlapping: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM appointments
             WHERE tenant_id = ? AND {ACTIVE} AND id != ?
               AND start_at < ? AND end_at > ?"
        ))
        .bind(tenant.0)
        .bind(id.0)
        .bind((new_end + buffer).timestamp())
        .bind((new_start - buffer).timestamp())
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        if overlapping > 0 {
            return Err(Error::Conflict(format!(
                "slot at {new_start} is no longer available"
            )));
        }

        sqlx::query(
            "UPDATE appointments SET start_at = ?, end_at = ?, status = 'rescheduled'
             WHERE tenant_id = ? AND id = ?",
        )
        .bind(new_start.timestamp())
        .bind(new_end.timestamp())
        .bind(tenant.0)
        .bind(id.0)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let row: AppointmentRow = sqlx::query_as(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE tenant_id = ? AND id = ?"
        ))
        .bind(tenant.0)
        .bind(id.0)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        row.into_appointment()
    }

    async fn cancel_appointments(
        &self,
        tenant: TenantId,
        ids: &[AppointmentId],
        now: DateTime<Utc>,
    ) -> Result<Vec<Appointment>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let count_sql = format!(
            "SELECT COUNT(*) FROM appointments WHERE tenant_id = ? AND id IN ({placeholders})"
        );
        let update_sql = format!(
            "UPDATE appointments SET status = 'cancelled', deleted_at = ?
             WHERE tenant_id = ? AND id IN ({placeholders}) AND status != 'cancelled'"
        );
        let select_sql = format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments
             WHERE tenant_id = ? AND id IN ({placeholders}) ORDER BY id"
        );

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql).bind(tenant.0);
        for id in ids {
            count_query = count_query.bind(id.0);
        }
        let found = count_query.fetch_one(&mut *tx).await.map_err(db_err)?;
        if (found as usize) != ids.len() {
            return Err(Error::NotFound(
                "one or more appointments not found".to_string(),
            ));
        }

        // One update for the whole batch; rows already cancelled keep their
        // original deleted_at.
        let mut update = sqlx::query(&update_sql)
            .bind(now.timestamp())
            .bind(tenant.0);
        for id in ids {
            update = update.bind(id.0);
        }
        update.execute(&mut *tx).await.map_err(db_err)?;

        let mut select = sqlx::query_as::<_, AppointmentRow>(&select_sql).bind(tenant.0);
        for id in ids {
            select = select.bind(id.0);
        }
        let rows = select.fetch_all(&mut *tx).await.map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        rows.into_iter()
            .map(AppointmentRow::into_appointment)
            .collect()
    }
}
