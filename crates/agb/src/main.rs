//! Service entry point: config, logging, store selection, session sweeper,
//! and a line-oriented developer channel.
//!
//! The production messaging channel is a separate collaborator; this binary
//! drives the same turn boundary from stdin so the whole scheduling flow can
//! be exercised locally (one line = one inbound turn).

use std::sync::Arc;

use anyhow::Context;
use chrono::Weekday;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use agb_core::{
    config::Config,
    conversation::{BookingConversation, InboundTurn},
    domain::{
        BookingPolicy, BusinessHours, ConversationId, Service, ServiceId, TenantId, TimeOfDay,
        TimeWindow,
    },
    memstore::MemoryStore,
    ports::{Clock, SchedulingStore, SystemClock},
    session::{self, SessionStore},
    timezone,
};
use agb_storage::SqliteStore;

const DEMO_TENANT: TenantId = TenantId(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    agb_core::logging::init("agb")?;

    let cfg = Arc::new(Config::load().context("loading configuration")?);

    let store: Arc<dyn SchedulingStore> = match &cfg.database_url {
        Some(url) => Arc::new(
            SqliteStore::connect(url)
                .await
                .context("opening sqlite store")?,
        ),
        None => {
            tracing::info!("DATABASE_URL not set; using in-memory store with a demo tenant");
            let store = MemoryStore::new();
            seed_demo_tenant(&store, &cfg.default_timezone).await?;
            Arc::new(store)
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let sessions = Arc::new(SessionStore::new(cfg.session_ttl));
    let sweeper =
        session::spawn_sweeper(sessions.clone(), clock.clone(), cfg.session_sweep_interval);

    let flow = BookingConversation::new(store, sessions, clock, cfg.slot_search_limit);
    run_stdin_channel(&flow).await?;

    sweeper.cancel();
    Ok(())
}

/// One conversational turn per stdin line, reply on stdout.
async fn run_stdin_channel(flow: &BookingConversation) -> anyhow::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    stdout
        .write_all(b"agb dev channel - type a message, ctrl-d to quit\n> ")
        .await?;
    stdout.flush().await?;

    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        if text.is_empty() {
            stdout.write_all(b"> ").await?;
            stdout.flush().await?;
            continue;
        }

        let turn = InboundTurn {
            tenant: DEMO_TENANT,
            conversation: ConversationId("local".to_string()),
            text: text.to_string(),
            caller_phone: None,
        };

        match flow.handle_turn(turn).await {
            Ok(reply) => {
                stdout.write_all(reply.text.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                if let Some(confirmation) = &reply.confirmation {
                    let payload = serde_json::to_string(confirmation)
                        .unwrap_or_else(|_| "<unprintable>".to_string());
                    stdout
                        .write_all(format!("[confirmation] {payload}\n").as_bytes())
                        .await?;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "turn failed");
                stdout
                    .write_all(b"Something went wrong on our side - please try again.\n")
                    .await?;
            }
        }
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
    }
    Ok(())
}

/// Minimal tenant so the dev channel works out of the box: weekday mornings
/// and afternoons, Saturday mornings, two services.
async fn seed_demo_tenant(store: &MemoryStore, zone_name: &str) -> anyhow::Result<()> {
    let zone = timezone::parse_zone(zone_name).context("DEFAULT_TIMEZONE")?;

    store
        .upsert_policy(BookingPolicy {
            tenant: DEMO_TENANT,
            timezone: zone,
            buffer_min: 10,
            min_notice_hours: 2,
            booking_window_days: 21,
            allow_same_day: true,
            max_daily_appointments: None,
            blackout_dates: Vec::new(),
            require_confirmation: false,
            default_duration_min: 30,
        })
        .await?;

    let window = |sh, eh| TimeWindow {
        start: TimeOfDay { hour: sh, minute: 0 },
        end: TimeOfDay { hour: eh, minute: 0 },
    };
    for weekday in [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
    ] {
        store
            .upsert_business_hours(BusinessHours {
                tenant: DEMO_TENANT,
                weekday,
                is_open: true,
                windows: vec![window(9, 13), window(15, 19)],
            })
            .await?;
    }
    store
        .upsert_business_hours(BusinessHours {
            tenant: DEMO_TENANT,
            weekday: Weekday::Sat,
            is_open: true,
            windows: vec![window(10, 14)],
        })
        .await?;

    for (name, duration, price_min, price_max, aliases) in [
        ("Haircut", 30u32, 200i64, 200i64, vec!["corte".to_string()]),
        (
            "Manicure",
            60,
            300,
            450,
            vec!["uñas".to_string(), "nails".to_string()],
        ),
    ] {
        store
            .upsert_service(Service {
                id: ServiceId(0),
                tenant: DEMO_TENANT,
                name: name.to_string(),
                duration_min: Some(duration),
                price_min: Some(price_min),
                price_max: Some(price_max),
                aliases,
                enabled: true,
            })
            .await?;
    }

    tracing::info!(zone = zone_name, "demo tenant seeded");
    Ok(())
}
