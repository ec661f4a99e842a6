//! Reply-text construction for the booking dialogue. Plain text only; the
//! channel adapter owns any markup. Pure functions so wording is unit-tested
//! away from dialogue state.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::domain::{Appointment, Service, SlotOffer};

/// Human label for an instant in the tenant zone, e.g. `Wed 04 Mar 2026, 10:40`.
pub fn start_label(zone: Tz, instant: DateTime<Utc>) -> String {
    instant
        .with_timezone(&zone)
        .format("%a %d %b %Y, %H:%M")
        .to_string()
}

/// Short day label, e.g. `Wed 04 Mar`.
fn day_label(zone: Tz, instant: DateTime<Utc>) -> String {
    instant.with_timezone(&zone).format("%a %d %b").to_string()
}

/// Time-of-day label, e.g. `10:40`.
fn time_label(zone: Tz, instant: DateTime<Utc>) -> String {
    instant.with_timezone(&zone).format("%H:%M").to_string()
}

/// Numbered slot list, one line per offer:
/// `1) Wed 04 Mar - 09:00`.
pub fn slot_list(zone: Tz, offers: &[SlotOffer]) -> String {
    offers
        .iter()
        .map(|o| {
            format!(
                "{}) {} - {}",
                o.index,
                day_label(zone, o.start),
                time_label(zone, o.start)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `$200` or `$200-$350`; empty when the service has no price.
pub fn price_label(service: &Service) -> String {
    match (service.price_min, service.price_max) {
        (Some(lo), Some(hi)) if lo != hi => format!("${lo}-${hi}"),
        (Some(lo), _) => format!("${lo}"),
        (None, Some(hi)) => format!("${hi}"),
        (None, None) => String::new(),
    }
}

/// Bulleted service menu with duration and price where known.
pub fn service_menu(services: &[Service], default_duration_min: u32) -> String {
    services
        .iter()
        .filter(|s| s.enabled)
        .map(|s| {
            let duration = s.duration_min.unwrap_or(default_duration_min);
            let price = price_label(s);
            if price.is_empty() {
                format!("- {} ({duration} min)", s.name)
            } else {
                format!("- {} ({duration} min, {price})", s.name)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Final confirmation message for a committed booking.
pub fn booking_confirmed(appt: &Appointment, zone: Tz) -> String {
    format!(
        "Your {} appointment is booked for {} under the name {}. Status: {}.",
        appt.service_name,
        start_label(zone, appt.start_at),
        appt.customer_name,
        appt.status
    )
}
