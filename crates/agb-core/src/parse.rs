//! Free-text understanding for the booking dialogue: date expressions,
//! phone/name extraction, service matching, numeric selections and abort
//! keywords. Everything here is a pure function over `(text, zone, now)` so
//! accuracy is testable without any dialogue state.
//!
//! The deployment is bilingual: weekday and month tables accept Spanish and
//! English forms (`5 de mayo`, `next tuesday`, `mañana`).

use std::sync::OnceLock;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use chrono_tz::Tz;
use regex::Regex;

use crate::{domain::Service, timezone};

fn phone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\+?\d[\d\s.\-()]{5,}\d").expect("valid regex"))
}

fn day_month_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(\d{1,2})\s+(?:de\s+|of\s+)?([a-záéíóúñ]+)").expect("valid regex")
    })
}

fn numeric_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(\d{1,2})[/-](\d{1,2})(?:[/-](\d{2,4}))?\b").expect("valid regex")
    })
}

fn integer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").expect("valid regex"))
}

/// Resolve a natural-language date expression to a calendar date in the
/// tenant's zone. Supported forms: today/tomorrow (`hoy`/`mañana`),
/// `next week`, `next <weekday>` or a bare weekday, `5 de mayo` /
/// `5 of may`, and numeric `D/M` or `D/M/Y`. Returns `None` when nothing
/// parseable is found; never guesses.
pub fn parse_date_expression(text: &str, zone: Tz, now: DateTime<Utc>) -> Option<NaiveDate> {
    let lower = text.to_lowercase();
    let today = timezone::civil_date(now, zone);

    if contains_word(&lower, &["today", "hoy"]) {
        return Some(today);
    }
    if contains_word(&lower, &["tomorrow", "mañana", "manana"]) {
        return today.succ_opt();
    }
    if lower.contains("next week")
        || lower.contains("proxima semana")
        || lower.contains("próxima semana")
    {
        return Some(today + Duration::days(7));
    }

    if let Some(date) = parse_day_month(&lower, today) {
        return Some(date);
    }
    if let Some(date) = parse_numeric(&lower, today) {
        return Some(date);
    }
    if let Some(weekday) = find_weekday(&lower) {
        return Some(next_occurrence(today, weekday));
    }

    None
}

/// Heuristic contact extraction: the first phone-looking token (≥ 7 digits,
/// optionally separated and `+`-prefixed) becomes the phone, the remainder
/// of the message becomes the name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContactGuess {
    pub name: Option<String>,
    pub phone: Option<String>,
}

pub fn extract_contact(text: &str) -> ContactGuess {
    let mut phone = None;
    let mut remainder = text.to_string();

    if let Some(m) = phone_re().find(text) {
        let digits: String = m
            .as_str()
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        if digits.len() >= 7 {
            phone = Some(if m.as_str().trim_start().starts_with('+') {
                format!("+{digits}")
            } else {
                digits
            });
            remainder.replace_range(m.range(), " ");
        }
    }

    let name: String = remainder
        .chars()
        .map(|c| if c == ',' || c == ';' || c == ':' { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let name = name.trim_matches(|c: char| !c.is_alphanumeric()).to_string();

    ContactGuess {
        name: if name.chars().any(|c| c.is_alphabetic()) {
            Some(name)
        } else {
            None
        },
        phone,
    }
}

/// Match free text against a tenant's service list: enabled services only,
/// exact (case-insensitive) substring on the name first, then aliases.
pub fn match_service<'a>(services: &'a [Service], text: &str) -> Option<&'a Service> {
    let needle = text.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }

    let enabled = services.iter().filter(|s| s.enabled);
    for service in enabled.clone() {
        let name = service.name.to_lowercase();
        if needle.contains(&name) || (needle.len() >= 3 && name.contains(&needle)) {
            return Some(service);
        }
    }
    for service in enabled {
        for alias in &service.aliases {
            let alias = alias.to_lowercase();
            if !alias.is_empty() && needle.contains(&alias) {
                return Some(service);
            }
        }
    }
    None
}

/// Parse a 1-based selection against a list of `len` offers.
pub fn parse_selection(text: &str, len: usize) -> Option<usize> {
    let m = integer_re().find(text)?;
    let n: usize = m.as_str().parse().ok()?;
    (1..=len).contains(&n).then_some(n)
}

/// Standalone abort keyword anywhere in the message.
pub fn is_abort(text: &str) -> bool {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .any(|tok| matches!(tok, "cancel" | "stop" | "exit" | "cancelar" | "salir"))
}

/// Bare agreement ("yes", "sí", "ok") used when the dialogue has offered to
/// widen a search.
pub fn is_affirmation(text: &str) -> bool {
    let normalized = strip_accents(&text.to_lowercase());
    normalized
        .split(|c: char| !c.is_alphanumeric())
        .any(|tok| matches!(tok, "yes" | "yeah" | "sure" | "ok" | "okay" | "si" | "dale" | "claro"))
}

fn contains_word(lower: &str, words: &[&str]) -> bool {
    lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|tok| words.contains(&tok))
}

fn month_number(word: &str) -> Option<u32> {
    let months: [(&str, &str); 12] = [
        ("january", "enero"),
        ("february", "febrero"),
        ("march", "marzo"),
        ("april", "abril"),
        ("may", "mayo"),
        ("june", "junio"),
        ("july", "julio"),
        ("august", "agosto"),
        ("september", "septiembre"),
        ("october", "octubre"),
        ("november", "noviembre"),
        ("december", "diciembre"),
    ];
    months
        .iter()
        .position(|(en, es)| *en == word || *es == word)
        .map(|i| i as u32 + 1)
}

fn find_weekday(lower: &str) -> Option<Weekday> {
    let days: [(&str, &str, Weekday); 7] = [
        ("monday", "lunes", Weekday::Mon),
        ("tuesday", "martes", Weekday::Tue),
        ("wednesday", "miercoles", Weekday::Wed),
        ("thursday", "jueves", Weekday::Thu),
        ("friday", "viernes", Weekday::Fri),
        ("saturday", "sabado", Weekday::Sat),
        ("sunday", "domingo", Weekday::Sun),
    ];
    let normalized = strip_accents(lower);
    for tok in normalized.split(|c: char| !c.is_alphanumeric()) {
        for (en, es, wd) in days {
            if tok == en || tok == es {
                return Some(wd);
            }
        }
    }
    None
}

/// Next strictly-future occurrence: asking for today's weekday means next
/// week, not today.
fn next_occurrence(today: NaiveDate, weekday: Weekday) -> NaiveDate {
    let mut ahead = (weekday.num_days_from_monday() as i64
        - today.weekday().num_days_from_monday() as i64)
        .rem_euclid(7);
    if ahead == 0 {
        ahead = 7;
    }
    today + Duration::days(ahead)
}

fn parse_day_month(lower: &str, today: NaiveDate) -> Option<NaiveDate> {
    for caps in day_month_re().captures_iter(lower) {
        let day: u32 = caps.get(1)?.as_str().parse().ok()?;
        let word = strip_accents(caps.get(2)?.as_str());
        let Some(month) = month_number(&word) else {
            continue;
        };
        return resolve_forward(today, day, month, None);
    }
    None
}

fn parse_numeric(lower: &str, today: NaiveDate) -> Option<NaiveDate> {
    let caps = numeric_date_re().captures(lower)?;
    let day: u32 = caps.get(1)?.as_str().parse().ok()?;
    let month: u32 = caps.get(2)?.as_str().parse().ok()?;
    let year = caps.get(3).and_then(|m| {
        let y: i32 = m.as_str().parse().ok()?;
        Some(if y < 100 { y + 2000 } else { y })
    });
    resolve_forward(today, day, month, year)
}

/// Build a date, rolling year-less expressions that already passed into the
/// next year.
fn resolve_forward(
    today: NaiveDate,
    day: u32,
    month: u32,
    year: Option<i32>,
) -> Option<NaiveDate> {
    match year {
        Some(y) => NaiveDate::from_ymd_opt(y, month, day),
        None => {
            let this_year = NaiveDate::from_ymd_opt(today.year(), month, day)?;
            if this_year < today {
                NaiveDate::from_ymd_opt(today.year() + 1, month, day)
            } else {
                Some(this_year)
            }
        }
    }
}

fn strip_accents(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' => 'u',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ServiceId, TenantId};

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // Wednesday 2026-03-04, noon UTC.
    fn now() -> DateTime<Utc> {
        at("2026-03-04T12:00:00Z")
    }

    fn parse(text: &str) -> Option<NaiveDate> {
        parse_date_expression(text, chrono_tz::UTC, now())
    }

    #[test]
    fn keywords_resolve_relative_to_now() {
        assert_eq!(parse("can you do it today?"), Some(date(2026, 3, 4)));
        assert_eq!(parse("hoy"), Some(date(2026, 3, 4)));
        assert_eq!(parse("tomorrow morning"), Some(date(2026, 3, 5)));
        assert_eq!(parse("mañana"), Some(date(2026, 3, 5)));
        assert_eq!(parse("sometime next week"), Some(date(2026, 3, 11)));
    }

    #[test]
    fn weekdays_resolve_to_the_next_strictly_future_occurrence() {
        assert_eq!(parse("next friday"), Some(date(2026, 3, 6)));
        assert_eq!(parse("el viernes"), Some(date(2026, 3, 6)));
        // Asking for wednesday on a wednesday means next week.
        assert_eq!(parse("wednesday"), Some(date(2026, 3, 11)));
        assert_eq!(parse("lunes"), Some(date(2026, 3, 9)));
    }

    #[test]
    fn day_month_expressions_parse_in_both_languages() {
        assert_eq!(parse("el 20 de marzo"), Some(date(2026, 3, 20)));
        assert_eq!(parse("20 of march"), Some(date(2026, 3, 20)));
        assert_eq!(parse("5 mayo"), Some(date(2026, 5, 5)));
        // Already past this year rolls forward.
        assert_eq!(parse("1 de enero"), Some(date(2027, 1, 1)));
    }

    #[test]
    fn numeric_dates_parse_with_optional_year() {
        assert_eq!(parse("20/3"), Some(date(2026, 3, 20)));
        assert_eq!(parse("20/03/2026"), Some(date(2026, 3, 20)));
        assert_eq!(parse("20-3-26"), Some(date(2026, 3, 20)));
        // Past day/month without a year rolls to next year.
        assert_eq!(parse("1/1"), Some(date(2027, 1, 1)));
    }

    #[test]
    fn garbage_and_impossible_dates_return_none() {
        assert_eq!(parse("whenever works"), None);
        assert_eq!(parse("31/2"), None);
        assert_eq!(parse(""), None);
    }

    #[test]
    fn same_day_boundary_follows_the_tenant_zone() {
        // 2026-03-05T03:00Z is still March 4 in Mexico City (UTC-6).
        let zone: Tz = "America/Mexico_City".parse().unwrap();
        let late = at("2026-03-05T03:00:00Z");
        assert_eq!(
            parse_date_expression("today", zone, late),
            Some(date(2026, 3, 4))
        );
        assert_eq!(
            parse_date_expression("today", chrono_tz::UTC, late),
            Some(date(2026, 3, 5))
        );
    }

    #[test]
    fn contact_extraction_splits_phone_and_name() {
        let guess = extract_contact("Maria Lopez, +52 1 55 1234 5678");
        assert_eq!(guess.name.as_deref(), Some("Maria Lopez"));
        assert_eq!(guess.phone.as_deref(), Some("+5215512345678"));

        let guess = extract_contact("55-1234-5678 Juan");
        assert_eq!(guess.name.as_deref(), Some("Juan"));
        assert_eq!(guess.phone.as_deref(), Some("5512345678"));
    }

    #[test]
    fn contact_extraction_requires_seven_digits() {
        let guess = extract_contact("Maria 123456");
        assert_eq!(guess.phone, None);
        assert_eq!(guess.name.as_deref(), Some("Maria 123456"));
    }

    #[test]
    fn contact_extraction_handles_missing_parts() {
        assert_eq!(
            extract_contact("5512345678"),
            ContactGuess {
                name: None,
                phone: Some("5512345678".into())
            }
        );
        assert_eq!(extract_contact("  "), ContactGuess::default());
    }

    fn service(id: i64, name: &str, aliases: &[&str], enabled: bool) -> Service {
        Service {
            id: ServiceId(id),
            tenant: TenantId(1),
            name: name.into(),
            duration_min: Some(30),
            price_min: None,
            price_max: None,
            aliases: aliases.iter().map(|s| s.to_string()).collect(),
            enabled,
        }
    }

    #[test]
    fn service_matching_prefers_names_then_aliases() {
        let services = vec![
            service(1, "Haircut", &["corte"], true),
            service(2, "Manicure", &["uñas", "nails"], true),
            service(3, "Massage", &[], false),
        ];

        assert_eq!(
            parse_selection("the 2nd one", 3),
            Some(2),
        );
        assert_eq!(match_service(&services, "I want a haircut please").unwrap().id.0, 1);
        assert_eq!(match_service(&services, "un corte para el viernes").unwrap().id.0, 1);
        assert_eq!(match_service(&services, "nails").unwrap().id.0, 2);
        // Disabled services never match.
        assert!(match_service(&services, "massage").is_none());
        assert!(match_service(&services, "tattoo").is_none());
    }

    #[test]
    fn selection_parses_only_in_range_integers() {
        assert_eq!(parse_selection("1", 6), Some(1));
        assert_eq!(parse_selection("option 3 please", 6), Some(3));
        assert_eq!(parse_selection("7", 6), None);
        assert_eq!(parse_selection("0", 6), None);
        assert_eq!(parse_selection("first", 6), None);
    }

    #[test]
    fn abort_keywords_match_as_standalone_tokens() {
        assert!(is_abort("cancel"));
        assert!(is_abort("please STOP now"));
        assert!(is_abort("exit."));
        assert!(is_abort("cancelar"));
        assert!(!is_abort("cancellation policy?"));
        assert!(!is_abort("book me for tomorrow"));
    }

    #[test]
    fn affirmations_match_in_both_languages() {
        assert!(is_affirmation("yes please"));
        assert!(is_affirmation("Sí"));
        assert!(is_affirmation("ok"));
        assert!(!is_affirmation("no"));
        assert!(!is_affirmation("friday"));
    }
}
