//! The dialogue driver: one inbound turn in, exactly one reply out.
//!
//! A conversation starts idle (no session), walks through service selection,
//! date selection, slot selection and identity collection, and commits the
//! booking. Unparseable input and policy refusals become clarifying prompts
//! from the same or a corrective step; a booking conflict re-searches the
//! same date and returns the user to slot selection; abort keywords clear
//! the session from any step.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};

use crate::{
    booking::{self, BookingRequest},
    domain::{
        BookingConfirmation, BookingPolicy, ConversationId, Service, TenantId,
    },
    errors::Error,
    formatting, parse,
    ports::{Clock, SchedulingStore},
    session::{BookingSession, SessionStore, Step},
    slots::{self, SlotSearch},
    timezone, Result,
};

/// One inbound message from the channel collaborator.
#[derive(Clone, Debug)]
pub struct InboundTurn {
    pub tenant: TenantId,
    pub conversation: ConversationId,
    pub text: String,
    /// Channel caller id, used to backfill the phone during identity
    /// collection.
    pub caller_phone: Option<String>,
}

/// The single outbound reply for a turn. `confirmation` is set only when
/// this turn committed a booking.
#[derive(Clone, Debug)]
pub struct TurnReply {
    pub text: String,
    pub confirmation: Option<BookingConfirmation>,
}

impl TurnReply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confirmation: None,
        }
    }
}

pub struct BookingConversation {
    store: Arc<dyn SchedulingStore>,
    sessions: Arc<SessionStore>,
    clock: Arc<dyn Clock>,
    /// Raw-candidate cap handed to every slot search.
    slot_search_limit: usize,
}

impl BookingConversation {
    pub fn new(
        store: Arc<dyn SchedulingStore>,
        sessions: Arc<SessionStore>,
        clock: Arc<dyn Clock>,
        slot_search_limit: usize,
    ) -> Self {
        Self {
            store,
            sessions,
            clock,
            slot_search_limit,
        }
    }

    /// Drive one turn. Recoverable problems become prompts; storage failures
    /// and tenant misconfiguration propagate to the caller.
    pub async fn handle_turn(&self, turn: InboundTurn) -> Result<TurnReply> {
        let now = self.clock.now();
        let policy = self.store.booking_policy(turn.tenant).await?;

        if parse::is_abort(&turn.text) {
            self.sessions.clear(&turn.conversation).await;
            tracing::debug!(conversation = %turn.conversation.0, "dialogue aborted");
            return Ok(TurnReply::text(
                "Okay, I've cancelled that request. Message me whenever you want to book.",
            ));
        }

        let session = self.sessions.get(&turn.conversation, now).await;
        let (next, reply) = match session {
            None => self.on_idle(&turn, &policy, now).await?,
            Some(session) => match session.step {
                Step::AwaitService => self.on_await_service(&turn, &policy, session, now).await?,
                Step::AwaitWhen => self.on_await_when(&turn, &policy, session, now).await?,
                Step::AwaitSlot => self.on_await_slot(&turn, &policy, session).await?,
                Step::AwaitNamePhone => {
                    self.on_await_name_phone(&turn, &policy, session, now).await?
                }
            },
        };

        match next {
            Some(session) => {
                self.sessions
                    .put(turn.conversation.clone(), session, now)
                    .await
            }
            None => self.sessions.clear(&turn.conversation).await,
        }
        Ok(reply)
    }

    /// First scheduling-intent message: infer as much as the text gives us.
    async fn on_idle(
        &self,
        turn: &InboundTurn,
        policy: &BookingPolicy,
        now: DateTime<Utc>,
    ) -> Result<(Option<BookingSession>, TurnReply)> {
        let services = self.store.services(turn.tenant).await?;
        let matched = parse::match_service(&services, &turn.text).cloned();
        let date = parse::parse_date_expression(&turn.text, policy.timezone, now);

        let mut session = BookingSession::new(Step::AwaitService);
        session.search_date = date;

        match matched {
            Some(service) => {
                self.select_service(&mut session, policy, &service);
                match date {
                    Some(date) => {
                        let reply = self.offer_slots(turn, policy, &mut session, date, false, now).await?;
                        Ok((Some(session), reply))
                    }
                    None => {
                        session.step = Step::AwaitWhen;
                        Ok((
                            Some(session),
                            TurnReply::text(format!(
                                "Great, {} it is. What day works for you? You can say \
                                 \"tomorrow\", a weekday, or a date like 20/3.",
                                service.name
                            )),
                        ))
                    }
                }
            }
            None => {
                session.step = Step::AwaitService;
                Ok((
                    Some(session),
                    TurnReply::text(format!(
                        "Hi! I can book an appointment for you. Which service would you like?\n{}",
                        formatting::service_menu(&services, policy.default_duration_min)
                    )),
                ))
            }
        }
    }

    async fn on_await_service(
        &self,
        turn: &InboundTurn,
        policy: &BookingPolicy,
        mut session: BookingSession,
        now: DateTime<Utc>,
    ) -> Result<(Option<BookingSession>, TurnReply)> {
        let services = self.store.services(turn.tenant).await?;
        let Some(service) = parse::match_service(&services, &turn.text).cloned() else {
            return Ok((
                Some(session),
                TurnReply::text(format!(
                    "I didn't catch that service. These are the options:\n{}",
                    formatting::service_menu(&services, policy.default_duration_min)
                )),
            ));
        };

        self.select_service(&mut session, policy, &service);
        // A date mentioned earlier (or in this message) lets us skip straight
        // to the search.
        let date = parse::parse_date_expression(&turn.text, policy.timezone, now)
            .or(session.search_date);
        match date {
            Some(date) => {
                let reply = self.offer_slots(turn, policy, &mut session, date, false, now).await?;
                Ok((Some(session), reply))
            }
            None => {
                session.step = Step::AwaitWhen;
                Ok((
                    Some(session),
                    TurnReply::text(format!(
                        "Great, {} it is. What day works for you?",
                        service.name
                    )),
                ))
            }
        }
    }

    async fn on_await_when(
        &self,
        turn: &InboundTurn,
        policy: &BookingPolicy,
        mut session: BookingSession,
        now: DateTime<Utc>,
    ) -> Result<(Option<BookingSession>, TurnReply)> {
        let date = match parse::parse_date_expression(&turn.text, policy.timezone, now) {
            Some(date) => date,
            None => {
                // "yes" to the nearby-dates offer widens the previous search
                // to the days that follow the requested one.
                if parse::is_affirmation(&turn.text) {
                    if let Some(prev) = session.search_date {
                        let reply = self
                            .offer_slots(turn, policy, &mut session, prev, true, now)
                            .await?;
                        return Ok((Some(session), reply));
                    }
                }
                return Ok((
                    Some(session),
                    TurnReply::text(
                        "Sorry, I couldn't understand that date. Try \"tomorrow\", a weekday \
                         like \"friday\", or a date like 20/3.",
                    ),
                ));
            }
        };

        let reply = self.offer_slots(turn, policy, &mut session, date, false, now).await?;
        Ok((Some(session), reply))
    }

    async fn on_await_slot(
        &self,
        turn: &InboundTurn,
        policy: &BookingPolicy,
        mut session: BookingSession,
    ) -> Result<(Option<BookingSession>, TurnReply)> {
        let Some(choice) = parse::parse_selection(&turn.text, session.offers.len()) else {
            let list = formatting::slot_list(policy.timezone, &session.offers);
            return Ok((
                Some(session),
                TurnReply::text(format!(
                    "Please pick one of the numbers below:\n{list}"
                )),
            ));
        };

        session.chosen = Some(choice);
        session.step = Step::AwaitNamePhone;
        let prompt = if turn.caller_phone.is_some() {
            "Perfect. What full name should I put the appointment under?"
        } else {
            "Perfect. Can I have your full name and phone number?"
        };
        Ok((Some(session), TurnReply::text(prompt)))
    }

    async fn on_await_name_phone(
        &self,
        turn: &InboundTurn,
        policy: &BookingPolicy,
        mut session: BookingSession,
        now: DateTime<Utc>,
    ) -> Result<(Option<BookingSession>, TurnReply)> {
        let guess = parse::extract_contact(&turn.text);
        if let Some(name) = guess.name {
            session.full_name = Some(name);
        }
        if let Some(phone) = guess.phone {
            session.phone = Some(phone);
        } else if session.phone.is_none() {
            session.phone = turn.caller_phone.clone();
        }

        let (name, phone) = match (session.full_name.clone(), session.phone.clone()) {
            (Some(name), Some(phone)) => (name, phone),
            (None, _) => {
                return Ok((
                    Some(session),
                    TurnReply::text("I still need a name for the booking - what's your full name?"),
                ));
            }
            (_, None) => {
                return Ok((
                    Some(session),
                    TurnReply::text(
                        "I still need a phone number to confirm the booking - what's the best one?",
                    ),
                ));
            }
        };

        let Some(start) = session.chosen_start() else {
            // Offers vanished from the session somehow; start slot selection over.
            session.step = Step::AwaitWhen;
            return Ok((
                Some(session),
                TurnReply::text("Let's pick the time again - what day works for you?"),
            ));
        };

        let service = self.resolve_service(turn.tenant, &session).await?;
        let request = BookingRequest {
            tenant: turn.tenant,
            conversation: Some(turn.conversation.clone()),
            service,
            start_at: start,
            customer_name: name,
            customer_phone: phone,
            notes: None,
        };

        match booking::book(self.store.as_ref(), policy, request).await {
            Ok(appt) => {
                let confirmation = BookingConfirmation {
                    appointment_id: appt.id.0,
                    service_name: appt.service_name.clone(),
                    start_label: formatting::start_label(policy.timezone, appt.start_at),
                    status: appt.status.to_string(),
                };
                let text = formatting::booking_confirmed(&appt, policy.timezone);
                Ok((
                    None,
                    TurnReply {
                        text,
                        confirmation: Some(confirmation),
                    },
                ))
            }
            Err(Error::Conflict(_)) => {
                // The slot was taken while we talked; refresh the same date.
                let date = session
                    .search_date
                    .unwrap_or_else(|| timezone::civil_date(start, policy.timezone));
                session.chosen = None;
                let reply = self.offer_slots(turn, policy, &mut session, date, false, now).await?;
                let text = format!("Sorry - that time was just taken. {}", reply.text);
                Ok((Some(session), TurnReply::text(text)))
            }
            Err(e) if e.is_recoverable() => Ok((
                Some(session),
                TurnReply::text(format!("{e}. Could you send that again?")),
            )),
            Err(Error::NotFound(msg)) => {
                self.sessions.clear(&turn.conversation).await;
                Ok((None, TurnReply::text(format!("I couldn't complete that booking: {msg}."))))
            }
            Err(e) => Err(e),
        }
    }

    fn select_service(
        &self,
        session: &mut BookingSession,
        policy: &BookingPolicy,
        service: &Service,
    ) {
        session.service_id = Some(service.id);
        session.service_name = Some(service.name.clone());
        session.duration_min =
            Some(service.duration_min.unwrap_or(policy.default_duration_min));
    }

    async fn resolve_service(
        &self,
        tenant: TenantId,
        session: &BookingSession,
    ) -> Result<Service> {
        let services = self.store.services(tenant).await?;
        services
            .into_iter()
            .find(|s| Some(s.id) == session.service_id && s.enabled)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "service {} is no longer offered",
                    session.service_name.as_deref().unwrap_or("selected")
                ))
            })
    }

    /// Run the slot search from `date`, store the curated offers in the
    /// session and build the reply. A date-specific request presents only
    /// that date's slots; `include_following` widens to the days after it
    /// (the "nearby dates" follow-up). Empty results keep the user in
    /// `AwaitWhen`.
    async fn offer_slots(
        &self,
        turn: &InboundTurn,
        policy: &BookingPolicy,
        session: &mut BookingSession,
        date: NaiveDate,
        include_following: bool,
        now: DateTime<Utc>,
    ) -> Result<TurnReply> {
        let duration_min = session
            .duration_min
            .unwrap_or(policy.default_duration_min);
        let search = SlotSearch {
            from: date,
            duration_min,
            max_results: self.slot_search_limit,
        };
        let candidates =
            slots::find_slots(self.store.as_ref(), turn.tenant, policy, &search, now).await?;
        let candidates_nonempty = !candidates.is_empty();
        let pool: Vec<_> = if include_following {
            candidates
        } else {
            candidates
                .iter()
                .copied()
                .filter(|s| timezone::civil_date(*s, policy.timezone) == date)
                .collect()
        };
        let has_later_days = !include_following
            && pool.is_empty()
            && candidates_nonempty;
        let offers = slots::curate(policy.timezone, &pool);

        session.search_date = Some(date);
        if offers.is_empty() {
            session.offers.clear();
            session.chosen = None;
            session.step = Step::AwaitWhen;
            let text = if has_later_days {
                format!(
                    "I don't have anything open on {}. Want me to look at nearby dates, \
                     or is there another day that works?",
                    date.format("%a %d %b")
                )
            } else {
                "I don't have anything open in the coming days around that date. \
                 Is there another day that works?"
                    .to_string()
            };
            return Ok(TurnReply::text(text));
        }

        session.offers = offers.clone();
        session.chosen = None;
        session.step = Step::AwaitSlot;

        let service_name = session.service_name.as_deref().unwrap_or("your appointment");
        Ok(TurnReply::text(format!(
            "Here's what I have for {service_name} - reply with a number:\n{}",
            formatting::slot_list(policy.timezone, &session.offers)
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        AppointmentStatus, BusinessHours, ServiceId, TimeOfDay, TimeWindow,
    };
    use crate::memstore::MemoryStore;
    use crate::ports::testing::FixedClock;
    use chrono::Weekday;
    use std::time::Duration as StdDuration;

    const TENANT: TenantId = TenantId(1);

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn window(sh: u8, eh: u8) -> TimeWindow {
        TimeWindow {
            start: TimeOfDay::new(sh, 0).unwrap(),
            end: TimeOfDay::new(eh, 0).unwrap(),
        }
    }

    fn policy(require_confirmation: bool) -> BookingPolicy {
        BookingPolicy {
            tenant: TENANT,
            timezone: chrono_tz::UTC,
            buffer_min: 10,
            min_notice_hours: 0,
            booking_window_days: 14,
            allow_same_day: true,
            max_daily_appointments: None,
            blackout_dates: Vec::new(),
            require_confirmation,
            default_duration_min: 30,
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        flow: BookingConversation,
        clock: Arc<FixedClock>,
    }

    /// Tenant open Mon-Fri 09:00-12:00; services Haircut (30 min) and
    /// Manicure (60 min); "now" pinned to Wednesday 2026-03-04 08:00Z.
    async fn fixture(require_confirmation: bool) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store.upsert_policy(policy(require_confirmation)).await.unwrap();
        for wd in [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
        ] {
            store
                .upsert_business_hours(BusinessHours {
                    tenant: TENANT,
                    weekday: wd,
                    is_open: true,
                    windows: vec![window(9, 12)],
                })
                .await
                .unwrap();
        }
        for (name, duration, aliases) in [
            ("Haircut", 30u32, vec!["corte".to_string()]),
            ("Manicure", 60u32, vec![]),
        ] {
            store
                .upsert_service(crate::domain::Service {
                    id: ServiceId(0),
                    tenant: TENANT,
                    name: name.into(),
                    duration_min: Some(duration),
                    price_min: Some(200),
                    price_max: None,
                    aliases,
                    enabled: true,
                })
                .await
                .unwrap();
        }

        let clock = Arc::new(FixedClock::at(at("2026-03-04T08:00:00Z")));
        let sessions = Arc::new(SessionStore::new(StdDuration::from_secs(1800)));
        let flow = BookingConversation::new(
            store.clone(),
            sessions,
            clock.clone(),
            48,
        );
        Fixture { store, flow, clock }
    }

    async fn say(fx: &Fixture, conv: &str, text: &str) -> TurnReply {
        fx.flow
            .handle_turn(InboundTurn {
                tenant: TENANT,
                conversation: ConversationId(conv.into()),
                text: text.into(),
                caller_phone: None,
            })
            .await
            .unwrap()
    }

    async fn say_from(fx: &Fixture, conv: &str, text: &str, phone: &str) -> TurnReply {
        fx.flow
            .handle_turn(InboundTurn {
                tenant: TENANT,
                conversation: ConversationId(conv.into()),
                text: text.into(),
                caller_phone: Some(phone.into()),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn full_flow_books_an_appointment() {
        let fx = fixture(true).await;

        // Service + date in one message jumps straight to slots.
        let reply = say(&fx, "c1", "I'd like a haircut tomorrow").await;
        assert!(reply.text.contains("1)"), "expected a slot list: {}", reply.text);
        assert!(reply.confirmation.is_none());

        let reply = say(&fx, "c1", "1").await;
        assert!(reply.text.contains("full name"));

        let reply = say(&fx, "c1", "Maria Lopez, +52 55 1234 5678").await;
        let confirmation = reply.confirmation.expect("booking confirmation payload");
        assert_eq!(confirmation.service_name, "Haircut");
        assert_eq!(confirmation.status, "pending");
        assert!(reply.text.contains("Maria Lopez"));

        // Thursday 09:00 was the first offer.
        let appt = fx
            .store
            .appointment(TENANT, crate::domain::AppointmentId(confirmation.appointment_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(appt.start_at, at("2026-03-05T09:00:00Z"));
        assert_eq!(appt.status, AppointmentStatus::Pending);
        assert_eq!(appt.customer_phone, "+5215512345678");

        // The session is cleared; the next message starts a fresh dialogue.
        let reply = say(&fx, "c1", "hello").await;
        assert!(reply.text.contains("Which service"));
    }

    #[tokio::test]
    async fn confirmed_status_when_policy_skips_confirmation() {
        let fx = fixture(false).await;
        say(&fx, "c1", "haircut tomorrow").await;
        say(&fx, "c1", "2").await;
        let reply = say(&fx, "c1", "Juan Perez 5512345678").await;
        assert_eq!(reply.confirmation.unwrap().status, "confirmed");
    }

    #[tokio::test]
    async fn unknown_service_prompts_with_menu_until_matched() {
        let fx = fixture(true).await;

        let reply = say(&fx, "c1", "hello there").await;
        assert!(reply.text.contains("Haircut"));
        assert!(reply.text.contains("Manicure"));

        let reply = say(&fx, "c1", "something else entirely").await;
        assert!(reply.text.contains("didn't catch"));

        let reply = say(&fx, "c1", "manicure please").await;
        assert!(reply.text.contains("What day"));
    }

    #[tokio::test]
    async fn date_mentioned_at_idle_is_reused_after_service_selection() {
        let fx = fixture(true).await;

        // Date but no recognizable service.
        let reply = say(&fx, "c1", "do you have anything on friday?").await;
        assert!(reply.text.contains("Which service"));

        // Naming the service now goes straight to Friday's slots.
        let reply = say(&fx, "c1", "haircut").await;
        assert!(reply.text.contains("Fri"));
        assert!(reply.text.contains("1)"));
    }

    #[tokio::test]
    async fn unparseable_date_reprompts_in_place() {
        let fx = fixture(true).await;
        say(&fx, "c1", "haircut").await;
        let reply = say(&fx, "c1", "whenever suits you").await;
        assert!(reply.text.contains("couldn't understand"));
        // Still waiting for a date.
        let reply = say(&fx, "c1", "friday").await;
        assert!(reply.text.contains("1)"));
    }

    #[tokio::test]
    async fn empty_day_offers_nearby_search_and_affirmation_widens_it() {
        let fx = fixture(true).await;
        // Saturday is closed.
        let reply = say(&fx, "c1", "haircut on saturday").await;
        assert!(reply.text.contains("nearby dates"));

        // "yes" searches forward from the requested date and finds Monday.
        let reply = say(&fx, "c1", "yes please").await;
        assert!(reply.text.contains("Mon"), "{}", reply.text);
    }

    #[tokio::test]
    async fn invalid_slot_selection_reprompts_with_the_same_list() {
        let fx = fixture(true).await;
        let offer_reply = say(&fx, "c1", "haircut tomorrow").await;
        let reply = say(&fx, "c1", "9").await;
        assert!(reply.text.contains("pick one of the numbers"));
        // The list itself is repeated.
        assert!(reply.text.contains("1)"));
        // And a valid pick still works afterwards.
        let reply = say(&fx, "c1", "1").await;
        assert!(reply.text.contains("name"));
        let _ = offer_reply;
    }

    #[tokio::test]
    async fn caller_phone_backfills_identity() {
        let fx = fixture(true).await;
        say_from(&fx, "c1", "haircut tomorrow", "5215599999999").await;
        let reply = say_from(&fx, "c1", "1", "5215599999999").await;
        assert!(reply.text.contains("full name"));

        let reply = say_from(&fx, "c1", "Ana Garcia", "5215599999999").await;
        let confirmation = reply.confirmation.expect("booked with caller phone");
        let appt = fx
            .store
            .appointment(TENANT, crate::domain::AppointmentId(confirmation.appointment_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(appt.customer_phone, "5215599999999");
        assert_eq!(appt.customer_name, "Ana Garcia");
    }

    #[tokio::test]
    async fn partial_identity_is_collected_across_turns() {
        let fx = fixture(true).await;
        say(&fx, "c1", "haircut tomorrow").await;
        say(&fx, "c1", "1").await;

        let reply = say(&fx, "c1", "Maria Lopez").await;
        assert!(reply.text.contains("phone"));

        let reply = say(&fx, "c1", "+52 55 1234 5678").await;
        assert!(reply.confirmation.is_some());
    }

    #[tokio::test]
    async fn abort_clears_the_session_from_any_step() {
        let fx = fixture(true).await;
        say(&fx, "c1", "haircut tomorrow").await;
        say(&fx, "c1", "1").await;

        let reply = say(&fx, "c1", "actually, cancel").await;
        assert!(reply.text.contains("cancelled"));

        // Fresh start afterwards.
        let reply = say(&fx, "c1", "hello").await;
        assert!(reply.text.contains("Which service"));
    }

    #[tokio::test]
    async fn lost_slot_reoffers_fresh_times_for_the_same_date() {
        let fx = fixture(false).await;

        // Two conversations get shown the same Thursday slots.
        say(&fx, "a", "haircut tomorrow").await;
        say(&fx, "b", "haircut tomorrow").await;
        say(&fx, "a", "1").await;
        say(&fx, "b", "1").await;

        // A books 09:00 first.
        let reply = say(&fx, "a", "Maria Lopez +5255111111111").await;
        assert!(reply.confirmation.is_some());

        // B loses the race and is returned to slot selection with a fresh
        // list that no longer contains 09:00.
        let reply = say(&fx, "b", "Juan Perez 5522222222").await;
        assert!(reply.confirmation.is_none());
        assert!(reply.text.contains("just taken"));
        assert!(reply.text.contains("1)"));
        assert!(!reply.text.contains("09:00"));

        // B picks from the fresh list and completes.
        let reply = say(&fx, "b", "1").await;
        assert!(reply.text.contains("name"));
        let reply = say(&fx, "b", "Juan Perez 5522222222").await;
        assert!(reply.confirmation.is_some());
    }

    #[tokio::test]
    async fn session_expiry_restarts_the_dialogue() {
        let fx = fixture(true).await;
        say(&fx, "c1", "haircut tomorrow").await;

        // 31 minutes of silence expires the session.
        fx.clock.set(at("2026-03-04T08:31:00Z"));
        let reply = say(&fx, "c1", "1").await;
        assert!(reply.text.contains("Which service"));
    }
}
