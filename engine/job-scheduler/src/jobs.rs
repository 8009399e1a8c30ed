//! Bodies of the recurring jobs

use crate::context::JobContext;
use crate::error::Result;
use crate::job::{JobKind, JobReport};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use futures::stream::{self, StreamExt};
use game_notifier::{value_hash, DetectedEvent, DispatchOutcome, EventPayload};
use persistence::{EventType, GameEvent, Recipient};
use siahl_fetcher::{ResourceDescriptor, StructuredData};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// Event type of a reminder sent `lead_hours` before the start
pub fn reminder_event_type(lead_hours: u32) -> EventType {
    if lead_hours > 1 {
        EventType::PreGame3h
    } else {
        EventType::PreGame1h
    }
}

impl JobContext {
    /// Force-refresh the team list and every followed team's schedule and stats
    pub async fn cache_refresh(&self, now: DateTime<Utc>) -> Result<JobReport> {
        let mut report = JobReport::new(JobKind::CacheRefresh, now);

        let teams: Vec<i64> = self.recipients_by_team().await?.into_keys().collect();
        if teams.is_empty() {
            debug!("No followed teams to refresh");
            return Ok(report);
        }
        let names = self.team_names(now, true).await?;
        report.items = teams.len();

        self.refresh_teams(teams.clone(), &names, now, true, &mut report).await;

        let stats: Vec<_> = stream::iter(teams)
            .map(|team_id| async move {
                let result = self.cache.force_refresh(&self.league.player_stats(team_id)).await;
                (team_id, result)
            })
            .buffer_unordered(self.config.max_concurrency)
            .collect()
            .await;

        for (team_id, result) in stats {
            if let Err(e) = result {
                report.errors += 1;
                warn!(team_id, "Failed to refresh player stats: {}", e);
            }
        }

        Ok(report)
    }

    /// Local date whose notify time opened the game-day window `now` falls in.
    ///
    /// Yesterday's notify time is checked too, so a window may run past midnight.
    fn game_day_due(&self, recipient: &Recipient, now: DateTime<Utc>) -> Option<NaiveDate> {
        let tz = self.recipient_timezone(recipient);
        let today = now.with_timezone(&tz).date_naive();
        let window = self.config.game_day_window();

        [Some(today), today.pred_opt()].into_iter().flatten().find(|date| {
            tz.from_local_datetime(&date.and_time(recipient.notify_time))
                .earliest()
                .map(|opens| opens.with_timezone(&Utc))
                .map_or(false, |opens| opens <= now && now < opens + window)
        })
    }

    /// Send the game-day message to recipients whose notify time has come
    pub async fn game_day_check(&self, now: DateTime<Utc>) -> Result<JobReport> {
        let mut report = JobReport::new(JobKind::GameDayCheck, now);

        let due: Vec<(Recipient, NaiveDate)> = self
            .backend
            .list_recipients()
            .await?
            .into_iter()
            .filter(|r| r.wants(EventType::GameDay))
            .filter_map(|r| self.game_day_due(&r, now).map(|day| (r, day)))
            .collect();
        if due.is_empty() {
            return Ok(report);
        }

        let teams: BTreeSet<i64> = due.iter().map(|(r, _)| r.team_id).collect();
        let names = self.team_names(now, false).await?;
        self.refresh_teams(teams.into_iter().collect(), &names, now, false, &mut report).await;

        let games = self.backend.list_active_game_events().await?;
        let mut sends: Vec<(Recipient, GameEvent)> = Vec::new();
        for (recipient, day) in &due {
            let tz = self.recipient_timezone(recipient);
            for game in &games {
                if game.team_id == recipient.team_id
                    && game.scheduled_time > now
                    && game.scheduled_time.with_timezone(&tz).date_naive() == *day
                {
                    sends.push((recipient.clone(), game.clone()));
                }
            }
        }
        report.items = sends.len();

        let outcomes: Vec<DispatchOutcome> = stream::iter(sends)
            .map(|(recipient, game)| async move {
                let payload = EventPayload::GameDay {
                    team: game.team_name.clone(),
                    opponent: game.opponent.clone(),
                    rink: game.rink.clone(),
                    scheduled_time: game.scheduled_time,
                };
                self.dispatcher.dispatch(&recipient, EventType::GameDay, game.game_id, &payload).await
            })
            .buffer_unordered(self.config.max_concurrency)
            .collect()
            .await;

        outcomes.iter().for_each(|outcome| report.record(outcome));
        Ok(report)
    }

    /// Tightest lead window the game has entered
    fn reminder_lead(&self, game: &GameEvent, now: DateTime<Utc>) -> Option<u32> {
        self.config
            .pre_game_lead_hours
            .iter()
            .copied()
            .filter(|&hours| now >= game.scheduled_time - chrono::Duration::hours(i64::from(hours)))
            .min()
    }

    /// Check locker rooms and send reminders for games about to start
    pub async fn pre_game_check(&self, now: DateTime<Utc>) -> Result<JobReport> {
        let mut report = JobReport::new(JobKind::PreGameCheck, now);

        let horizon = now + self.config.max_lead();
        let upcoming: Vec<GameEvent> = self
            .backend
            .list_active_game_events()
            .await?
            .into_iter()
            .filter(|game| game.scheduled_time > now && game.scheduled_time <= horizon)
            .collect();
        if upcoming.is_empty() {
            return Ok(report);
        }
        report.items = upcoming.len();

        let recipients = self.recipients_by_team().await?;

        // One listing per game date, fetched fresh every tick
        let dates: BTreeSet<_> =
            upcoming.iter().map(|game| self.league.local_date(game.scheduled_time)).collect();
        let mut listings = HashMap::new();
        for date in dates {
            match self.cache.force_refresh(&ResourceDescriptor::LockerRoom { date }).await {
                Ok(listing) => {
                    listings.insert(date, listing);
                }
                Err(e) => {
                    report.errors += 1;
                    warn!(%date, "Locker room listing unavailable: {}", e);
                }
            }
        }

        let results: Vec<(i64, Result<Vec<DispatchOutcome>>)> = stream::iter(upcoming)
            .map(|game| {
                let listing = listings.get(&self.league.local_date(game.scheduled_time));
                let audience = recipients.get(&game.team_id).map(Vec::as_slice).unwrap_or_default();
                async move {
                    let game_id = game.game_id;
                    (game_id, self.check_game(game, listing, audience, now).await)
                }
            })
            .buffer_unordered(self.config.max_concurrency)
            .collect()
            .await;

        for (game_id, result) in results {
            match result {
                Ok(outcomes) => outcomes.iter().for_each(|outcome| report.record(outcome)),
                Err(e) => {
                    report.errors += 1;
                    warn!(game_id, "Pre-game check failed: {}", e);
                }
            }
        }

        Ok(report)
    }

    async fn check_game(
        &self,
        mut game: GameEvent,
        listing: Option<&StructuredData>,
        audience: &[Recipient],
        now: DateTime<Utc>,
    ) -> Result<Vec<DispatchOutcome>> {
        let mut events = match listing {
            Some(listing) => self.detector.observe_locker_rooms(&mut game, listing, now).await?,
            None => Vec::new(),
        };

        if let Some(lead_hours) = self.reminder_lead(&game, now) {
            events.push(DetectedEvent {
                event_type: reminder_event_type(lead_hours),
                game_id: game.game_id,
                team_id: game.team_id,
                payload: EventPayload::PreGame {
                    team: game.team_name.clone(),
                    opponent: game.opponent.clone(),
                    rink: game.rink.clone(),
                    scheduled_time: game.scheduled_time,
                    lead_hours,
                    locker_room: game.last_known_locker_room.clone(),
                },
            });
        }

        let room_detected =
            events.iter().any(|event| matches!(event.payload, EventPayload::LockerRoom { .. }));

        let mut outcomes = Vec::new();
        for event in &events {
            for recipient in audience.iter().filter(|r| r.wants(event.event_type)) {
                outcomes.push(self.dispatcher.dispatch_event(recipient, event).await);
            }
        }

        // Failed deliveries and late subscribers still get the committed room
        if !room_detected {
            for recipient in audience {
                if let Some(event) = self.owed_locker_room(&game, recipient).await? {
                    outcomes.push(self.dispatcher.dispatch_event(recipient, &event).await);
                }
            }
        }
        Ok(outcomes)
    }

    /// Locker-room notice for the committed room that `recipient` has not received
    async fn owed_locker_room(
        &self,
        game: &GameEvent,
        recipient: &Recipient,
    ) -> Result<Option<DetectedEvent>> {
        let Some(room) = game.last_known_locker_room.clone() else {
            return Ok(None);
        };
        let payload = EventPayload::LockerRoom { team: game.team_name.clone(), room, previous: None };
        let hash = value_hash(&payload);

        let latest = self
            .backend
            .list_notifications(&recipient.id)
            .await?
            .into_iter()
            .filter(|record| {
                record.game_id == game.game_id
                    && matches!(
                        record.event_type,
                        EventType::LockerRoomAssigned | EventType::LockerRoomChanged
                    )
            })
            .max_by_key(|record| record.sent_at);

        let event_type = match latest {
            Some(record) if record.value_hash == hash => return Ok(None),
            Some(_) => EventType::LockerRoomChanged,
            None => EventType::LockerRoomAssigned,
        };
        if !recipient.wants(event_type) {
            return Ok(None);
        }

        debug!(recipient = %recipient.id, game_id = game.game_id, "Re-sending locker room {}", event_type);
        Ok(Some(DetectedEvent {
            event_type,
            game_id: game.game_id,
            team_id: game.team_id,
            payload,
        }))
    }

    /// Archive old games and report results of finished ones
    pub async fn post_game_monitor(&self, now: DateTime<Utc>) -> Result<JobReport> {
        let mut report = JobReport::new(JobKind::PostGameMonitor, now);

        self.detector.archive_before(now - self.config.archive_grace()).await?;

        let ended: Vec<GameEvent> = self
            .backend
            .list_active_game_events()
            .await?
            .into_iter()
            .filter(|game| game.scheduled_time + self.config.game_duration() <= now)
            .collect();
        if ended.is_empty() {
            return Ok(report);
        }

        let recipients = self.recipients_by_team().await?;

        // Recipients with no recorded result for the game yet
        let mut pending: Vec<(GameEvent, Vec<Recipient>)> = Vec::new();
        for game in ended {
            let mut owed = Vec::new();
            for recipient in recipients.get(&game.team_id).into_iter().flatten() {
                if !recipient.wants(EventType::PostGame) {
                    continue;
                }
                let sent = self
                    .backend
                    .has_notification(&recipient.id, game.game_id, EventType::PostGame, None)
                    .await?;
                if !sent {
                    owed.push(recipient.clone());
                }
            }
            if !owed.is_empty() {
                pending.push((game, owed));
            }
        }
        if pending.is_empty() {
            return Ok(report);
        }
        report.items = pending.len();

        let unscored: BTreeSet<i64> = pending
            .iter()
            .filter(|(game, _)| !game.has_final_score())
            .map(|(game, _)| game.team_id)
            .collect();
        if !unscored.is_empty() {
            let names = self.team_names(now, false).await?;
            self.refresh_teams(unscored.into_iter().collect(), &names, now, true, &mut report).await;
        }

        let results: Vec<(i64, Result<Vec<DispatchOutcome>>)> = stream::iter(pending)
            .map(|(game, owed)| async move {
                let game_id = game.game_id;
                (game_id, self.report_result(game, owed).await)
            })
            .buffer_unordered(self.config.max_concurrency)
            .collect()
            .await;

        for (game_id, result) in results {
            match result {
                Ok(outcomes) => outcomes.iter().for_each(|outcome| report.record(outcome)),
                Err(e) => {
                    report.errors += 1;
                    warn!(game_id, "Post-game report failed: {}", e);
                }
            }
        }

        Ok(report)
    }

    async fn report_result(
        &self,
        game: GameEvent,
        owed: Vec<Recipient>,
    ) -> Result<Vec<DispatchOutcome>> {
        // Scores land in storage when the schedule is re-tracked
        let game = self.backend.get_game_event(game.game_id, game.team_id).await?.unwrap_or(game);

        let Some((team_goals, opponent_goals)) = game.team_score() else {
            debug!(game_id = game.game_id, team = %game.team_name, "No final score yet");
            return Ok(Vec::new());
        };

        info!(
            game_id = game.game_id,
            "Final: {} {} - {} {}", game.team_name, team_goals, opponent_goals, game.opponent
        );
        let payload = EventPayload::PostGame {
            team: game.team_name.clone(),
            opponent: game.opponent.clone(),
            team_goals,
            opponent_goals,
        };

        let mut outcomes = Vec::with_capacity(owed.len());
        for recipient in &owed {
            outcomes.push(
                self.dispatcher.dispatch(recipient, EventType::PostGame, game.game_id, &payload).await,
            );
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::context::League;
    use async_trait::async_trait;
    use chrono::{NaiveTime, TimeZone};
    use game_notifier::{ChannelError, DispatchConfig, Dispatcher, EventDetector, NotificationChannel};
    use persistence::{InMemoryPersistence, PersistenceBackend, RecipientKind};
    use siahl_fetcher::{
        Game, GameStatus, LockerRoomAssignment, ResourceFetcher, Team, TeamRecord,
    };
    use stats_cache::{CacheConfig, CacheStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    const CAMELS: i64 = 4784;

    /// Serves canned league pages
    struct LeagueFetcher {
        games: Mutex<Vec<Game>>,
        rooms: Mutex<Vec<LockerRoomAssignment>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ResourceFetcher for LeagueFetcher {
        async fn fetch(&self, descriptor: &ResourceDescriptor) -> siahl_fetcher::Result<StructuredData> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(match descriptor {
                ResourceDescriptor::TeamList { .. } => StructuredData::Teams(vec![Team {
                    id: CAMELS,
                    name: "Camels".to_string(),
                    division: "Adult Division 1".to_string(),
                    record: TeamRecord::default(),
                }]),
                ResourceDescriptor::Schedule { .. } => {
                    StructuredData::Schedule(self.games.lock().unwrap().clone())
                }
                ResourceDescriptor::LockerRoom { .. } => {
                    StructuredData::LockerRooms(self.rooms.lock().unwrap().clone())
                }
                ResourceDescriptor::PlayerStats { .. } => StructuredData::PlayerStats(vec![]),
            })
        }
    }

    /// Records deliveries; fails the first `failures` sends
    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<(String, String)>>,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, recipient: &str, content: &str) -> std::result::Result<(), ChannelError> {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(ChannelError::Transport("connection reset".to_string()));
            }
            self.sent.lock().unwrap().push((recipient.to_string(), content.to_string()));
            Ok(())
        }
    }

    struct Harness {
        ctx: JobContext,
        backend: Arc<InMemoryPersistence>,
        fetcher: Arc<LeagueFetcher>,
        channel: Arc<RecordingChannel>,
    }

    fn harness(games: Vec<Game>) -> Harness {
        let backend = Arc::new(InMemoryPersistence::default());
        let fetcher = Arc::new(LeagueFetcher {
            games: Mutex::new(games),
            rooms: Mutex::new(vec![]),
            calls: AtomicUsize::new(0),
        });
        let channel = Arc::new(RecordingChannel::default());

        let ctx = JobContext {
            config: SchedulerConfig::default(),
            league: League {
                league_id: 1,
                season: 72,
                stat_class: 1,
                timezone: chrono_tz::America::Los_Angeles,
            },
            backend: backend.clone(),
            cache: Arc::new(CacheStore::new(CacheConfig::default(), backend.clone(), fetcher.clone())),
            detector: Arc::new(EventDetector::new(backend.clone())),
            dispatcher: Arc::new(Dispatcher::new(
                DispatchConfig::default(),
                backend.clone(),
                channel.clone(),
            )),
        };

        Harness { ctx, backend, fetcher, channel }
    }

    fn game(id: i64, at: DateTime<Utc>, goals: Option<(u32, u32)>) -> Game {
        Game {
            id,
            scheduled_time: at,
            rink: "San Jose Black (E)".to_string(),
            league: "SIAHL@SJ".to_string(),
            level: "Adult Division 1".to_string(),
            home_team: "Blades".to_string(),
            away_team: "Camels".to_string(),
            home_goals: goals.map(|g| g.0),
            away_goals: goals.map(|g| g.1),
            game_type: "Regular 1".to_string(),
            status: if goals.is_some() { GameStatus::Completed } else { GameStatus::Scheduled },
        }
    }

    fn recipient(id: &str, team_id: i64, notify_at: (u32, u32)) -> Recipient {
        Recipient {
            id: id.to_string(),
            destination: id.to_string(),
            kind: RecipientKind::Group,
            team_id,
            notify_time: NaiveTime::from_hms_opt(notify_at.0, notify_at.1, 0).unwrap(),
            timezone: Recipient::DEFAULT_TIMEZONE.to_string(),
            game_day_enabled: true,
            pre_game_enabled: true,
            post_game_enabled: true,
            active: true,
        }
    }

    // 09:00 PDT
    fn morning() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 10, 16, 0, 0).unwrap()
    }

    #[test]
    fn test_reminder_event_types() {
        assert_eq!(reminder_event_type(3), EventType::PreGame3h);
        assert_eq!(reminder_event_type(1), EventType::PreGame1h);
    }

    #[tokio::test]
    async fn test_cache_refresh_tracks_followed_teams() {
        let now = morning();
        let h = harness(vec![game(1, now + chrono::Duration::days(1), None)]);
        h.backend.upsert_recipient(&recipient("chat-1", CAMELS, (9, 0))).await.unwrap();
        h.backend.upsert_recipient(&recipient("chat-2", 9999, (9, 0))).await.unwrap();

        let report = h.ctx.cache_refresh(now).await.unwrap();

        assert_eq!(report.items, 2);
        // The team missing from the league list
        assert_eq!(report.errors, 1);
        let tracked = h.backend.list_active_game_events().await.unwrap();
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].opponent, "Blades");
        assert!(!tracked[0].is_home);
        // team list, one schedule, two player stats pages
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_game_day_sent_once_in_notify_window() {
        let now = morning();
        // 19:00 PDT the same day
        let h = harness(vec![game(1, now + chrono::Duration::hours(10), None)]);
        h.backend.upsert_recipient(&recipient("chat-1", CAMELS, (9, 0))).await.unwrap();
        h.backend.upsert_recipient(&recipient("chat-2", CAMELS, (12, 0))).await.unwrap();

        let report = h.ctx.game_day_check(now).await.unwrap();
        assert_eq!((report.items, report.sent), (1, 1));

        let later = now + chrono::Duration::minutes(1);
        let report = h.ctx.game_day_check(later).await.unwrap();
        assert_eq!((report.sent, report.suppressed), (0, 1));

        let sent = h.channel.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "chat-1");
    }

    #[test]
    fn test_game_day_window_crosses_midnight() {
        let h = harness(vec![]);
        let late = recipient("chat-1", CAMELS, (23, 30));
        let notify_day = NaiveDate::from_ymd_opt(2024, 9, 10).unwrap();

        // 23:45 and 00:10 PDT
        let before_midnight = Utc.with_ymd_and_hms(2024, 9, 11, 6, 45, 0).unwrap();
        let after_midnight = Utc.with_ymd_and_hms(2024, 9, 11, 7, 10, 0).unwrap();
        assert_eq!(h.ctx.game_day_due(&late, before_midnight), Some(notify_day));
        assert_eq!(h.ctx.game_day_due(&late, after_midnight), Some(notify_day));

        // 00:30 PDT closes the hour
        let closed = Utc.with_ymd_and_hms(2024, 9, 11, 7, 30, 0).unwrap();
        assert_eq!(h.ctx.game_day_due(&late, closed), None);
        assert_eq!(h.ctx.game_day_due(&late, morning()), None);

        let early = recipient("chat-2", CAMELS, (9, 0));
        assert_eq!(h.ctx.game_day_due(&early, morning()), Some(notify_day));
    }

    #[tokio::test]
    async fn test_pre_game_check_sends_room_then_reminder() {
        let now = morning();
        let start = now + chrono::Duration::hours(2);
        let h = harness(vec![game(541086, start, None)]);
        h.backend.upsert_recipient(&recipient("chat-1", CAMELS, (9, 0))).await.unwrap();
        h.ctx.cache_refresh(now).await.unwrap();

        *h.fetcher.rooms.lock().unwrap() = vec![LockerRoomAssignment {
            game_id: 541086,
            rink: "San Jose Black (E)".to_string(),
            team: "Camels".to_string(),
            label: "S2".to_string(),
        }];

        let report = h.ctx.pre_game_check(now).await.unwrap();
        assert_eq!((report.items, report.sent), (1, 2));

        let records = h.backend.list_notifications("chat-1").await.unwrap();
        let types: Vec<_> = records.iter().map(|r| r.event_type).collect();
        assert!(types.contains(&EventType::LockerRoomAssigned));
        assert!(types.contains(&EventType::PreGame3h));

        // Same room, same window
        let report = h.ctx.pre_game_check(now + chrono::Duration::minutes(15)).await.unwrap();
        assert_eq!((report.sent, report.suppressed), (0, 1));

        // Inside the one-hour window
        let report = h.ctx.pre_game_check(start - chrono::Duration::minutes(45)).await.unwrap();
        assert_eq!(report.sent, 1);
        let records = h.backend.list_notifications("chat-1").await.unwrap();
        assert!(records.iter().any(|r| r.event_type == EventType::PreGame1h));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_locker_room_notice_is_resent() {
        let now = morning();
        let start = now + chrono::Duration::hours(2);
        let h = harness(vec![game(541086, start, None)]);
        h.backend.upsert_recipient(&recipient("chat-1", CAMELS, (9, 0))).await.unwrap();
        h.ctx.cache_refresh(now).await.unwrap();

        *h.fetcher.rooms.lock().unwrap() = vec![LockerRoomAssignment {
            game_id: 541086,
            rink: "San Jose Black (E)".to_string(),
            team: "Camels".to_string(),
            label: "S2".to_string(),
        }];
        // Every attempt at the first notice fails
        h.channel.failures.store(3, Ordering::SeqCst);

        let report = h.ctx.pre_game_check(now).await.unwrap();
        assert_eq!((report.sent, report.failed), (1, 1));
        let stored = h.backend.get_game_event(541086, CAMELS).await.unwrap().unwrap();
        assert!(stored.last_known_locker_room.is_some());

        // Past the cooldown; a new subscriber joins too
        tokio::time::advance(std::time::Duration::from_secs(16 * 60)).await;
        h.backend.upsert_recipient(&recipient("chat-2", CAMELS, (9, 0))).await.unwrap();

        let report = h.ctx.pre_game_check(now + chrono::Duration::minutes(30)).await.unwrap();
        assert_eq!((report.sent, report.failed, report.suppressed), (3, 0, 1));
        for id in ["chat-1", "chat-2"] {
            let records = h.backend.list_notifications(id).await.unwrap();
            assert!(records.iter().any(|r| r.event_type == EventType::LockerRoomAssigned));
        }

        // Nothing left to deliver
        let report = h.ctx.pre_game_check(now + chrono::Duration::minutes(45)).await.unwrap();
        assert_eq!((report.sent, report.suppressed), (0, 2));
        let sent = h.channel.sent.lock().unwrap();
        assert_eq!(sent.iter().filter(|(_, content)| content.contains("S2")).count(), 4);
    }

    #[tokio::test]
    async fn test_post_game_reports_final_score_once() {
        let now = morning();
        let start = now - chrono::Duration::hours(2);
        let h = harness(vec![game(541086, start, None)]);
        h.backend.upsert_recipient(&recipient("chat-1", CAMELS, (9, 0))).await.unwrap();
        h.ctx.cache_refresh(now - chrono::Duration::hours(3)).await.unwrap();

        // The result shows up on the next schedule fetch
        *h.fetcher.games.lock().unwrap() = vec![game(541086, start, Some((3, 5)))];

        let report = h.ctx.post_game_monitor(now).await.unwrap();
        assert_eq!((report.items, report.sent), (1, 1));
        let sent = h.channel.sent.lock().unwrap().clone();
        assert!(sent[0].1.contains('5'));

        let report = h.ctx.post_game_monitor(now + chrono::Duration::minutes(30)).await.unwrap();
        assert_eq!((report.items, report.sent), (0, 0));
    }

    #[tokio::test]
    async fn test_post_game_archives_old_games() {
        let now = morning();
        let h = harness(vec![]);
        let mut old = stored_game(now - chrono::Duration::hours(30));
        old.home_goals = Some(1);
        old.away_goals = Some(2);
        h.backend.upsert_game_event(&old).await.unwrap();

        h.ctx.post_game_monitor(now).await.unwrap();
        assert!(h.backend.list_active_game_events().await.unwrap().is_empty());
    }

    fn stored_game(at: DateTime<Utc>) -> GameEvent {
        GameEvent {
            game_id: 7,
            team_id: CAMELS,
            team_name: "Camels".to_string(),
            scheduled_time: at,
            rink: "San Jose Black (E)".to_string(),
            opponent: "Blades".to_string(),
            is_home: false,
            home_goals: None,
            away_goals: None,
            last_known_locker_room: None,
            last_checked_at: at,
            archived: false,
        }
    }
}
