//! Change detection over freshly fetched data

use crate::event::{DetectedEvent, EventPayload};
use chrono::{DateTime, Utc};
use persistence::{EventType, GameEvent, LockerRoom, PersistenceBackend, PersistenceError};
use siahl_fetcher::{Game, StructuredData};
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of [`compare_and_commit`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change<T> {
    /// First value observed
    Assigned(T),
    Changed { from: T, to: T },
}

/// Compare `observed` against `slot` and commit it only when it differs.
///
/// Missing observations and unchanged values leave `slot` untouched.
pub fn compare_and_commit<T: PartialEq + Clone>(
    slot: &mut Option<T>,
    observed: Option<&T>,
) -> Option<Change<T>> {
    let observed = observed?;
    let change = match slot.as_ref() {
        None => Change::Assigned(observed.clone()),
        Some(current) if current != observed => {
            Change::Changed { from: current.clone(), to: observed.clone() }
        }
        Some(_) => return None,
    };
    *slot = Some(observed.clone());
    Some(change)
}

/// The tracked team's locker room for this game, if the listing has one
pub fn locker_room_for(game: &GameEvent, payload: &StructuredData) -> Option<LockerRoom> {
    payload
        .locker_rooms()?
        .iter()
        .find(|a| a.game_id == game.game_id && a.team.trim().eq_ignore_ascii_case(game.team_name.trim()))
        .map(|a| LockerRoom::new(a.rink.clone(), a.label.clone()))
}

/// Diff a locker-room payload against the game's last known room.
///
/// Commits the new room into `game` only when an event is emitted.
pub fn detect(game: &mut GameEvent, payload: &StructuredData) -> Vec<DetectedEvent> {
    let observed = locker_room_for(game, payload);

    let Some(change) = compare_and_commit(&mut game.last_known_locker_room, observed.as_ref())
    else {
        return Vec::new();
    };

    let (event_type, room, previous) = match change {
        Change::Assigned(room) => (EventType::LockerRoomAssigned, room, None),
        Change::Changed { from, to } => (EventType::LockerRoomChanged, to, Some(from)),
    };

    vec![DetectedEvent {
        event_type,
        game_id: game.game_id,
        team_id: game.team_id,
        payload: EventPayload::LockerRoom { team: game.team_name.clone(), room, previous },
    }]
}

/// Turn a team's schedule into the game records to create or refresh.
///
/// Games the team does not play in are ignored. Locker rooms are never set here.
pub fn schedule_events(
    team_id: i64,
    team_name: &str,
    games: &[Game],
    now: DateTime<Utc>,
) -> Vec<GameEvent> {
    games
        .iter()
        .filter_map(|game| {
            let opponent = game.opponent_for(team_name)?;
            Some(GameEvent {
                game_id: game.id,
                team_id,
                team_name: team_name.to_string(),
                scheduled_time: game.scheduled_time,
                rink: game.rink.clone(),
                opponent: opponent.to_string(),
                is_home: game.home_team.eq_ignore_ascii_case(team_name),
                home_goals: game.home_goals,
                away_goals: game.away_goals,
                last_known_locker_room: None,
                last_checked_at: now,
                archived: false,
            })
        })
        .collect()
}

/// Owns every mutation of stored game records
pub struct EventDetector {
    backend: Arc<dyn PersistenceBackend>,
}

impl EventDetector {
    pub fn new(backend: Arc<dyn PersistenceBackend>) -> Self {
        Self { backend }
    }

    /// Create or refresh the games found in a team's schedule
    pub async fn track_schedule(
        &self,
        team_id: i64,
        team_name: &str,
        games: &[Game],
        now: DateTime<Utc>,
    ) -> Result<Vec<GameEvent>, PersistenceError> {
        let events = schedule_events(team_id, team_name, games, now);
        for event in &events {
            self.backend.upsert_game_event(event).await?;
        }
        debug!("Tracking {} games for {}", events.len(), team_name);
        Ok(events)
    }

    /// Run [`detect`] on a stored game and persist the committed room
    pub async fn observe_locker_rooms(
        &self,
        game: &mut GameEvent,
        payload: &StructuredData,
        now: DateTime<Utc>,
    ) -> Result<Vec<DetectedEvent>, PersistenceError> {
        let events = detect(game, payload);

        match &game.last_known_locker_room {
            Some(room) if !events.is_empty() => {
                info!(game_id = game.game_id, team = %game.team_name, "Locker room now {}", room);
                self.backend.set_locker_room(game.game_id, game.team_id, room, now).await?;
            }
            _ => {
                self.backend.mark_game_checked(game.game_id, game.team_id, now).await?;
            }
        }
        game.last_checked_at = now;

        Ok(events)
    }

    /// Archive games that started before `cutoff`
    pub async fn archive_before(&self, cutoff: DateTime<Utc>) -> Result<u64, PersistenceError> {
        let archived = self.backend.archive_games_before(cutoff).await?;
        if archived > 0 {
            info!("Archived {} finished games", archived);
        }
        Ok(archived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use persistence::InMemoryPersistence;
    use siahl_fetcher::{GameStatus, LockerRoomAssignment};

    fn tracked_game() -> GameEvent {
        let scheduled = Utc.with_ymd_and_hms(2024, 9, 11, 4, 45, 0).unwrap();
        GameEvent {
            game_id: 541086,
            team_id: 4784,
            team_name: "Camels".to_string(),
            scheduled_time: scheduled,
            rink: "San Jose Black (E)".to_string(),
            opponent: "Blades".to_string(),
            is_home: true,
            home_goals: None,
            away_goals: None,
            last_known_locker_room: None,
            last_checked_at: scheduled,
            archived: false,
        }
    }

    fn listing(label: Option<&str>) -> StructuredData {
        let mut assignments = vec![LockerRoomAssignment {
            game_id: 541086,
            rink: "San Jose Black (E)".to_string(),
            team: "Blades".to_string(),
            label: "S1".to_string(),
        }];
        if let Some(label) = label {
            assignments.push(LockerRoomAssignment {
                game_id: 541086,
                rink: "San Jose Black (E)".to_string(),
                team: "Camels".to_string(),
                label: label.to_string(),
            });
        }
        StructuredData::LockerRooms(assignments)
    }

    #[test]
    fn test_compare_and_commit() {
        let mut slot = None;
        assert_eq!(compare_and_commit(&mut slot, None), None);
        assert_eq!(slot, None);

        assert_eq!(compare_and_commit(&mut slot, Some(&3)), Some(Change::Assigned(3)));
        assert_eq!(compare_and_commit(&mut slot, Some(&3)), None);
        assert_eq!(compare_and_commit(&mut slot, Some(&5)), Some(Change::Changed { from: 3, to: 5 }));
        assert_eq!(compare_and_commit(&mut slot, None), None);
        assert_eq!(slot, Some(5));
    }

    #[test]
    fn test_locker_room_observation_sequence() {
        let mut game = tracked_game();
        let mut emitted = Vec::new();

        for label in [None, Some("S2"), Some("S2"), Some("S4")] {
            emitted.extend(detect(&mut game, &listing(label)));
        }

        assert_eq!(emitted.len(), 2);
        assert_eq!(emitted[0].event_type, EventType::LockerRoomAssigned);
        assert!(matches!(
            &emitted[0].payload,
            EventPayload::LockerRoom { room, previous: None, .. } if room.label == "S2"
        ));
        assert_eq!(emitted[1].event_type, EventType::LockerRoomChanged);
        assert!(matches!(
            &emitted[1].payload,
            EventPayload::LockerRoom { room, previous: Some(prev), .. }
                if room.label == "S4" && prev.label == "S2"
        ));
        assert_eq!(game.last_known_locker_room.unwrap().label, "S4");
    }

    #[test]
    fn test_other_payloads_emit_nothing() {
        let mut game = tracked_game();
        assert!(detect(&mut game, &StructuredData::Schedule(vec![])).is_empty());
        assert_eq!(game.last_known_locker_room, None);
    }

    #[test]
    fn test_schedule_events_keep_only_team_games() {
        let now = Utc.with_ymd_and_hms(2024, 9, 1, 12, 0, 0).unwrap();
        let game = |id, home: &str, away: &str| Game {
            id,
            scheduled_time: now,
            rink: "San Jose Black (E)".to_string(),
            league: "SIAHL@SJ".to_string(),
            level: "Adult Division 1".to_string(),
            home_team: home.to_string(),
            away_team: away.to_string(),
            home_goals: None,
            away_goals: None,
            game_type: "Regular 1".to_string(),
            status: GameStatus::Scheduled,
        };

        let events = schedule_events(
            4784,
            "Camels",
            &[game(1, "Camels", "Blades"), game(2, "Sharks", "Blades"), game(3, "Sharks", "Camels")],
            now,
        );

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].opponent, "Blades");
        assert!(events[0].is_home);
        assert_eq!(events[1].opponent, "Sharks");
        assert!(!events[1].is_home);
        assert!(events.iter().all(|e| e.last_known_locker_room.is_none()));
    }

    #[tokio::test]
    async fn test_observe_persists_only_on_change() {
        let backend = Arc::new(InMemoryPersistence::default());
        let detector = EventDetector::new(backend.clone());
        let mut game = tracked_game();
        backend.upsert_game_event(&game).await.unwrap();

        let now = game.scheduled_time - chrono::Duration::hours(2);
        let events = detector.observe_locker_rooms(&mut game, &listing(Some("S2")), now).await.unwrap();
        assert_eq!(events.len(), 1);

        let stored = backend.get_game_event(541086, 4784).await.unwrap().unwrap();
        assert_eq!(stored.last_known_locker_room.map(|r| r.label), Some("S2".to_string()));

        let later = now + chrono::Duration::minutes(15);
        let events =
            detector.observe_locker_rooms(&mut game, &listing(Some("S2")), later).await.unwrap();
        assert!(events.is_empty());
        let stored = backend.get_game_event(541086, 4784).await.unwrap().unwrap();
        assert_eq!(stored.last_checked_at, later);
    }
}
