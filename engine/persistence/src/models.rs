//! Stored records

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Freshness tier of a cached payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    ShortTerm,
    Stats,
    Historical,
}

impl CacheTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::ShortTerm => "short_term",
            CacheTier::Stats => "stats",
            CacheTier::Historical => "historical",
        }
    }
}

impl FromStr for CacheTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "short_term" => Ok(CacheTier::ShortTerm),
            "stats" => Ok(CacheTier::Stats),
            "historical" => Ok(CacheTier::Historical),
            other => Err(format!("unknown cache tier '{other}'")),
        }
    }
}

/// A cache entry as it crosses the storage boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCacheEntry {
    pub key: String,
    pub descriptor: serde_json::Value,
    pub payload: serde_json::Value,
    pub tier: CacheTier,
    pub fetched_at: DateTime<Utc>,
}

/// Locker room a team was assigned for a game
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockerRoom {
    pub rink: String,
    pub label: String,
}

impl LockerRoom {
    pub fn new(rink: impl Into<String>, label: impl Into<String>) -> Self {
        Self { rink: rink.into(), label: label.into() }
    }
}

impl fmt::Display for LockerRoom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.rink)
    }
}

/// A tracked game, one per (game, tracked team)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEvent {
    pub game_id: i64,
    pub team_id: i64,
    pub team_name: String,
    pub scheduled_time: DateTime<Utc>,
    pub rink: String,
    pub opponent: String,
    /// Whether the tracked team is the home side
    pub is_home: bool,
    pub home_goals: Option<u32>,
    pub away_goals: Option<u32>,
    /// Only written by the event detector after a confirmed change
    pub last_known_locker_room: Option<LockerRoom>,
    pub last_checked_at: DateTime<Utc>,
    pub archived: bool,
}

impl GameEvent {
    pub fn has_final_score(&self) -> bool {
        self.home_goals.is_some() && self.away_goals.is_some()
    }

    /// Final score as (tracked team, opponent)
    pub fn team_score(&self) -> Option<(u32, u32)> {
        let (home, away) = (self.home_goals?, self.away_goals?);
        Some(if self.is_home { (home, away) } else { (away, home) })
    }
}

/// Kind of notification sent to a recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    GameDay,
    LockerRoomAssigned,
    LockerRoomChanged,
    PreGame3h,
    PreGame1h,
    PostGame,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        EventType::GameDay,
        EventType::LockerRoomAssigned,
        EventType::LockerRoomChanged,
        EventType::PreGame3h,
        EventType::PreGame1h,
        EventType::PostGame,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::GameDay => "game_day",
            EventType::LockerRoomAssigned => "locker_room_assigned",
            EventType::LockerRoomChanged => "locker_room_changed",
            EventType::PreGame3h => "pre_game_3h",
            EventType::PreGame1h => "pre_game_1h",
            EventType::PostGame => "post_game",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .find(|event| event.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown event type '{s}'"))
    }
}

/// Append-only proof that a notification was delivered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub recipient_id: String,
    pub game_id: i64,
    pub event_type: EventType,
    pub value_hash: String,
    pub sent_at: DateTime<Utc>,
}

impl NotificationRecord {
    /// Idempotency key of the record
    pub fn key(&self) -> (String, i64, EventType, String) {
        (self.recipient_id.clone(), self.game_id, self.event_type, self.value_hash.clone())
    }
}

/// Result of a uniqueness-enforcing insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A record with the same key already existed; nothing was written
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientKind {
    User,
    Group,
}

impl RecipientKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientKind::User => "user",
            RecipientKind::Group => "group",
        }
    }
}

impl FromStr for RecipientKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(RecipientKind::User),
            "group" => Ok(RecipientKind::Group),
            other => Err(format!("unknown recipient kind '{other}'")),
        }
    }
}

/// A notification subscriber following one team
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// Unique per (destination, team)
    pub id: String,
    /// Chat or webhook address the channel delivers to
    pub destination: String,
    pub kind: RecipientKind,
    pub team_id: i64,
    /// Local wall-clock time for the game-day message
    pub notify_time: NaiveTime,
    /// IANA timezone name
    pub timezone: String,
    pub game_day_enabled: bool,
    pub pre_game_enabled: bool,
    pub post_game_enabled: bool,
    pub active: bool,
}

impl Recipient {
    pub const DEFAULT_TIMEZONE: &'static str = "America/Los_Angeles";

    /// Whether this recipient wants `event_type` notifications
    pub fn wants(&self, event_type: EventType) -> bool {
        if !self.active {
            return false;
        }
        match event_type {
            EventType::GameDay => self.game_day_enabled,
            EventType::LockerRoomAssigned
            | EventType::LockerRoomChanged
            | EventType::PreGame3h
            | EventType::PreGame1h => self.pre_game_enabled,
            EventType::PostGame => self.post_game_enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient() -> Recipient {
        Recipient {
            id: "group:-1001:4784".to_string(),
            destination: "-1001".to_string(),
            kind: RecipientKind::Group,
            team_id: 4784,
            notify_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            timezone: Recipient::DEFAULT_TIMEZONE.to_string(),
            game_day_enabled: true,
            pre_game_enabled: false,
            post_game_enabled: true,
            active: true,
        }
    }

    #[test]
    fn test_event_type_round_trips_through_str() {
        for event in EventType::ALL {
            assert_eq!(event.as_str().parse::<EventType>().unwrap(), event);
        }
        assert!("locker_room".parse::<EventType>().is_err());
    }

    #[test]
    fn test_recipient_preferences() {
        let mut recipient = recipient();
        assert!(recipient.wants(EventType::GameDay));
        assert!(!recipient.wants(EventType::LockerRoomChanged));
        assert!(recipient.wants(EventType::PostGame));

        recipient.active = false;
        assert!(!recipient.wants(EventType::GameDay));
    }
}
