//! Notification payloads and their idempotency hash

use chrono::{DateTime, Utc};
use persistence::{EventType, LockerRoom};
use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;
use std::hash::Hasher;

// Fixed so hashes stay comparable across processes and restarts
const HASH_KEY_0: u64 = 0x5349_4148_4c5f_6e6f;
const HASH_KEY_1: u64 = 0x7469_6679_5f76_3031;

/// Data a notification is rendered from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    GameDay {
        team: String,
        opponent: String,
        rink: String,
        scheduled_time: DateTime<Utc>,
    },
    /// Only the new assignment; `previous` is for display and not hashed
    LockerRoom {
        team: String,
        room: LockerRoom,
        previous: Option<LockerRoom>,
    },
    PreGame {
        team: String,
        opponent: String,
        rink: String,
        scheduled_time: DateTime<Utc>,
        lead_hours: u32,
        locker_room: Option<LockerRoom>,
    },
    PostGame {
        team: String,
        opponent: String,
        team_goals: u32,
        opponent_goals: u32,
    },
}

impl EventPayload {
    /// Fields that decide whether two notifications say the same thing
    fn relevant_fields(&self) -> Vec<String> {
        match self {
            EventPayload::GameDay { rink, scheduled_time, .. } => {
                vec![scheduled_time.to_rfc3339(), rink.clone()]
            }
            EventPayload::LockerRoom { room, .. } => vec![room.rink.clone(), room.label.clone()],
            EventPayload::PreGame { scheduled_time, lead_hours, .. } => {
                vec![lead_hours.to_string(), scheduled_time.to_rfc3339()]
            }
            EventPayload::PostGame { team_goals, opponent_goals, .. } => {
                vec![team_goals.to_string(), opponent_goals.to_string()]
            }
        }
    }

    pub fn team(&self) -> &str {
        match self {
            EventPayload::GameDay { team, .. }
            | EventPayload::LockerRoom { team, .. }
            | EventPayload::PreGame { team, .. }
            | EventPayload::PostGame { team, .. } => team,
        }
    }
}

/// Deterministic 16-hex-digit hash of the payload's relevant fields
pub fn value_hash(payload: &EventPayload) -> String {
    let mut hasher = SipHasher13::new_with_keys(HASH_KEY_0, HASH_KEY_1);
    for field in payload.relevant_fields() {
        hasher.write(field.as_bytes());
        // Unit separator keeps ("ab", "c") distinct from ("a", "bc")
        hasher.write_u8(0x1f);
    }
    format!("{:016x}", hasher.finish())
}

/// A change the detector found for one tracked game
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedEvent {
    pub event_type: EventType,
    pub game_id: i64,
    pub team_id: i64,
    pub payload: EventPayload,
}
