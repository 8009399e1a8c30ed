//! Message text per event type

use crate::event::EventPayload;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use persistence::EventType;

fn local_time(time: &DateTime<Utc>, tz: Tz) -> String {
    time.with_timezone(&tz).format("%-I:%M %p").to_string()
}

fn local_day(time: &DateTime<Utc>, tz: Tz) -> String {
    time.with_timezone(&tz).format("%A, %B %-d").to_string()
}

/// Render the message sent for `event_type`, with times shown in `tz`
pub fn render_message(event_type: EventType, payload: &EventPayload, tz: Tz) -> String {
    match payload {
        EventPayload::GameDay { team, opponent, rink, scheduled_time } => format!(
            "🏒 Game day! {team} vs {opponent}\n📅 {}\n⏰ {}\n🏟️ {rink}",
            local_day(scheduled_time, tz),
            local_time(scheduled_time, tz),
        ),
        EventPayload::LockerRoom { team, room, previous } => match (event_type, previous) {
            (EventType::LockerRoomChanged, Some(previous)) => format!(
                "🔄 Locker room changed for {team}: {} at {} (was {})",
                room.label, room.rink, previous.label
            ),
            _ => format!("🚪 Locker room for {team}: {} at {}", room.label, room.rink),
        },
        EventPayload::PreGame { team, opponent, rink, scheduled_time, lead_hours, locker_room } => {
            let hours = if *lead_hours == 1 { "hour" } else { "hours" };
            let room = locker_room
                .as_ref()
                .map(|r| r.label.clone())
                .unwrap_or_else(|| "not posted yet".to_string());
            format!(
                "⏰ {lead_hours} {hours} to puck drop: {team} vs {opponent} at {}\n🏟️ {rink}\n🚪 Locker room: {room}",
                local_time(scheduled_time, tz),
            )
        }
        EventPayload::PostGame { team, opponent, team_goals, opponent_goals } => {
            let result = match team_goals.cmp(opponent_goals) {
                std::cmp::Ordering::Greater => "Win",
                std::cmp::Ordering::Less => "Loss",
                std::cmp::Ordering::Equal => "Tie",
            };
            format!("🏁 Final: {team} {team_goals} - {opponent_goals} {opponent} ({result})")
        }
    }
}
