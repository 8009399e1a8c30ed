use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of fetchable resource, used to pick a parsing strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    TeamList,
    Schedule,
    LockerRoom,
    PlayerStats,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::TeamList => "team_list",
            ResourceKind::Schedule => "schedule",
            ResourceKind::LockerRoom => "locker_room",
            ResourceKind::PlayerStats => "player_stats",
        }
    }
}

/// Identifies one fetchable resource on the stats site.
///
/// Used as the cache key and, through the fetcher's origin, as the rate
/// limiter partition key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceDescriptor {
    /// League standings page listing every team
    TeamList { league_id: u32, season: u32 },

    /// A team's schedule and results
    Schedule { team_id: i64, season: u32, league_id: u32, stat_class: u32 },

    /// Locker-room assignments for all games on one date
    LockerRoom { date: NaiveDate },

    /// Player statistics table for a team
    PlayerStats { team_id: i64, season: u32, league_id: u32, stat_class: u32 },
}

impl ResourceDescriptor {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceDescriptor::TeamList { .. } => ResourceKind::TeamList,
            ResourceDescriptor::Schedule { .. } => ResourceKind::Schedule,
            ResourceDescriptor::LockerRoom { .. } => ResourceKind::LockerRoom,
            ResourceDescriptor::PlayerStats { .. } => ResourceKind::PlayerStats,
        }
    }

    /// Stable string key, e.g. `schedule:4784:72:1:1`
    pub fn cache_key(&self) -> String {
        match self {
            ResourceDescriptor::TeamList { league_id, season } => {
                format!("team_list:{league_id}:{season}")
            }
            ResourceDescriptor::Schedule { team_id, season, league_id, stat_class } => {
                format!("schedule:{team_id}:{season}:{league_id}:{stat_class}")
            }
            ResourceDescriptor::LockerRoom { date } => format!("locker_room:{date}"),
            ResourceDescriptor::PlayerStats { team_id, season, league_id, stat_class } => {
                format!("player_stats:{team_id}:{season}:{league_id}:{stat_class}")
            }
        }
    }

    /// Path and query relative to the site's base URL
    pub fn path_and_query(&self) -> String {
        match self {
            ResourceDescriptor::TeamList { league_id, .. } => {
                format!("display-stats.php?league={league_id}")
            }
            ResourceDescriptor::Schedule { team_id, season, league_id, stat_class }
            | ResourceDescriptor::PlayerStats { team_id, season, league_id, stat_class } => {
                format!(
                    "display-schedule?team={team_id}&season={season}&league={league_id}&stat_class={stat_class}"
                )
            }
            ResourceDescriptor::LockerRoom { date } => format!("display-locker-rooms?date={date}"),
        }
    }

    /// Season the resource belongs to, if any
    pub fn season(&self) -> Option<u32> {
        match self {
            ResourceDescriptor::TeamList { season, .. }
            | ResourceDescriptor::Schedule { season, .. }
            | ResourceDescriptor::PlayerStats { season, .. } => Some(*season),
            ResourceDescriptor::LockerRoom { .. } => None,
        }
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cache_key())
    }
}

/// Standings record of a team
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRecord {
    pub games_played: u32,
    pub wins: u32,
    pub losses: u32,
    pub ties: u32,
    pub overtime_losses: u32,
    pub points: u32,
    pub streak: Option<String>,
}

/// A team as listed on the league standings page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    /// SIAHL team ID
    pub id: i64,
    pub name: String,
    pub division: String,
    pub record: TeamRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Scheduled,
    Completed,
}

/// One row of a team schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    /// SIAHL game ID
    pub id: i64,
    pub scheduled_time: DateTime<Utc>,
    pub rink: String,
    pub league: String,
    pub level: String,
    pub home_team: String,
    pub away_team: String,
    pub home_goals: Option<u32>,
    pub away_goals: Option<u32>,
    pub game_type: String,
    pub status: GameStatus,
}

impl Game {
    pub fn is_completed(&self) -> bool {
        self.status == GameStatus::Completed
    }

    /// The other team, relative to `team_name`
    pub fn opponent_for(&self, team_name: &str) -> Option<&str> {
        if self.home_team.eq_ignore_ascii_case(team_name) {
            Some(&self.away_team)
        } else if self.away_team.eq_ignore_ascii_case(team_name) {
            Some(&self.home_team)
        } else {
            None
        }
    }
}

/// A locker-room assignment for one team in one game
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockerRoomAssignment {
    pub game_id: i64,
    pub rink: String,
    pub team: String,
    pub label: String,
}

/// One player's line in a team's stats table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStat {
    pub name: String,
    pub number: Option<String>,
    pub games_played: u32,
    pub goals: u32,
    pub assists: u32,
    pub points: u32,
    pub penalty_minutes: u32,
}

/// Parsed payload of a fetched resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StructuredData {
    Teams(Vec<Team>),
    Schedule(Vec<Game>),
    LockerRooms(Vec<LockerRoomAssignment>),
    PlayerStats(Vec<PlayerStat>),
}

impl StructuredData {
    pub fn kind(&self) -> ResourceKind {
        match self {
            StructuredData::Teams(_) => ResourceKind::TeamList,
            StructuredData::Schedule(_) => ResourceKind::Schedule,
            StructuredData::LockerRooms(_) => ResourceKind::LockerRoom,
            StructuredData::PlayerStats(_) => ResourceKind::PlayerStats,
        }
    }

    /// Number of records in the payload
    pub fn len(&self) -> usize {
        match self {
            StructuredData::Teams(v) => v.len(),
            StructuredData::Schedule(v) => v.len(),
            StructuredData::LockerRooms(v) => v.len(),
            StructuredData::PlayerStats(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn teams(&self) -> Option<&[Team]> {
        match self {
            StructuredData::Teams(teams) => Some(teams),
            _ => None,
        }
    }

    pub fn games(&self) -> Option<&[Game]> {
        match self {
            StructuredData::Schedule(games) => Some(games),
            _ => None,
        }
    }

    pub fn locker_rooms(&self) -> Option<&[LockerRoomAssignment]> {
        match self {
            StructuredData::LockerRooms(assignments) => Some(assignments),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_game() -> Game {
        Game {
            id: 541086,
            scheduled_time: Utc.with_ymd_and_hms(2024, 9, 11, 4, 45, 0).unwrap(),
            rink: "San Jose Black (E)".to_string(),
            league: "SIAHL@SJ".to_string(),
            level: "Adult Division 1".to_string(),
            home_team: "Camels".to_string(),
            away_team: "Blades".to_string(),
            home_goals: None,
            away_goals: None,
            game_type: "Regular 1".to_string(),
            status: GameStatus::Scheduled,
        }
    }

    #[test]
    fn test_cache_keys_are_distinct_per_kind() {
        let schedule =
            ResourceDescriptor::Schedule { team_id: 4784, season: 72, league_id: 1, stat_class: 1 };
        let stats = ResourceDescriptor::PlayerStats {
            team_id: 4784,
            season: 72,
            league_id: 1,
            stat_class: 1,
        };

        assert_eq!(schedule.cache_key(), "schedule:4784:72:1:1");
        assert_ne!(schedule.cache_key(), stats.cache_key());
        // Same page, different parsing strategy
        assert_eq!(schedule.path_and_query(), stats.path_and_query());
    }

    #[test]
    fn test_locker_room_path() {
        let date = NaiveDate::from_ymd_opt(2024, 9, 10).unwrap();
        let descriptor = ResourceDescriptor::LockerRoom { date };
        assert_eq!(descriptor.path_and_query(), "display-locker-rooms?date=2024-09-10");
        assert_eq!(descriptor.kind(), ResourceKind::LockerRoom);
        assert_eq!(descriptor.season(), None);
    }

    #[test]
    fn test_opponent_for() {
        let game = sample_game();
        assert_eq!(game.opponent_for("Camels"), Some("Blades"));
        assert_eq!(game.opponent_for("blades"), Some("Camels"));
        assert_eq!(game.opponent_for("Sharks"), None);
    }

    #[test]
    fn test_structured_data_serde_is_tagged() {
        let data = StructuredData::Schedule(vec![sample_game()]);
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(value["type"], "schedule");

        let back: StructuredData = serde_json::from_value(value).unwrap();
        assert_eq!(back, data);
        assert_eq!(back.kind(), ResourceKind::Schedule);
        assert_eq!(back.len(), 1);
    }
}
