//! Persistence backend trait and the in-memory implementation

use crate::config::PersistenceConfig;
use crate::error::{PersistenceError, Result};
use crate::models::*;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Abstract trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Prepare the backend (connect, migrate)
    async fn initialize(&self) -> Result<()>;

    /// Release backend resources
    async fn shutdown(&self) -> Result<()>;

    /// Load a cache entry by key
    async fn load_cache_entry(&self, key: &str) -> Result<Option<StoredCacheEntry>>;

    /// Overwrite the cache entry stored under `entry.key`
    async fn save_cache_entry(&self, entry: &StoredCacheEntry) -> Result<()>;

    /// Insert a game or refresh its schedule fields.
    ///
    /// An existing row keeps its `last_known_locker_room` and `archived` flag.
    async fn upsert_game_event(&self, event: &GameEvent) -> Result<()>;

    async fn get_game_event(&self, game_id: i64, team_id: i64) -> Result<Option<GameEvent>>;

    /// All games not yet archived, ordered by scheduled time
    async fn list_active_game_events(&self) -> Result<Vec<GameEvent>>;

    /// Commit a newly observed locker room
    async fn set_locker_room(
        &self,
        game_id: i64,
        team_id: i64,
        room: &LockerRoom,
        checked_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn mark_game_checked(
        &self,
        game_id: i64,
        team_id: i64,
        checked_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Archive every active game scheduled before `cutoff`, returning how many
    async fn archive_games_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Uniqueness-enforcing append to the notification log
    async fn insert_notification(&self, record: &NotificationRecord) -> Result<InsertOutcome>;

    /// Whether a record exists for the recipient, game and event type.
    ///
    /// With `value_hash` the full idempotency key must match; without it any hash does.
    async fn has_notification(
        &self,
        recipient_id: &str,
        game_id: i64,
        event_type: EventType,
        value_hash: Option<&str>,
    ) -> Result<bool>;

    async fn list_notifications(&self, recipient_id: &str) -> Result<Vec<NotificationRecord>>;

    async fn upsert_recipient(&self, recipient: &Recipient) -> Result<()>;

    /// Active recipients
    async fn list_recipients(&self) -> Result<Vec<Recipient>>;

    /// Get the configuration
    fn config(&self) -> &PersistenceConfig;
}

type NotificationKey = (String, i64, EventType, String);

/// In-memory persistence backend (for testing and dry runs)
pub struct InMemoryPersistence {
    config: PersistenceConfig,
    cache: Arc<Mutex<HashMap<String, StoredCacheEntry>>>,
    games: Arc<Mutex<HashMap<(i64, i64), GameEvent>>>,
    notifications: Arc<Mutex<(HashSet<NotificationKey>, Vec<NotificationRecord>)>>,
    recipients: Arc<Mutex<HashMap<String, Recipient>>>,
}

impl InMemoryPersistence {
    /// Create a new in-memory persistence backend
    pub fn new(config: PersistenceConfig) -> Self {
        Self {
            config,
            cache: Arc::new(Mutex::new(HashMap::new())),
            games: Arc::new(Mutex::new(HashMap::new())),
            notifications: Arc::new(Mutex::new((HashSet::new(), Vec::new()))),
            recipients: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create a new in-memory persistence backend with default config
    pub fn with_default_config() -> Self {
        Self::new(PersistenceConfig::default())
    }

    /// Total records in the notification log
    pub async fn notification_count(&self) -> usize {
        self.notifications.lock().await.1.len()
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::with_default_config()
    }
}

fn missing_game(game_id: i64, team_id: i64) -> PersistenceError {
    PersistenceError::not_found(format!("game {game_id} for team {team_id}"))
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn initialize(&self) -> Result<()> {
        tracing::info!("In-memory persistence backend initialized");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        tracing::info!("In-memory persistence backend shutdown complete");
        Ok(())
    }

    async fn load_cache_entry(&self, key: &str) -> Result<Option<StoredCacheEntry>> {
        Ok(self.cache.lock().await.get(key).cloned())
    }

    async fn save_cache_entry(&self, entry: &StoredCacheEntry) -> Result<()> {
        self.cache.lock().await.insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn upsert_game_event(&self, event: &GameEvent) -> Result<()> {
        let mut games = self.games.lock().await;
        match games.get_mut(&(event.game_id, event.team_id)) {
            Some(existing) => {
                existing.team_name = event.team_name.clone();
                existing.scheduled_time = event.scheduled_time;
                existing.rink = event.rink.clone();
                existing.opponent = event.opponent.clone();
                existing.is_home = event.is_home;
                existing.home_goals = event.home_goals;
                existing.away_goals = event.away_goals;
                existing.last_checked_at = event.last_checked_at;
            }
            None => {
                games.insert((event.game_id, event.team_id), event.clone());
            }
        }
        Ok(())
    }

    async fn get_game_event(&self, game_id: i64, team_id: i64) -> Result<Option<GameEvent>> {
        Ok(self.games.lock().await.get(&(game_id, team_id)).cloned())
    }

    async fn list_active_game_events(&self) -> Result<Vec<GameEvent>> {
        let games = self.games.lock().await;
        let mut active: Vec<GameEvent> = games.values().filter(|g| !g.archived).cloned().collect();
        active.sort_by_key(|g| (g.scheduled_time, g.game_id, g.team_id));
        Ok(active)
    }

    async fn set_locker_room(
        &self,
        game_id: i64,
        team_id: i64,
        room: &LockerRoom,
        checked_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut games = self.games.lock().await;
        let game = games.get_mut(&(game_id, team_id)).ok_or_else(|| missing_game(game_id, team_id))?;
        game.last_known_locker_room = Some(room.clone());
        game.last_checked_at = checked_at;
        Ok(())
    }

    async fn mark_game_checked(
        &self,
        game_id: i64,
        team_id: i64,
        checked_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut games = self.games.lock().await;
        let game = games.get_mut(&(game_id, team_id)).ok_or_else(|| missing_game(game_id, team_id))?;
        game.last_checked_at = checked_at;
        Ok(())
    }

    async fn archive_games_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut games = self.games.lock().await;
        let mut archived = 0;
        for game in games.values_mut().filter(|g| !g.archived && g.scheduled_time < cutoff) {
            game.archived = true;
            archived += 1;
        }
        Ok(archived)
    }

    async fn insert_notification(&self, record: &NotificationRecord) -> Result<InsertOutcome> {
        let mut guard = self.notifications.lock().await;
        let (keys, records) = &mut *guard;
        if !keys.insert(record.key()) {
            return Ok(InsertOutcome::Duplicate);
        }
        records.push(record.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn has_notification(
        &self,
        recipient_id: &str,
        game_id: i64,
        event_type: EventType,
        value_hash: Option<&str>,
    ) -> Result<bool> {
        let guard = self.notifications.lock().await;
        Ok(guard.1.iter().any(|r| {
            r.recipient_id == recipient_id
                && r.game_id == game_id
                && r.event_type == event_type
                && value_hash.map_or(true, |hash| r.value_hash == hash)
        }))
    }

    async fn list_notifications(&self, recipient_id: &str) -> Result<Vec<NotificationRecord>> {
        let guard = self.notifications.lock().await;
        Ok(guard.1.iter().filter(|r| r.recipient_id == recipient_id).cloned().collect())
    }

    async fn upsert_recipient(&self, recipient: &Recipient) -> Result<()> {
        self.recipients.lock().await.insert(recipient.id.clone(), recipient.clone());
        Ok(())
    }

    async fn list_recipients(&self) -> Result<Vec<Recipient>> {
        let recipients = self.recipients.lock().await;
        let mut active: Vec<Recipient> = recipients.values().filter(|r| r.active).cloned().collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(active)
    }

    fn config(&self) -> &PersistenceConfig {
        &self.config
    }
}
