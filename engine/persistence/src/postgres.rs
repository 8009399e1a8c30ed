//! PostgreSQL persistence backend

use crate::backend::PersistenceBackend;
use crate::config::PersistenceConfig;
use crate::error::{PersistenceError, Result};
use crate::models::*;
use chrono::{DateTime, NaiveTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;

const GAME_COLUMNS: &str = "game_id, team_id, team_name, scheduled_time, rink, opponent, is_home, \
     home_goals, away_goals, locker_room_rink, locker_room_label, last_checked_at, archived";

const RECIPIENT_COLUMNS: &str = "id, destination, kind, team_id, notify_time, timezone, \
     game_day_enabled, pre_game_enabled, post_game_enabled, active";

/// sqlx-backed persistence with embedded migrations
pub struct PostgresPersistence {
    config: PersistenceConfig,
    pool: PgPool,
}

impl PostgresPersistence {
    /// Connect a pool according to `config`
    pub async fn connect(config: PersistenceConfig) -> Result<Self> {
        config.validate().map_err(PersistenceError::config)?;
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| PersistenceError::config("database_url is required"))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(url)
            .await?;

        Ok(Self { config, pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn to_db_goals(goals: Option<u32>) -> Option<i32> {
    goals.and_then(|g| i32::try_from(g).ok())
}

fn from_db_goals(goals: Option<i32>) -> Option<u32> {
    goals.and_then(|g| u32::try_from(g).ok())
}

fn game_from_row(row: &PgRow) -> Result<GameEvent> {
    let room_rink: Option<String> = row.try_get("locker_room_rink")?;
    let room_label: Option<String> = row.try_get("locker_room_label")?;
    let last_known_locker_room = match (room_rink, room_label) {
        (Some(rink), Some(label)) => Some(LockerRoom { rink, label }),
        _ => None,
    };

    Ok(GameEvent {
        game_id: row.try_get("game_id")?,
        team_id: row.try_get("team_id")?,
        team_name: row.try_get("team_name")?,
        scheduled_time: row.try_get("scheduled_time")?,
        rink: row.try_get("rink")?,
        opponent: row.try_get("opponent")?,
        is_home: row.try_get("is_home")?,
        home_goals: from_db_goals(row.try_get("home_goals")?),
        away_goals: from_db_goals(row.try_get("away_goals")?),
        last_known_locker_room,
        last_checked_at: row.try_get("last_checked_at")?,
        archived: row.try_get("archived")?,
    })
}

fn notification_from_row(row: &PgRow) -> Result<NotificationRecord> {
    let event_type: String = row.try_get("event_type")?;
    Ok(NotificationRecord {
        recipient_id: row.try_get("recipient_id")?,
        game_id: row.try_get("game_id")?,
        event_type: event_type.parse().map_err(PersistenceError::corruption)?,
        value_hash: row.try_get("value_hash")?,
        sent_at: row.try_get("sent_at")?,
    })
}

fn recipient_from_row(row: &PgRow) -> Result<Recipient> {
    let kind: String = row.try_get("kind")?;
    let notify_time: NaiveTime = row.try_get("notify_time")?;
    Ok(Recipient {
        id: row.try_get("id")?,
        destination: row.try_get("destination")?,
        kind: kind.parse().map_err(PersistenceError::corruption)?,
        team_id: row.try_get("team_id")?,
        notify_time,
        timezone: row.try_get("timezone")?,
        game_day_enabled: row.try_get("game_day_enabled")?,
        pre_game_enabled: row.try_get("pre_game_enabled")?,
        post_game_enabled: row.try_get("post_game_enabled")?,
        active: row.try_get("active")?,
    })
}

#[async_trait::async_trait]
impl PersistenceBackend for PostgresPersistence {
    async fn initialize(&self) -> Result<()> {
        if self.config.run_migrations {
            sqlx::migrate!("./migrations").run(&self.pool).await?;
        }
        info!("Postgres persistence backend initialized");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.pool.close().await;
        info!("Postgres persistence backend shutdown complete");
        Ok(())
    }

    async fn load_cache_entry(&self, key: &str) -> Result<Option<StoredCacheEntry>> {
        let row = sqlx::query(
            "SELECT cache_key, descriptor, payload, tier, fetched_at FROM cache_entries WHERE cache_key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let tier: String = row.try_get("tier")?;
        Ok(Some(StoredCacheEntry {
            key: row.try_get("cache_key")?,
            descriptor: row.try_get("descriptor")?,
            payload: row.try_get("payload")?,
            tier: tier.parse().map_err(PersistenceError::corruption)?,
            fetched_at: row.try_get("fetched_at")?,
        }))
    }

    async fn save_cache_entry(&self, entry: &StoredCacheEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO cache_entries (cache_key, descriptor, payload, tier, fetched_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (cache_key) DO UPDATE SET
                descriptor = EXCLUDED.descriptor,
                payload = EXCLUDED.payload,
                tier = EXCLUDED.tier,
                fetched_at = EXCLUDED.fetched_at",
        )
        .bind(&entry.key)
        .bind(&entry.descriptor)
        .bind(&entry.payload)
        .bind(entry.tier.as_str())
        .bind(entry.fetched_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_game_event(&self, event: &GameEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO game_events
                (game_id, team_id, team_name, scheduled_time, rink, opponent, is_home,
                 home_goals, away_goals, locker_room_rink, locker_room_label, last_checked_at, archived)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             ON CONFLICT (game_id, team_id) DO UPDATE SET
                team_name = EXCLUDED.team_name,
                scheduled_time = EXCLUDED.scheduled_time,
                rink = EXCLUDED.rink,
                opponent = EXCLUDED.opponent,
                is_home = EXCLUDED.is_home,
                home_goals = EXCLUDED.home_goals,
                away_goals = EXCLUDED.away_goals,
                last_checked_at = EXCLUDED.last_checked_at",
        )
        .bind(event.game_id)
        .bind(event.team_id)
        .bind(&event.team_name)
        .bind(event.scheduled_time)
        .bind(&event.rink)
        .bind(&event.opponent)
        .bind(event.is_home)
        .bind(to_db_goals(event.home_goals))
        .bind(to_db_goals(event.away_goals))
        .bind(event.last_known_locker_room.as_ref().map(|r| r.rink.clone()))
        .bind(event.last_known_locker_room.as_ref().map(|r| r.label.clone()))
        .bind(event.last_checked_at)
        .bind(event.archived)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_game_event(&self, game_id: i64, team_id: i64) -> Result<Option<GameEvent>> {
        let query = format!("SELECT {GAME_COLUMNS} FROM game_events WHERE game_id = $1 AND team_id = $2");
        let row = sqlx::query(&query)
            .bind(game_id)
            .bind(team_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(game_from_row).transpose()
    }

    async fn list_active_game_events(&self) -> Result<Vec<GameEvent>> {
        let query = format!(
            "SELECT {GAME_COLUMNS} FROM game_events WHERE NOT archived ORDER BY scheduled_time, game_id, team_id"
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(game_from_row).collect()
    }

    async fn set_locker_room(
        &self,
        game_id: i64,
        team_id: i64,
        room: &LockerRoom,
        checked_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE game_events
             SET locker_room_rink = $3, locker_room_label = $4, last_checked_at = $5
             WHERE game_id = $1 AND team_id = $2",
        )
        .bind(game_id)
        .bind(team_id)
        .bind(&room.rink)
        .bind(&room.label)
        .bind(checked_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::not_found(format!("game {game_id} for team {team_id}")));
        }
        Ok(())
    }

    async fn mark_game_checked(
        &self,
        game_id: i64,
        team_id: i64,
        checked_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE game_events SET last_checked_at = $3 WHERE game_id = $1 AND team_id = $2",
        )
        .bind(game_id)
        .bind(team_id)
        .bind(checked_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::not_found(format!("game {game_id} for team {team_id}")));
        }
        Ok(())
    }

    async fn archive_games_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE game_events SET archived = TRUE WHERE NOT archived AND scheduled_time < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_notification(&self, record: &NotificationRecord) -> Result<InsertOutcome> {
        let result = sqlx::query(
            "INSERT INTO notification_records (recipient_id, game_id, event_type, value_hash, sent_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (recipient_id, game_id, event_type, value_hash) DO NOTHING",
        )
        .bind(&record.recipient_id)
        .bind(record.game_id)
        .bind(record.event_type.as_str())
        .bind(&record.value_hash)
        .bind(record.sent_at)
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted
        })
    }

    async fn has_notification(
        &self,
        recipient_id: &str,
        game_id: i64,
        event_type: EventType,
        value_hash: Option<&str>,
    ) -> Result<bool> {
        let row = sqlx::query(
            "SELECT EXISTS (
                SELECT 1 FROM notification_records
                WHERE recipient_id = $1 AND game_id = $2 AND event_type = $3
                  AND ($4::TEXT IS NULL OR value_hash = $4)
             ) AS found",
        )
        .bind(recipient_id)
        .bind(game_id)
        .bind(event_type.as_str())
        .bind(value_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("found")?)
    }

    async fn list_notifications(&self, recipient_id: &str) -> Result<Vec<NotificationRecord>> {
        let rows = sqlx::query(
            "SELECT recipient_id, game_id, event_type, value_hash, sent_at
             FROM notification_records WHERE recipient_id = $1 ORDER BY id",
        )
        .bind(recipient_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(notification_from_row).collect()
    }

    async fn upsert_recipient(&self, recipient: &Recipient) -> Result<()> {
        sqlx::query(
            "INSERT INTO recipients
                (id, destination, kind, team_id, notify_time, timezone,
                 game_day_enabled, pre_game_enabled, post_game_enabled, active)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (id) DO UPDATE SET
                destination = EXCLUDED.destination,
                kind = EXCLUDED.kind,
                team_id = EXCLUDED.team_id,
                notify_time = EXCLUDED.notify_time,
                timezone = EXCLUDED.timezone,
                game_day_enabled = EXCLUDED.game_day_enabled,
                pre_game_enabled = EXCLUDED.pre_game_enabled,
                post_game_enabled = EXCLUDED.post_game_enabled,
                active = EXCLUDED.active",
        )
        .bind(&recipient.id)
        .bind(&recipient.destination)
        .bind(recipient.kind.as_str())
        .bind(recipient.team_id)
        .bind(recipient.notify_time)
        .bind(&recipient.timezone)
        .bind(recipient.game_day_enabled)
        .bind(recipient.pre_game_enabled)
        .bind(recipient.post_game_enabled)
        .bind(recipient.active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_recipients(&self) -> Result<Vec<Recipient>> {
        let query = format!("SELECT {RECIPIENT_COLUMNS} FROM recipients WHERE active ORDER BY id");
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(recipient_from_row).collect()
    }

    fn config(&self) -> &PersistenceConfig {
        &self.config
    }
}
