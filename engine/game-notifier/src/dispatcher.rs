//! At-most-once notification delivery

use crate::channel::{ChannelError, NotificationChannel};
use crate::config::DispatchConfig;
use crate::content::render_message;
use crate::event::{value_hash, DetectedEvent, EventPayload};
use crate::metrics::DispatchMetrics;
use chrono::Utc;
use chrono_tz::Tz;
use dashmap::DashMap;
use persistence::{EventType, InsertOutcome, NotificationRecord, PersistenceBackend, Recipient};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Why a dispatch did not deliver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// A recent dispatch of this event type to this recipient failed
    CoolingDown,
    /// Every delivery attempt failed
    DeliveryFailed { attempts: u32, error: ChannelError },
    /// The notification log could not be read
    Storage(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    /// Already delivered; no outbound call was made
    Suppressed,
    Failed(FailureReason),
}

type DispatchKey = (String, i64, EventType, String);

/// Exclusive hold on one idempotency key. The map entry is removed on drop
/// once no other dispatch is waiting on it.
struct KeyLock<'a> {
    locks: &'a DashMap<DispatchKey, Arc<Mutex<()>>>,
    key: DispatchKey,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Left: the map's handle and ours
        self.locks.remove_if(&self.key, |_, held| {
            Arc::ptr_eq(held, &self.lock) && Arc::strong_count(held) == 2
        });
    }
}

/// Delivers notifications at most once per `(recipient, game, event type, value hash)`
pub struct Dispatcher {
    config: DispatchConfig,
    backend: Arc<dyn PersistenceBackend>,
    channel: Arc<dyn NotificationChannel>,
    locks: DashMap<DispatchKey, Arc<Mutex<()>>>,
    /// Delivered but not recorded; never sent again by this process
    unrecorded: DashMap<DispatchKey, ()>,
    cooldowns: DashMap<(String, EventType), Instant>,
    metrics: Arc<DispatchMetrics>,
}

impl Dispatcher {
    pub fn new(
        config: DispatchConfig,
        backend: Arc<dyn PersistenceBackend>,
        channel: Arc<dyn NotificationChannel>,
    ) -> Self {
        Self {
            config,
            backend,
            channel,
            locks: DashMap::new(),
            unrecorded: DashMap::new(),
            cooldowns: DashMap::new(),
            metrics: Arc::new(DispatchMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<DispatchMetrics> {
        Arc::clone(&self.metrics)
    }

    fn suppressed(&self, recipient: &Recipient, event_type: EventType, game_id: i64) -> DispatchOutcome {
        self.metrics.suppressed_total.inc();
        debug!(recipient = %recipient.id, game_id, event = %event_type, "Suppressed duplicate notification");
        DispatchOutcome::Suppressed
    }

    fn cooling_down(&self, recipient_id: &str, event_type: EventType) -> bool {
        let key = (recipient_id.to_string(), event_type);
        let until = self.cooldowns.get(&key).map(|until| *until);
        match until {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                self.cooldowns.remove(&key);
                false
            }
            None => false,
        }
    }

    fn recipient_timezone(recipient: &Recipient) -> Tz {
        recipient.timezone.parse().unwrap_or_else(|_| {
            warn!(recipient = %recipient.id, "Unknown timezone {}, using league time", recipient.timezone);
            chrono_tz::America::Los_Angeles
        })
    }

    /// Wait until no other dispatch in this process holds `key`
    async fn lock_key(&self, key: DispatchKey) -> KeyLock<'_> {
        let lock = Arc::clone(self.locks.entry(key.clone()).or_default().value());
        let guard = Arc::clone(&lock).lock_owned().await;
        KeyLock { locks: &self.locks, key, lock, guard: Some(guard) }
    }

    /// Deliver a detected event to one recipient
    pub async fn dispatch_event(&self, recipient: &Recipient, event: &DetectedEvent) -> DispatchOutcome {
        self.dispatch(recipient, event.event_type, event.game_id, &event.payload).await
    }

    /// Deliver `payload` unless an identical notification was already sent.
    ///
    /// A record is appended only after the channel confirms delivery. Identical
    /// concurrent dispatches wait for the first to finish, so `Suppressed` always
    /// means the notification was delivered.
    pub async fn dispatch(
        &self,
        recipient: &Recipient,
        event_type: EventType,
        game_id: i64,
        payload: &EventPayload,
    ) -> DispatchOutcome {
        let hash = value_hash(payload);
        let key: DispatchKey = (recipient.id.clone(), game_id, event_type, hash.clone());

        // Concurrent dispatches of the same key queue here and see the holder's outcome
        let _held = self.lock_key(key.clone()).await;
        if self.unrecorded.contains_key(&key) {
            return self.suppressed(recipient, event_type, game_id);
        }

        match self.backend.has_notification(&recipient.id, game_id, event_type, Some(&hash)).await {
            Ok(true) => return self.suppressed(recipient, event_type, game_id),
            Ok(false) => {}
            Err(e) => {
                self.metrics.failed_total.inc();
                error!(recipient = %recipient.id, game_id, "Could not read notification log: {}", e);
                return DispatchOutcome::Failed(FailureReason::Storage(e.to_string()));
            }
        }

        if self.cooling_down(&recipient.id, event_type) {
            self.metrics.cooling_down_total.inc();
            debug!(recipient = %recipient.id, event = %event_type, "Skipping dispatch during cooldown");
            return DispatchOutcome::Failed(FailureReason::CoolingDown);
        }

        let content = render_message(event_type, payload, Self::recipient_timezone(recipient));
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        let delivery = loop {
            attempt += 1;
            match self.channel.send(&recipient.destination, &content).await {
                Ok(()) => break Ok(()),
                Err(e) if attempt < max_attempts => {
                    let delay = self.config.backoff(attempt);
                    self.metrics.delivery_retries_total.inc();
                    warn!(
                        recipient = %recipient.id,
                        "Delivery attempt {}/{} via {} failed: {}. Retrying in {:?}",
                        attempt, max_attempts, self.channel.name(), e, delay
                    );
                    sleep(delay).await;
                }
                Err(e) => break Err(e),
            }
        };

        if let Err(e) = delivery {
            self.cooldowns
                .insert((recipient.id.clone(), event_type), Instant::now() + self.config.cooldown());
            self.metrics.failed_total.inc();
            error!(
                recipient = %recipient.id,
                game_id,
                event = %event_type,
                "Delivery failed after {} attempts: {}", attempt, e
            );
            return DispatchOutcome::Failed(FailureReason::DeliveryFailed { attempts: attempt, error: e });
        }

        let record = NotificationRecord {
            recipient_id: recipient.id.clone(),
            game_id,
            event_type,
            value_hash: hash,
            sent_at: Utc::now(),
        };

        match self.backend.insert_notification(&record).await {
            Ok(InsertOutcome::Inserted) => {
                self.metrics.sent_total.inc();
                info!(recipient = %recipient.id, game_id, event = %event_type, "Notification sent");
                DispatchOutcome::Sent
            }
            Ok(InsertOutcome::Duplicate) => {
                warn!(
                    recipient = %recipient.id,
                    game_id,
                    event = %event_type,
                    "Notification already recorded by another dispatcher"
                );
                self.suppressed(recipient, event_type, game_id)
            }
            Err(e) => {
                self.unrecorded.insert(key, ());
                self.metrics.record_errors_total.inc();
                self.metrics.sent_total.inc();
                error!(recipient = %recipient.id, game_id, "Delivered but failed to record: {}", e);
                DispatchOutcome::Sent
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{NaiveTime, TimeZone};
    use persistence::{InMemoryPersistence, LockerRoom, RecipientKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Records deliveries; fails the first `failures` attempts
    struct TestChannel {
        calls: AtomicUsize,
        failures: AtomicUsize,
        delay: Duration,
    }

    impl TestChannel {
        fn new(failures: usize, delay: Duration) -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0), failures: AtomicUsize::new(failures), delay })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl NotificationChannel for TestChannel {
        fn name(&self) -> &str {
            "test"
        }

        async fn send(&self, _recipient: &str, _content: &str) -> Result<(), ChannelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(ChannelError::Transport("connection reset".to_string()));
            }
            Ok(())
        }
    }

    fn recipient() -> Recipient {
        Recipient {
            id: "group:-1001:4784".to_string(),
            destination: "-1001".to_string(),
            kind: RecipientKind::Group,
            team_id: 4784,
            notify_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            timezone: Recipient::DEFAULT_TIMEZONE.to_string(),
            game_day_enabled: true,
            pre_game_enabled: true,
            post_game_enabled: true,
            active: true,
        }
    }

    fn assigned(label: &str) -> EventPayload {
        EventPayload::LockerRoom {
            team: "Camels".to_string(),
            room: LockerRoom::new("San Jose Black (E)", label),
            previous: None,
        }
    }

    fn dispatcher(channel: Arc<TestChannel>) -> (Dispatcher, Arc<InMemoryPersistence>) {
        let backend = Arc::new(InMemoryPersistence::default());
        let dispatcher = Dispatcher::new(DispatchConfig::default(), backend.clone(), channel);
        (dispatcher, backend)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_dispatch_sends_once() {
        let channel = TestChannel::new(0, Duration::from_millis(50));
        let (dispatcher, backend) = dispatcher(Arc::clone(&channel));
        let recipient = recipient();
        let payload = assigned("S2");

        let outcomes = futures::future::join_all((0..10).map(|_| {
            dispatcher.dispatch(&recipient, EventType::LockerRoomAssigned, 541086, &payload)
        }))
        .await;

        let sent = outcomes.iter().filter(|o| **o == DispatchOutcome::Sent).count();
        let suppressed = outcomes.iter().filter(|o| **o == DispatchOutcome::Suppressed).count();
        assert_eq!(sent, 1);
        assert_eq!(suppressed, 9);
        assert_eq!(channel.calls(), 1);
        assert_eq!(backend.notification_count().await, 1);

        let metrics = dispatcher.metrics().snapshot();
        assert_eq!(metrics.sent_total, 1);
        assert_eq!(metrics.suppressed_total, 9);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_dispatch_across_tasks() {
        let channel = TestChannel::new(0, Duration::ZERO);
        let (dispatcher, backend) = dispatcher(Arc::clone(&channel));
        let dispatcher = Arc::new(dispatcher);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    dispatcher
                        .dispatch(&recipient(), EventType::LockerRoomAssigned, 541086, &assigned("S2"))
                        .await
                })
            })
            .collect();

        let mut sent = 0;
        for handle in handles {
            if handle.await.unwrap() == DispatchOutcome::Sent {
                sent += 1;
            }
        }

        assert_eq!(sent, 1);
        assert_eq!(channel.calls(), 1);
        assert_eq!(backend.notification_count().await, 1);
    }

    #[tokio::test]
    async fn test_new_value_is_a_new_notification() {
        let channel = TestChannel::new(0, Duration::ZERO);
        let (dispatcher, _) = dispatcher(Arc::clone(&channel));
        let recipient = recipient();

        let first = dispatcher.dispatch(&recipient, EventType::LockerRoomAssigned, 541086, &assigned("S2")).await;
        let again = dispatcher.dispatch(&recipient, EventType::LockerRoomAssigned, 541086, &assigned("S2")).await;
        let changed = dispatcher.dispatch(&recipient, EventType::LockerRoomChanged, 541086, &assigned("S4")).await;

        assert_eq!(first, DispatchOutcome::Sent);
        assert_eq!(again, DispatchOutcome::Suppressed);
        assert_eq!(changed, DispatchOutcome::Sent);
        assert_eq!(channel.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_delivery_failure_is_retried() {
        let channel = TestChannel::new(1, Duration::ZERO);
        let (dispatcher, backend) = dispatcher(Arc::clone(&channel));

        let outcome =
            dispatcher.dispatch(&recipient(), EventType::LockerRoomAssigned, 541086, &assigned("S2")).await;

        assert_eq!(outcome, DispatchOutcome::Sent);
        assert_eq!(channel.calls(), 2);
        assert_eq!(dispatcher.metrics().snapshot().delivery_retries_total, 1);
        assert_eq!(backend.notification_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_delivery_records_nothing_and_cools_down() {
        let channel = TestChannel::new(100, Duration::ZERO);
        let (dispatcher, backend) = dispatcher(Arc::clone(&channel));
        let recipient = recipient();
        let payload = EventPayload::GameDay {
            team: "Camels".to_string(),
            opponent: "Blades".to_string(),
            rink: "San Jose Black (E)".to_string(),
            scheduled_time: Utc.with_ymd_and_hms(2024, 9, 11, 4, 45, 0).unwrap(),
        };

        let outcome = dispatcher.dispatch(&recipient, EventType::GameDay, 541086, &payload).await;
        assert!(matches!(
            outcome,
            DispatchOutcome::Failed(FailureReason::DeliveryFailed { attempts: 3, .. })
        ));
        assert_eq!(channel.calls(), 3);
        assert_eq!(backend.notification_count().await, 0);

        let outcome = dispatcher.dispatch(&recipient, EventType::GameDay, 541086, &payload).await;
        assert_eq!(outcome, DispatchOutcome::Failed(FailureReason::CoolingDown));
        assert_eq!(channel.calls(), 3);

        tokio::time::advance(Duration::from_secs(15 * 60 + 1)).await;
        channel.failures.store(0, Ordering::SeqCst);

        let outcome = dispatcher.dispatch(&recipient, EventType::GameDay, 541086, &payload).await;
        assert_eq!(outcome, DispatchOutcome::Sent);
        assert_eq!(backend.notification_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_failed_dispatch_is_never_suppressed() {
        let channel = TestChannel::new(100, Duration::from_millis(50));
        let (dispatcher, backend) = dispatcher(Arc::clone(&channel));
        let recipient = recipient();
        let payload = assigned("S2");

        let (first, second) = tokio::join!(
            dispatcher.dispatch(&recipient, EventType::LockerRoomAssigned, 541086, &payload),
            dispatcher.dispatch(&recipient, EventType::LockerRoomAssigned, 541086, &payload),
        );

        assert!(matches!(
            first,
            DispatchOutcome::Failed(FailureReason::DeliveryFailed { attempts: 3, .. })
        ));
        // The second waited for the first and found it failed
        assert_eq!(second, DispatchOutcome::Failed(FailureReason::CoolingDown));
        assert_eq!(channel.calls(), 3);
        assert_eq!(backend.notification_count().await, 0);
        assert_eq!(dispatcher.metrics().snapshot().suppressed_total, 0);
        assert!(dispatcher.locks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_dispatch_releases_key() {
        let channel = TestChannel::new(0, Duration::from_secs(60));
        let (dispatcher, backend) = dispatcher(Arc::clone(&channel));
        let recipient = recipient();
        let payload = assigned("S2");

        let cancelled = tokio::time::timeout(
            Duration::from_secs(1),
            dispatcher.dispatch(&recipient, EventType::LockerRoomAssigned, 541086, &payload),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(backend.notification_count().await, 0);

        let outcome =
            dispatcher.dispatch(&recipient, EventType::LockerRoomAssigned, 541086, &payload).await;
        assert_eq!(outcome, DispatchOutcome::Sent);
    }
}
