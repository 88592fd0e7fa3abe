//! Periodic backup delivery.
//!
//! A single poll loop wakes on a fixed interval, collects due backup
//! settings and delivers a CSV to each owner's chat. Ticks never overlap:
//! if a tick is still running when the next one fires, the new tick is
//! skipped rather than queued. Failures are isolated per owner and
//! postpone only that owner's next run.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backup::{backup_file_name, build_backup_csv, frequency_label, summarize_backup};
use crate::domain::BackupSetting;
use crate::ports::TransportPort;
use crate::store::Store;
use crate::Result;

/// Delay applied to a setting whose delivery failed, in minutes.
const FAILURE_POSTPONE_MINUTES: i64 = 120;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// The tick found a previous tick still running and did nothing.
    pub skipped: bool,
    pub sent: usize,
    pub postponed: usize,
}

pub struct BackupScheduler {
    store: Arc<Store>,
    transport: Arc<dyn TransportPort>,
    tick_guard: tokio::sync::Mutex<()>,
}

impl BackupScheduler {
    pub fn new(store: Arc<Store>, transport: Arc<dyn TransportPort>) -> Self {
        Self {
            store,
            transport,
            tick_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Runs one scheduler tick against the given wall-clock instant.
    pub async fn poll_once(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let Ok(_running) = self.tick_guard.try_lock() else {
            return Ok(TickReport {
                skipped: true,
                ..TickReport::default()
            });
        };

        let due = self.store.due_backup_settings(now)?;
        let mut report = TickReport::default();

        for setting in due {
            let owner = setting.owner;
            match self.deliver(&setting).await {
                Ok(()) => {
                    // Reschedule from the completion time, not the slot the
                    // tick fired for, so slow deliveries carry their drift.
                    self.store
                        .mark_backup_sent(owner, setting.frequency, Utc::now())?;
                    report.sent += 1;
                }
                Err(err) => {
                    warn!(owner = %owner, error = %err, "backup delivery failed, postponing");
                    self.store
                        .postpone_backup(owner, FAILURE_POSTPONE_MINUTES, Utc::now())?;
                    report.postponed += 1;
                }
            }
        }

        if report.sent > 0 || report.postponed > 0 {
            info!(sent = report.sent, postponed = report.postponed, "backup tick finished");
        }
        Ok(report)
    }

    async fn deliver(&self, setting: &BackupSetting) -> Result<()> {
        let backup = build_backup_csv(&self.store, setting.owner)?;
        let file_name = backup_file_name(setting.owner, &backup.generated_at);
        let caption = format!(
            "Автоматический CSV-бэкап ({}).\n{}",
            frequency_label(setting.frequency),
            summarize_backup(backup.subjects, backup.rows)
        );

        self.transport
            .send_document(setting.owner, &file_name, backup.csv.into_bytes(), &caption)
            .await
    }

    /// Spawns the poll loop; it stops when `shutdown` is cancelled.
    pub fn spawn(
        self: Arc<Self>,
        interval: std::time::Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("backup scheduler stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = self.poll_once(Utc::now()).await {
                            warn!(error = %err, "backup tick failed");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BackupFrequency, UserId};
    use crate::ports::{InlineKeyboard, TransportPort};
    use crate::store::iso;
    use crate::Error;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct FakeTransport {
        documents: Mutex<Vec<(UserId, String)>>,
        fail_for: Option<UserId>,
        delay: Option<std::time::Duration>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TransportPort for FakeTransport {
        async fn send_text(&self, _chat: UserId, _text: &str) -> Result<()> {
            Ok(())
        }

        async fn send_menu_text(&self, _chat: UserId, _text: &str) -> Result<()> {
            Ok(())
        }

        async fn send_keyboard(
            &self,
            _chat: UserId,
            _text: &str,
            _keyboard: InlineKeyboard,
        ) -> Result<()> {
            Ok(())
        }

        async fn send_document(
            &self,
            chat: UserId,
            file_name: &str,
            _bytes: Vec<u8>,
            _caption: &str,
        ) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_for == Some(chat) {
                return Err(Error::External("telegram unavailable".into()));
            }
            self.documents
                .lock()
                .await
                .push((chat, file_name.to_string()));
            Ok(())
        }

        async fn answer_callback(
            &self,
            _callback_id: &str,
            _text: Option<&str>,
            _alert: bool,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn seed_due(store: &Store, owner: UserId, now: DateTime<Utc>) {
        store.ensure_user(owner, None, None).unwrap();
        // Weekly cadence whose slot already elapsed.
        store
            .set_backup_frequency(owner, BackupFrequency::Weekly, now - Duration::days(8))
            .unwrap();
    }

    #[tokio::test]
    async fn due_setting_is_delivered_and_rescheduled() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let now = Utc::now();
        let owner = UserId(1);
        seed_due(&store, owner, now);
        store.create_subject(owner, "Сидр").unwrap();

        let transport = Arc::new(FakeTransport::default());
        let scheduler = BackupScheduler::new(store.clone(), transport.clone());

        let report = scheduler.poll_once(now).await.unwrap();
        assert_eq!(report, TickReport { skipped: false, sent: 1, postponed: 0 });

        let docs = transport.documents.lock().await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].0, owner);
        assert!(docs[0].1.starts_with("backup-1-"));

        let setting = store.backup_setting(owner).unwrap();
        assert_eq!(setting.frequency, BackupFrequency::Weekly);
        assert!(setting.last_sent_at.is_some());
        // Rescheduled from delivery time, a full interval in the future.
        assert!(setting.next_run_at.unwrap() > iso(now + Duration::days(6)));
    }

    #[tokio::test]
    async fn not_yet_due_setting_is_left_alone() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let now = Utc::now();
        let owner = UserId(1);
        store.ensure_user(owner, None, None).unwrap();
        store
            .set_backup_frequency(owner, BackupFrequency::Weekly, now)
            .unwrap();

        let transport = Arc::new(FakeTransport::default());
        let scheduler = BackupScheduler::new(store.clone(), transport.clone());

        let report = scheduler.poll_once(now).await.unwrap();
        assert_eq!(report.sent, 0);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_tick_is_skipped_not_queued() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let now = Utc::now();
        seed_due(&store, UserId(1), now);

        let transport = Arc::new(FakeTransport {
            delay: Some(std::time::Duration::from_secs(30)),
            ..FakeTransport::default()
        });
        let scheduler = Arc::new(BackupScheduler::new(store.clone(), transport.clone()));

        let (first, second) = tokio::join!(scheduler.poll_once(now), scheduler.poll_once(now));
        let first = first.unwrap();
        let second = second.unwrap();

        assert!(second.skipped);
        assert_eq!(first, TickReport { skipped: false, sent: 1, postponed: 0 });
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_postpones_only_the_failing_owner() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let now = Utc::now();
        let healthy = UserId(1);
        let broken = UserId(2);
        seed_due(&store, healthy, now);
        seed_due(&store, broken, now);
        let broken_before = store.backup_setting(broken).unwrap();

        let transport = Arc::new(FakeTransport {
            fail_for: Some(broken),
            ..FakeTransport::default()
        });
        let scheduler = BackupScheduler::new(store.clone(), transport.clone());

        let report = scheduler.poll_once(now).await.unwrap();
        assert_eq!(report, TickReport { skipped: false, sent: 1, postponed: 1 });

        let healthy_after = store.backup_setting(healthy).unwrap();
        assert!(healthy_after.last_sent_at.is_some());

        let broken_after = store.backup_setting(broken).unwrap();
        assert_eq!(broken_after.frequency, BackupFrequency::Weekly);
        assert_eq!(broken_after.last_sent_at, None);
        // Pushed roughly two hours out, not a full interval.
        assert!(broken_after.next_run_at > broken_before.next_run_at);
        assert!(broken_after.next_run_at.unwrap() < iso(now + Duration::days(1)));
    }
}
