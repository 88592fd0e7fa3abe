//! SQLite-backed repository.
//!
//! All reads and writes are scoped to the owning user. Single-row writes
//! are atomic per key (SQLite), which is the only locking the session
//! store and backup settings need; entry creation plus the parent-subject
//! touch runs in one transaction.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;
use uuid::Uuid;

use crate::domain::{
    BackupFrequency, BackupSetting, Entry, EntryExportRow, ShareLink, ShareLinkExportRow,
    ShareLinkKind, SharedView, Subject, UserId,
};
use crate::format::now_iso;
use crate::steps::ConversationStep;
use crate::{Error, Result};

/// Bounded batch size for one scheduler cycle.
pub const DUE_BATCH_LIMIT: usize = 200;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubjectScope {
    All,
    Active,
    Archived,
}

pub struct NewEntry {
    pub subject_id: String,
    pub owner: UserId,
    pub entry_date: String,
    pub raw_text: String,
    pub cleaned_text: Option<String>,
}

pub struct NewShareLink {
    pub token: String,
    pub subject_id: String,
    pub kind: ShareLinkKind,
    pub gift_recipient: Option<String>,
    pub bottle_code: Option<String>,
    pub gift_message: Option<String>,
    pub created_by: UserId,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrate(&conn)?;

        info!("store opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::External("store lock poisoned".to_string()))?;
        f(&conn)
    }

    fn with_conn_mut<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| Error::External("store lock poisoned".to_string()))?;
        f(&mut conn)
    }

    // -- Users --

    /// Upsert the user profile. The first insert also seeds a weekly
    /// backup schedule, so new users get periodic exports by default.
    pub fn ensure_user(
        &self,
        owner: UserId,
        username: Option<&str>,
        first_name: Option<&str>,
    ) -> Result<()> {
        let now = now_iso();
        let next_run = iso(Utc::now() + Duration::days(7));

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (telegram_id, username, first_name, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(telegram_id) DO UPDATE SET
                   username = excluded.username,
                   first_name = excluded.first_name,
                   updated_at = excluded.updated_at",
                params![owner.0, username, first_name, now],
            )?;

            conn.execute(
                "INSERT INTO backup_settings (telegram_id, frequency, next_run_at, last_sent_at, updated_at)
                 VALUES (?1, 'weekly', ?2, NULL, ?3)
                 ON CONFLICT(telegram_id) DO NOTHING",
                params![owner.0, next_run, now],
            )?;

            Ok(())
        })
    }

    // -- Subjects --

    pub fn create_subject(&self, owner: UserId, name: &str) -> Result<Subject> {
        let subject = Subject {
            id: Uuid::new_v4().to_string(),
            owner,
            name: name.to_string(),
            archived_at: None,
            created_at: now_iso(),
            updated_at: now_iso(),
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO subjects (id, owner_telegram_id, name, archived_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, NULL, ?4, ?5)",
                params![
                    subject.id,
                    subject.owner.0,
                    subject.name,
                    subject.created_at,
                    subject.updated_at
                ],
            )?;
            Ok(())
        })?;

        Ok(subject)
    }

    /// Most recently archived-or-updated first.
    pub fn list_subjects(&self, owner: UserId, scope: SubjectScope) -> Result<Vec<Subject>> {
        let filter = match scope {
            SubjectScope::All => "",
            SubjectScope::Active => " AND archived_at IS NULL",
            SubjectScope::Archived => " AND archived_at IS NOT NULL",
        };
        let sql = format!(
            "SELECT id, owner_telegram_id, name, archived_at, created_at, updated_at
             FROM subjects
             WHERE owner_telegram_id = ?1{filter}
             ORDER BY COALESCE(archived_at, updated_at) DESC, updated_at DESC"
        );

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![owner.0], map_subject)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    pub fn subject_for_owner(&self, subject_id: &str, owner: UserId) -> Result<Option<Subject>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, owner_telegram_id, name, archived_at, created_at, updated_at
                     FROM subjects WHERE id = ?1 AND owner_telegram_id = ?2",
                    params![subject_id, owner.0],
                    map_subject,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn subject_by_id(&self, subject_id: &str) -> Result<Option<Subject>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, owner_telegram_id, name, archived_at, created_at, updated_at
                     FROM subjects WHERE id = ?1",
                    params![subject_id],
                    map_subject,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Conditional on the subject being active; archiving an archived
    /// subject is a no-op signaled by `false`, not an error.
    pub fn archive_subject(&self, subject_id: &str, owner: UserId) -> Result<bool> {
        let archived_at = now_iso();
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE subjects SET archived_at = ?1, updated_at = ?1
                 WHERE id = ?2 AND owner_telegram_id = ?3 AND archived_at IS NULL",
                params![archived_at, subject_id, owner.0],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn unarchive_subject(&self, subject_id: &str, owner: UserId) -> Result<bool> {
        let now = now_iso();
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE subjects SET archived_at = NULL, updated_at = ?1
                 WHERE id = ?2 AND owner_telegram_id = ?3 AND archived_at IS NOT NULL",
                params![now, subject_id, owner.0],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Entries --

    /// Inserting the entry and touching the parent subject's `updated_at`
    /// is one atomic unit.
    pub fn create_entry(&self, input: NewEntry) -> Result<Entry> {
        let entry = Entry {
            id: Uuid::new_v4().to_string(),
            subject_id: input.subject_id,
            owner: input.owner,
            entry_date: input.entry_date,
            raw_text: input.raw_text,
            cleaned_text: input.cleaned_text,
            created_at: now_iso(),
            updated_at: now_iso(),
        };

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO entries
                   (id, subject_id, telegram_id, entry_date, raw_text, cleaned_text, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    entry.id,
                    entry.subject_id,
                    entry.owner.0,
                    entry.entry_date,
                    entry.raw_text,
                    entry.cleaned_text,
                    entry.created_at,
                    entry.updated_at
                ],
            )?;
            tx.execute(
                "UPDATE subjects SET updated_at = ?1 WHERE id = ?2",
                params![now_iso(), entry.subject_id],
            )?;
            tx.commit()?;
            Ok(())
        })?;

        Ok(entry)
    }

    /// Entry date descending, then creation time descending as tie-break.
    /// Intentionally not pure chronological order: backdated entries sort
    /// by their stated date, same-day entries newest first.
    pub fn entries_for_subject(&self, subject_id: &str) -> Result<Vec<Entry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, subject_id, telegram_id, entry_date, raw_text, cleaned_text, created_at, updated_at
                 FROM entries
                 WHERE subject_id = ?1
                 ORDER BY entry_date DESC, created_at DESC",
            )?;
            let rows = stmt
                .query_map(params![subject_id], map_entry)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    pub fn update_entry_cleaned_text(&self, entry_id: &str, cleaned_text: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE entries SET cleaned_text = ?1, updated_at = ?2 WHERE id = ?3",
                params![cleaned_text, now_iso(), entry_id],
            )?;
            Ok(())
        })
    }

    pub fn entries_for_export(&self, owner: UserId) -> Result<Vec<EntryExportRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT e.id, e.subject_id, s.name, s.archived_at,
                        e.entry_date, e.raw_text, e.cleaned_text, e.created_at, e.updated_at
                 FROM entries e
                 INNER JOIN subjects s ON s.id = e.subject_id
                 WHERE s.owner_telegram_id = ?1
                 ORDER BY e.entry_date DESC, e.created_at DESC",
            )?;
            let rows = stmt
                .query_map(params![owner.0], |row| {
                    Ok(EntryExportRow {
                        id: row.get(0)?,
                        subject_id: row.get(1)?,
                        subject_name: row.get(2)?,
                        subject_archived_at: row.get(3)?,
                        entry_date: row.get(4)?,
                        raw_text: row.get(5)?,
                        cleaned_text: row.get(6)?,
                        created_at: row.get(7)?,
                        updated_at: row.get(8)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    // -- Share links --

    pub fn plain_link_for_subject(&self, subject_id: &str) -> Result<Option<ShareLink>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, token, subject_id, kind, gift_recipient, bottle_code,
                            gift_message, created_by_telegram_id, created_at
                     FROM share_links
                     WHERE subject_id = ?1 AND kind = 'plain'
                     ORDER BY created_at DESC
                     LIMIT 1",
                    params![subject_id],
                    map_share_link,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn create_share_link(&self, input: NewShareLink) -> Result<ShareLink> {
        let link = ShareLink {
            id: Uuid::new_v4().to_string(),
            token: input.token,
            subject_id: input.subject_id,
            kind: input.kind,
            gift_recipient: input.gift_recipient,
            bottle_code: input.bottle_code,
            gift_message: input.gift_message,
            created_by: input.created_by,
            created_at: now_iso(),
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO share_links
                   (id, token, subject_id, kind, gift_recipient, bottle_code,
                    gift_message, created_by_telegram_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    link.id,
                    link.token,
                    link.subject_id,
                    link.kind.as_str(),
                    link.gift_recipient,
                    link.bottle_code,
                    link.gift_message,
                    link.created_by.0,
                    link.created_at
                ],
            )?;
            Ok(())
        })?;

        Ok(link)
    }

    /// Next gift bottle code for a subject: count of existing gift links
    /// plus one, zero-padded to width 3.
    ///
    /// Not fenced against concurrent issuance for the same subject; two
    /// simultaneous gift flows can observe the same count. Acknowledged
    /// race, matching the source behavior.
    pub fn next_gift_bottle_code(&self, subject_id: &str) -> Result<String> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM share_links WHERE subject_id = ?1 AND kind = 'gift'",
                params![subject_id],
                |row| row.get(0),
            )?;
            Ok(format!("{:03}", count + 1))
        })
    }

    pub fn share_link_by_token(&self, token: &str) -> Result<Option<ShareLink>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, token, subject_id, kind, gift_recipient, bottle_code,
                            gift_message, created_by_telegram_id, created_at
                     FROM share_links WHERE token = ?1",
                    params![token],
                    map_share_link,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn share_links_for_export(&self, owner: UserId) -> Result<Vec<ShareLinkExportRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT l.id, l.subject_id, s.name, s.archived_at, l.kind, l.token,
                        l.gift_recipient, l.bottle_code, l.gift_message, l.created_at
                 FROM share_links l
                 INNER JOIN subjects s ON s.id = l.subject_id
                 WHERE s.owner_telegram_id = ?1
                 ORDER BY l.created_at DESC",
            )?;
            let rows = stmt
                .query_map(params![owner.0], |row| {
                    let kind: String = row.get(4)?;
                    Ok(ShareLinkExportRow {
                        id: row.get(0)?,
                        subject_id: row.get(1)?,
                        subject_name: row.get(2)?,
                        subject_archived_at: row.get(3)?,
                        kind: parse_kind(4, &kind)?,
                        token: row.get(5)?,
                        gift_recipient: row.get(6)?,
                        bottle_code: row.get(7)?,
                        gift_message: row.get(8)?,
                        created_at: row.get(9)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Read model for the external share-page renderer.
    pub fn resolve_share_link(&self, token: &str) -> Result<Option<SharedView>> {
        let Some(link) = self.share_link_by_token(token)? else {
            return Ok(None);
        };
        let Some(subject) = self.subject_by_id(&link.subject_id)? else {
            return Ok(None);
        };
        let entries = self.entries_for_subject(&subject.id)?;
        Ok(Some(SharedView {
            subject,
            link,
            entries,
        }))
    }

    // -- Conversation state --

    /// Upsert fully replaces the prior step and payload; there is no merge
    /// and no history.
    pub fn set_conversation_step(&self, owner: UserId, step: &ConversationStep) -> Result<()> {
        let payload = step.payload();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversation_states (telegram_id, step, payload, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(telegram_id) DO UPDATE SET
                   step = excluded.step,
                   payload = excluded.payload,
                   updated_at = excluded.updated_at",
                params![owner.0, step.step_name(), payload, now_iso()],
            )?;
            Ok(())
        })
    }

    /// Absence means idle. A malformed stored row also decodes to `None`;
    /// the router clears it and reports a reset.
    pub fn conversation_step(&self, owner: UserId) -> Result<Option<ConversationStep>> {
        self.with_conn(|conn| {
            let row: Option<(String, Option<String>)> = conn
                .query_row(
                    "SELECT step, payload FROM conversation_states WHERE telegram_id = ?1",
                    params![owner.0],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            Ok(row.and_then(|(step, payload)| ConversationStep::decode(&step, payload.as_deref())))
        })
    }

    pub fn clear_conversation_step(&self, owner: UserId) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM conversation_states WHERE telegram_id = ?1",
                params![owner.0],
            )?;
            Ok(())
        })
    }

    // -- Backup settings --

    pub fn backup_setting(&self, owner: UserId) -> Result<BackupSetting> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT telegram_id, frequency, next_run_at, last_sent_at, updated_at
                     FROM backup_settings WHERE telegram_id = ?1",
                    params![owner.0],
                    map_backup_setting,
                )
                .optional()?;
            Ok(row.unwrap_or(BackupSetting {
                owner,
                frequency: BackupFrequency::Off,
                next_run_at: None,
                last_sent_at: None,
                updated_at: now_iso(),
            }))
        })
    }

    /// Changing frequency recomputes `next_run_at` from `now`; switching
    /// off clears it.
    pub fn set_backup_frequency(
        &self,
        owner: UserId,
        frequency: BackupFrequency,
        now: DateTime<Utc>,
    ) -> Result<BackupSetting> {
        let next_run = frequency.interval_days().map(|d| iso(now + Duration::days(d)));

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO backup_settings (telegram_id, frequency, next_run_at, last_sent_at, updated_at)
                 VALUES (?1, ?2, ?3, NULL, ?4)
                 ON CONFLICT(telegram_id) DO UPDATE SET
                   frequency = excluded.frequency,
                   next_run_at = excluded.next_run_at,
                   updated_at = excluded.updated_at",
                params![owner.0, frequency.as_str(), next_run, iso(now)],
            )?;
            Ok(())
        })?;

        self.backup_setting(owner)
    }

    /// Due settings ordered by `next_run_at` ascending, bounded batch.
    pub fn due_backup_settings(&self, now: DateTime<Utc>) -> Result<Vec<BackupSetting>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT telegram_id, frequency, next_run_at, last_sent_at, updated_at
                 FROM backup_settings
                 WHERE frequency != 'off'
                   AND next_run_at IS NOT NULL
                   AND next_run_at <= ?1
                 ORDER BY next_run_at ASC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![iso(now), DUE_BATCH_LIMIT as i64], map_backup_setting)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Successful delivery: `last_sent_at = now`, `next_run_at` computed
    /// from the send time (drift is carried forward, not corrected).
    pub fn mark_backup_sent(
        &self,
        owner: UserId,
        frequency: BackupFrequency,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let next_run = frequency.interval_days().map(|d| iso(now + Duration::days(d)));
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE backup_settings
                 SET last_sent_at = ?1, next_run_at = ?2, updated_at = ?1
                 WHERE telegram_id = ?3",
                params![iso(now), next_run, owner.0],
            )?;
            Ok(())
        })
    }

    /// Failed delivery: push `next_run_at` out by a fixed backoff window,
    /// leaving frequency and `last_sent_at` untouched.
    pub fn postpone_backup(&self, owner: UserId, minutes: i64, now: DateTime<Utc>) -> Result<()> {
        let next_run = iso(now + Duration::minutes(minutes));
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE backup_settings SET next_run_at = ?1, updated_at = ?2 WHERE telegram_id = ?3",
                params![next_run, iso(now), owner.0],
            )?;
            Ok(())
        })
    }
}

pub fn iso(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            telegram_id  INTEGER PRIMARY KEY,
            username     TEXT,
            first_name   TEXT,
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS subjects (
            id                 TEXT PRIMARY KEY,
            owner_telegram_id  INTEGER NOT NULL REFERENCES users(telegram_id) ON DELETE CASCADE,
            name               TEXT NOT NULL,
            archived_at        TEXT,
            created_at         TEXT NOT NULL,
            updated_at         TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS entries (
            id            TEXT PRIMARY KEY,
            subject_id    TEXT NOT NULL REFERENCES subjects(id) ON DELETE CASCADE,
            telegram_id   INTEGER NOT NULL REFERENCES users(telegram_id) ON DELETE CASCADE,
            entry_date    TEXT NOT NULL,
            raw_text      TEXT NOT NULL,
            cleaned_text  TEXT,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS share_links (
            id                       TEXT PRIMARY KEY,
            token                    TEXT NOT NULL UNIQUE,
            subject_id               TEXT NOT NULL REFERENCES subjects(id) ON DELETE CASCADE,
            kind                     TEXT NOT NULL CHECK(kind IN ('plain', 'gift')),
            gift_recipient           TEXT,
            bottle_code              TEXT,
            gift_message             TEXT,
            created_by_telegram_id   INTEGER NOT NULL REFERENCES users(telegram_id) ON DELETE CASCADE,
            created_at               TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS conversation_states (
            telegram_id  INTEGER PRIMARY KEY REFERENCES users(telegram_id) ON DELETE CASCADE,
            step         TEXT NOT NULL,
            payload      TEXT,
            updated_at   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS backup_settings (
            telegram_id   INTEGER PRIMARY KEY REFERENCES users(telegram_id) ON DELETE CASCADE,
            frequency     TEXT NOT NULL CHECK(frequency IN ('off', 'weekly', 'biweekly', 'monthly')),
            next_run_at   TEXT,
            last_sent_at  TEXT,
            updated_at    TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_subjects_owner ON subjects(owner_telegram_id);
        CREATE INDEX IF NOT EXISTS idx_entries_subject ON entries(subject_id);
        CREATE INDEX IF NOT EXISTS idx_share_links_subject ON share_links(subject_id);
        CREATE INDEX IF NOT EXISTS idx_backup_next_run ON backup_settings(next_run_at);
        ",
    )?;
    Ok(())
}

fn map_subject(row: &rusqlite::Row) -> rusqlite::Result<Subject> {
    Ok(Subject {
        id: row.get(0)?,
        owner: UserId(row.get(1)?),
        name: row.get(2)?,
        archived_at: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn map_entry(row: &rusqlite::Row) -> rusqlite::Result<Entry> {
    Ok(Entry {
        id: row.get(0)?,
        subject_id: row.get(1)?,
        owner: UserId(row.get(2)?),
        entry_date: row.get(3)?,
        raw_text: row.get(4)?,
        cleaned_text: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn map_share_link(row: &rusqlite::Row) -> rusqlite::Result<ShareLink> {
    let kind: String = row.get(3)?;
    Ok(ShareLink {
        id: row.get(0)?,
        token: row.get(1)?,
        subject_id: row.get(2)?,
        kind: parse_kind(3, &kind)?,
        gift_recipient: row.get(4)?,
        bottle_code: row.get(5)?,
        gift_message: row.get(6)?,
        created_by: UserId(row.get(7)?),
        created_at: row.get(8)?,
    })
}

fn map_backup_setting(row: &rusqlite::Row) -> rusqlite::Result<BackupSetting> {
    let frequency: String = row.get(1)?;
    Ok(BackupSetting {
        owner: UserId(row.get(0)?),
        frequency: BackupFrequency::parse(&frequency).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                format!("unknown backup frequency: {frequency}").into(),
            )
        })?,
        next_run_at: row.get(2)?,
        last_sent_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn parse_kind(idx: usize, raw: &str) -> rusqlite::Result<ShareLinkKind> {
    ShareLinkKind::parse(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown share link kind: {raw}").into(),
        )
    })
}
