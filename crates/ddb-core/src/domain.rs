//! Domain model: subjects, entries, share links, backup settings.
//!
//! Timestamps are RFC3339 UTC strings so they stay lexicographically
//! comparable in SQL and in CSV exports. Entry dates are `YYYY-MM-DD`.

/// Telegram user id. Conversations are per private chat, so this doubles
/// as the chat id for outbound delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A named thing the user journals about (the "drink").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subject {
    pub id: String,
    pub owner: UserId,
    pub name: String,
    pub archived_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Subject {
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}

/// One dated free-text record attached to a subject.
///
/// `raw_text` is immutable once created; `cleaned_text` may be filled in
/// later by the external cleanup collaborator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub id: String,
    pub subject_id: String,
    pub owner: UserId,
    pub entry_date: String,
    pub raw_text: String,
    pub cleaned_text: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShareLinkKind {
    Plain,
    Gift,
}

impl ShareLinkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ShareLinkKind::Plain => "plain",
            ShareLinkKind::Gift => "gift",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "plain" => Some(ShareLinkKind::Plain),
            "gift" => Some(ShareLinkKind::Gift),
            _ => None,
        }
    }
}

/// A token-addressable, read-only view of a subject's history.
///
/// The token is immutable and globally unique. Gift links additionally
/// carry recipient / bottle / message metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShareLink {
    pub id: String,
    pub token: String,
    pub subject_id: String,
    pub kind: ShareLinkKind,
    pub gift_recipient: Option<String>,
    pub bottle_code: Option<String>,
    pub gift_message: Option<String>,
    pub created_by: UserId,
    pub created_at: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackupFrequency {
    Off,
    Weekly,
    Biweekly,
    Monthly,
}

impl BackupFrequency {
    pub fn as_str(self) -> &'static str {
        match self {
            BackupFrequency::Off => "off",
            BackupFrequency::Weekly => "weekly",
            BackupFrequency::Biweekly => "biweekly",
            BackupFrequency::Monthly => "monthly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(BackupFrequency::Off),
            "weekly" => Some(BackupFrequency::Weekly),
            "biweekly" => Some(BackupFrequency::Biweekly),
            "monthly" => Some(BackupFrequency::Monthly),
            _ => None,
        }
    }

    /// Export interval in days; `None` while disabled.
    pub fn interval_days(self) -> Option<i64> {
        match self {
            BackupFrequency::Off => None,
            BackupFrequency::Weekly => Some(7),
            BackupFrequency::Biweekly => Some(14),
            BackupFrequency::Monthly => Some(30),
        }
    }
}

/// Per-user periodic export schedule.
///
/// `next_run_at` is `None` iff `frequency == Off`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupSetting {
    pub owner: UserId,
    pub frequency: BackupFrequency,
    pub next_run_at: Option<String>,
    pub last_sent_at: Option<String>,
    pub updated_at: String,
}

/// Read model for the external share-page renderer.
#[derive(Clone, Debug)]
pub struct SharedView {
    pub subject: Subject,
    pub link: ShareLink,
    pub entries: Vec<Entry>,
}

/// Flattened entry row for CSV export (joined with its subject).
#[derive(Clone, Debug)]
pub struct EntryExportRow {
    pub id: String,
    pub subject_id: String,
    pub subject_name: String,
    pub subject_archived_at: Option<String>,
    pub entry_date: String,
    pub raw_text: String,
    pub cleaned_text: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Flattened share-link row for CSV export (joined with its subject).
#[derive(Clone, Debug)]
pub struct ShareLinkExportRow {
    pub id: String,
    pub subject_id: String,
    pub subject_name: String,
    pub subject_archived_at: Option<String>,
    pub kind: ShareLinkKind,
    pub token: String,
    pub gift_recipient: Option<String>,
    pub bottle_code: Option<String>,
    pub gift_message: Option<String>,
    pub created_at: String,
}
