//! CSV export of a user's full journal.
//!
//! One flat file with a fixed 18-column header; `record_type` tags which
//! columns a row uses (subject, entry, share_link), inapplicable fields
//! stay empty. All values are quoted with embedded quotes doubled.

use crate::domain::{BackupFrequency, UserId};
use crate::store::{Store, SubjectScope};
use crate::Result;

pub const CSV_HEADERS: [&str; 18] = [
    "record_type",
    "telegram_id",
    "subject_id",
    "subject_name",
    "subject_archived_at",
    "entry_id",
    "entry_date",
    "raw_text",
    "cleaned_text",
    "share_link_id",
    "share_kind",
    "share_token",
    "gift_recipient",
    "bottle_code",
    "gift_message",
    "created_at",
    "updated_at",
    "generated_at",
];

pub struct BackupCsv {
    pub csv: String,
    pub rows: usize,
    pub subjects: usize,
    pub generated_at: String,
}

pub fn build_backup_csv(store: &Store, owner: UserId) -> Result<BackupCsv> {
    let generated_at = crate::format::now_iso();
    let owner_str = owner.to_string();

    let subjects = store.list_subjects(owner, SubjectScope::All)?;
    let entries = store.entries_for_export(owner)?;
    let shares = store.share_links_for_export(owner)?;

    let mut lines = Vec::with_capacity(1 + subjects.len() + entries.len() + shares.len());
    lines.push(csv_line(CSV_HEADERS.iter().map(|h| Some(*h))));

    for subject in &subjects {
        lines.push(csv_line([
            Some("subject"),
            Some(owner_str.as_str()),
            Some(subject.id.as_str()),
            Some(subject.name.as_str()),
            subject.archived_at.as_deref(),
            None,
            None,
            None,
            None,
            None,
            None,
            None,
            None,
            None,
            None,
            Some(subject.created_at.as_str()),
            Some(subject.updated_at.as_str()),
            Some(generated_at.as_str()),
        ]));
    }

    for entry in &entries {
        lines.push(csv_line([
            Some("entry"),
            Some(owner_str.as_str()),
            Some(entry.subject_id.as_str()),
            Some(entry.subject_name.as_str()),
            entry.subject_archived_at.as_deref(),
            Some(entry.id.as_str()),
            Some(entry.entry_date.as_str()),
            Some(entry.raw_text.as_str()),
            entry.cleaned_text.as_deref(),
            None,
            None,
            None,
            None,
            None,
            None,
            Some(entry.created_at.as_str()),
            Some(entry.updated_at.as_str()),
            Some(generated_at.as_str()),
        ]));
    }

    for share in &shares {
        lines.push(csv_line([
            Some("share_link"),
            Some(owner_str.as_str()),
            Some(share.subject_id.as_str()),
            Some(share.subject_name.as_str()),
            share.subject_archived_at.as_deref(),
            None,
            None,
            None,
            None,
            Some(share.id.as_str()),
            Some(share.kind.as_str()),
            Some(share.token.as_str()),
            share.gift_recipient.as_deref(),
            share.bottle_code.as_deref(),
            share.gift_message.as_deref(),
            Some(share.created_at.as_str()),
            None,
            Some(generated_at.as_str()),
        ]));
    }

    let rows = subjects.len() + entries.len() + shares.len();
    Ok(BackupCsv {
        csv: format!("{}\n", lines.join("\n")),
        rows,
        subjects: subjects.len(),
        generated_at,
    })
}

/// `backup-{owner}-{timestamp}.csv`, with `:` and `.` made filesystem-safe.
pub fn backup_file_name(owner: UserId, generated_at: &str) -> String {
    let stamp: String = generated_at
        .chars()
        .map(|c| if c == ':' || c == '.' { '-' } else { c })
        .collect();
    format!("backup-{owner}-{stamp}.csv")
}

pub fn frequency_label(frequency: BackupFrequency) -> &'static str {
    match frequency {
        BackupFrequency::Off => "выключено",
        BackupFrequency::Weekly => "раз в 7 дней",
        BackupFrequency::Biweekly => "раз в 14 дней",
        BackupFrequency::Monthly => "раз в 30 дней",
    }
}

/// `2026-03-01 12:00` style rendering of a stored timestamp, `-` if unset.
pub fn format_backup_date(iso: Option<&str>) -> String {
    match iso {
        None => "-".to_string(),
        Some(ts) => ts.replace('T', " ").chars().take(16).collect(),
    }
}

pub fn summarize_backup(subjects: usize, rows: usize) -> String {
    format!("Напитков: {subjects}\nВсего строк в CSV: {rows}")
}

fn csv_line<'a>(values: impl IntoIterator<Item = Option<&'a str>>) -> String {
    values
        .into_iter()
        .map(|v| csv_escape(v.unwrap_or("")))
        .collect::<Vec<_>>()
        .join(",")
}

fn csv_escape(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ShareLinkKind;
    use crate::store::{NewEntry, NewShareLink};

    fn seeded_store(owner: UserId) -> Store {
        let store = Store::open_in_memory().unwrap();
        store.ensure_user(owner, Some("tester"), None).unwrap();
        let subject = store.create_subject(owner, "Медовуха \"вишня\"").unwrap();
        store
            .create_entry(NewEntry {
                subject_id: subject.id.clone(),
                owner,
                entry_date: "2026-02-24".into(),
                raw_text: "добавил 50 г меда".into(),
                cleaned_text: None,
            })
            .unwrap();
        store
            .create_share_link(NewShareLink {
                token: "tok".into(),
                subject_id: subject.id,
                kind: ShareLinkKind::Gift,
                gift_recipient: Some("Анна".into()),
                bottle_code: Some("001".into()),
                gift_message: Some("с днем рождения".into()),
                created_by: owner,
            })
            .unwrap();
        store
    }

    #[test]
    fn export_has_fixed_header_and_one_row_per_record() {
        let owner = UserId(7);
        let store = seeded_store(owner);
        let backup = build_backup_csv(&store, owner).unwrap();

        let lines: Vec<&str> = backup.csv.trim_end().lines().collect();
        assert_eq!(lines.len(), 4); // header + subject + entry + share_link
        assert_eq!(backup.rows, 3);
        assert_eq!(backup.subjects, 1);

        assert_eq!(lines[0].split(',').count(), 18);
        assert!(lines[0].starts_with("\"record_type\""));
        assert!(lines[1].starts_with("\"subject\""));
        assert!(lines[2].starts_with("\"entry\""));
        assert!(lines[3].starts_with("\"share_link\""));
    }

    #[test]
    fn embedded_quotes_are_doubled() {
        let owner = UserId(7);
        let store = seeded_store(owner);
        let backup = build_backup_csv(&store, owner).unwrap();
        assert!(backup.csv.contains("\"Медовуха \"\"вишня\"\"\""));
    }

    #[test]
    fn inapplicable_columns_stay_empty() {
        let owner = UserId(7);
        let store = seeded_store(owner);
        let backup = build_backup_csv(&store, owner).unwrap();
        let subject_line = backup.csv.trim_end().lines().nth(1).unwrap();
        let fields: Vec<&str> = subject_line.split(',').collect();
        assert_eq!(fields.len(), 18);
        // entry_id through gift_message are blank on a subject row.
        for field in &fields[5..15] {
            assert_eq!(*field, "\"\"");
        }
    }

    #[test]
    fn file_name_is_filesystem_safe() {
        let name = backup_file_name(UserId(7), "2026-02-24T10:30:00.123Z");
        assert_eq!(name, "backup-7-2026-02-24T10-30-00-123Z.csv");
        assert!(!name[..name.len() - 4].contains(':'));
    }
}
