//! Entry input grammar.
//!
//! An entry message may carry a `date | text` prefix. The date is either
//! ISO `YYYY-MM-DD` or the short Russian form `DD.MM`, `DD.MM.YY`,
//! `DD.MM.YYYY` (year defaults to the current one). Anything that fails to
//! parse as a date silently falls back to "the whole input is today's
//! entry text"; leniency is the policy here, not an error path.

use chrono::NaiveDate;
use regex::Regex;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedEntry {
    pub entry_date: NaiveDate,
    pub text: String,
}

/// Split an inbound message into (date, text).
///
/// Returns `None` only when there is nothing to store: empty input, or a
/// recognized date prefix with no text after the separator.
pub fn parse_entry_input(input: &str, today: NaiveDate) -> Option<ParsedEntry> {
    let raw = input.trim();
    if raw.is_empty() {
        return None;
    }

    let Some((prefix, rest)) = raw.split_once('|') else {
        return Some(ParsedEntry {
            entry_date: today,
            text: raw.to_string(),
        });
    };

    let text = rest.trim();
    let Some(entry_date) = parse_flexible_date(prefix, today) else {
        // Not a date prefix: the `|` belongs to the entry text itself.
        return Some(ParsedEntry {
            entry_date: today,
            text: raw.to_string(),
        });
    };

    if text.is_empty() {
        return None;
    }

    Some(ParsedEntry {
        entry_date,
        text: text.to_string(),
    })
}

fn parse_flexible_date(input: &str, today: NaiveDate) -> Option<NaiveDate> {
    let value = input.trim();

    let iso = Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$").expect("valid regex");
    if iso.is_match(value) {
        return NaiveDate::parse_from_str(value, "%Y-%m-%d").ok();
    }

    let ru = Regex::new(r"^(\d{2})\.(\d{2})(?:\.(\d{2}|\d{4}))?$").expect("valid regex");
    let caps = ru.captures(value)?;

    let day: u32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let year: i32 = match caps.get(3) {
        None => chrono::Datelike::year(&today),
        Some(m) => {
            let y: i32 = m.as_str().parse().ok()?;
            if m.as_str().len() == 2 {
                2000 + y
            } else {
                y
            }
        }
    };

    NaiveDate::from_ymd_opt(year, month, day)
}
