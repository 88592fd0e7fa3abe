//! Conversation steps.
//!
//! Exactly one step is stored per user (absence means idle). The step
//! column tags the variant; the payload column carries the typed draft,
//! validated here at the point of transition rather than at use.

use serde::{Deserialize, Serialize};

/// Data carried between the gift-flow steps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GiftDraft {
    pub subject_id: String,
    pub recipient: String,
    pub bottle_code: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConversationStep {
    AwaitSubjectName,
    AwaitEntryText { subject_id: String },
    AwaitGiftRecipient { subject_id: String },
    AwaitGiftDecision { draft: GiftDraft },
    AwaitGiftMessage { draft: GiftDraft },
}

impl ConversationStep {
    pub fn step_name(&self) -> &'static str {
        match self {
            ConversationStep::AwaitSubjectName => "await_subject_name",
            ConversationStep::AwaitEntryText { .. } => "await_entry_text",
            ConversationStep::AwaitGiftRecipient { .. } => "await_gift_recipient",
            ConversationStep::AwaitGiftDecision { .. } => "await_gift_decision",
            ConversationStep::AwaitGiftMessage { .. } => "await_gift_message",
        }
    }

    pub fn payload(&self) -> Option<String> {
        match self {
            ConversationStep::AwaitSubjectName => None,
            ConversationStep::AwaitEntryText { subject_id }
            | ConversationStep::AwaitGiftRecipient { subject_id } => Some(subject_id.clone()),
            ConversationStep::AwaitGiftDecision { draft }
            | ConversationStep::AwaitGiftMessage { draft } => {
                serde_json::to_string(draft).ok()
            }
        }
    }

    /// Rebuild a step from its stored columns.
    ///
    /// `None` means the stored row is stale or malformed; callers clear the
    /// state and return the user to idle.
    pub fn decode(step: &str, payload: Option<&str>) -> Option<Self> {
        match step {
            "await_subject_name" => Some(ConversationStep::AwaitSubjectName),
            "await_entry_text" => Some(ConversationStep::AwaitEntryText {
                subject_id: non_empty(payload)?,
            }),
            "await_gift_recipient" => Some(ConversationStep::AwaitGiftRecipient {
                subject_id: non_empty(payload)?,
            }),
            "await_gift_decision" => Some(ConversationStep::AwaitGiftDecision {
                draft: decode_draft(payload)?,
            }),
            "await_gift_message" => Some(ConversationStep::AwaitGiftMessage {
                draft: decode_draft(payload)?,
            }),
            _ => None,
        }
    }
}

fn non_empty(payload: Option<&str>) -> Option<String> {
    let value = payload?.trim();
    if value.is_empty() {
        return None;
    }
    Some(value.to_string())
}

fn decode_draft(payload: Option<&str>) -> Option<GiftDraft> {
    let draft: GiftDraft = serde_json::from_str(payload?).ok()?;
    if draft.subject_id.is_empty() || draft.recipient.is_empty() || draft.bottle_code.is_empty() {
        return None;
    }
    Some(draft)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> GiftDraft {
        GiftDraft {
            subject_id: "subject-1".into(),
            recipient: "Анна".into(),
            bottle_code: "003".into(),
        }
    }

    #[test]
    fn steps_roundtrip_through_their_columns() {
        let steps = vec![
            ConversationStep::AwaitSubjectName,
            ConversationStep::AwaitEntryText {
                subject_id: "s1".into(),
            },
            ConversationStep::AwaitGiftRecipient {
                subject_id: "s2".into(),
            },
            ConversationStep::AwaitGiftDecision { draft: draft() },
            ConversationStep::AwaitGiftMessage { draft: draft() },
        ];

        for step in steps {
            let payload = step.payload();
            let decoded = ConversationStep::decode(step.step_name(), payload.as_deref()).unwrap();
            assert_eq!(decoded, step);
        }
    }

    #[test]
    fn malformed_rows_decode_to_none() {
        assert!(ConversationStep::decode("await_entry_text", None).is_none());
        assert!(ConversationStep::decode("await_entry_text", Some("  ")).is_none());
        assert!(ConversationStep::decode("await_gift_decision", Some("not json")).is_none());
        assert!(ConversationStep::decode(
            "await_gift_decision",
            Some(r#"{"subject_id":"","recipient":"a","bottle_code":"001"}"#)
        )
        .is_none());
        assert!(ConversationStep::decode("unknown_step", None).is_none());
    }
}
