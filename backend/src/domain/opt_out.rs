//! Opt-out vocabulary: audit log entries and keyword classification.

use serde::{Deserialize, Serialize};

use crate::domain::contact::{ConsentMethod, ContactId};
use crate::domain::message::{MessageId, MessageKind};

/// Direction of a consent state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptOutAction {
    OptIn,
    OptOut,
}

impl OptOutAction {
    /// Stable storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OptIn => "opt_in",
            Self::OptOut => "opt_out",
        }
    }
}

/// Immutable audit record written for every opt-in or opt-out.
#[derive(Debug, Clone, PartialEq)]
pub struct OptOutLogEntry {
    pub channel: MessageKind,
    /// Canonical E.164 address the action applies to.
    pub address: String,
    pub action: OptOutAction,
    pub method: ConsentMethod,
    pub contact_id: Option<ContactId>,
    /// Inbound message that triggered the action, when keyword-driven.
    pub source_message_id: Option<MessageId>,
}

/// Keyword lists consulted on every inbound text.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordSets {
    opt_out: Vec<String>,
    opt_in: Vec<String>,
}

impl KeywordSets {
    /// Build keyword sets; matching is case-insensitive on trimmed input.
    pub fn new<I, J>(opt_out: I, opt_in: J) -> Self
    where
        I: IntoIterator<Item = String>,
        J: IntoIterator<Item = String>,
    {
        Self {
            opt_out: opt_out.into_iter().map(|k| k.to_uppercase()).collect(),
            opt_in: opt_in.into_iter().map(|k| k.to_uppercase()).collect(),
        }
    }

    /// Classify an inbound text body against both keyword lists.
    ///
    /// Opt-out wins when a keyword somehow appears in both lists.
    pub fn classify(&self, text: &str) -> Option<OptOutAction> {
        let needle = text.trim().to_uppercase();
        if self.opt_out.iter().any(|k| *k == needle) {
            Some(OptOutAction::OptOut)
        } else if self.opt_in.iter().any(|k| *k == needle) {
            Some(OptOutAction::OptIn)
        } else {
            None
        }
    }
}

impl Default for KeywordSets {
    fn default() -> Self {
        Self::new(
            ["STOP", "UNSUBSCRIBE", "CANCEL", "END", "QUIT"]
                .map(str::to_string),
            ["START", "YES", "SUBSCRIBE", "UNSTOP"].map(str::to_string),
        )
    }
}
