//! Per-US-state compliance rule hook.

use crate::domain::contact::Contact;
use crate::domain::message::MessageKind;

/// Extension point for jurisdiction-specific sending rules.
///
/// The gate consults this on every evaluation so new state rules can be added
/// without touching any caller. Returned strings become blocking reasons.
pub trait StateRuleSet: Send + Sync {
    /// Violations for sending `kind` to `contact` from a site in `us_state`.
    fn violations(
        &self,
        us_state: Option<&str>,
        contact: &Contact,
        kind: MessageKind,
    ) -> Vec<String>;
}

/// Default rule set: no state currently imposes additional rules.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStateRules;

impl StateRuleSet for NoStateRules {
    fn violations(
        &self,
        _us_state: Option<&str>,
        _contact: &Contact,
        _kind: MessageKind,
    ) -> Vec<String> {
        Vec::new()
    }
}
