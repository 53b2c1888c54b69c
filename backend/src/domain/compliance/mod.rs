//! Compliance gate: the deterministic policy engine governing every send.
//!
//! Evaluation runs a fixed sequence of checks and never short-circuits, so a
//! caller always sees the complete set of failing reasons. The verdict is one
//! of allow, block, or defer-until-instant; deferral happens exactly when
//! quiet hours are the only obstacle.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use mockable::Clock;
use serde::Serialize;

use crate::domain::contact::{Contact, ContactId};
use crate::domain::error::Error;
use crate::domain::location::Location;
use crate::domain::message::MessageKind;
use crate::domain::phone;
use crate::domain::ports::{
    ContactRepository, ContactRepositoryError, LocationRepository, LocationRepositoryError,
    MessageRepository, MessageRepositoryError, OptOutRepository, OptOutRepositoryError,
    StateRuleSet,
};
use crate::domain::quiet_hours::{resolve_timezone, QuietWindow};
use crate::domain::tenant::TenantId;

mod content;

pub use content::{scan_content, ContentIssue, ContentList, ContentScan};

/// Tunable policy values, sourced from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompliancePolicy {
    pub quiet_hours: QuietWindow,
    /// Maximum outbound messages per contact per trailing 24 hours.
    pub max_per_day: u32,
}

impl Default for CompliancePolicy {
    fn default() -> Self {
        Self {
            quiet_hours: QuietWindow::new(
                NaiveTime::from_hms_opt(21, 0, 0).unwrap_or(NaiveTime::MIN),
                NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            ),
            max_per_day: 3,
        }
    }
}

/// Pass/fail state of every check, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChecksReport {
    pub consent: bool,
    pub opt_out: bool,
    pub age_verification: bool,
    pub global_opt_out: bool,
    pub quiet_hours: bool,
    pub rate_limit: bool,
    pub state_rules: bool,
}

impl ChecksReport {
    fn passing() -> Self {
        Self {
            consent: true,
            opt_out: true,
            age_verification: true,
            global_opt_out: true,
            quiet_hours: true,
            rate_limit: true,
            state_rules: true,
        }
    }

    /// True when quiet hours is the single failing check, the deferral case.
    pub fn only_quiet_hours_failed(&self) -> bool {
        !self.quiet_hours
            && self.consent
            && self.opt_out
            && self.age_verification
            && self.global_opt_out
            && self.rate_limit
            && self.state_rules
    }
}

/// Gate verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Dispatch immediately.
    Allow,
    /// Dispatch after `retry_after`; the recipient is inside quiet hours.
    Defer { retry_after: DateTime<Utc> },
    /// Do not dispatch.
    Block,
}

/// Full evaluation result, including the contact snapshot the checks ran
/// against so callers need not re-read it.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub decision: Decision,
    pub reasons: Vec<String>,
    pub checks: ChecksReport,
    pub contact: Contact,
}

/// Deterministic policy engine evaluated before every dispatch.
pub struct ComplianceGate {
    contacts: Arc<dyn ContactRepository>,
    locations: Arc<dyn LocationRepository>,
    messages: Arc<dyn MessageRepository>,
    opt_outs: Arc<dyn OptOutRepository>,
    state_rules: Arc<dyn StateRuleSet>,
    clock: Arc<dyn Clock>,
    policy: CompliancePolicy,
}

impl ComplianceGate {
    /// Build a gate over the given ports and policy.
    pub fn new(
        contacts: Arc<dyn ContactRepository>,
        locations: Arc<dyn LocationRepository>,
        messages: Arc<dyn MessageRepository>,
        opt_outs: Arc<dyn OptOutRepository>,
        state_rules: Arc<dyn StateRuleSet>,
        clock: Arc<dyn Clock>,
        policy: CompliancePolicy,
    ) -> Self {
        Self {
            contacts,
            locations,
            messages,
            opt_outs,
            state_rules,
            clock,
            policy,
        }
    }

    /// Evaluate whether `contact_id` may receive a `kind` message right now.
    ///
    /// All checks run even once one has failed. Aggregation: quiet hours as
    /// the only failure defers until the window ends; any other failure
    /// blocks; otherwise the send is allowed.
    pub async fn evaluate(
        &self,
        tenant: TenantId,
        contact_id: ContactId,
        kind: MessageKind,
    ) -> Result<Evaluation, Error> {
        let contact = self
            .contacts
            .find_by_id(tenant, contact_id)
            .await
            .map_err(map_contact_error)?
            .ok_or_else(|| Error::not_found(format!("contact {contact_id} not found")))?;

        let location = match contact.primary_location_id {
            Some(id) => self
                .locations
                .find_by_id(tenant, id)
                .await
                .map_err(map_location_error)?,
            None => None,
        };

        let now = self.clock.utc();
        let mut checks = ChecksReport::passing();
        let mut reasons: Vec<String> = Vec::new();
        let mut retry_after = None;

        self.check_consent(&contact, kind, &mut checks, &mut reasons);
        self.check_opt_out(&contact, kind, &mut checks, &mut reasons);
        self.check_age(&contact, now, &mut checks, &mut reasons);
        self.check_global_opt_out(&contact, kind, &mut checks, &mut reasons)
            .await?;
        self.check_quiet_hours(
            &contact,
            location.as_ref(),
            kind,
            now,
            &mut checks,
            &mut reasons,
            &mut retry_after,
        );
        self.check_rate_limit(tenant, &contact, kind, now, &mut checks, &mut reasons)
            .await?;
        self.check_state_rules(&contact, location.as_ref(), kind, &mut checks, &mut reasons);

        let decision = if reasons.is_empty() {
            Decision::Allow
        } else if checks.only_quiet_hours_failed() {
            match retry_after {
                Some(retry_after) => Decision::Defer { retry_after },
                None => Decision::Block,
            }
        } else {
            Decision::Block
        };

        Ok(Evaluation {
            decision,
            reasons,
            checks,
            contact,
        })
    }

    /// Advisory scan of message copy; see [`scan_content`].
    pub fn scan_content(&self, text: &str, us_state: Option<&str>) -> ContentScan {
        scan_content(text, us_state)
    }

    fn check_consent(
        &self,
        contact: &Contact,
        kind: MessageKind,
        checks: &mut ChecksReport,
        reasons: &mut Vec<String>,
    ) {
        match kind {
            MessageKind::Sms => {
                if !contact.sms_consent {
                    checks.consent = false;
                    reasons.push("No SMS consent on file".to_string());
                }
                if contact.sms_consent_at.is_none() {
                    checks.consent = false;
                    reasons.push("SMS consent timestamp missing".to_string());
                }
            }
            MessageKind::Email => {
                if !contact.email_consent {
                    checks.consent = false;
                    reasons.push("No email consent on file".to_string());
                }
            }
        }
    }

    fn check_opt_out(
        &self,
        contact: &Contact,
        kind: MessageKind,
        checks: &mut ChecksReport,
        reasons: &mut Vec<String>,
    ) {
        if kind == MessageKind::Sms && contact.sms_opted_out {
            checks.opt_out = false;
            reasons.push("Contact has opted out of SMS".to_string());
        }
    }

    fn check_age(
        &self,
        contact: &Contact,
        now: DateTime<Utc>,
        checks: &mut ChecksReport,
        reasons: &mut Vec<String>,
    ) {
        if !contact.age_verified {
            checks.age_verification = false;
            reasons.push("Age not verified".to_string());
            return;
        }
        if let Some(age) = contact.age_years(now.date_naive()) {
            if age < 21 {
                checks.age_verification = false;
                reasons.push("Contact is under 21".to_string());
            }
        }
    }

    async fn check_global_opt_out(
        &self,
        contact: &Contact,
        kind: MessageKind,
        checks: &mut ChecksReport,
        reasons: &mut Vec<String>,
    ) -> Result<(), Error> {
        if kind != MessageKind::Sms {
            return Ok(());
        }
        let listed = self
            .opt_outs
            .is_globally_opted_out(&phone::normalize(&contact.phone))
            .await
            .map_err(map_opt_out_error)?;
        if listed {
            checks.global_opt_out = false;
            reasons.push("Recipient is on the global opt-out list".to_string());
        }
        Ok(())
    }

    #[expect(clippy::too_many_arguments, reason = "check helpers share one shape")]
    fn check_quiet_hours(
        &self,
        contact: &Contact,
        location: Option<&Location>,
        kind: MessageKind,
        now: DateTime<Utc>,
        checks: &mut ChecksReport,
        reasons: &mut Vec<String>,
        retry_after: &mut Option<DateTime<Utc>>,
    ) {
        if kind != MessageKind::Sms {
            return;
        }
        let tz = resolve_timezone(
            contact.timezone.as_deref(),
            location.map(|location| location.timezone.as_str()),
        );
        if self.policy.quiet_hours.is_in_window(tz, now) {
            checks.quiet_hours = false;
            reasons.push("Recipient is inside quiet hours".to_string());
            *retry_after = Some(self.policy.quiet_hours.window_end_after(tz, now));
        }
    }

    async fn check_rate_limit(
        &self,
        tenant: TenantId,
        contact: &Contact,
        kind: MessageKind,
        now: DateTime<Utc>,
        checks: &mut ChecksReport,
        reasons: &mut Vec<String>,
    ) -> Result<(), Error> {
        let since = now - Duration::hours(24);
        let recent = self
            .messages
            .count_outbound_since(tenant, contact.id, kind, since)
            .await
            .map_err(map_message_error)?;
        if recent >= u64::from(self.policy.max_per_day) {
            checks.rate_limit = false;
            reasons.push("Daily message limit reached".to_string());
        }
        Ok(())
    }

    fn check_state_rules(
        &self,
        contact: &Contact,
        location: Option<&Location>,
        kind: MessageKind,
        checks: &mut ChecksReport,
        reasons: &mut Vec<String>,
    ) {
        let violations = self.state_rules.violations(
            location.map(|location| location.us_state.as_str()),
            contact,
            kind,
        );
        if !violations.is_empty() {
            checks.state_rules = false;
            reasons.extend(violations);
        }
    }
}

fn map_contact_error(error: ContactRepositoryError) -> Error {
    match error {
        ContactRepositoryError::Connection { message } => Error::service_unavailable(message),
        ContactRepositoryError::Query { message } => Error::internal(message),
    }
}

fn map_location_error(error: LocationRepositoryError) -> Error {
    match error {
        LocationRepositoryError::Connection { message } => Error::service_unavailable(message),
        LocationRepositoryError::Query { message } => Error::internal(message),
    }
}

fn map_message_error(error: MessageRepositoryError) -> Error {
    match error {
        MessageRepositoryError::Connection { message } => Error::service_unavailable(message),
        MessageRepositoryError::Query { message } => Error::internal(message),
    }
}

fn map_opt_out_error(error: OptOutRepositoryError) -> Error {
    match error {
        OptOutRepositoryError::Connection { message } => Error::service_unavailable(message),
        OptOutRepositoryError::Query { message } => Error::internal(message),
    }
}
