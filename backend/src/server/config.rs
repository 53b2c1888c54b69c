//! Application settings loaded via OrthoConfig.
//!
//! Each concern gets its own prefixed settings struct; a missing required
//! value (the database URL, the carrier credentials) fails the load and
//! aborts startup.

use std::ffi::OsString;

use ortho_config::{OrthoConfig, OrthoResult};
use serde::{Deserialize, Serialize};

use crate::domain::compliance::CompliancePolicy;
use crate::domain::opt_out::KeywordSets;
use crate::domain::quiet_hours::{QuietWindow, QuietWindowParseError};

fn default_quiet_start() -> String {
    "21:00".to_string()
}

fn default_quiet_end() -> String {
    "08:00".to_string()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "HTTP_")]
pub struct HttpSettings {
    #[ortho_config(default = 3000)]
    pub port: u16,
    /// Public base URL, used when composing absolute links.
    pub api_base_url: Option<String>,
}

/// PostgreSQL settings.
#[derive(Debug, Clone, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "DATABASE_")]
pub struct DatabaseSettings {
    /// Connection URL; required.
    pub url: String,
    #[ortho_config(default = 2)]
    pub pool_min: u32,
    #[ortho_config(default = 10)]
    pub pool_max: u32,
}

/// Redis settings for the delivery queue.
#[derive(Debug, Clone, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "REDIS_")]
pub struct RedisSettings {
    #[ortho_config(default = default_redis_url())]
    pub url: String,
}

/// Carrier credentials.
#[derive(Debug, Clone, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "PROVIDER_")]
pub struct ProviderSettings {
    /// API key for outbound dispatch; required.
    pub api_key: String,
    /// Base64 Ed25519 public key verifying webhook signatures; required.
    pub public_key: String,
    /// Fallback sending identity for locations without a dedicated number.
    pub messaging_profile_id: String,
}

/// Compliance gate policy knobs.
#[derive(Debug, Clone, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "COMPLIANCE_")]
pub struct ComplianceSettings {
    #[ortho_config(default = default_quiet_start())]
    pub quiet_hours_start: String,
    #[ortho_config(default = default_quiet_end())]
    pub quiet_hours_end: String,
    #[ortho_config(default = 3)]
    pub max_messages_per_day_per_recipient: u32,
    /// Overrides for the opt-out keyword list.
    pub opt_out_keywords: Option<Vec<String>>,
    /// Overrides for the opt-in keyword list.
    pub opt_in_keywords: Option<Vec<String>>,
}

impl ComplianceSettings {
    /// Build the gate policy, validating the configured window boundaries.
    pub fn policy(&self) -> Result<CompliancePolicy, QuietWindowParseError> {
        Ok(CompliancePolicy {
            quiet_hours: QuietWindow::parse(&self.quiet_hours_start, &self.quiet_hours_end)?,
            max_per_day: self.max_messages_per_day_per_recipient,
        })
    }

    /// Keyword sets, falling back to the standard lists.
    pub fn keywords(&self) -> KeywordSets {
        KeywordSets::new(
            self.opt_out_keywords
                .clone()
                .unwrap_or_else(default_opt_out_keywords),
            self.opt_in_keywords
                .clone()
                .unwrap_or_else(default_opt_in_keywords),
        )
    }
}

fn default_opt_out_keywords() -> Vec<String> {
    ["STOP", "UNSUBSCRIBE", "CANCEL", "END", "QUIT"]
        .map(str::to_string)
        .to_vec()
}

fn default_opt_in_keywords() -> Vec<String> {
    ["START", "YES", "SUBSCRIBE", "UNSTOP"].map(str::to_string).to_vec()
}

/// API-level rate limiting, consumed by the fronting HTTP gateway.
///
/// Carried here so one settings surface enumerates every knob, even though
/// the core itself does not enforce it.
#[derive(Debug, Clone, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "RATE_LIMIT_")]
pub struct RateLimitSettings {
    #[ortho_config(default = 60_000)]
    pub window_ms: u64,
    #[ortho_config(default = 100)]
    pub max: u32,
}

/// Every settings group the application needs at startup.
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub http: HttpSettings,
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub provider: ProviderSettings,
    pub compliance: ComplianceSettings,
    pub rate_limit: RateLimitSettings,
}

impl AppSettings {
    /// Load every group from the environment.
    ///
    /// Only the program name is passed through, so settings load
    /// identically under any CLI wrapper.
    pub fn load() -> OrthoResult<Self> {
        let args = || [OsString::from("backend")];
        Ok(Self {
            http: HttpSettings::load_from_iter(args())?,
            database: DatabaseSettings::load_from_iter(args())?,
            redis: RedisSettings::load_from_iter(args())?,
            provider: ProviderSettings::load_from_iter(args())?,
            compliance: ComplianceSettings::load_from_iter(args())?,
            rate_limit: RateLimitSettings::load_from_iter(args())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn compliance(start: &str, end: &str) -> ComplianceSettings {
        ComplianceSettings {
            quiet_hours_start: start.to_string(),
            quiet_hours_end: end.to_string(),
            max_messages_per_day_per_recipient: 3,
            opt_out_keywords: None,
            opt_in_keywords: None,
        }
    }

    #[rstest]
    fn default_window_parses_into_policy() {
        let policy = compliance("21:00", "08:00").policy().expect("valid window");
        assert_eq!(policy.max_per_day, 3);
    }

    #[rstest]
    fn invalid_window_fails_policy_construction() {
        assert!(compliance("25:61", "08:00").policy().is_err());
    }

    #[rstest]
    fn keyword_overrides_replace_only_their_list() {
        let mut settings = compliance("21:00", "08:00");
        settings.opt_out_keywords = Some(vec!["BASTA".to_string()]);

        let keywords = settings.keywords();
        assert_eq!(
            keywords.classify("basta"),
            Some(crate::domain::opt_out::OptOutAction::OptOut)
        );
        // The opt-in list keeps its default.
        assert_eq!(
            keywords.classify("start"),
            Some(crate::domain::opt_out::OptOutAction::OptIn)
        );
    }
}
