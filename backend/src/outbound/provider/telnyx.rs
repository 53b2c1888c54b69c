//! Reqwest-backed Telnyx carrier adapter.
//!
//! The adapter owns transport details only: request serialisation, timeout
//! and HTTP error mapping, and JSON decoding into a provider receipt. The
//! carrier's own error text is preserved so the worker can persist it on the
//! failed audit row. Throughput shaping lives in the queue limiter, not here.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};

use crate::domain::ports::{ProviderReceipt, SenderIdentity, SmsProvider, SmsProviderError};

use super::dto::{CreateMessageRequest, CreateMessageResponse};

const DEFAULT_ENDPOINT: &str = "https://api.telnyx.com/v2/messages";
const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for the carrier API.
#[derive(Debug, Clone)]
pub struct TelnyxProviderConfig {
    pub api_key: String,
    pub endpoint: Option<String>,
    pub timeout: Duration,
}

impl TelnyxProviderConfig {
    /// Settings with the production endpoint and default dispatch timeout.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: None,
            timeout: DEFAULT_DISPATCH_TIMEOUT,
        }
    }
}

/// Carrier adapter performing one HTTP POST per outbound message.
pub struct TelnyxProvider {
    client: Client,
    endpoint: Url,
    api_key: String,
}

impl TelnyxProvider {
    /// Build an adapter with an explicit request timeout.
    ///
    /// # Errors
    ///
    /// Fails when the endpoint does not parse or the HTTP client cannot be
    /// constructed.
    pub fn new(config: TelnyxProviderConfig) -> Result<Self, SmsProviderError> {
        let endpoint = config
            .endpoint
            .as_deref()
            .unwrap_or(DEFAULT_ENDPOINT)
            .parse::<Url>()
            .map_err(|error| {
                SmsProviderError::decode(format!("invalid carrier endpoint: {error}"))
            })?;
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|error| {
                SmsProviderError::transport(format!("failed to build HTTP client: {error}"))
            })?;
        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key,
        })
    }
}

#[async_trait]
impl SmsProvider for TelnyxProvider {
    async fn send(
        &self,
        to: &str,
        from: &SenderIdentity,
        content: &str,
    ) -> Result<ProviderReceipt, SmsProviderError> {
        let (from_number, messaging_profile_id) = match from {
            SenderIdentity::PhoneNumber(number) => (Some(number.as_str()), None),
            SenderIdentity::MessagingProfile(profile) => (None, Some(profile.as_str())),
        };
        let body = CreateMessageRequest {
            to,
            text: content,
            from: from_number,
            messaging_profile_id,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(map_status_error(status, bytes.as_ref()));
        }

        let decoded: CreateMessageResponse = serde_json::from_slice(bytes.as_ref())
            .map_err(|error| {
                SmsProviderError::decode(format!("invalid carrier response: {error}"))
            })?;

        Ok(ProviderReceipt {
            provider_message_id: decoded.data.id,
            segments: decoded.data.parts.unwrap_or(1),
        })
    }
}

fn map_transport_error(error: reqwest::Error) -> SmsProviderError {
    if error.is_timeout() {
        SmsProviderError::timeout(error.to_string())
    } else {
        SmsProviderError::transport(error.to_string())
    }
}

fn map_status_error(status: StatusCode, body: &[u8]) -> SmsProviderError {
    let preview = body_preview(body);
    let message = if preview.is_empty() {
        format!("status {}", status.as_u16())
    } else {
        format!("status {}: {}", status.as_u16(), preview)
    };

    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            SmsProviderError::timeout(message)
        }
        // 429 is transient upstream pressure, not a rejection of the message.
        StatusCode::TOO_MANY_REQUESTS => SmsProviderError::transport(message),
        _ if status.is_client_error() => SmsProviderError::rejected(message),
        _ => SmsProviderError::transport(message),
    }
}

fn body_preview(body: &[u8]) -> String {
    const PREVIEW_CHAR_LIMIT: usize = 160;

    let compact = String::from_utf8_lossy(body)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let preview = compact.chars().take(PREVIEW_CHAR_LIMIT).collect::<String>();
    if compact.chars().count() > PREVIEW_CHAR_LIMIT {
        format!("{preview}...")
    } else {
        preview
    }
}

#[cfg(test)]
mod tests {
    //! Coverage for the non-network mapping helpers.

    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::request_timeout(StatusCode::REQUEST_TIMEOUT, "Timeout")]
    #[case::gateway_timeout(StatusCode::GATEWAY_TIMEOUT, "Timeout")]
    #[case::rate_limited(StatusCode::TOO_MANY_REQUESTS, "Transport")]
    #[case::bad_request(StatusCode::BAD_REQUEST, "Rejected")]
    #[case::unauthorized(StatusCode::UNAUTHORIZED, "Rejected")]
    #[case::server_error(StatusCode::INTERNAL_SERVER_ERROR, "Transport")]
    fn maps_http_statuses_to_expected_errors(#[case] status: StatusCode, #[case] expected: &str) {
        let error = map_status_error(status, br#"{"errors":[{"title":"oops"}]}"#);
        let matched = match expected {
            "Timeout" => matches!(error, SmsProviderError::Timeout { .. }),
            "Transport" => matches!(error, SmsProviderError::Transport { .. }),
            "Rejected" => matches!(error, SmsProviderError::Rejected { .. }),
            other => panic!("unsupported expectation: {other}"),
        };
        assert!(matched, "unexpected mapping: {error:?}");
    }

    #[rstest]
    fn carrier_error_text_is_preserved() {
        let error = map_status_error(
            StatusCode::BAD_REQUEST,
            br#"{"errors":[{"code":"40300","title":"Blocked as spam"}]}"#,
        );
        assert!(error.to_string().contains("Blocked as spam"));
    }

    #[rstest]
    fn long_bodies_are_previewed() {
        let body = "x".repeat(500);
        let error = map_status_error(StatusCode::INTERNAL_SERVER_ERROR, body.as_bytes());
        assert!(error.to_string().len() < 250);
        assert!(error.to_string().contains("..."));
    }

    #[rstest]
    fn invalid_endpoint_fails_construction() {
        let config = TelnyxProviderConfig {
            api_key: "key".to_string(),
            endpoint: Some("not a url".to_string()),
            timeout: Duration::from_secs(1),
        };
        assert!(TelnyxProvider::new(config).is_err());
    }
}
