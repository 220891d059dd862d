use std::fmt;
use std::str::FromStr;
use std::time;

use envconfig::Envconfig;
use reqwest::header;
use thiserror::Error;

/// Connection settings shared by every service talking to the cloud APIs.
#[derive(Envconfig, Clone)]
pub struct GcpConfig {
    #[envconfig(from = "PROJECT_ID")]
    pub project_id: NonEmptyString,

    /// Sent as a bearer token when set. Emulators run without one.
    #[envconfig(from = "GCP_ACCESS_TOKEN")]
    pub access_token: Option<String>,

    #[envconfig(from = "PUBSUB_ENDPOINT", default = "https://pubsub.googleapis.com")]
    pub pubsub_endpoint: String,

    #[envconfig(from = "GCP_REQUEST_TIMEOUT_MS", default = "30000")]
    pub request_timeout: EnvMsDuration,
}

#[derive(Error, Debug)]
pub enum ClientBuildError {
    #[error("access token is not a valid header value")]
    InvalidToken(#[from] header::InvalidHeaderValue),
    #[error("failed to build http client: {0}")]
    Build(#[from] reqwest::Error),
}

impl GcpConfig {
    /// Build the HTTP client used for every cloud API call, carrying the
    /// bearer token (if any) and the request timeout.
    pub fn http_client(&self, user_agent: &str) -> Result<reqwest::Client, ClientBuildError> {
        let mut headers = header::HeaderMap::new();
        if let Some(token) = self.access_token.as_deref().filter(|t| !t.is_empty()) {
            let mut value = header::HeaderValue::from_str(&format!("Bearer {token}"))?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(user_agent)
            .timeout(self.request_timeout.0)
            .build()?;
        Ok(client)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl fmt::Display for ParseEnvMsDurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected a duration in milliseconds")
    }
}

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NonEmptyString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl fmt::Display for StringIsEmptyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "value must not be empty")
    }
}

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(trimmed.to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn gcp_config_defaults() {
        let config = GcpConfig::init_from_hashmap(&env(&[("PROJECT_ID", "sensors")])).unwrap();

        assert_eq!(config.project_id.as_str(), "sensors");
        assert_eq!(config.access_token, None);
        assert_eq!(config.pubsub_endpoint, "https://pubsub.googleapis.com");
        assert_eq!(config.request_timeout.0, time::Duration::from_secs(30));
    }

    #[test]
    fn gcp_config_requires_project() {
        assert!(GcpConfig::init_from_hashmap(&env(&[])).is_err());
        assert!(GcpConfig::init_from_hashmap(&env(&[("PROJECT_ID", "  ")])).is_err());
    }

    #[test]
    fn parse_ms_duration() {
        assert_eq!(
            "250".parse::<EnvMsDuration>().unwrap().0,
            time::Duration::from_millis(250)
        );
        assert_eq!(
            "ten".parse::<EnvMsDuration>().unwrap_err(),
            ParseEnvMsDurationError
        );
    }

    #[test]
    fn client_rejects_unprintable_token() {
        let config = GcpConfig::init_from_hashmap(&env(&[
            ("PROJECT_ID", "sensors"),
            ("GCP_ACCESS_TOKEN", "bad\ntoken"),
        ]))
        .unwrap();

        assert!(matches!(
            config.http_client("test"),
            Err(ClientBuildError::InvalidToken(_))
        ));
    }
}
