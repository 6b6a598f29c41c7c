//! Subscriber configuration module
//!
//! Handles loading configuration from environment variables.

use crate::engine::DEFAULT_READ_CONCURRENCY;
use crate::error::SubscriberError;
use crate::service::HttpChangeLogConfig;
use crate::shard::DEFAULT_CURSOR_FETCH_CONCURRENCY;
use crate::subscriber::{SubscriberOptions, DEFAULT_POLL_INTERVAL};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Subscriber process configuration
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Stream to follow (takes precedence over `table_name`)
    pub stream_arn: Option<String>,

    /// Table whose latest stream is followed when no stream is given
    pub table_name: Option<String>,

    /// Time between two poll cycles
    pub poll_interval: Duration,

    /// Region used to derive the default service endpoints
    pub region: String,

    /// Override for the streams endpoint
    pub streams_endpoint: Option<String>,

    /// Override for the table endpoint
    pub dynamodb_endpoint: Option<String>,

    /// Pre-computed Authorization header forwarded with every call
    pub authorization: Option<String>,

    /// Fan-out for per-shard reads within one pass
    pub max_concurrent_reads: usize,

    /// Fan-out for cursor fetches during discovery
    pub max_concurrent_cursor_fetches: usize,

    /// NATS server URL(s) - comma-separated for multiple servers
    pub nats_url: Option<String>,

    /// Subject prefix for published records
    pub nats_subject_prefix: String,

    /// Health/metrics HTTP port
    pub http_port: u16,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl SubscriberConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, SubscriberError> {
        dotenvy::dotenv().ok();

        let stream_arn = non_empty_var("STREAM_ARN");
        let table_name = non_empty_var("TABLE_NAME");
        if stream_arn.is_none() && table_name.is_none() {
            return Err(SubscriberError::Config(
                "STREAM_ARN or TABLE_NAME must be set".to_string(),
            ));
        }

        let poll_interval = match env::var("POLL_INTERVAL") {
            Ok(raw) => humantime::parse_duration(&raw).map_err(|e| {
                SubscriberError::Config(format!("POLL_INTERVAL must be a duration like '10s': {e}"))
            })?,
            Err(_) => DEFAULT_POLL_INTERVAL,
        };

        let region = env::var("AWS_REGION")
            .or_else(|_| env::var("AWS_DEFAULT_REGION"))
            .unwrap_or_else(|_| "us-east-1".to_string());

        let max_concurrent_reads =
            parse_var("MAX_CONCURRENT_READS", DEFAULT_READ_CONCURRENCY)?;
        let max_concurrent_cursor_fetches =
            parse_var("MAX_CONCURRENT_CURSOR_FETCHES", DEFAULT_CURSOR_FETCH_CONCURRENCY)?;

        let http_port = parse_var("HTTP_PORT", 9090u16)?;

        Ok(Self {
            stream_arn,
            table_name,
            poll_interval,
            region,
            streams_endpoint: non_empty_var("STREAMS_ENDPOINT"),
            dynamodb_endpoint: non_empty_var("DYNAMODB_ENDPOINT"),
            authorization: non_empty_var("AUTHORIZATION_HEADER"),
            max_concurrent_reads,
            max_concurrent_cursor_fetches,
            nats_url: non_empty_var("NATS_URL"),
            nats_subject_prefix: env::var("NATS_SUBJECT_PREFIX")
                .unwrap_or_else(|_| "changes".to_string()),
            http_port,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Options for the subscriber itself
    pub fn subscriber_options(&self) -> SubscriberOptions {
        SubscriberOptions {
            stream_id: self.stream_arn.clone(),
            table: self.table_name.clone(),
            interval: self.poll_interval,
            max_concurrent_reads: self.max_concurrent_reads,
            max_concurrent_cursor_fetches: self.max_concurrent_cursor_fetches,
        }
    }

    /// Endpoints for the HTTP change-log client
    pub fn service_config(&self) -> HttpChangeLogConfig {
        let mut config = HttpChangeLogConfig::for_region(&self.region);
        if let Some(ref endpoint) = self.streams_endpoint {
            config.streams_endpoint = endpoint.clone();
        }
        if let Some(ref endpoint) = self.dynamodb_endpoint {
            config.dynamodb_endpoint = endpoint.clone();
        }
        config.authorization = self.authorization.clone();
        config
    }

    /// Human-readable stream identity for logs and health responses
    pub fn stream_label(&self) -> String {
        match (&self.stream_arn, &self.table_name) {
            (Some(arn), _) => arn.clone(),
            (None, Some(table)) => format!("table:{table}"),
            (None, None) => "unknown".to_string(),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &str, default: T) -> Result<T, SubscriberError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| SubscriberError::Config(format!("{name} must be a valid number: {e}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SubscriberConfig {
        SubscriberConfig {
            stream_arn: None,
            table_name: Some("credentials".to_string()),
            poll_interval: Duration::from_millis(250),
            region: "eu-west-1".to_string(),
            streams_endpoint: Some("http://localhost:8000".to_string()),
            dynamodb_endpoint: None,
            authorization: None,
            max_concurrent_reads: 4,
            max_concurrent_cursor_fetches: 2,
            nats_url: None,
            nats_subject_prefix: "changes".to_string(),
            http_port: 9090,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn subscriber_options_carry_identity_and_limits() {
        let options = config().subscriber_options();
        assert_eq!(options.table.as_deref(), Some("credentials"));
        assert!(options.stream_id.is_none());
        assert_eq!(options.interval, Duration::from_millis(250));
        assert_eq!(options.max_concurrent_reads, 4);
        assert_eq!(options.max_concurrent_cursor_fetches, 2);
    }

    #[test]
    fn endpoint_overrides_apply() {
        let service = config().service_config();
        assert_eq!(service.streams_endpoint, "http://localhost:8000");
        assert_eq!(service.dynamodb_endpoint, "https://dynamodb.eu-west-1.amazonaws.com");
    }

    #[test]
    fn stream_label_prefers_arn() {
        let mut cfg = config();
        assert_eq!(cfg.stream_label(), "table:credentials");
        cfg.stream_arn = Some("urn:test:test".to_string());
        assert_eq!(cfg.stream_label(), "urn:test:test");
    }

    #[test]
    fn test_default_values() {
        // Port should default to 9090 when unset
        assert_eq!(parse_var("CHANGEFEED_TEST_UNSET_PORT", 9090u16).unwrap(), 9090);
        assert_eq!(DEFAULT_POLL_INTERVAL, Duration::from_secs(10));
    }
}
