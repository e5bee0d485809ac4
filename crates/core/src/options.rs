//! Channel configuration.
//!
//! Options are plain data: they can be built in code, deserialized from JSON
//! (camelCase keys), or loaded from `TAILCAST_*` environment variables.
//! Nothing here performs I/O; `validate()` is the gate every channel passes
//! before connecting.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::size::CollectionSize;

pub const ENV_URL: &str = "TAILCAST_URL";
pub const ENV_TOPIC: &str = "TAILCAST_TOPIC";
pub const ENV_COLLECTION_SIZE: &str = "TAILCAST_COLLECTION_SIZE";
pub const ENV_WRITE_ONLY: &str = "TAILCAST_WRITE_ONLY";
pub const ENV_TAIL_MAX_RETRIES: &str = "TAILCAST_TAIL_MAX_RETRIES";
pub const ENV_TAIL_RETRY_DELAY_MS: &str = "TAILCAST_TAIL_RETRY_DELAY_MS";
pub const ENV_STREAM_CAPACITY: &str = "TAILCAST_STREAM_CAPACITY";

/// Default capacity of the broadcast buffer behind a channel's event stream.
pub const DEFAULT_STREAM_CAPACITY: usize = 1024;

/// How a subscriber reacts when its cursor fails.
///
/// The tail is reopened from the live end of the collection at most
/// `max_retries` consecutive times, waiting `retry_delay_ms` before each
/// attempt. A delivered message resets the count. Zero disables recovery.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TailPolicy {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for TailPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

impl TailPolicy {
    /// Never reopen a failed tail.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Options accepted when opening a channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelOptions {
    /// Storage connection target.
    pub url: Option<String>,
    /// Capped collection / logical channel name.
    pub topic: Option<String>,
    /// Size at first creation only; ignored when the collection exists.
    pub collection_size: Option<CollectionSize>,
    /// Publish only: no subscriber, no event stream.
    pub write_only: bool,
    pub tail: TailPolicy,
    pub stream_capacity: Option<usize>,
}

/// Options that passed validation; every required value is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedOptions {
    pub url: String,
    pub topic: String,
    pub collection_size: CollectionSize,
    pub write_only: bool,
    pub tail: TailPolicy,
    pub stream_capacity: usize,
}

impl ChannelOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_collection_size(mut self, size: CollectionSize) -> Self {
        self.collection_size = Some(size);
        self
    }

    pub fn write_only(mut self, write_only: bool) -> Self {
        self.write_only = write_only;
        self
    }

    pub fn with_tail_policy(mut self, tail: TailPolicy) -> Self {
        self.tail = tail;
        self
    }

    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = Some(capacity);
        self
    }

    /// Check required options. Url is checked before topic.
    pub fn validate(&self) -> Result<ValidatedOptions, ConfigError> {
        let url = non_empty(self.url.as_deref()).ok_or(ConfigError::MissingUrl)?;
        let topic = non_empty(self.topic.as_deref()).ok_or(ConfigError::MissingTopic)?;

        let stream_capacity = match self.stream_capacity {
            Some(0) => return Err(ConfigError::invalid_value("streamCapacity", "0")),
            Some(n) => n,
            None => DEFAULT_STREAM_CAPACITY,
        };

        Ok(ValidatedOptions {
            url: url.to_string(),
            topic: topic.to_string(),
            collection_size: self.collection_size.unwrap_or_default(),
            write_only: self.write_only,
            tail: self.tail,
            stream_capacity,
        })
    }

    /// Load options from `TAILCAST_*` environment variables.
    ///
    /// Missing variables are left unset; required ones are only enforced by
    /// `validate()`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load options through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::new();
        options.url = lookup(ENV_URL);
        options.topic = lookup(ENV_TOPIC);

        if let Some(raw) = lookup(ENV_COLLECTION_SIZE) {
            options.collection_size = Some(CollectionSize::parse(&raw)?);
        }
        if let Some(raw) = lookup(ENV_WRITE_ONLY) {
            options.write_only = parse_bool(&raw)
                .ok_or_else(|| ConfigError::invalid_value(ENV_WRITE_ONLY, raw))?;
        }
        if let Some(raw) = lookup(ENV_TAIL_MAX_RETRIES) {
            options.tail.max_retries = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid_value(ENV_TAIL_MAX_RETRIES, raw.as_str()))?;
        }
        if let Some(raw) = lookup(ENV_TAIL_RETRY_DELAY_MS) {
            options.tail.retry_delay_ms = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid_value(ENV_TAIL_RETRY_DELAY_MS, raw.as_str()))?;
        }
        if let Some(raw) = lookup(ENV_STREAM_CAPACITY) {
            let capacity = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid_value(ENV_STREAM_CAPACITY, raw.as_str()))?;
            options.stream_capacity = Some(capacity);
        }

        debug!(
            topic = ?options.topic,
            write_only = options.write_only,
            "loaded channel options from environment"
        );

        Ok(options)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
