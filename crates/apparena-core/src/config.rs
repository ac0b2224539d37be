// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Destination options and retry queue limits.
//!
//! [`AppArenaOptions`] is the raw option bag as a host hands it over (camelCase
//! keys, every field defaulted). [`AppArenaConfig`] is the validated, immutable
//! form the rest of the SDK works with. The only way to get one is through
//! validation, either with [`AppArenaConfig::builder`], `TryFrom`, TOML, or serde.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default collection host, without scheme.
pub const DEFAULT_API_HOST: &str = "app.app-arena.com/v1";

/// Retry queue limits.
///
/// The defaults give rapid early retries that plateau at the max delay, with
/// 45 attempts in total before an item is dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueConfig {
	/// Delay before the first retry, in milliseconds.
	pub min_retry_delay_ms: u64,
	/// Upper bound for any single retry delay, in milliseconds.
	pub max_retry_delay_ms: u64,
	/// Multiplier applied per attempt.
	pub backoff_factor: u32,
	/// Attempts made before an item is discarded.
	pub max_attempts: u32,
	/// Items held before the oldest is evicted.
	pub max_items: usize,
}

impl Default for QueueConfig {
	fn default() -> Self {
		Self {
			min_retry_delay_ms: 1_000,
			max_retry_delay_ms: 360_000,
			backoff_factor: 2,
			max_attempts: 45,
			max_items: 100,
		}
	}
}

impl QueueConfig {
	/// Delay that must pass after the previous attempt before attempt `attempt`
	/// (zero-indexed) may run: `min(max, min * factor^attempt)`.
	///
	/// Overflow saturates to the max delay.
	pub fn retry_delay(&self, attempt: u32) -> Duration {
		let ms = u64::from(self.backoff_factor)
			.checked_pow(attempt)
			.and_then(|scale| self.min_retry_delay_ms.checked_mul(scale))
			.map_or(self.max_retry_delay_ms, |ms| ms.min(self.max_retry_delay_ms));
		Duration::from_millis(ms)
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.min_retry_delay_ms == 0 {
			return Err(ConfigError::invalid_value(
				"minRetryDelay",
				"must be greater than zero",
			));
		}
		if self.min_retry_delay_ms > self.max_retry_delay_ms {
			return Err(ConfigError::invalid_value(
				"maxRetryDelay",
				"must not be below minRetryDelay",
			));
		}
		if self.backoff_factor == 0 {
			return Err(ConfigError::invalid_value(
				"backoffFactor",
				"must be at least 1",
			));
		}
		if self.max_attempts == 0 {
			return Err(ConfigError::invalid_value(
				"maxAttempts",
				"must be greater than zero",
			));
		}
		if self.max_items == 0 {
			return Err(ConfigError::invalid_value(
				"maxItems",
				"must be greater than zero",
			));
		}
		Ok(())
	}
}

/// Raw destination options as supplied by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppArenaOptions {
	pub api_host: String,
	pub cross_domain_id: bool,
	pub retry_queue: bool,
	pub add_bundled_metadata: bool,
	pub unbundled_integrations: Vec<String>,
	pub api_key: Option<String>,
	pub company_id: Option<String>,
	pub app_id: Option<String>,
	pub queue: QueueConfig,
}

impl Default for AppArenaOptions {
	fn default() -> Self {
		Self {
			api_host: DEFAULT_API_HOST.to_string(),
			cross_domain_id: true,
			retry_queue: false,
			add_bundled_metadata: false,
			unbundled_integrations: Vec::new(),
			api_key: None,
			company_id: None,
			app_id: None,
			queue: QueueConfig::default(),
		}
	}
}

/// Validated, immutable destination configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "AppArenaOptions", into = "AppArenaOptions")]
pub struct AppArenaConfig {
	options: AppArenaOptions,
}

impl AppArenaConfig {
	/// Starts a builder seeded with the default options.
	pub fn builder() -> AppArenaConfigBuilder {
		AppArenaConfigBuilder::default()
	}

	/// Parses and validates a TOML document using the camelCase option names.
	pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
		let options: AppArenaOptions = toml::from_str(contents)?;
		Self::try_from(options)
	}

	pub fn api_host(&self) -> &str {
		&self.options.api_host
	}

	pub fn cross_domain_id(&self) -> bool {
		self.options.cross_domain_id
	}

	pub fn retry_queue(&self) -> bool {
		self.options.retry_queue
	}

	pub fn add_bundled_metadata(&self) -> bool {
		self.options.add_bundled_metadata
	}

	pub fn unbundled_integrations(&self) -> &[String] {
		&self.options.unbundled_integrations
	}

	pub fn api_key(&self) -> Option<&str> {
		self.options.api_key.as_deref()
	}

	pub fn company_id(&self) -> Option<&str> {
		self.options.company_id.as_deref()
	}

	pub fn app_id(&self) -> Option<&str> {
		self.options.app_id.as_deref()
	}

	pub fn queue(&self) -> &QueueConfig {
		&self.options.queue
	}

	/// Full `https://` URL for a path on the configured host.
	pub fn endpoint(&self, path: &str) -> String {
		format!("https://{}{}", self.options.api_host, path)
	}

	/// The options this config was validated from.
	pub fn options(&self) -> &AppArenaOptions {
		&self.options
	}
}

impl Default for AppArenaConfig {
	fn default() -> Self {
		Self {
			options: AppArenaOptions::default(),
		}
	}
}

impl TryFrom<AppArenaOptions> for AppArenaConfig {
	type Error = ConfigError;

	fn try_from(options: AppArenaOptions) -> Result<Self, Self::Error> {
		validate_api_host(&options.api_host)?;
		options.queue.validate()?;
		if options.unbundled_integrations.iter().any(|name| name.trim().is_empty()) {
			return Err(ConfigError::invalid_value(
				"unbundledIntegrations",
				"integration names must not be empty",
			));
		}
		Ok(Self { options })
	}
}

impl From<AppArenaConfig> for AppArenaOptions {
	fn from(config: AppArenaConfig) -> Self {
		config.options
	}
}

fn validate_api_host(host: &str) -> Result<(), ConfigError> {
	if host.is_empty() {
		return Err(ConfigError::invalid_value("apiHost", "must not be empty"));
	}
	if host.contains("://") {
		return Err(ConfigError::invalid_value(
			"apiHost",
			"must not include a scheme",
		));
	}
	if host.starts_with('/') || host.chars().any(char::is_whitespace) {
		return Err(ConfigError::invalid_value(
			"apiHost",
			"must be a bare host with an optional path",
		));
	}
	Ok(())
}

/// Builder for [`AppArenaConfig`].
#[derive(Debug, Clone, Default)]
pub struct AppArenaConfigBuilder {
	options: AppArenaOptions,
}

impl AppArenaConfigBuilder {
	/// Sets the collection host, e.g. `app.app-arena.com/v1`.
	pub fn api_host(mut self, host: impl Into<String>) -> Self {
		self.options.api_host = host.into();
		self
	}

	/// Enables or disables cross-domain id resolution (default: enabled).
	pub fn cross_domain_id(mut self, enabled: bool) -> Self {
		self.options.cross_domain_id = enabled;
		self
	}

	/// Enables or disables the durable retry queue (default: disabled).
	pub fn retry_queue(mut self, enabled: bool) -> Self {
		self.options.retry_queue = enabled;
		self
	}

	pub fn add_bundled_metadata(mut self, enabled: bool) -> Self {
		self.options.add_bundled_metadata = enabled;
		self
	}

	pub fn unbundled_integrations<I, S>(mut self, names: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.options.unbundled_integrations = names.into_iter().map(Into::into).collect();
		self
	}

	/// Sets the write key sent with every message.
	pub fn api_key(mut self, key: impl Into<String>) -> Self {
		self.options.api_key = Some(key.into());
		self
	}

	pub fn company_id(mut self, id: impl Into<String>) -> Self {
		self.options.company_id = Some(id.into());
		self
	}

	pub fn app_id(mut self, id: impl Into<String>) -> Self {
		self.options.app_id = Some(id.into());
		self
	}

	pub fn queue(mut self, queue: QueueConfig) -> Self {
		self.options.queue = queue;
		self
	}

	/// Validates the options and builds the config.
	pub fn build(self) -> Result<AppArenaConfig, ConfigError> {
		AppArenaConfig::try_from(self.options)
	}
}
