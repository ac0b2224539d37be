// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Capabilities the destination needs from the page it runs in.
//!
//! The destination never reaches for globals. Location, user agent, storage and
//! the script registry all come through [`Environment`], so the same code runs
//! inside a browser shim, a headless host, or a test.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use url::Url;

/// One year, the lifetime of every cookie the destination writes.
pub const COOKIE_MAX_AGE: Duration = Duration::from_millis(31_536_000_000);

/// Options attached to a cookie write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
	pub max_age: Duration,
	pub secure: bool,
	pub path: String,
	/// Domain attribute, e.g. `.example.com`. `None` scopes to the current host.
	pub domain: Option<String>,
}

impl Default for CookieOptions {
	fn default() -> Self {
		Self {
			max_age: COOKIE_MAX_AGE,
			secure: false,
			path: "/".to_string(),
			domain: None,
		}
	}
}

/// A string key-value store: cookies or local storage.
///
/// Writes may be silently rejected (a browser refuses a cookie for a public
/// suffix, for example); callers detect that by reading the value back.
pub trait KeyValueStore: Send + Sync {
	fn get(&self, name: &str) -> Option<String>;
	fn set(&self, name: &str, value: &str, options: &CookieOptions);
	fn remove(&self, name: &str, options: &CookieOptions);
}

/// The page the destination runs in.
pub trait Environment: Send + Sync {
	/// Full page URL.
	fn href(&self) -> String;
	fn hostname(&self) -> String;
	/// Query string including the leading `?`, or empty.
	fn search(&self) -> String;
	/// URL scheme including the trailing `:`, e.g. `https:`.
	fn protocol(&self) -> String;
	fn user_agent(&self) -> String;
	fn cookies(&self) -> Arc<dyn KeyValueStore>;
	fn local_storage(&self) -> Arc<dyn KeyValueStore>;
	/// Injects a script tag for `src`.
	fn load_script(&self, src: &str);
	/// Whether the global `name` exists and is callable.
	fn is_global_callable(&self, name: &str) -> bool;
	/// `src` of every script tag on the page.
	fn script_sources(&self) -> Vec<String>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory [`KeyValueStore`].
///
/// Accepts every write. Tests can make domain-scoped writes fail to mimic a
/// browser refusing a cookie on a public suffix.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
	values: Mutex<HashMap<String, String>>,
	rejected_domains: HashSet<String>,
	reject_all_domains: bool,
}

impl MemoryKeyValueStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Rejects writes whose domain attribute is `.{domain}` or `{domain}`.
	#[cfg(test)]
	pub fn with_rejected_domain(mut self, domain: impl Into<String>) -> Self {
		let domain = domain.into();
		self.rejected_domains
			.insert(domain.trim_start_matches('.').to_string());
		self
	}

	/// Rejects every write that carries a domain attribute.
	#[cfg(test)]
	pub fn rejecting_domains(mut self) -> Self {
		self.reject_all_domains = true;
		self
	}

	fn accepts(&self, options: &CookieOptions) -> bool {
		match options.domain.as_deref() {
			None | Some("") => true,
			Some(domain) => {
				!self.reject_all_domains
					&& !self
						.rejected_domains
						.contains(domain.trim_start_matches('.'))
			}
		}
	}
}

impl KeyValueStore for MemoryKeyValueStore {
	fn get(&self, name: &str) -> Option<String> {
		lock(&self.values).get(name).cloned()
	}

	fn set(&self, name: &str, value: &str, options: &CookieOptions) {
		if self.accepts(options) {
			lock(&self.values).insert(name.to_string(), value.to_string());
		}
	}

	fn remove(&self, name: &str, _options: &CookieOptions) {
		lock(&self.values).remove(name);
	}
}

/// An [`Environment`] for hosts without a browser: a fixed URL and user agent
/// with in-memory cookies, local storage and script registry.
#[derive(Debug)]
pub struct StaticEnvironment {
	url: Url,
	user_agent: String,
	cookies: Arc<MemoryKeyValueStore>,
	local_storage: Arc<MemoryKeyValueStore>,
	loaded_scripts: Mutex<Vec<String>>,
	script_sources: Mutex<Vec<String>>,
	globals: Mutex<HashSet<String>>,
}

impl StaticEnvironment {
	/// Creates an environment located at `href`.
	pub fn new(href: &str, user_agent: impl Into<String>) -> Result<Self, url::ParseError> {
		Ok(Self {
			url: Url::parse(href)?,
			user_agent: user_agent.into(),
			cookies: Arc::new(MemoryKeyValueStore::new()),
			local_storage: Arc::new(MemoryKeyValueStore::new()),
			loaded_scripts: Mutex::new(Vec::new()),
			script_sources: Mutex::new(Vec::new()),
			globals: Mutex::new(HashSet::new()),
		})
	}

	/// Replaces the cookie store (builder pattern).
	pub fn with_cookies(mut self, cookies: MemoryKeyValueStore) -> Self {
		self.cookies = Arc::new(cookies);
		self
	}

	/// Adds a script tag source without loading it.
	pub fn with_script_source(self, src: impl Into<String>) -> Self {
		lock(&self.script_sources).push(src.into());
		self
	}

	/// Marks a global entry point as callable.
	pub fn define_global(&self, name: impl Into<String>) {
		lock(&self.globals).insert(name.into());
	}

	/// Scripts requested through [`Environment::load_script`].
	pub fn loaded_scripts(&self) -> Vec<String> {
		lock(&self.loaded_scripts).clone()
	}

	pub fn cookie_store(&self) -> &Arc<MemoryKeyValueStore> {
		&self.cookies
	}

	pub fn local_store(&self) -> &Arc<MemoryKeyValueStore> {
		&self.local_storage
	}
}

impl Environment for StaticEnvironment {
	fn href(&self) -> String {
		self.url.to_string()
	}

	fn hostname(&self) -> String {
		self.url.host_str().unwrap_or_default().to_string()
	}

	fn search(&self) -> String {
		match self.url.query() {
			Some(query) => format!("?{query}"),
			None => String::new(),
		}
	}

	fn protocol(&self) -> String {
		format!("{}:", self.url.scheme())
	}

	fn user_agent(&self) -> String {
		self.user_agent.clone()
	}

	fn cookies(&self) -> Arc<dyn KeyValueStore> {
		self.cookies.clone()
	}

	fn local_storage(&self) -> Arc<dyn KeyValueStore> {
		self.local_storage.clone()
	}

	fn load_script(&self, src: &str) {
		lock(&self.loaded_scripts).push(src.to_string());
		lock(&self.script_sources).push(src.to_string());
	}

	fn is_global_callable(&self, name: &str) -> bool {
		lock(&self.globals).contains(name)
	}

	fn script_sources(&self) -> Vec<String> {
		lock(&self.script_sources).clone()
	}
}
