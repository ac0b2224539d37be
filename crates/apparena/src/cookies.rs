// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Cookie access on the broadest domain the page allows.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::debug;

use crate::env::{CookieOptions, Environment, KeyValueStore};

/// Throwaway cookie used to probe which domains accept writes.
const PROBE_COOKIE: &str = "__tld__";

/// Reads and writes destination values, picking the backing store from the
/// page protocol and scoping cookies to the top-level domain.
#[derive(Clone)]
pub struct CookieJar {
	env: Arc<dyn Environment>,
}

impl CookieJar {
	pub fn new(env: Arc<dyn Environment>) -> Self {
		Self { env }
	}

	/// Local storage on `file:` and `chrome-extension:` pages, where cookies do
	/// not stick; cookies everywhere else.
	pub fn store(&self) -> Arc<dyn KeyValueStore> {
		match self.env.protocol().as_str() {
			"file:" | "chrome-extension:" => self.env.local_storage(),
			_ => self.env.cookies(),
		}
	}

	pub fn get(&self, name: &str) -> Option<String> {
		self.store().get(name)
	}

	/// Writes `value` on `.{top domain}`, falling back to a host-only write when
	/// the scoped value cannot be read back.
	pub fn set(&self, name: &str, value: &str) {
		let store = self.store();
		let top = self.top_domain();
		let mut options = CookieOptions {
			domain: (!top.is_empty()).then(|| format!(".{top}")),
			..CookieOptions::default()
		};
		debug!(href = %self.env.href(), domain = ?options.domain, "store domain");
		debug!(name, value, ?options, "store");
		store.set(name, value, &options);
		if store.get(name).is_some() {
			return;
		}

		options.domain = None;
		debug!(name, value, ?options, "fallback store");
		store.set(name, value, &options);
	}

	/// Broadest domain of the current host that accepts a cookie, or empty when
	/// none does (IP addresses, single-label hosts).
	pub fn top_domain(&self) -> String {
		let cookies = self.env.cookies();
		for level in domain_levels(&self.env.hostname()) {
			let options = CookieOptions {
				domain: Some(format!(".{level}")),
				..CookieOptions::default()
			};
			cookies.set(PROBE_COOKIE, "1", &options);
			if cookies.get(PROBE_COOKIE).is_some() {
				cookies.remove(PROBE_COOKIE, &options);
				return level;
			}
		}
		String::new()
	}
}

/// Candidate cookie domains for `hostname`, broadest first.
///
/// `www.shop.example.com` yields `example.com`, `shop.example.com`,
/// `www.shop.example.com`.
pub fn domain_levels(hostname: &str) -> Vec<String> {
	let host = hostname.trim_start_matches('[').trim_end_matches(']');
	if host.parse::<IpAddr>().is_ok() {
		return Vec::new();
	}
	let parts: Vec<&str> = host.split('.').filter(|p| !p.is_empty()).collect();
	if parts.len() <= 1 {
		return Vec::new();
	}
	(0..=parts.len() - 2)
		.rev()
		.map(|start| parts[start..].join("."))
		.collect()
}
