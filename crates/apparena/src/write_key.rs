// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Detects pages that loaded a different write key than they requested.
//!
//! Stale caches occasionally serve the SDK bundle for another key. The page's
//! script tags still show which key was asked for, so a mismatch can be
//! reported back to AppArena.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Value};

use crate::env::Environment;

/// Where mismatches are reported. Independent of the configured api host.
pub const INVALID_WRITE_KEY_URL: &str = "https://app.app-arena.com/dev/event/t";
pub const INVALID_WRITE_KEY_EVENT: &str = "Invalid WriteKey Loaded";

static SDK_SCRIPT_PATTERN: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"/client-sdk/1\.0/([^/]*)(/platform)?/analytics").unwrap());

/// Returns the key requested by the SDK script tags when at least one tag
/// matches and none requests `loaded_key`.
pub fn requested_key_mismatch<S: AsRef<str>>(sources: &[S], loaded_key: &str) -> Option<String> {
	if loaded_key.is_empty() {
		return None;
	}

	let mut requested = None;
	for src in sources {
		let Some(captures) = SDK_SCRIPT_PATTERN.captures(src.as_ref()) else {
			continue;
		};
		let key = captures.get(1).map_or("", |m| m.as_str());
		if key == loaded_key {
			return None;
		}
		requested = Some(key.to_string());
	}
	requested
}

/// Track payload reporting a write key mismatch.
pub fn invalid_write_key_message(env: &dyn Environment, loaded_key: &str, requested_key: &str) -> Value {
	json!({
		"userId": "apparena",
		"event": INVALID_WRITE_KEY_EVENT,
		"properties": {
			"hostname": env.hostname(),
			"href": env.href(),
			"loadedKey": loaded_key,
			"requestedKey": requested_key,
			"userAgent": env.user_agent(),
			"bailed": true,
		}
	})
}
