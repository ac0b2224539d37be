// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Cross-domain visitor identity.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cookie holding the cross-domain id.
pub const CROSS_DOMAIN_ID_COOKIE: &str = "aa_xid";
/// Cookie holding the domain that supplied the cross-domain id.
pub const CROSS_DOMAIN_ORIGIN_COOKIE: &str = "aa_xid_fd";
/// Cookie holding the resolution time in epoch milliseconds.
pub const CROSS_DOMAIN_TIMESTAMP_COOKIE: &str = "aa_xid_ts";
/// Cookie linking AMP sessions.
pub const AMP_ID_COOKIE: &str = "aa_amp_id";
/// Cookie persisting referrer ad-click attribution as JSON.
pub const REFERRER_COOKIE: &str = "s:context.referrer";

/// A resolved cross-domain visitor identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossDomainIdentity {
	pub id: String,
	pub origin_domain: String,
	pub resolved_at: DateTime<Utc>,
}

impl CrossDomainIdentity {
	/// Mints a fresh identity owned by `hostname`.
	pub fn mint(hostname: impl Into<String>, resolved_at: DateTime<Utc>) -> Self {
		Self {
			id: Uuid::new_v4().to_string(),
			origin_domain: hostname.into(),
			resolved_at,
		}
	}

	/// Adopts an id returned by the ping authority at `api_host`.
	pub fn adopt(
		id: impl Into<String>,
		api_host: impl Into<String>,
		resolved_at: DateTime<Utc>,
	) -> Self {
		Self {
			id: id.into(),
			origin_domain: api_host.into(),
			resolved_at,
		}
	}

	/// Resolution time as epoch milliseconds, the form persisted in cookies.
	pub fn resolved_at_millis(&self) -> i64 {
		self.resolved_at.timestamp_millis()
	}

	/// Rebuilds an identity from its three cookie values.
	///
	/// A missing origin or unparseable timestamp is tolerated; only the id is
	/// required.
	pub fn from_cookies(id: String, origin: Option<String>, timestamp: Option<&str>) -> Self {
		let resolved_at = timestamp
			.and_then(|ts| ts.parse::<i64>().ok())
			.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
			.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
		Self {
			id,
			origin_domain: origin.unwrap_or_default(),
			resolved_at,
		}
	}
}

/// Body returned by the ping endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
	#[serde(default)]
	pub aa_xid: Option<String>,
}

impl PingResponse {
	/// The id known to the ping authority, if any. Empty strings count as none.
	pub fn cross_domain_id(&self) -> Option<&str> {
		self.aa_xid.as_deref().filter(|id| !id.is_empty())
	}
}
