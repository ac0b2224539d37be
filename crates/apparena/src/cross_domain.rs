// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Cross-domain visitor id handshake.
//!
//! One credentialed ping to the api host decides the id: the server's
//! `aa_xid` is adopted when it knows one, otherwise a fresh id is minted for
//! the current host. A failed ping is terminal for the session so a possibly
//! conflicting id is never minted while another domain may already hold one.

use std::sync::{Arc, Mutex, MutexGuard};

use apparena_core::{
	AppArenaConfig, CrossDomainIdentity, PingResponse, CROSS_DOMAIN_ID_COOKIE,
	CROSS_DOMAIN_ORIGIN_COOKIE, CROSS_DOMAIN_TIMESTAMP_COOKIE,
};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::cookies::CookieJar;
use crate::env::Environment;
use crate::error::{DeliveryError, ResolutionError};
use crate::host::HostAnalytics;
use crate::transport::Transport;

/// Trait name the resolved id is identified under.
pub const CROSS_DOMAIN_ID_TRAIT: &str = "crossDomainId";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionState {
	Unresolved,
	Resolving,
	Resolved(CrossDomainIdentity),
	Failed(String),
}

/// Outcome of a successful [`CrossDomainResolver::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
	/// An id was already stored; no request was made.
	Existing(CrossDomainIdentity),
	/// The ping ran and its result was persisted.
	Resolved(CrossDomainIdentity),
}

impl Resolution {
	pub fn identity(&self) -> &CrossDomainIdentity {
		match self {
			Resolution::Existing(identity) | Resolution::Resolved(identity) => identity,
		}
	}

	pub fn id(&self) -> &str {
		&self.identity().id
	}
}

pub struct CrossDomainResolver {
	config: Arc<AppArenaConfig>,
	transport: Arc<dyn Transport>,
	cookies: CookieJar,
	env: Arc<dyn Environment>,
	host: Arc<dyn HostAnalytics>,
	clock: Arc<dyn Clock>,
	state: Mutex<ResolutionState>,
}

impl CrossDomainResolver {
	pub fn new(
		config: Arc<AppArenaConfig>,
		transport: Arc<dyn Transport>,
		cookies: CookieJar,
		env: Arc<dyn Environment>,
		host: Arc<dyn HostAnalytics>,
		clock: Arc<dyn Clock>,
	) -> Self {
		Self {
			config,
			transport,
			cookies,
			env,
			host,
			clock,
			state: Mutex::new(ResolutionState::Unresolved),
		}
	}

	pub fn state(&self) -> ResolutionState {
		self.lock_state().clone()
	}

	/// The identity persisted in cookies, if any.
	pub fn stored_identity(&self) -> Option<CrossDomainIdentity> {
		let id = self
			.cookies
			.get(CROSS_DOMAIN_ID_COOKIE)
			.filter(|id| !id.is_empty())?;
		let origin = self.cookies.get(CROSS_DOMAIN_ORIGIN_COOKIE);
		let timestamp = self.cookies.get(CROSS_DOMAIN_TIMESTAMP_COOKIE);
		Some(CrossDomainIdentity::from_cookies(
			id,
			origin,
			timestamp.as_deref(),
		))
	}

	/// Determines the cross-domain id, pinging the api host at most once per
	/// session.
	pub async fn resolve(&self) -> Result<Resolution, ResolutionError> {
		if !self.config.cross_domain_id() {
			return Err(ResolutionError::Disabled);
		}
		if let Some(identity) = self.stored_identity() {
			debug!(id = %identity.id, "cross-domain id already stored");
			return Ok(Resolution::Existing(identity));
		}

		{
			let mut state = self.lock_state();
			match &*state {
				ResolutionState::Resolving => return Err(ResolutionError::InProgress),
				ResolutionState::Failed(_) => return Err(ResolutionError::AlreadyFailed),
				ResolutionState::Unresolved | ResolutionState::Resolved(_) => {}
			}
			*state = ResolutionState::Resolving;
		}

		let server_id = match self.ping().await {
			Ok(id) => id,
			Err(e) => {
				warn!(error = %e, "cross-domain id ping failed, leaving id unresolved");
				*self.lock_state() = ResolutionState::Failed(e.to_string());
				return Err(ResolutionError::Ping(e));
			}
		};

		let now = self.clock.now();
		let identity = match server_id {
			Some(id) => CrossDomainIdentity::adopt(id, self.config.api_host(), now),
			None => CrossDomainIdentity::mint(self.env.hostname(), now),
		};
		self.persist(&identity);

		self.host.set_anonymous_id(&identity.id);
		let mut traits = Map::new();
		traits.insert(
			CROSS_DOMAIN_ID_TRAIT.to_string(),
			Value::String(identity.id.clone()),
		);
		self.host.identify(traits);

		info!(
			id = %identity.id,
			origin = %identity.origin_domain,
			"resolved cross-domain id"
		);
		*self.lock_state() = ResolutionState::Resolved(identity.clone());
		Ok(Resolution::Resolved(identity))
	}

	/// Asks the api host for the id it knows. `Ok(None)` means it knows none.
	async fn ping(&self) -> Result<Option<String>, DeliveryError> {
		let url = self.config.endpoint("/ping");
		let response = self
			.transport
			.get_with_credentials(&url)
			.await?
			.error_for_status()?;

		let body = response.body.trim();
		if body.is_empty() {
			return Ok(None);
		}
		let ping: Option<PingResponse> = serde_json::from_str(body)?;
		Ok(ping.and_then(|p| p.cross_domain_id().map(str::to_string)))
	}

	fn persist(&self, identity: &CrossDomainIdentity) {
		self.cookies.set(CROSS_DOMAIN_ID_COOKIE, &identity.id);
		self.cookies
			.set(CROSS_DOMAIN_ORIGIN_COOKIE, &identity.origin_domain);
		self.cookies.set(
			CROSS_DOMAIN_TIMESTAMP_COOKIE,
			&identity.resolved_at_millis().to_string(),
		);
	}

	fn lock_state(&self) -> MutexGuard<'_, ResolutionState> {
		self.state.lock().unwrap_or_else(|e| e.into_inner())
	}
}
