// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Hooks into the host analytics router.

use std::sync::RwLock;

use apparena_core::{AnalyticsEvent, Identify};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::warn;

use crate::http::{SDK_NAME, SDK_VERSION};

/// Library reported in `context.library` when the message has none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryInfo {
	pub name: String,
	pub version: String,
}

impl Default for LibraryInfo {
	fn default() -> Self {
		Self {
			name: SDK_NAME.to_string(),
			version: SDK_VERSION.to_string(),
		}
	}
}

/// What the destination needs from the host router.
pub trait HostAnalytics: Send + Sync {
	/// Current user id, if the user is identified.
	fn user_id(&self) -> Option<String>;

	fn anonymous_id(&self) -> Option<String>;

	fn set_anonymous_id(&self, id: &str);

	/// Issues an identify call through the host, which routes it back to every
	/// destination.
	fn identify(&self, traits: Map<String, Value>);

	/// Names of integrations that failed to initialize.
	fn failed_initializations(&self) -> Vec<String> {
		Vec::new()
	}

	/// Names of integrations bundled into the host.
	fn bundled_integrations(&self) -> Vec<String> {
		Vec::new()
	}

	fn library(&self) -> LibraryInfo {
		LibraryInfo::default()
	}

	/// App id configured on the host, used when the destination has none.
	fn app_id(&self) -> Option<String> {
		None
	}
}

#[derive(Debug, Default)]
struct UserState {
	user_id: Option<String>,
	anonymous_id: Option<String>,
}

/// A [`HostAnalytics`] that keeps the user in memory and routes identify calls
/// back onto the invoke channel.
#[derive(Debug)]
pub struct ChannelHost {
	user: RwLock<UserState>,
	invoke: mpsc::UnboundedSender<AnalyticsEvent>,
	bundled: Vec<String>,
	failed: Vec<String>,
	app_id: Option<String>,
}

impl ChannelHost {
	/// Creates a host and the invoke stream it feeds.
	pub fn new() -> (Self, mpsc::UnboundedReceiver<AnalyticsEvent>) {
		let (tx, rx) = mpsc::unbounded_channel();
		let host = Self {
			user: RwLock::new(UserState::default()),
			invoke: tx,
			bundled: Vec::new(),
			failed: Vec::new(),
			app_id: None,
		};
		(host, rx)
	}

	pub fn with_bundled_integrations(mut self, names: Vec<String>) -> Self {
		self.bundled = names;
		self
	}

	pub fn with_failed_initializations(mut self, names: Vec<String>) -> Self {
		self.failed = names;
		self
	}

	pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
		self.app_id = Some(app_id.into());
		self
	}

	pub fn set_user_id(&self, user_id: Option<String>) {
		let mut user = self.user.write().unwrap_or_else(|e| e.into_inner());
		user.user_id = user_id;
	}

	/// Queues a call on the invoke stream.
	pub fn invoke(&self, event: AnalyticsEvent) {
		if self.invoke.send(event).is_err() {
			warn!("invoke stream closed, dropping call");
		}
	}
}

impl HostAnalytics for ChannelHost {
	fn user_id(&self) -> Option<String> {
		self.user
			.read()
			.unwrap_or_else(|e| e.into_inner())
			.user_id
			.clone()
	}

	fn anonymous_id(&self) -> Option<String> {
		self.user
			.read()
			.unwrap_or_else(|e| e.into_inner())
			.anonymous_id
			.clone()
	}

	fn set_anonymous_id(&self, id: &str) {
		let mut user = self.user.write().unwrap_or_else(|e| e.into_inner());
		user.anonymous_id = Some(id.to_string());
	}

	fn identify(&self, traits: Map<String, Value>) {
		let mut identify = Identify {
			traits,
			..Identify::default()
		};
		identify.fields.user_id = self.user_id();
		identify.fields.anonymous_id = self.anonymous_id();
		self.invoke(AnalyticsEvent::Identify(identify));
	}

	fn failed_initializations(&self) -> Vec<String> {
		self.failed.clone()
	}

	fn bundled_integrations(&self) -> Vec<String> {
		self.bundled.clone()
	}

	fn app_id(&self) -> Option<String> {
		self.app_id.clone()
	}
}
