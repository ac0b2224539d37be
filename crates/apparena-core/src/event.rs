// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Inbound analytics calls.
//!
//! The host hands the destination one of five call kinds. Each kind carries the
//! fields it defines plus the [`MessageFields`] every call shares; unknown keys
//! survive in [`MessageFields::extra`] so nothing the host sends is lost before
//! normalization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The five call kinds the destination accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
	Page,
	Identify,
	Group,
	Track,
	Alias,
}

impl EventKind {
	/// Collection path for this kind.
	pub fn path(self) -> &'static str {
		match self {
			EventKind::Page => "/event/p",
			EventKind::Identify => "/event/i",
			EventKind::Group => "/event/g",
			EventKind::Track => "/event/t",
			EventKind::Alias => "/event/a",
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			EventKind::Page => "page",
			EventKind::Identify => "identify",
			EventKind::Group => "group",
			EventKind::Track => "track",
			EventKind::Alias => "alias",
		}
	}
}

impl std::fmt::Display for EventKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Fields shared by every call kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFields {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub anonymous_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub context: Option<Map<String, Value>>,
	/// Legacy spelling of `context`; folded into it during normalization.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub options: Option<Map<String, Value>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub integrations: Option<Map<String, Value>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub timestamp: Option<DateTime<Utc>>,
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub category: Option<String>,
	#[serde(default)]
	pub properties: Map<String, Value>,
	#[serde(flatten)]
	pub fields: MessageFields,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identify {
	#[serde(default)]
	pub traits: Map<String, Value>,
	#[serde(flatten)]
	pub fields: MessageFields,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub group_id: Option<String>,
	#[serde(default)]
	pub traits: Map<String, Value>,
	#[serde(flatten)]
	pub fields: MessageFields,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
	pub event: String,
	#[serde(default)]
	pub properties: Map<String, Value>,
	#[serde(flatten)]
	pub fields: MessageFields,
}

/// Alias call. The host may name the two ids either `from`/`to` or
/// `previousId`/`userId`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alias {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub previous_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub from: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub to: Option<String>,
	#[serde(flatten)]
	pub fields: MessageFields,
}

/// A typed analytics call delivered by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AnalyticsEvent {
	Page(Page),
	Identify(Identify),
	Group(Group),
	Track(Track),
	Alias(Alias),
}

impl AnalyticsEvent {
	/// Creates a track call with no properties.
	pub fn track(event: impl Into<String>) -> Self {
		AnalyticsEvent::Track(Track {
			event: event.into(),
			..Track::default()
		})
	}

	/// Creates a page call, optionally named.
	pub fn page(name: Option<String>) -> Self {
		AnalyticsEvent::Page(Page {
			name,
			..Page::default()
		})
	}

	/// Creates an identify call carrying `traits`.
	pub fn identify(traits: Map<String, Value>) -> Self {
		AnalyticsEvent::Identify(Identify {
			traits,
			..Identify::default()
		})
	}

	/// Creates a group call.
	pub fn group(group_id: impl Into<String>) -> Self {
		AnalyticsEvent::Group(Group {
			group_id: Some(group_id.into()),
			..Group::default()
		})
	}

	/// Creates an alias call in `from`/`to` form.
	pub fn alias(from: Option<String>, to: impl Into<String>) -> Self {
		AnalyticsEvent::Alias(Alias {
			from,
			to: Some(to.into()),
			..Alias::default()
		})
	}

	pub fn kind(&self) -> EventKind {
		match self {
			AnalyticsEvent::Page(_) => EventKind::Page,
			AnalyticsEvent::Identify(_) => EventKind::Identify,
			AnalyticsEvent::Group(_) => EventKind::Group,
			AnalyticsEvent::Track(_) => EventKind::Track,
			AnalyticsEvent::Alias(_) => EventKind::Alias,
		}
	}

	pub fn fields(&self) -> &MessageFields {
		match self {
			AnalyticsEvent::Page(e) => &e.fields,
			AnalyticsEvent::Identify(e) => &e.fields,
			AnalyticsEvent::Group(e) => &e.fields,
			AnalyticsEvent::Track(e) => &e.fields,
			AnalyticsEvent::Alias(e) => &e.fields,
		}
	}

	pub fn fields_mut(&mut self) -> &mut MessageFields {
		match self {
			AnalyticsEvent::Page(e) => &mut e.fields,
			AnalyticsEvent::Identify(e) => &mut e.fields,
			AnalyticsEvent::Group(e) => &mut e.fields,
			AnalyticsEvent::Track(e) => &mut e.fields,
			AnalyticsEvent::Alias(e) => &mut e.fields,
		}
	}

	/// Sets the user id (builder pattern).
	pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
		self.fields_mut().user_id = Some(user_id.into());
		self
	}

	/// Sets the message context (builder pattern).
	pub fn with_context(mut self, context: Map<String, Value>) -> Self {
		self.fields_mut().context = Some(context);
		self
	}

	/// Serializes the call as a JSON object carrying its `type` tag.
	pub fn to_message(&self) -> Result<Map<String, Value>, serde_json::Error> {
		let value = match self {
			AnalyticsEvent::Page(e) => serde_json::to_value(e)?,
			AnalyticsEvent::Identify(e) => serde_json::to_value(e)?,
			AnalyticsEvent::Group(e) => serde_json::to_value(e)?,
			AnalyticsEvent::Track(e) => serde_json::to_value(e)?,
			AnalyticsEvent::Alias(e) => serde_json::to_value(e)?,
		};
		let mut message = match value {
			Value::Object(map) => map,
			_ => Map::new(),
		};
		message.insert(
			"type".to_string(),
			Value::String(self.kind().as_str().to_string()),
		);
		Ok(message)
	}
}
