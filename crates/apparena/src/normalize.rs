// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Turns inbound calls into the payloads AppArena collects.

use std::sync::Arc;

use apparena_core::{
	ad_params, utm, AdParams, AnalyticsEvent, AppArenaConfig, EventKind, AMP_ID_COOKIE,
	CROSS_DOMAIN_ID_COOKIE, REFERRER_COOKIE,
};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::cookies::CookieJar;
use crate::cross_domain::CROSS_DOMAIN_ID_TRAIT;
use crate::env::Environment;
use crate::host::HostAnalytics;
use crate::sender::{format_timestamp, SENT_AT_FIELD};

/// Prefix on every generated message id.
pub const MESSAGE_ID_PREFIX: &str = "ajs-";

/// Builds a unique message id from the serialized message plus a random uuid.
pub fn message_id(message: &Map<String, Value>) -> String {
	let serialized = serde_json::to_string(message).unwrap_or_default();
	let digest = Sha256::digest(format!("{serialized}{}", Uuid::new_v4()).as_bytes());
	let hex = hex::encode(digest);
	format!("{MESSAGE_ID_PREFIX}{}", &hex[..32])
}

pub struct Normalizer {
	config: Arc<AppArenaConfig>,
	env: Arc<dyn Environment>,
	host: Arc<dyn HostAnalytics>,
	cookies: CookieJar,
	clock: Arc<dyn Clock>,
}

impl Normalizer {
	pub fn new(
		config: Arc<AppArenaConfig>,
		env: Arc<dyn Environment>,
		host: Arc<dyn HostAnalytics>,
		cookies: CookieJar,
		clock: Arc<dyn Clock>,
	) -> Self {
		Self {
			config,
			env,
			host,
			cookies,
			clock,
		}
	}

	/// Produces the outbound payload for `event`.
	///
	/// Track calls lose `traits`; alias calls are rewritten to
	/// `previousId`/`userId`. Every payload then gets context, identity and
	/// metadata attached.
	pub fn normalize(&self, event: &AnalyticsEvent) -> Result<Map<String, Value>, serde_json::Error> {
		let mut msg = event.to_message()?;
		match event.kind() {
			EventKind::Track => {
				msg.remove("traits");
			}
			EventKind::Alias => self.rewrite_alias(&mut msg),
			EventKind::Page | EventKind::Identify | EventKind::Group => {}
		}

		debug!(kind = %event.kind(), ?msg, "normalize");
		self.enrich(&mut msg);
		debug!(?msg, "normalized");
		Ok(msg)
	}

	fn rewrite_alias(&self, msg: &mut Map<String, Value>) {
		let previous_id = string_field(msg, "previousId")
			.or_else(|| string_field(msg, "from"))
			.or_else(|| self.host.user_id())
			.or_else(|| self.host.anonymous_id());
		let user_id = string_field(msg, "userId").or_else(|| string_field(msg, "to"));

		set_or_remove(msg, "previousId", previous_id);
		set_or_remove(msg, "userId", user_id);
		msg.remove("from");
		msg.remove("to");
	}

	fn enrich(&self, msg: &mut Map<String, Value>) {
		let context = msg.remove("context");
		let options = msg.remove("options");
		let mut ctx = match (context, options) {
			(Some(Value::Object(ctx)), _) => ctx,
			(_, Some(Value::Object(options))) => options,
			_ => Map::new(),
		};

		set_or_remove(msg, "writeKey", self.config.api_key().map(str::to_string));
		set_or_remove(
			msg,
			"companyId",
			self.config.company_id().map(str::to_string),
		);
		let app_id = self
			.config
			.app_id()
			.map(str::to_string)
			.or_else(|| self.host.app_id());
		set_or_remove(msg, "appId", app_id);

		ctx.insert(
			"userAgent".to_string(),
			Value::String(self.env.user_agent()),
		);
		if !ctx.contains_key("library") {
			match serde_json::to_value(self.host.library()) {
				Ok(library) => {
					ctx.insert("library".to_string(), library);
				}
				Err(e) => warn!(error = %e, "failed to serialize library info"),
			}
		}

		self.attach_cross_domain_id(&mut ctx);

		let query = self.env.search();
		if !query.is_empty() && !ctx.contains_key("campaign") {
			ctx.insert("campaign".to_string(), Value::Object(utm(&query)));
		}
		self.attach_referrer(&query, &mut ctx);

		let user_id = string_field(msg, "userId").or_else(|| self.host.user_id());
		set_or_remove(msg, "userId", user_id);
		set_or_remove(msg, "anonymousId", self.host.anonymous_id());
		msg.insert(
			SENT_AT_FIELD.to_string(),
			Value::String(format_timestamp(self.clock.now())),
		);

		if let Some(metadata) = self.metadata() {
			msg.insert("_metadata".to_string(), Value::Object(metadata));
		}

		msg.insert("context".to_string(), Value::Object(ctx));
		let id = message_id(msg);
		msg.insert("messageId".to_string(), Value::String(id));

		if let Some(amp_id) = self.cookies.get(AMP_ID_COOKIE).filter(|id| !id.is_empty()) {
			if let Some(Value::Object(ctx)) = msg.get_mut("context") {
				let mut amp = Map::new();
				amp.insert("id".to_string(), Value::String(amp_id));
				ctx.insert("amp".to_string(), Value::Object(amp));
			}
		}
	}

	fn attach_cross_domain_id(&self, ctx: &mut Map<String, Value>) {
		let Some(id) = self
			.cookies
			.get(CROSS_DOMAIN_ID_COOKIE)
			.filter(|id| !id.is_empty())
		else {
			return;
		};

		match ctx.get_mut("traits") {
			Some(Value::Object(traits)) => {
				let present = traits
					.get(CROSS_DOMAIN_ID_TRAIT)
					.is_some_and(is_truthy);
				if !present {
					traits.insert(CROSS_DOMAIN_ID_TRAIT.to_string(), Value::String(id));
				}
			}
			_ => {
				let mut traits = Map::new();
				traits.insert(CROSS_DOMAIN_ID_TRAIT.to_string(), Value::String(id));
				ctx.insert("traits".to_string(), Value::Object(traits));
			}
		}
	}

	/// Ad-click attribution from the query, else from the last stored value.
	/// Whatever applies is written back so later pages keep it.
	fn attach_referrer(&self, query: &str, ctx: &mut Map<String, Value>) {
		let stored = self
			.cookies
			.get(REFERRER_COOKIE)
			.and_then(|raw| serde_json::from_str::<AdParams>(&raw).ok());
		let fresh = if query.is_empty() {
			None
		} else {
			ad_params(query)
		};
		let Some(ad) = fresh.or(stored) else {
			return;
		};

		let referrer = ctx
			.entry("referrer")
			.or_insert_with(|| Value::Object(Map::new()));
		if !referrer.is_object() {
			*referrer = Value::Object(Map::new());
		}
		if let Value::Object(referrer) = referrer {
			referrer.extend(ad.to_map());
		}

		match serde_json::to_string(&ad) {
			Ok(raw) => self.cookies.set(REFERRER_COOKIE, &raw),
			Err(e) => warn!(error = %e, "failed to persist referrer"),
		}
	}

	fn metadata(&self) -> Option<Map<String, Value>> {
		let mut metadata = Map::new();
		let failed = self.host.failed_initializations();
		if !failed.is_empty() {
			metadata.insert("failedInitializations".to_string(), string_array(failed));
		}
		if self.config.add_bundled_metadata() {
			metadata.insert(
				"bundled".to_string(),
				string_array(self.host.bundled_integrations()),
			);
			metadata.insert(
				"unbundled".to_string(),
				string_array(self.config.unbundled_integrations().to_vec()),
			);
		}
		(!metadata.is_empty()).then_some(metadata)
	}
}

/// Non-empty string value of `key`.
fn string_field(msg: &Map<String, Value>, key: &str) -> Option<String> {
	msg.get(key)
		.and_then(Value::as_str)
		.filter(|s| !s.is_empty())
		.map(str::to_string)
}

fn set_or_remove(msg: &mut Map<String, Value>, key: &str, value: Option<String>) {
	match value {
		Some(value) => {
			msg.insert(key.to_string(), Value::String(value));
		}
		None => {
			msg.remove(key);
		}
	}
}

fn string_array(values: Vec<String>) -> Value {
	Value::Array(values.into_iter().map(Value::String).collect())
}

fn is_truthy(value: &Value) -> bool {
	match value {
		Value::Null => false,
		Value::Bool(b) => *b,
		Value::String(s) => !s.is_empty(),
		Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
		Value::Array(_) | Value::Object(_) => true,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::env::StaticEnvironment;
	use crate::host::ChannelHost;
	use crate::testing::{self, ManualClock, TEST_USER_AGENT};
	use apparena_core::{Alias, Track};
	use chrono::{TimeZone, Utc};
	use serde_json::json;

	const HREF: &str = "https://shop.example.com/landing?utm_source=news&utm_campaign=spring";

	fn normalizer_with(
		config: AppArenaConfig,
		env: Arc<StaticEnvironment>,
		host: Arc<ChannelHost>,
	) -> Normalizer {
		let cookies = CookieJar::new(env.clone());
		let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 5, 4, 3, 2, 1).unwrap());
		Normalizer::new(Arc::new(config), env, host, cookies, Arc::new(clock))
	}

	fn normalizer(href: &str) -> (Normalizer, Arc<StaticEnvironment>, Arc<ChannelHost>) {
		let env = testing::environment(href);
		let (host, _rx) = testing::host();
		let config = AppArenaConfig::builder()
			.api_key("wk-1")
			.company_id("co-1")
			.build()
			.unwrap();
		(normalizer_with(config, env.clone(), host.clone()), env, host)
	}

	#[test]
	fn test_message_id_format_and_uniqueness() {
		let msg = json!({ "event": "x" }).as_object().cloned().unwrap();
		let a = message_id(&msg);
		let b = message_id(&msg);

		assert!(a.starts_with(MESSAGE_ID_PREFIX));
		assert_eq!(a.len(), MESSAGE_ID_PREFIX.len() + 32);
		assert!(a[MESSAGE_ID_PREFIX.len()..]
			.chars()
			.all(|c| c.is_ascii_hexdigit()));
		assert_ne!(a, b);
	}

	#[test]
	fn test_track_is_enriched() {
		let (normalizer, _env, host) = normalizer(HREF);
		host.set_user_id(Some("user-7".to_string()));
		host.set_anonymous_id("anon-7");

		let msg = normalizer
			.normalize(&AnalyticsEvent::track("Bought"))
			.unwrap();

		assert_eq!(msg["event"], "Bought");
		assert_eq!(msg["writeKey"], "wk-1");
		assert_eq!(msg["companyId"], "co-1");
		assert_eq!(msg["userId"], "user-7");
		assert_eq!(msg["anonymousId"], "anon-7");
		assert_eq!(msg[SENT_AT_FIELD], "2025-05-04T03:02:01.000Z");
		assert!(msg["messageId"].as_str().unwrap().starts_with("ajs-"));
		assert!(!msg.contains_key("appId"));
		assert!(!msg.contains_key("_metadata"));

		let ctx = &msg["context"];
		assert_eq!(ctx["userAgent"], TEST_USER_AGENT);
		assert_eq!(ctx["library"]["name"], crate::http::SDK_NAME);
		assert_eq!(ctx["campaign"], json!({ "source": "news", "name": "spring" }));
	}

	#[test]
	fn test_track_drops_traits() {
		let (normalizer, _env, _host) = normalizer(HREF);
		let mut track = Track {
			event: "Clicked".to_string(),
			..Track::default()
		};
		track
			.fields
			.extra
			.insert("traits".to_string(), json!({ "email": "a@b.c" }));

		let msg = normalizer.normalize(&AnalyticsEvent::Track(track)).unwrap();
		assert!(!msg.contains_key("traits"));
	}

	#[test]
	fn test_identify_keeps_traits() {
		let (normalizer, _env, _host) = normalizer(HREF);
		let traits = json!({ "email": "a@b.c" }).as_object().cloned().unwrap();

		let msg = normalizer
			.normalize(&AnalyticsEvent::identify(traits))
			.unwrap();
		assert_eq!(msg["traits"]["email"], "a@b.c");
	}

	#[test]
	fn test_payload_carries_event_type() {
		let (normalizer, _env, _host) = normalizer(HREF);
		let cases = [
			(AnalyticsEvent::page(None), "page"),
			(AnalyticsEvent::identify(Map::new()), "identify"),
			(AnalyticsEvent::group("acme"), "group"),
			(AnalyticsEvent::track("x"), "track"),
			(AnalyticsEvent::alias(Some("a".to_string()), "b"), "alias"),
		];
		for (event, expected) in cases {
			let msg = normalizer.normalize(&event).unwrap();
			assert_eq!(msg["type"], expected);
		}
	}

	#[test]
	fn test_alias_from_to() {
		let (normalizer, _env, _host) = normalizer(HREF);
		let msg = normalizer
			.normalize(&AnalyticsEvent::alias(Some("a".to_string()), "b"))
			.unwrap();

		assert_eq!(msg["previousId"], "a");
		assert_eq!(msg["userId"], "b");
		assert!(!msg.contains_key("from"));
		assert!(!msg.contains_key("to"));
	}

	#[test]
	fn test_alias_previous_id_falls_back_to_host_user() {
		let (normalizer, _env, host) = normalizer(HREF);
		host.set_anonymous_id("anon-1");

		let msg = normalizer
			.normalize(&AnalyticsEvent::alias(None, "b"))
			.unwrap();
		assert_eq!(msg["previousId"], "anon-1");

		host.set_user_id(Some("user-1".to_string()));
		let msg = normalizer
			.normalize(&AnalyticsEvent::alias(None, "b"))
			.unwrap();
		assert_eq!(msg["previousId"], "user-1");
	}

	#[test]
	fn test_alias_explicit_ids_win() {
		let (normalizer, _env, _host) = normalizer(HREF);
		let mut alias = Alias {
			previous_id: Some("prev".to_string()),
			from: Some("from".to_string()),
			to: Some("to".to_string()),
			..Alias::default()
		};
		alias.fields.user_id = Some("user".to_string());

		let msg = normalizer.normalize(&AnalyticsEvent::Alias(alias)).unwrap();
		assert_eq!(msg["previousId"], "prev");
		assert_eq!(msg["userId"], "user");
	}

	#[test]
	fn test_options_become_context() {
		let (normalizer, _env, _host) = normalizer(HREF);
		let mut event = AnalyticsEvent::page(Some("Home".to_string()));
		event.fields_mut().options = Some(json!({ "ip": "1.2.3.4" }).as_object().cloned().unwrap());

		let msg = normalizer.normalize(&event).unwrap();
		assert!(!msg.contains_key("options"));
		assert_eq!(msg["context"]["ip"], "1.2.3.4");
	}

	#[test]
	fn test_context_wins_over_options() {
		let (normalizer, _env, _host) = normalizer(HREF);
		let mut event = AnalyticsEvent::page(None)
			.with_context(json!({ "locale": "de" }).as_object().cloned().unwrap());
		event.fields_mut().options = Some(json!({ "ip": "1.2.3.4" }).as_object().cloned().unwrap());

		let msg = normalizer.normalize(&event).unwrap();
		assert!(!msg.contains_key("options"));
		assert_eq!(msg["context"]["locale"], "de");
		assert!(msg["context"].get("ip").is_none());
	}

	#[test]
	fn test_caller_campaign_is_kept() {
		let (normalizer, _env, _host) = normalizer(HREF);
		let event = AnalyticsEvent::track("x").with_context(
			json!({ "campaign": { "name": "manual" } })
				.as_object()
				.cloned()
				.unwrap(),
		);

		let msg = normalizer.normalize(&event).unwrap();
		assert_eq!(msg["context"]["campaign"], json!({ "name": "manual" }));
	}

	#[test]
	fn test_no_query_no_campaign() {
		let (normalizer, _env, _host) = normalizer("https://shop.example.com/");
		let msg = normalizer.normalize(&AnalyticsEvent::track("x")).unwrap();
		assert!(msg["context"].get("campaign").is_none());
		assert!(msg["context"].get("referrer").is_none());
	}

	#[test]
	fn test_cross_domain_id_attached_to_traits() {
		let (normalizer, env, _host) = normalizer(HREF);
		CookieJar::new(env).set(CROSS_DOMAIN_ID_COOKIE, "xid-1");

		let msg = normalizer.normalize(&AnalyticsEvent::track("x")).unwrap();
		assert_eq!(msg["context"]["traits"][CROSS_DOMAIN_ID_TRAIT], "xid-1");

		let event = AnalyticsEvent::track("x").with_context(
			json!({ "traits": { "crossDomainId": "mine", "plan": "pro" } })
				.as_object()
				.cloned()
				.unwrap(),
		);
		let msg = normalizer.normalize(&event).unwrap();
		assert_eq!(msg["context"]["traits"][CROSS_DOMAIN_ID_TRAIT], "mine");
		assert_eq!(msg["context"]["traits"]["plan"], "pro");
	}

	#[test]
	fn test_referrer_ad_params_are_persisted() {
		let (normalizer, env, _host) = normalizer("https://shop.example.com/?btid=click-1");
		let msg = normalizer.normalize(&AnalyticsEvent::track("x")).unwrap();

		assert_eq!(
			msg["context"]["referrer"],
			json!({ "id": "click-1", "type": "dataxu" })
		);
		let stored = CookieJar::new(env).get(REFERRER_COOKIE).unwrap();
		let stored: Value = serde_json::from_str(&stored).unwrap();
		assert_eq!(stored, json!({ "id": "click-1", "type": "dataxu" }));
	}

	#[test]
	fn test_stored_referrer_used_without_fresh_params() {
		let (normalizer, env, _host) = normalizer("https://shop.example.com/");
		CookieJar::new(env).set(REFERRER_COOKIE, r#"{"id":"old","type":"millennial-media"}"#);

		let event = AnalyticsEvent::track("x").with_context(
			json!({ "referrer": { "url": "https://ads.example.net" } })
				.as_object()
				.cloned()
				.unwrap(),
		);
		let msg = normalizer.normalize(&event).unwrap();
		assert_eq!(
			msg["context"]["referrer"],
			json!({ "url": "https://ads.example.net", "id": "old", "type": "millennial-media" })
		);
	}

	#[test]
	fn test_fresh_referrer_beats_stored() {
		let (normalizer, env, _host) = normalizer("https://shop.example.com/?urid=new");
		let jar = CookieJar::new(env);
		jar.set(REFERRER_COOKIE, r#"{"id":"old","type":"dataxu"}"#);

		let msg = normalizer.normalize(&AnalyticsEvent::track("x")).unwrap();
		assert_eq!(msg["context"]["referrer"]["id"], "new");
		assert!(jar.get(REFERRER_COOKIE).unwrap().contains("new"));
	}

	#[test]
	fn test_amp_id_from_cookie() {
		let (normalizer, env, _host) = normalizer(HREF);
		CookieJar::new(env).set(AMP_ID_COOKIE, "amp-1");

		let msg = normalizer.normalize(&AnalyticsEvent::track("x")).unwrap();
		assert_eq!(msg["context"]["amp"]["id"], "amp-1");
	}

	#[test]
	fn test_metadata() {
		let env = testing::environment(HREF);
		let (host, _rx) = ChannelHost::new();
		let host = Arc::new(
			host.with_failed_initializations(vec!["Broken".to_string()])
				.with_bundled_integrations(vec!["AppArena".to_string()])
				.with_app_id("host-app"),
		);
		let config = AppArenaConfig::builder()
			.add_bundled_metadata(true)
			.unbundled_integrations(["Mixpanel"])
			.build()
			.unwrap();
		let normalizer = normalizer_with(config, env, host);

		let msg = normalizer.normalize(&AnalyticsEvent::track("x")).unwrap();
		assert_eq!(
			msg["_metadata"],
			json!({
				"failedInitializations": ["Broken"],
				"bundled": ["AppArena"],
				"unbundled": ["Mixpanel"]
			})
		);
		assert_eq!(msg["appId"], "host-app");
	}

	#[test]
	fn test_app_id_option_beats_host() {
		let env = testing::environment(HREF);
		let (host, _rx) = ChannelHost::new();
		let host = Arc::new(host.with_app_id("host-app"));
		let config = AppArenaConfig::builder().app_id("opt-app").build().unwrap();
		let normalizer = normalizer_with(config, env, host);

		let msg = normalizer.normalize(&AnalyticsEvent::track("x")).unwrap();
		assert_eq!(msg["appId"], "opt-app");
	}
}
