// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Test doubles shared across module tests.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::clock::Clock;
use crate::env::StaticEnvironment;
use crate::error::DeliveryError;
use crate::host::ChannelHost;
use crate::retry_queue::{QueueEvent, QueueObserver};
use crate::transport::{Headers, Transport, TransportResponse};

pub const TEST_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) TestBrowser/1.0";

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
	millis: Arc<AtomicI64>,
}

impl ManualClock {
	pub fn new(start: DateTime<Utc>) -> Self {
		Self {
			millis: Arc::new(AtomicI64::new(start.timestamp_millis())),
		}
	}

	pub fn advance(&self, duration: Duration) {
		let ms = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
		self.millis.fetch_add(ms, Ordering::AcqRel);
	}
}

impl Clock for ManualClock {
	fn now(&self) -> DateTime<Utc> {
		let ms = self.millis.load(Ordering::Acquire);
		Utc.timestamp_millis_opt(ms)
			.single()
			.unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
	}
}

#[derive(Debug, Clone)]
pub struct RecordedPost {
	pub url: String,
	pub body: Value,
	pub headers: Headers,
}

/// Scriptable [`Transport`] that records every request.
#[derive(Debug)]
pub struct MockTransport {
	posts: Mutex<Vec<RecordedPost>>,
	status: AtomicU16,
	failures_left: AtomicUsize,
	fail_all: AtomicBool,
	gets: Mutex<Vec<String>>,
	ping: Mutex<Result<TransportResponse, String>>,
}

impl MockTransport {
	pub fn new() -> Self {
		Self {
			posts: Mutex::new(Vec::new()),
			status: AtomicU16::new(200),
			failures_left: AtomicUsize::new(0),
			fail_all: AtomicBool::new(false),
			gets: Mutex::new(Vec::new()),
			ping: Mutex::new(Ok(TransportResponse {
				status: 200,
				body: "{}".to_string(),
			})),
		}
	}

	pub fn posts(&self) -> Vec<RecordedPost> {
		self.posts.lock().unwrap().clone()
	}

	pub fn gets(&self) -> Vec<String> {
		self.gets.lock().unwrap().clone()
	}

	pub fn respond_with_status(&self, status: u16) {
		self.status.store(status, Ordering::SeqCst);
	}

	/// The next `n` posts fail at the transport level.
	pub fn fail_posts(&self, n: usize) {
		self.failures_left.store(n, Ordering::SeqCst);
	}

	pub fn fail_all_posts(&self) {
		self.fail_all.store(true, Ordering::SeqCst);
	}

	pub fn set_ping_body(&self, body: &str) {
		*self.ping.lock().unwrap() = Ok(TransportResponse {
			status: 200,
			body: body.to_string(),
		});
	}

	pub fn set_ping_status(&self, status: u16) {
		*self.ping.lock().unwrap() = Ok(TransportResponse {
			status,
			body: String::new(),
		});
	}

	pub fn fail_ping(&self, message: &str) {
		*self.ping.lock().unwrap() = Err(message.to_string());
	}
}

#[async_trait]
impl Transport for MockTransport {
	async fn post(
		&self,
		url: &str,
		body: &Value,
		headers: &Headers,
	) -> Result<TransportResponse, DeliveryError> {
		self.posts.lock().unwrap().push(RecordedPost {
			url: url.to_string(),
			body: body.clone(),
			headers: headers.clone(),
		});

		if self.fail_all.load(Ordering::SeqCst) {
			return Err(DeliveryError::Transport("connection refused".to_string()));
		}
		let scripted = self
			.failures_left
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok();
		if scripted {
			return Err(DeliveryError::Transport("connection reset".to_string()));
		}

		Ok(TransportResponse {
			status: self.status.load(Ordering::SeqCst),
			body: String::new(),
		})
	}

	async fn get_with_credentials(&self, url: &str) -> Result<TransportResponse, DeliveryError> {
		self.gets.lock().unwrap().push(url.to_string());
		self.ping
			.lock()
			.unwrap()
			.clone()
			.map_err(DeliveryError::Transport)
	}
}

/// Collects queue events for assertions.
#[derive(Debug, Default)]
pub struct RecordingObserver {
	events: Mutex<Vec<QueueEvent>>,
}

impl RecordingObserver {
	pub fn events(&self) -> Vec<QueueEvent> {
		self.events.lock().unwrap().clone()
	}
}

impl QueueObserver for RecordingObserver {
	fn on_event(&self, event: &QueueEvent) {
		self.events.lock().unwrap().push(event.clone());
	}
}

pub fn environment(href: &str) -> Arc<StaticEnvironment> {
	Arc::new(StaticEnvironment::new(href, TEST_USER_AGENT).unwrap())
}

pub fn host() -> (
	Arc<ChannelHost>,
	tokio::sync::mpsc::UnboundedReceiver<apparena_core::AnalyticsEvent>,
) {
	let (host, rx) = ChannelHost::new();
	(Arc::new(host), rx)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_manual_clock_advances() {
		let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
		let clock = ManualClock::new(start);
		clock.advance(Duration::from_millis(1_500));
		assert_eq!(clock.now(), start + chrono::Duration::milliseconds(1_500));
	}

	#[test]
	fn test_manual_clock_clones_share_time() {
		let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
		let clock = ManualClock::new(start);
		let other = clock.clone();
		other.advance(Duration::from_secs(60));
		assert_eq!(clock.now(), start + chrono::Duration::seconds(60));
	}
}
