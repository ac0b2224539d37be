// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable retry queue with exponential-then-flat backoff.
//!
//! Items are attempted as soon as they are enqueued. A failed attempt is
//! rescheduled `min(max delay, min delay * factor^attempts)` after it ran, so
//! retries start fast and settle at the max delay. After the configured number
//! of attempts an item is dropped. The queue holds a bounded number of items
//! and evicts the oldest on overflow; it trades completeness for boundedness.
//!
//! Every mutation rewrites the whole item store, and a queue built on a
//! store that already holds items resumes them with their attempt counts.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use apparena_core::QueueConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{AppArenaError, DeliveryError, Result};
use crate::sender::DeliverySender;
use crate::store::ItemStore;
use crate::transport::Headers;

/// A payload waiting for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
	pub id: Uuid,
	/// Creation order; lower is older.
	pub seq: u64,
	pub url: String,
	pub headers: Headers,
	pub payload: Value,
	/// Attempts made so far.
	pub attempts: u32,
	pub created_at: DateTime<Utc>,
	#[serde(default)]
	pub last_attempt_at: Option<DateTime<Utc>>,
}

impl QueueItem {
	/// Earliest time the next attempt may run.
	pub fn next_attempt_at(&self, config: &QueueConfig) -> DateTime<Utc> {
		match self.last_attempt_at {
			None => self.created_at,
			Some(last) => {
				let delay = chrono::Duration::from_std(config.retry_delay(self.attempts))
					.unwrap_or_else(|_| chrono::Duration::milliseconds(i64::MAX / 1_000));
				last.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
			}
		}
	}
}

/// Diagnostic events emitted by the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
	Enqueued {
		id: Uuid,
		queue_len: usize,
	},
	/// The oldest item was dropped to make room.
	Evicted {
		id: Uuid,
		attempts: u32,
	},
	Resumed {
		count: usize,
	},
	Attempting {
		id: Uuid,
		attempt: u32,
	},
	Delivered {
		id: Uuid,
		attempts: u32,
	},
	Failed {
		id: Uuid,
		attempts: u32,
		next_attempt_at: DateTime<Utc>,
		error: String,
	},
	/// Attempts exhausted; the item is gone.
	Discarded {
		id: Uuid,
		attempts: u32,
		error: String,
	},
}

/// Receives [`QueueEvent`]s. Observers cannot influence the queue.
pub trait QueueObserver: Send + Sync {
	fn on_event(&self, event: &QueueEvent);
}

/// Default observer: structured `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl QueueObserver for TracingObserver {
	fn on_event(&self, event: &QueueEvent) {
		match event {
			QueueEvent::Enqueued { id, queue_len } => {
				debug!(item_id = %id, queue_len, "enqueued item");
			}
			QueueEvent::Evicted { id, attempts } => {
				warn!(item_id = %id, attempts, "evicted oldest item, queue at capacity");
			}
			QueueEvent::Resumed { count } => {
				info!(count, "resumed persisted items");
			}
			QueueEvent::Attempting { id, attempt } => {
				debug!(item_id = %id, attempt, "attempting delivery");
			}
			QueueEvent::Delivered { id, attempts } => {
				debug!(item_id = %id, attempts, "delivered item");
			}
			QueueEvent::Failed {
				id,
				attempts,
				next_attempt_at,
				error,
			} => {
				debug!(item_id = %id, attempts, %next_attempt_at, error = %error, "delivery failed, rescheduled");
			}
			QueueEvent::Discarded {
				id,
				attempts,
				error,
			} => {
				debug!(item_id = %id, attempts, error = %error, "delivery attempts exhausted, discarding");
			}
		}
	}
}

#[derive(Debug, Default)]
struct QueueState {
	/// Keyed by `seq`, so iteration is oldest first.
	items: BTreeMap<u64, QueueItem>,
	next_seq: u64,
	loaded: bool,
}

/// Bounded, persistent, backoff-scheduled delivery buffer.
pub struct RetryQueue {
	name: String,
	config: QueueConfig,
	sender: DeliverySender,
	store: Arc<dyn ItemStore>,
	clock: Arc<dyn Clock>,
	observer: Arc<dyn QueueObserver>,
	state: Mutex<QueueState>,
	wake: Notify,
	started: AtomicBool,
	cancel: CancellationToken,
}

impl RetryQueue {
	pub fn new(
		name: impl Into<String>,
		config: QueueConfig,
		sender: DeliverySender,
		store: Arc<dyn ItemStore>,
		clock: Arc<dyn Clock>,
	) -> Self {
		Self {
			name: name.into(),
			config,
			sender,
			store,
			clock,
			observer: Arc::new(TracingObserver),
			state: Mutex::new(QueueState::default()),
			wake: Notify::new(),
			started: AtomicBool::new(false),
			cancel: CancellationToken::new(),
		}
	}

	/// Replaces the diagnostic observer (builder pattern).
	pub fn with_observer(mut self, observer: Arc<dyn QueueObserver>) -> Self {
		self.observer = observer;
		self
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn config(&self) -> &QueueConfig {
		&self.config
	}

	/// Accepts a payload for eventual delivery and returns its id.
	///
	/// Returns once the item is persisted; delivery happens on the drain task.
	#[instrument(skip(self, headers, payload), fields(queue = %self.name))]
	pub async fn enqueue(&self, url: String, headers: Headers, payload: Value) -> Result<Uuid> {
		if self.cancel.is_cancelled() {
			return Err(AppArenaError::ClientShutdown);
		}

		let mut state = self.state.lock().await;
		self.load_if_needed(&mut state).await;

		while state.items.len() >= self.config.max_items {
			let Some((_, evicted)) = state.items.pop_first() else {
				break;
			};
			self.observer.on_event(&QueueEvent::Evicted {
				id: evicted.id,
				attempts: evicted.attempts,
			});
		}

		let seq = state.next_seq;
		state.next_seq += 1;
		let item = QueueItem {
			id: Uuid::new_v4(),
			seq,
			url,
			headers,
			payload,
			attempts: 0,
			created_at: self.clock.now(),
			last_attempt_at: None,
		};
		let id = item.id;
		state.items.insert(seq, item);

		self.persist(&state).await;
		self.observer.on_event(&QueueEvent::Enqueued {
			id,
			queue_len: state.items.len(),
		});
		drop(state);

		self.wake.notify_one();
		Ok(id)
	}

	/// Resumes persisted items and spawns the drain task.
	///
	/// Returns `None` if the queue was already started.
	pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
		if self.started.swap(true, Ordering::SeqCst) {
			return None;
		}
		let queue = Arc::clone(self);
		Some(tokio::spawn(async move { queue.run().await }))
	}

	/// Drains the queue until [`shutdown`](Self::shutdown).
	///
	/// The timer is re-armed after every pass for the earliest due item, so
	/// waits follow each item's backoff rather than a fixed interval.
	pub async fn run(&self) {
		{
			let mut state = self.state.lock().await;
			self.load_if_needed(&mut state).await;
		}
		info!(
			queue = %self.name,
			max_items = self.config.max_items,
			max_attempts = self.config.max_attempts,
			"Starting retry queue"
		);

		loop {
			if self.cancel.is_cancelled() {
				break;
			}
			self.process_due().await;

			let wait = self.time_until_next_due().await;
			tokio::select! {
				_ = self.cancel.cancelled() => break,
				_ = self.wake.notified() => {}
				_ = sleep_for(wait) => {}
			}
		}

		info!(queue = %self.name, "Retry queue stopped");
	}

	/// Attempts every item that is due now, oldest first. Returns the number of
	/// attempts made.
	pub async fn process_due(&self) -> usize {
		let due: Vec<QueueItem> = {
			let mut state = self.state.lock().await;
			self.load_if_needed(&mut state).await;
			let now = self.clock.now();
			state
				.items
				.values()
				.filter(|item| item.next_attempt_at(&self.config) <= now)
				.cloned()
				.collect()
		};

		let mut attempted = 0;
		for item in due {
			if self.cancel.is_cancelled() {
				break;
			}
			if self.attempt(item).await {
				attempted += 1;
			}
		}
		attempted
	}

	/// Runs one attempt. Returns false if the attempt was abandoned on shutdown.
	async fn attempt(&self, item: QueueItem) -> bool {
		self.observer.on_event(&QueueEvent::Attempting {
			id: item.id,
			attempt: item.attempts,
		});

		let mut payload = item.payload.clone();
		let result = tokio::select! {
			result = self.sender.send(&item.url, &mut payload, &item.headers) => result,
			_ = self.cancel.cancelled() => Err(DeliveryError::Cancelled),
		};
		if matches!(result, Err(DeliveryError::Cancelled)) {
			debug!(item_id = %item.id, "attempt abandoned on shutdown");
			return false;
		}

		let mut state = self.state.lock().await;
		let Some(current) = state.items.get_mut(&item.seq) else {
			// Evicted while the attempt was in flight.
			return true;
		};

		let event = match result {
			Ok(_) => {
				let attempts = current.attempts + 1;
				state.items.remove(&item.seq);
				QueueEvent::Delivered {
					id: item.id,
					attempts,
				}
			}
			Err(err) => {
				current.attempts += 1;
				current.last_attempt_at = Some(self.clock.now());
				let attempts = current.attempts;
				if attempts >= self.config.max_attempts {
					state.items.remove(&item.seq);
					QueueEvent::Discarded {
						id: item.id,
						attempts,
						error: err.to_string(),
					}
				} else {
					QueueEvent::Failed {
						id: item.id,
						attempts,
						next_attempt_at: current.next_attempt_at(&self.config),
						error: err.to_string(),
					}
				}
			}
		};

		self.persist(&state).await;
		drop(state);
		self.observer.on_event(&event);
		true
	}

	/// Time until the earliest item is due, or `None` when empty.
	pub async fn time_until_next_due(&self) -> Option<Duration> {
		let next = self.next_due().await?;
		let now = self.clock.now();
		Some((next - now).to_std().unwrap_or(Duration::ZERO))
	}

	/// Earliest due time across all items.
	pub async fn next_due(&self) -> Option<DateTime<Utc>> {
		let state = self.loaded_state().await;
		state
			.items
			.values()
			.map(|item| item.next_attempt_at(&self.config))
			.min()
	}

	pub async fn len(&self) -> usize {
		self.loaded_state().await.items.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.loaded_state().await.items.is_empty()
	}

	/// Snapshot of the queued items, oldest first.
	pub async fn items(&self) -> Vec<QueueItem> {
		self.loaded_state().await.items.values().cloned().collect()
	}

	/// Stops the drain task. Queued items stay persisted.
	pub fn shutdown(&self) {
		self.cancel.cancel();
		self.wake.notify_one();
	}

	pub fn is_shutdown(&self) -> bool {
		self.cancel.is_cancelled()
	}

	async fn loaded_state(&self) -> MutexGuard<'_, QueueState> {
		let mut state = self.state.lock().await;
		self.load_if_needed(&mut state).await;
		state
	}

	async fn load_if_needed(&self, state: &mut QueueState) {
		if state.loaded {
			return;
		}
		state.loaded = true;

		let persisted = match self.store.load().await {
			Ok(items) => items,
			Err(e) => {
				warn!(queue = %self.name, error = %e, "Failed to load persisted items, starting empty");
				return;
			}
		};
		if persisted.is_empty() {
			return;
		}

		let count = persisted.len();
		for item in persisted {
			state.next_seq = state.next_seq.max(item.seq + 1);
			state.items.insert(item.seq, item);
		}
		while state.items.len() > self.config.max_items {
			let Some((_, evicted)) = state.items.pop_first() else {
				break;
			};
			self.observer.on_event(&QueueEvent::Evicted {
				id: evicted.id,
				attempts: evicted.attempts,
			});
		}
		self.observer.on_event(&QueueEvent::Resumed {
			count: state.items.len().min(count),
		});
	}

	async fn persist(&self, state: &QueueState) {
		let items: Vec<QueueItem> = state.items.values().cloned().collect();
		if let Err(e) = self.store.save(&items).await {
			warn!(queue = %self.name, error = %e, "Failed to persist retry queue");
		}
	}
}

async fn sleep_for(wait: Option<Duration>) {
	match wait {
		Some(duration) => tokio::time::sleep(duration).await,
		None => std::future::pending().await,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sender::SENT_AT_FIELD;
	use crate::store::MemoryItemStore;
	use crate::testing::{ManualClock, MockTransport, RecordingObserver};
	use chrono::TimeZone;
	use proptest::prelude::*;
	use serde_json::json;

	struct Harness {
		queue: Arc<RetryQueue>,
		transport: Arc<MockTransport>,
		clock: ManualClock,
		store: Arc<MemoryItemStore>,
		observer: Arc<RecordingObserver>,
	}

	fn start_time() -> DateTime<Utc> {
		Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
	}

	fn harness_with(config: QueueConfig, store: Arc<MemoryItemStore>, clock: ManualClock) -> Harness {
		let transport = Arc::new(MockTransport::new());
		let sender = DeliverySender::new(transport.clone(), Arc::new(clock.clone()));
		let observer = Arc::new(RecordingObserver::default());
		let queue = RetryQueue::new(
			"AppArena",
			config,
			sender,
			store.clone(),
			Arc::new(clock.clone()),
		)
		.with_observer(observer.clone());
		Harness {
			queue: Arc::new(queue),
			transport,
			clock,
			store,
			observer,
		}
	}

	fn harness() -> Harness {
		harness_with(
			QueueConfig::default(),
			Arc::new(MemoryItemStore::new()),
			ManualClock::new(start_time()),
		)
	}

	async fn enqueue_n(queue: &RetryQueue, n: usize) -> Vec<Uuid> {
		let mut ids = Vec::new();
		for i in 0..n {
			ids.push(
				queue
					.enqueue(
						"https://api.example.com/event/t".to_string(),
						Headers::new(),
						json!({ "event": format!("event{i}") }),
					)
					.await
					.unwrap(),
			);
		}
		ids
	}

	#[tokio::test]
	async fn test_enqueue_persists_item() {
		let h = harness();
		let ids = enqueue_n(&h.queue, 1).await;

		assert_eq!(h.queue.len().await, 1);
		let stored = h.store.snapshot();
		assert_eq!(stored.len(), 1);
		assert_eq!(stored[0].id, ids[0]);
		assert_eq!(stored[0].attempts, 0);
	}

	#[tokio::test]
	async fn test_new_item_is_due_immediately() {
		let h = harness();
		enqueue_n(&h.queue, 1).await;

		assert_eq!(h.queue.time_until_next_due().await, Some(Duration::ZERO));
		assert_eq!(h.queue.process_due().await, 1);
		assert!(h.queue.is_empty().await);
		assert!(h.store.snapshot().is_empty());
		assert_eq!(h.transport.posts().len(), 1);
	}

	#[tokio::test]
	async fn test_overflow_evicts_oldest() {
		let h = harness();
		let ids = enqueue_n(&h.queue, 105).await;

		let items = h.queue.items().await;
		assert_eq!(items.len(), 100);
		assert_eq!(items[0].id, ids[5]);
		assert_eq!(items[99].id, ids[104]);

		let evicted: Vec<Uuid> = h
			.observer
			.events()
			.into_iter()
			.filter_map(|event| match event {
				QueueEvent::Evicted { id, .. } => Some(id),
				_ => None,
			})
			.collect();
		assert_eq!(evicted, ids[..5].to_vec());
	}

	#[tokio::test]
	async fn test_failure_reschedules_with_backoff() {
		let h = harness();
		h.transport.fail_all_posts();
		enqueue_n(&h.queue, 1).await;

		assert_eq!(h.queue.process_due().await, 1);
		let item = &h.queue.items().await[0];
		assert_eq!(item.attempts, 1);
		assert_eq!(item.last_attempt_at, Some(start_time()));
		assert_eq!(
			h.queue.time_until_next_due().await,
			Some(Duration::from_millis(2_000))
		);

		// Not due yet.
		h.clock.advance(Duration::from_millis(1_999));
		assert_eq!(h.queue.process_due().await, 0);

		h.clock.advance(Duration::from_millis(1));
		assert_eq!(h.queue.process_due().await, 1);
		assert_eq!(h.queue.items().await[0].attempts, 2);
	}

	#[tokio::test]
	async fn test_item_dropped_after_max_attempts_with_expected_delays() {
		let h = harness();
		h.transport.fail_all_posts();
		enqueue_n(&h.queue, 1).await;

		let mut rounds = 0;
		while !h.queue.is_empty().await {
			if let Some(wait) = h.queue.time_until_next_due().await {
				h.clock.advance(wait);
			}
			h.queue.process_due().await;
			rounds += 1;
			assert!(rounds <= 100, "queue never drained");
		}

		let posts = h.transport.posts();
		assert_eq!(posts.len(), 45);

		let sent: Vec<DateTime<Utc>> = posts
			.iter()
			.map(|post| {
				DateTime::parse_from_rfc3339(post.body[SENT_AT_FIELD].as_str().unwrap())
					.unwrap()
					.with_timezone(&Utc)
			})
			.collect();
		assert_eq!(sent[0], start_time());
		for k in 1..sent.len() {
			let expected = 360_000i64.min(1_000 * 2i64.pow(k as u32));
			assert_eq!(
				(sent[k] - sent[k - 1]).num_milliseconds(),
				expected,
				"delay before attempt {k}"
			);
		}

		assert!(h
			.observer
			.events()
			.iter()
			.any(|event| matches!(event, QueueEvent::Discarded { attempts: 45, .. })));
		assert!(h.store.snapshot().is_empty());
	}

	#[tokio::test]
	async fn test_retry_restamps_sent_at() {
		let h = harness();
		h.transport.fail_posts(1);
		enqueue_n(&h.queue, 1).await;

		h.queue.process_due().await;
		h.clock.advance(Duration::from_secs(2));
		h.queue.process_due().await;

		let posts = h.transport.posts();
		assert_eq!(posts.len(), 2);
		assert_ne!(posts[0].body[SENT_AT_FIELD], posts[1].body[SENT_AT_FIELD]);
		assert!(h.queue.is_empty().await);
	}

	#[tokio::test]
	async fn test_restart_resumes_attempt_count() {
		let store = Arc::new(MemoryItemStore::new());
		let clock = ManualClock::new(start_time());

		let first = harness_with(QueueConfig::default(), store.clone(), clock.clone());
		first.transport.fail_all_posts();
		enqueue_n(&first.queue, 1).await;
		first.queue.process_due().await;
		first.clock.advance(Duration::from_secs(2));
		first.queue.process_due().await;
		assert_eq!(store.snapshot()[0].attempts, 2);

		let second = harness_with(QueueConfig::default(), store.clone(), clock.clone());
		assert_eq!(second.queue.len().await, 1);
		let item = &second.queue.items().await[0];
		assert_eq!(item.attempts, 2);
		assert_eq!(
			second.queue.time_until_next_due().await,
			Some(Duration::from_millis(4_000))
		);
		assert!(second
			.observer
			.events()
			.contains(&QueueEvent::Resumed { count: 1 }));

		// New items continue the creation order.
		enqueue_n(&second.queue, 1).await;
		let items = second.queue.items().await;
		assert!(items[1].seq > items[0].seq);
	}

	#[tokio::test]
	async fn test_enqueue_after_shutdown_is_rejected() {
		let h = harness();
		h.queue.shutdown();
		let result = h
			.queue
			.enqueue("https://x".to_string(), Headers::new(), json!({}))
			.await;
		assert!(matches!(result, Err(AppArenaError::ClientShutdown)));
	}

	#[tokio::test]
	async fn test_drain_task_delivers_and_stops() {
		let h = harness();
		let handle = h.queue.start().unwrap();
		assert!(h.queue.start().is_none());

		enqueue_n(&h.queue, 3).await;
		tokio::time::timeout(Duration::from_secs(5), async {
			while h.transport.posts().len() < 3 {
				tokio::task::yield_now().await;
			}
		})
		.await
		.unwrap();

		h.queue.shutdown();
		tokio::time::timeout(Duration::from_secs(5), handle)
			.await
			.unwrap()
			.unwrap();
		assert!(h.queue.is_empty().await);
	}

	proptest! {
		#[test]
		fn queue_never_exceeds_capacity(count in 0usize..60, capacity in 1usize..20) {
			let config = QueueConfig {
				max_items: capacity,
				..QueueConfig::default()
			};
			let h = harness_with(
				config,
				Arc::new(MemoryItemStore::new()),
				ManualClock::new(start_time()),
			);
			let (ids, items) = tokio_test::block_on(async {
				let ids = enqueue_n(&h.queue, count).await;
				(ids, h.queue.items().await)
			});

			prop_assert_eq!(items.len(), count.min(capacity));
			let kept: Vec<Uuid> = items.iter().map(|item| item.id).collect();
			prop_assert_eq!(kept, ids[count.saturating_sub(capacity)..].to_vec());
		}
	}
}
