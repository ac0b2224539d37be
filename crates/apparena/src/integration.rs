// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The AppArena destination as the host sees it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use apparena_core::{AnalyticsEvent, AppArenaConfig};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::cookies::CookieJar;
use crate::cross_domain::{CrossDomainResolver, Resolution};
use crate::env::Environment;
use crate::error::{AppArenaError, DeliveryError, ResolutionError, Result};
use crate::host::HostAnalytics;
use crate::normalize::Normalizer;
use crate::retry_queue::{QueueObserver, RetryQueue, TracingObserver};
use crate::sender::{DeliveryResponse, DeliverySender};
use crate::store::{ItemStore, MemoryItemStore};
use crate::transport::{Headers, HttpTransport, Transport};
use crate::write_key;

/// Integration name; also the retry queue name.
pub const NAME: &str = "AppArena";
/// Browser shim loaded at initialization.
pub const SHIM_SRC: &str = "//cdn-am.app-arena.com/client-sdk/1.0/shim.js";
/// Global entry point the shim defines.
pub const SHIM_GLOBAL: &str = "apparena";
pub const CONTENT_TYPE: &str = "text/plain";

fn delivery_headers() -> Headers {
	Headers::from([("Content-Type".to_string(), CONTENT_TYPE.to_string())])
}

/// How a dispatched event left the destination.
#[derive(Debug)]
pub enum Dispatched {
	/// Handed to the retry queue.
	Queued(Uuid),
	/// Sent once, in the background, with no retry.
	Sent(JoinHandle<std::result::Result<DeliveryResponse, DeliveryError>>),
}

/// Background tasks started by [`AppArena::initialize`].
#[derive(Debug, Default)]
pub struct InitHandles {
	pub queue: Option<JoinHandle<()>>,
	pub resolution: Option<JoinHandle<std::result::Result<Resolution, ResolutionError>>>,
}

/// Builder for [`AppArena`].
pub struct AppArenaBuilder {
	config: AppArenaConfig,
	env: Arc<dyn Environment>,
	host: Arc<dyn HostAnalytics>,
	transport: Option<Arc<dyn Transport>>,
	store: Option<Arc<dyn ItemStore>>,
	clock: Option<Arc<dyn Clock>>,
	observer: Option<Arc<dyn QueueObserver>>,
}

impl AppArenaBuilder {
	pub fn new(
		config: AppArenaConfig,
		env: Arc<dyn Environment>,
		host: Arc<dyn HostAnalytics>,
	) -> Self {
		Self {
			config,
			env,
			host,
			transport: None,
			store: None,
			clock: None,
			observer: None,
		}
	}

	/// Network stack to send through. Defaults to [`HttpTransport`].
	pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
		self.transport = Some(transport);
		self
	}

	/// Durable store for the retry queue. Defaults to in-memory.
	pub fn store(mut self, store: Arc<dyn ItemStore>) -> Self {
		self.store = Some(store);
		self
	}

	pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = Some(clock);
		self
	}

	pub fn observer(mut self, observer: Arc<dyn QueueObserver>) -> Self {
		self.observer = Some(observer);
		self
	}

	pub fn build(self) -> Result<AppArena> {
		let transport: Arc<dyn Transport> = match self.transport {
			Some(transport) => transport,
			None => Arc::new(HttpTransport::new()?),
		};
		let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
		let config = Arc::new(self.config);
		let cookies = CookieJar::new(self.env.clone());
		let sender = DeliverySender::new(transport.clone(), clock.clone());

		let queue = config.retry_queue().then(|| {
			let store = self
				.store
				.unwrap_or_else(|| Arc::new(MemoryItemStore::new()));
			let observer = self
				.observer
				.unwrap_or_else(|| Arc::new(TracingObserver));
			Arc::new(
				RetryQueue::new(
					NAME,
					config.queue().clone(),
					sender.clone(),
					store,
					clock.clone(),
				)
				.with_observer(observer),
			)
		});

		let normalizer = Normalizer::new(
			config.clone(),
			self.env.clone(),
			self.host.clone(),
			cookies.clone(),
			clock.clone(),
		);
		let resolver = Arc::new(CrossDomainResolver::new(
			config.clone(),
			transport,
			cookies,
			self.env.clone(),
			self.host,
			clock,
		));

		Ok(AppArena {
			config,
			env: self.env,
			sender,
			queue,
			normalizer,
			resolver,
			ready: AtomicBool::new(false),
			cancel: CancellationToken::new(),
		})
	}
}

/// Forwards host analytics calls to AppArena.
pub struct AppArena {
	config: Arc<AppArenaConfig>,
	env: Arc<dyn Environment>,
	sender: DeliverySender,
	queue: Option<Arc<RetryQueue>>,
	normalizer: Normalizer,
	resolver: Arc<CrossDomainResolver>,
	ready: AtomicBool,
	cancel: CancellationToken,
}

impl AppArena {
	pub fn builder(
		config: AppArenaConfig,
		env: Arc<dyn Environment>,
		host: Arc<dyn HostAnalytics>,
	) -> AppArenaBuilder {
		AppArenaBuilder::new(config, env, host)
	}

	pub fn name(&self) -> &'static str {
		NAME
	}

	pub fn config(&self) -> &AppArenaConfig {
		&self.config
	}

	/// The retry queue, when `retryQueue` is enabled.
	pub fn queue(&self) -> Option<&Arc<RetryQueue>> {
		self.queue.as_ref()
	}

	/// Starts the retry queue, loads the shim and kicks off cross-domain id
	/// resolution.
	///
	/// The destination is ready as soon as this returns. Resolution runs in
	/// the background and events dispatched meanwhile go out without a
	/// cross-domain id.
	pub fn initialize(&self) -> InitHandles {
		let mut handles = InitHandles {
			queue: self.queue.as_ref().and_then(RetryQueue::start),
			resolution: None,
		};

		self.env.load_script(SHIM_SRC);
		self.ready.store(true, Ordering::SeqCst);
		info!(
			api_host = %self.config.api_host(),
			retry_queue = self.config.retry_queue(),
			cross_domain_id = self.config.cross_domain_id(),
			"AppArena initialized"
		);

		if self.config.cross_domain_id() {
			let resolver = Arc::clone(&self.resolver);
			handles.resolution = Some(tokio::spawn(async move {
				let result = resolver.resolve().await;
				if let Err(e) = &result {
					debug!(error = %e, "cross-domain id not resolved");
				}
				result
			}));
		}
		handles
	}

	/// Whether the shim's global entry point is callable.
	pub fn loaded(&self) -> bool {
		self.env.is_global_callable(SHIM_GLOBAL)
	}

	pub fn is_ready(&self) -> bool {
		self.ready.load(Ordering::SeqCst)
	}

	/// Normalizes `event` and sends it, through the retry queue when enabled.
	#[instrument(skip(self, event), fields(kind = %event.kind()))]
	pub async fn dispatch(&self, event: &AnalyticsEvent) -> Result<Dispatched> {
		if self.cancel.is_cancelled() {
			return Err(AppArenaError::ClientShutdown);
		}

		let url = self.config.endpoint(event.kind().path());
		let headers = delivery_headers();
		let msg = Value::Object(self.normalizer.normalize(event)?);
		debug!(url = %url, "enqueueing");

		match &self.queue {
			Some(queue) => {
				let id = queue.enqueue(url, headers, msg).await?;
				Ok(Dispatched::Queued(id))
			}
			None => {
				let sender = self.sender.clone();
				let handle = tokio::spawn(async move {
					let mut msg = msg;
					sender.send(&url, &mut msg, &headers).await
				});
				Ok(Dispatched::Sent(handle))
			}
		}
	}

	/// Dispatches calls from the host's invoke stream until it closes or the
	/// destination shuts down.
	pub async fn run(&self, mut events: mpsc::UnboundedReceiver<AnalyticsEvent>) {
		loop {
			let event = tokio::select! {
				_ = self.cancel.cancelled() => break,
				event = events.recv() => event,
			};
			let Some(event) = event else {
				break;
			};
			if let Err(e) = self.dispatch(&event).await {
				warn!(kind = %event.kind(), error = %e, "failed to dispatch event");
			}
		}
		debug!("invoke stream finished");
	}

	/// Resolves the cross-domain id on demand.
	pub async fn resolve_cross_domain_id(&self) -> std::result::Result<Resolution, ResolutionError> {
		self.resolver.resolve().await
	}

	/// Reports a write key mismatch to AppArena. Returns true when the page
	/// requested a different key than `loaded_key`.
	pub fn check_write_key(&self, loaded_key: &str) -> bool {
		let sources = self.env.script_sources();
		let Some(requested) = write_key::requested_key_mismatch(&sources, loaded_key) else {
			return false;
		};

		warn!(loaded_key, requested_key = %requested, "loaded write key differs from requested");
		let mut msg = write_key::invalid_write_key_message(self.env.as_ref(), loaded_key, &requested);
		let sender = self.sender.clone();
		tokio::spawn(async move {
			let headers = delivery_headers();
			if let Err(e) = sender
				.send(write_key::INVALID_WRITE_KEY_URL, &mut msg, &headers)
				.await
			{
				debug!(error = %e, "failed to report write key mismatch");
			}
		});
		true
	}

	/// Stops the invoke loop and the retry queue. Queued items stay persisted.
	pub fn shutdown(&self) {
		self.cancel.cancel();
		if let Some(queue) = &self.queue {
			queue.shutdown();
		}
		info!("AppArena shut down");
	}

	pub fn is_shutdown(&self) -> bool {
		self.cancel.is_cancelled()
	}
}
