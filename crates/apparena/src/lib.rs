// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! AppArena analytics destination.
//!
//! Receives analytics calls from a host router, normalizes them and delivers
//! them to the AppArena collection API, either directly or through a durable
//! retry queue. On startup it also resolves a cross-domain visitor id.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use apparena::{AnalyticsEvent, AppArena, AppArenaConfig, ChannelHost, StaticEnvironment};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppArenaConfig::builder()
//!     .api_key("1-11169")
//!     .retry_queue(true)
//!     .build()?;
//! let env = Arc::new(StaticEnvironment::new("https://shop.example.com/", "my-agent/1.0")?);
//! let (host, events) = ChannelHost::new();
//! let host = Arc::new(host);
//!
//! let destination = Arc::new(AppArena::builder(config, env, host.clone()).build()?);
//! destination.initialize();
//!
//! host.invoke(AnalyticsEvent::track("Signed Up"));
//! destination.run(events).await;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod cookies;
pub mod cross_domain;
pub mod env;
pub mod error;
pub mod host;
pub mod http;
pub mod integration;
pub mod normalize;
pub mod retry_queue;
pub mod sender;
pub mod store;
pub mod transport;
pub mod write_key;

#[cfg(test)]
mod testing;

pub use apparena_core::{
	AnalyticsEvent, AppArenaConfig, AppArenaConfigBuilder, AppArenaOptions, ConfigError,
	CrossDomainIdentity, EventKind, QueueConfig,
};
pub use clock::{Clock, SystemClock};
pub use cookies::CookieJar;
pub use cross_domain::{CrossDomainResolver, Resolution, ResolutionState};
pub use env::{CookieOptions, Environment, KeyValueStore, MemoryKeyValueStore, StaticEnvironment};
pub use error::{AppArenaError, DeliveryError, ResolutionError, Result, StoreError};
pub use host::{ChannelHost, HostAnalytics, LibraryInfo};
pub use integration::{AppArena, AppArenaBuilder, Dispatched, InitHandles};
pub use normalize::{message_id, Normalizer};
pub use retry_queue::{QueueEvent, QueueItem, QueueObserver, RetryQueue, TracingObserver};
pub use sender::{DeliveryResponse, DeliverySender};
pub use store::{FileItemStore, ItemStore, MemoryItemStore};
pub use transport::{Headers, HttpTransport, Transport, TransportResponse};
