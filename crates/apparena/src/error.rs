// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the AppArena destination.
//!
//! Nothing here reaches the end user. Delivery failures are retried or
//! dropped, resolution failures leave events unannotated.

use apparena_core::ConfigError;
use thiserror::Error;

/// A single delivery attempt failed.
///
/// Callers treat every variant the same way; the split only exists for logs.
#[derive(Debug, Error)]
pub enum DeliveryError {
	/// HTTP request failed.
	#[error("HTTP request failed: {0}")]
	RequestFailed(#[from] reqwest::Error),

	/// Server answered with a non-2xx status.
	#[error("server error ({status}): {message}")]
	ServerError { status: u16, message: String },

	/// Failure reported by a non-HTTP transport.
	#[error("transport error: {0}")]
	Transport(String),

	/// Payload could not be serialized or the response could not be parsed.
	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	/// Attempt abandoned because the client is shutting down.
	#[error("delivery cancelled")]
	Cancelled,
}

/// Cross-domain id resolution failed. Terminal for the session.
#[derive(Debug, Error)]
pub enum ResolutionError {
	/// Resolution is switched off in the options.
	#[error("crossDomainId not enabled")]
	Disabled,

	/// The ping request failed.
	#[error("cross-domain id ping failed: {0}")]
	Ping(#[from] DeliveryError),

	/// A previous attempt in this session already failed.
	#[error("cross-domain id resolution already failed this session")]
	AlreadyFailed,

	/// Another resolution is in flight.
	#[error("cross-domain id resolution already in progress")]
	InProgress,
}

/// Durable item store failure.
#[derive(Debug, Error)]
pub enum StoreError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

/// Top-level destination errors.
#[derive(Debug, Error)]
pub enum AppArenaError {
	#[error("invalid configuration: {0}")]
	Config(#[from] ConfigError),

	#[error(transparent)]
	Delivery(#[from] DeliveryError),

	#[error(transparent)]
	Resolution(#[from] ResolutionError),

	#[error("item store error: {0}")]
	Store(#[from] StoreError),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	/// The destination has been shut down.
	#[error("destination has been shut down")]
	ClientShutdown,
}

/// Result type alias for destination operations.
pub type Result<T> = std::result::Result<T, AppArenaError>;
