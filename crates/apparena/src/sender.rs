// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! One delivery attempt for one payload.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use tracing::debug;

use crate::clock::Clock;
use crate::error::DeliveryError;
use crate::transport::{Headers, Transport};

/// Payload key stamped with the transmission time.
pub const SENT_AT_FIELD: &str = "sentAt";

/// Formats a timestamp the way payloads carry it: RFC 3339, UTC, milliseconds.
pub fn format_timestamp(time: DateTime<Utc>) -> String {
	time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResponse {
	pub status: u16,
	pub body: String,
	pub sent_at: DateTime<Utc>,
}

/// Sends payloads through a [`Transport`], stamping `sentAt` on every attempt.
///
/// There is no retry here; the retry queue owns that.
#[derive(Clone)]
pub struct DeliverySender {
	transport: Arc<dyn Transport>,
	clock: Arc<dyn Clock>,
}

impl DeliverySender {
	pub fn new(transport: Arc<dyn Transport>, clock: Arc<dyn Clock>) -> Self {
		Self { transport, clock }
	}

	/// Makes a single attempt. `payload` is stamped in place, so callers see
	/// the `sentAt` that went over the wire.
	pub async fn send(
		&self,
		url: &str,
		payload: &mut Value,
		headers: &Headers,
	) -> Result<DeliveryResponse, DeliveryError> {
		let sent_at = self.clock.now();
		if let Value::Object(map) = payload {
			map.insert(
				SENT_AT_FIELD.to_string(),
				Value::String(format_timestamp(sent_at)),
			);
		}

		let result = self.transport.post(url, payload, headers).await;
		debug!(url, ?result, "sent payload, received response");

		let response = result?.error_for_status()?;
		Ok(DeliveryResponse {
			status: response.status,
			body: response.body,
			sent_at,
		})
	}
}
