// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The network capability the destination sends through.
//!
//! [`Transport`] is the only place bytes leave the process. The queue, sender
//! and resolver are written against the trait so hosts can plug in their own
//! stack and tests can run without a network.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::error::DeliveryError;
use crate::http;

/// Header map sent with a delivery.
pub type Headers = BTreeMap<String, String>;

/// Status and body of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
	pub status: u16,
	pub body: String,
}

impl TransportResponse {
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Turns a non-2xx response into [`DeliveryError::ServerError`].
	pub fn error_for_status(self) -> Result<Self, DeliveryError> {
		if self.is_success() {
			Ok(self)
		} else {
			Err(DeliveryError::ServerError {
				status: self.status,
				message: self.body,
			})
		}
	}
}

#[async_trait]
pub trait Transport: Send + Sync {
	/// Sends `body` serialized as JSON text with the given headers.
	async fn post(
		&self,
		url: &str,
		body: &Value,
		headers: &Headers,
	) -> Result<TransportResponse, DeliveryError>;

	/// Issues a GET that carries the caller's credentials (cookies).
	async fn get_with_credentials(&self, url: &str) -> Result<TransportResponse, DeliveryError>;
}

/// Default request timeout for [`HttpTransport`].
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// [`Transport`] over reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
	client: Client,
}

impl HttpTransport {
	/// Creates a transport with the default timeout.
	pub fn new() -> Result<Self, DeliveryError> {
		Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
	}

	pub fn with_timeout(timeout: Duration) -> Result<Self, DeliveryError> {
		let client = http::new_client_with_timeout(timeout)?;
		Ok(Self { client })
	}

	/// Wraps an existing client. The caller is responsible for enabling its
	/// cookie store if credentialed pings should carry cookies.
	pub fn from_client(client: Client) -> Self {
		Self { client }
	}
}

#[async_trait]
impl Transport for HttpTransport {
	async fn post(
		&self,
		url: &str,
		body: &Value,
		headers: &Headers,
	) -> Result<TransportResponse, DeliveryError> {
		let mut request = self.client.post(url).body(serde_json::to_string(body)?);
		for (name, value) in headers {
			request = request.header(name.as_str(), value.as_str());
		}

		let response = request.send().await?;
		let status = response.status().as_u16();
		let body = response.text().await?;
		debug!(url, status, "POST completed");

		Ok(TransportResponse { status, body })
	}

	async fn get_with_credentials(&self, url: &str) -> Result<TransportResponse, DeliveryError> {
		let response = self.client.get(url).send().await?;
		let status = response.status().as_u16();
		let body = response.text().await?;
		debug!(url, status, "GET completed");

		Ok(TransportResponse { status, body })
	}
}
