// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the AppArena analytics destination.
//!
//! This crate holds the pieces with no I/O: validated options, the typed
//! inbound calls, cross-domain identity records and query-string parsing. The
//! `apparena` crate builds the delivery pipeline on top of them.

pub mod campaign;
pub mod config;
pub mod error;
pub mod event;
pub mod identity;

pub use campaign::{ad_params, utm, AdParams};
pub use config::{
	AppArenaConfig, AppArenaConfigBuilder, AppArenaOptions, QueueConfig, DEFAULT_API_HOST,
};
pub use error::ConfigError;
pub use event::{
	Alias, AnalyticsEvent, EventKind, Group, Identify, MessageFields, Page, Track,
};
pub use identity::{
	CrossDomainIdentity, PingResponse, AMP_ID_COOKIE, CROSS_DOMAIN_ID_COOKIE,
	CROSS_DOMAIN_ORIGIN_COOKIE, CROSS_DOMAIN_TIMESTAMP_COOKIE, REFERRER_COOKIE,
};
