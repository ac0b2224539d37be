// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable storage for retry queue items.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;
use crate::retry_queue::QueueItem;

/// Where the retry queue keeps its items between sessions.
///
/// `save` always receives the full item list; implementations replace
/// whatever they held.
#[async_trait]
pub trait ItemStore: Send + Sync {
	async fn load(&self) -> Result<Vec<QueueItem>, StoreError>;
	async fn save(&self, items: &[QueueItem]) -> Result<(), StoreError>;
}

/// In-memory store. Clones share contents, so a second queue built on a clone
/// sees what the first persisted.
#[derive(Debug, Clone, Default)]
pub struct MemoryItemStore {
	items: Arc<Mutex<Vec<QueueItem>>>,
}

impl MemoryItemStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Current contents.
	pub fn snapshot(&self) -> Vec<QueueItem> {
		self.items.lock().unwrap_or_else(|e| e.into_inner()).clone()
	}
}

#[async_trait]
impl ItemStore for MemoryItemStore {
	async fn load(&self) -> Result<Vec<QueueItem>, StoreError> {
		Ok(self.snapshot())
	}

	async fn save(&self, items: &[QueueItem]) -> Result<(), StoreError> {
		*self.items.lock().unwrap_or_else(|e| e.into_inner()) = items.to_vec();
		Ok(())
	}
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueFile {
	#[serde(default)]
	items: Vec<QueueItem>,
}

/// JSON file store. Writes go to a sibling `.tmp` file and are renamed into
/// place, so a crash mid-write leaves the previous contents intact.
#[derive(Debug, Clone)]
pub struct FileItemStore {
	path: PathBuf,
}

impl FileItemStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn path(&self) -> &PathBuf {
		&self.path
	}

	fn tmp_path(&self) -> PathBuf {
		let mut name = self.path.as_os_str().to_owned();
		name.push(".tmp");
		PathBuf::from(name)
	}
}

#[async_trait]
impl ItemStore for FileItemStore {
	async fn load(&self) -> Result<Vec<QueueItem>, StoreError> {
		let content = match tokio::fs::read_to_string(&self.path).await {
			Ok(content) => content,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(e.into()),
		};
		let file: QueueFile = serde_json::from_str(&content)?;
		debug!(path = %self.path.display(), count = file.items.len(), "loaded queue items");
		Ok(file.items)
	}

	async fn save(&self, items: &[QueueItem]) -> Result<(), StoreError> {
		if let Some(parent) = self.path.parent() {
			if !parent.as_os_str().is_empty() {
				tokio::fs::create_dir_all(parent).await?;
			}
		}

		let json = serde_json::to_string_pretty(&QueueFile {
			items: items.to_vec(),
		})?;
		let tmp_path = self.tmp_path();
		tokio::fs::write(&tmp_path, &json).await?;
		tokio::fs::rename(&tmp_path, &self.path).await?;

		debug!(path = %self.path.display(), count = items.len(), "saved queue items");
		Ok(())
	}
}
