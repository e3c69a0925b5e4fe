use crate::cache::types::CacheError;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Quota-bounded key/value storage
#[async_trait]
pub trait CacheRepository: Send + Sync {
	async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
	/// Store `value` under `key`. Fails with `QuotaExceeded` when the write would not fit.
	async fn put(&self, key: &str, value: &str) -> Result<(), CacheError>;
	async fn remove(&self, key: &str) -> Result<(), CacheError>;
	async fn keys(&self) -> Result<Vec<String>, CacheError>;
	/// Bytes currently used.
	async fn usage(&self) -> Result<usize, CacheError>;
	/// Total bytes available.
	fn quota(&self) -> usize;
}

fn check_quota(
	usage: usize,
	replaced: usize,
	incoming: usize,
	quota: usize,
) -> Result<(), CacheError> {
	let available = quota.saturating_sub(usage.saturating_sub(replaced));
	if incoming > available {
		return Err(CacheError::QuotaExceeded {
			needed: incoming,
			available,
		});
	}
	Ok(())
}

/// File-based implementation of CacheRepository
///
/// One JSON document per key, named after the hex encoded key.
pub struct FileCacheRepository {
	data_dir: PathBuf,
	quota: usize,
}

impl FileCacheRepository {
	pub fn new(data_dir: PathBuf, quota: usize) -> Self {
		Self { data_dir, quota }
	}

	fn get_filename(&self, key: &str) -> PathBuf {
		self.data_dir.join(format!("{}.json", hex::encode(key)))
	}

	fn key_from_filename(filename: &str) -> Option<String> {
		let encoded = filename.strip_suffix(".json")?;
		let bytes = hex::decode(encoded).ok()?;
		String::from_utf8(bytes).ok()
	}

	async fn file_len(&self, key: &str) -> usize {
		tokio::fs::metadata(self.get_filename(key))
			.await
			.map(|m| m.len() as usize)
			.unwrap_or(0)
	}
}

#[async_trait]
impl CacheRepository for FileCacheRepository {
	async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
		let filename = self.get_filename(key);
		match tokio::fs::read_to_string(&filename).await {
			Ok(content) => Ok(Some(content)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	async fn put(&self, key: &str, value: &str) -> Result<(), CacheError> {
		let usage = self.usage().await?;
		let replaced = self.file_len(key).await;
		check_quota(usage, replaced, value.len(), self.quota)?;

		tokio::fs::create_dir_all(&self.data_dir).await?;
		let filename = self.get_filename(key);
		tokio::fs::write(&filename, value).await?;
		debug!("Wrote {} bytes for {} to {:?}", value.len(), key, filename);
		Ok(())
	}

	async fn remove(&self, key: &str) -> Result<(), CacheError> {
		match tokio::fs::remove_file(self.get_filename(key)).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}

	async fn keys(&self) -> Result<Vec<String>, CacheError> {
		let mut entries = match tokio::fs::read_dir(&self.data_dir).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(e.into()),
		};

		let mut keys = Vec::new();
		while let Some(entry) = entries.next_entry().await? {
			let path = entry.path();
			if let Some(filename) = path.file_name().and_then(|f| f.to_str()) {
				match Self::key_from_filename(filename) {
					Some(key) => keys.push(key),
					None => warn!("Ignoring unexpected file in cache directory: {:?}", path),
				}
			}
		}
		keys.sort();
		Ok(keys)
	}

	async fn usage(&self) -> Result<usize, CacheError> {
		let mut total = 0;
		for key in self.keys().await? {
			total += self.file_len(&key).await;
		}
		Ok(total)
	}

	fn quota(&self) -> usize {
		self.quota
	}
}

/// In-memory implementation of CacheRepository with the same quota rules
pub struct MemoryCacheRepository {
	entries: Mutex<BTreeMap<String, String>>,
	quota: usize,
}

impl MemoryCacheRepository {
	pub fn new(quota: usize) -> Self {
		Self {
			entries: Mutex::new(BTreeMap::new()),
			quota,
		}
	}

	fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
		self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}
}

#[async_trait]
impl CacheRepository for MemoryCacheRepository {
	async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
		Ok(self.entries().get(key).cloned())
	}

	async fn put(&self, key: &str, value: &str) -> Result<(), CacheError> {
		let mut entries = self.entries();
		let usage: usize = entries.values().map(String::len).sum();
		let replaced = entries.get(key).map(String::len).unwrap_or(0);
		check_quota(usage, replaced, value.len(), self.quota)?;
		entries.insert(key.to_string(), value.to_string());
		Ok(())
	}

	async fn remove(&self, key: &str) -> Result<(), CacheError> {
		self.entries().remove(key);
		Ok(())
	}

	async fn keys(&self) -> Result<Vec<String>, CacheError> {
		Ok(self.entries().keys().cloned().collect())
	}

	async fn usage(&self) -> Result<usize, CacheError> {
		Ok(self.entries().values().map(String::len).sum())
	}

	fn quota(&self) -> usize {
		self.quota
	}
}
