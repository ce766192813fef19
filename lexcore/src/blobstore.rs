//! Versioned Blob Store (C7): content-addressed storage with version
//! chains, supersession, and a retention policy.

use crate::cache::{make_key, Cache, Namespace};
use crate::error::{CoreError, CoreResult};
use redb::{ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;

pub const DEFAULT_INLINE_THRESHOLD_BYTES: usize = 1024;

/// `(resource_id, resource_type)` bundled together since every operation
/// takes both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub resource_id: String,
    pub resource_type: String,
}

impl ResourceKey {
    pub fn new(resource_id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        ResourceKey {
            resource_id: resource_id.into(),
            resource_type: resource_type.into(),
        }
    }

    fn encode(&self) -> String {
        format!("{}\0{}", self.resource_id, self.resource_type)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blob {
    pub id: u64,
    pub resource_id: String,
    pub resource_type: String,
    pub version: u64,
    pub data_hash: String,
    pub created_at: u64,
    pub content: ContentRef,
    pub supersedes: Option<u64>,
    pub superseded_by: Option<u64>,
    pub is_latest: bool,
    pub tags: std::collections::BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ContentRef {
    Inline(Vec<u8>),
    External { cache_key: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct LatestIndex {
    id: Option<u64>,
}

const METADATA_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("blob_metadata");
const LATEST_INDEX: TableDefinition<&str, &[u8]> = TableDefinition::new("blob_latest_index");
const HASH_INDEX: TableDefinition<&str, u64> = TableDefinition::new("blob_hash_refcount");

/// Upper bound on compare-and-swap retries for a single `save` once it
/// holds its resource's write stripe. A losing race at that point means
/// another resource hashed into the same stripe committed in between.
const MAX_SAVE_RETRIES: u32 = 3;

const SAVE_STRIPE_COUNT: usize = 32;

fn save_stripe_for(key: &ResourceKey) -> usize {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % SAVE_STRIPE_COUNT
}

/// `redb`-backed metadata store fronted by the two-tier cache for external
/// (over-threshold) content.
pub struct BlobStore {
    db: Arc<redb::Database>,
    cache: Arc<Cache>,
    inline_threshold_bytes: usize,
    next_id: std::sync::atomic::AtomicU64,
    /// Per-resource write serialization, striped the same way the cache
    /// serializes its L2 writes: two saves racing for the same
    /// `(resource_id, resource_type)` line up here instead of contending
    /// on the `redb` compare-and-swap below.
    write_locks: Vec<tokio::sync::Mutex<()>>,
}

impl BlobStore {
    pub fn open<P: AsRef<Path>>(
        path: P,
        cache: Arc<Cache>,
        inline_threshold_bytes: usize,
    ) -> CoreResult<Self> {
        if let Some(dir) = path.as_ref().parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        let db = redb::Database::create(path.as_ref())
            .map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
        {
            let w = db.begin_write().map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
            {
                let _ = w.open_table(METADATA_TABLE).map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
                let _ = w.open_table(LATEST_INDEX).map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
                let _ = w.open_table(HASH_INDEX).map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
            }
            w.commit().map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
        }

        let max_id = {
            let r = db.begin_read().map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
            let table = r.open_table(METADATA_TABLE).map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
            let mut max = 0u64;
            for item in table.iter().map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))? {
                let (k, _) = item.map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
                max = max.max(k.value());
            }
            max
        };

        let mut write_locks = Vec::with_capacity(SAVE_STRIPE_COUNT);
        for _ in 0..SAVE_STRIPE_COUNT {
            write_locks.push(tokio::sync::Mutex::new(()));
        }

        Ok(BlobStore {
            db: Arc::new(db),
            cache,
            inline_threshold_bytes,
            next_id: std::sync::atomic::AtomicU64::new(max_id + 1),
            write_locks,
        })
    }

    fn hash_content(content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content);
        hex_encode(&hasher.finalize())
    }

    fn read_latest_raw(&self, key: &ResourceKey) -> CoreResult<Option<Blob>> {
        let r = self.db.begin_read().map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
        let idx_table = match r.open_table(LATEST_INDEX) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(CoreError::Storage(anyhow::anyhow!(e))),
        };
        let Some(raw) = idx_table
            .get(key.encode().as_str())
            .map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?
        else {
            return Ok(None);
        };
        let latest: LatestIndex = bincode::deserialize(raw.value())
            .map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
        let Some(id) = latest.id else { return Ok(None) };
        drop(idx_table);

        let meta_table = r.open_table(METADATA_TABLE).map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
        let Some(raw) = meta_table.get(id).map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))? else {
            return Ok(None);
        };
        let blob: Blob = bincode::deserialize(raw.value()).map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
        Ok(Some(blob))
    }

    pub async fn get_latest(&self, key: &ResourceKey) -> CoreResult<Option<Blob>> {
        self.read_latest_raw(key)
    }

    pub async fn get_version(&self, id: u64) -> CoreResult<Option<Blob>> {
        let r = self.db.begin_read().map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
        let table = match r.open_table(METADATA_TABLE) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(CoreError::Storage(anyhow::anyhow!(e))),
        };
        match table.get(id).map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))? {
            Some(v) => Ok(Some(
                bincode::deserialize(v.value()).map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?,
            )),
            None => Ok(None),
        }
    }

    pub async fn list_versions(&self, key: &ResourceKey) -> CoreResult<Vec<Blob>> {
        let r = self.db.begin_read().map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
        let table = match r.open_table(METADATA_TABLE) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(CoreError::Storage(anyhow::anyhow!(e))),
        };
        let mut out = Vec::new();
        for item in table.iter().map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))? {
            let (_, v) = item.map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
            let blob: Blob = bincode::deserialize(v.value()).map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
            if blob.resource_id == key.resource_id && blob.resource_type == key.resource_type {
                out.push(blob);
            }
        }
        out.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(out)
    }

    /// Content-addressed save with supersession. Deduplicates against the
    /// current latest version by `data_hash`; otherwise opens a
    /// transaction that flips the old latest's flags and inserts the new
    /// version, so a reader never observes two latest blobs for the same
    /// resource. `created_at` is supplied by the caller (this store does
    /// not read the system clock) so saves stay reproducible in tests.
    pub async fn save(
        &self,
        key: &ResourceKey,
        content: Vec<u8>,
        tags: std::collections::BTreeSet<String>,
        created_at: u64,
    ) -> CoreResult<Blob> {
        let data_hash = Self::hash_content(&content);

        if let Some(latest) = self.read_latest_raw(key)? {
            if latest.data_hash == data_hash {
                return Ok(latest);
            }
        }

        let content_ref = if content.len() <= self.inline_threshold_bytes {
            ContentRef::Inline(content)
        } else {
            let cache_key = make_key(Namespace::Corpus, &format!("{}:{}", key.resource_type, data_hash));
            self.cache.set(&cache_key, content, None).await?;
            ContentRef::External { cache_key }
        };

        // Hold this resource's stripe for the whole read-modify-write so
        // concurrent saves to the *same* resource serialize here instead of
        // racing on the `redb` compare-and-swap below; the retry loop only
        // has to cover the rarer case of a different resource sharing the
        // stripe committing in the gap between our read and our write.
        let _write_guard = self.write_locks[save_stripe_for(key)].lock().await;
        for _ in 0..MAX_SAVE_RETRIES {
            let prior = self.read_latest_raw(key)?;
            if let Some(existing) = &prior {
                if existing.data_hash == data_hash {
                    return Ok(existing.clone());
                }
            }

            let new_id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let new_version = prior.as_ref().map(|b| b.version + 1).unwrap_or(1);
            let new_blob = Blob {
                id: new_id,
                resource_id: key.resource_id.clone(),
                resource_type: key.resource_type.clone(),
                version: new_version,
                data_hash: data_hash.clone(),
                created_at,
                content: content_ref.clone(),
                supersedes: prior.as_ref().map(|b| b.id),
                superseded_by: None,
                is_latest: true,
                tags: tags.clone(),
            };

            let db = self.db.clone();
            let key_owned = key.clone();
            let prior_owned = prior.clone();
            let new_blob_owned = new_blob.clone();
            let committed = tokio::task::spawn_blocking(move || {
                commit_save(&db, &key_owned, prior_owned.as_ref(), &new_blob_owned)
            })
            .await
            .map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))??;
            if committed {
                return Ok(new_blob);
            }
            // else: a concurrent writer moved the latest pointer; retry with a fresh read.
        }
        Err(CoreError::BlobConflict)
    }
}

/// Runs on a blocking-pool thread (see `save`'s `spawn_blocking` call).
/// Re-checks the latest pointer against `prior` inside the transaction
/// before writing, so a racing concurrent save loses this compare-and-swap
/// and its caller retries against a fresh read instead of clobbering it.
fn commit_save(
    db: &redb::Database,
    key: &ResourceKey,
    prior: Option<&Blob>,
    new_blob: &Blob,
) -> CoreResult<bool> {
    let w = db.begin_write().map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
    {
        let mut meta = w.open_table(METADATA_TABLE).map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
        let mut idx = w.open_table(LATEST_INDEX).map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;

        let current_raw = idx.get(key.encode().as_str()).map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
        let current_id: Option<u64> = match current_raw {
            Some(raw) => {
                let latest: LatestIndex = bincode::deserialize(raw.value())
                    .map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
                latest.id
            }
            None => None,
        };
        if current_id != prior.map(|b| b.id) {
            return Ok(false);
        }

        if let Some(old) = prior {
            let mut updated_old = old.clone();
            updated_old.is_latest = false;
            updated_old.superseded_by = Some(new_blob.id);
            let bytes = bincode::serialize(&updated_old).map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
            meta.insert(old.id, bytes.as_slice()).map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
        }

        let bytes = bincode::serialize(new_blob).map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
        meta.insert(new_blob.id, bytes.as_slice()).map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;

        let latest_bytes = bincode::serialize(&LatestIndex { id: Some(new_blob.id) })
            .map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
        idx.insert(key.encode().as_str(), latest_bytes.as_slice())
            .map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;

        let mut hash_table = w.open_table(HASH_INDEX).map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
        let count = hash_table
            .get(new_blob.data_hash.as_str())
            .map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?
            .map(|v| v.value())
            .unwrap_or(0);
        hash_table
            .insert(new_blob.data_hash.as_str(), count + 1)
            .map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
    }
    w.commit().map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
    Ok(true)
}

impl BlobStore {
    /// Keeps the newest `keep_n` versions (ordered by `version` descending)
    /// and deletes the rest. External content for a deleted version is only
    /// dropped from the cache once no remaining version shares its
    /// `data_hash`. Cache-deletion failures are logged and otherwise
    /// ignored; metadata deletion for that version still proceeds.
    pub async fn prune(&self, key: &ResourceKey, keep_n: usize) -> CoreResult<usize> {
        let mut versions = self.list_versions(key).await?;
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        if versions.len() <= keep_n {
            return Ok(0);
        }
        let to_delete = versions.split_off(keep_n);
        let kept_hashes: std::collections::HashSet<&str> =
            versions.iter().map(|b| b.data_hash.as_str()).collect();

        let w = self.db.begin_write().map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
        {
            let mut meta = w.open_table(METADATA_TABLE).map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
            for blob in &to_delete {
                meta.remove(blob.id).map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;
            }
        }
        w.commit().map_err(|e| CoreError::Storage(anyhow::anyhow!(e)))?;

        for blob in &to_delete {
            if kept_hashes.contains(blob.data_hash.as_str()) {
                continue;
            }
            if let ContentRef::External { cache_key } = &blob.content {
                if let Err(e) = self.cache.delete(cache_key).await {
                    tracing::warn!(error = %e, cache_key, "failed to delete pruned blob content");
                }
            }
        }
        Ok(to_delete.len())
    }

    /// Read back a blob's content, resolving external references through
    /// the cache.
    pub async fn read_content(&self, blob: &Blob) -> CoreResult<Vec<u8>> {
        match &blob.content {
            ContentRef::Inline(bytes) => Ok(bytes.clone()),
            ContentRef::External { cache_key } => self
                .cache
                .get(cache_key)
                .await?
                .ok_or_else(|| CoreError::CorruptBlob {
                    resource_id: blob.resource_id.clone(),
                    version: blob.version,
                }),
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}
