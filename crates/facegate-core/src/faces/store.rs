use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::errors::{ServiceError, ServiceResult};
use crate::faces::cache::EncodingCache;

/// The one durable record kept per user. A re-enrollment replaces it
/// wholesale; deletion destroys it. There is no automatic expiry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrollmentRecord {
    pub user_id: String,
    #[serde(rename = "encoding")]
    pub encoding: Vec<f64>,
    pub created_at: String,
    pub model: String,
}

impl EnrollmentRecord {
    pub fn new(user_id: &str, encoding: Vec<f64>, model: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            encoding,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            model: model.to_string(),
        }
    }
}

/// The authoritative record store. Single-record operations must be atomic:
/// a concurrent reader sees the fully-old or fully-new record, never a torn
/// one.
pub trait DurableStore {
    fn load(&self, user_id: &str) -> ServiceResult<Option<EnrollmentRecord>>;
    fn save(&self, record: &EnrollmentRecord) -> ServiceResult<()>;
    /// Returns whether a record existed.
    fn delete(&self, user_id: &str) -> ServiceResult<bool>;
}

/// File-per-user JSON store. Writes go through a temp file in the same
/// directory and a rename, so readers never observe a partial record.
#[derive(Debug, Clone)]
pub struct FsEncodingStore {
    data_dir: PathBuf,
}

impl FsEncodingStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn record_path(&self, user_id: &str) -> PathBuf {
        self.data_dir.join(format!("{user_id}.json"))
    }
}

impl DurableStore for FsEncodingStore {
    fn load(&self, user_id: &str) -> ServiceResult<Option<EnrollmentRecord>> {
        let path = self.record_path(user_id);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(ServiceError::RecordRead {
                    path,
                    source: err,
                })
            }
        };

        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|err| ServiceError::InvalidRecord {
                path,
                message: err.to_string(),
            })
    }

    fn save(&self, record: &EnrollmentRecord) -> ServiceResult<()> {
        let path = self.record_path(&record.user_id);
        fs::create_dir_all(&self.data_dir).map_err(|source| ServiceError::RecordWrite {
            path: self.data_dir.clone(),
            source,
        })?;

        let mut tmp =
            NamedTempFile::new_in(&self.data_dir).map_err(|source| ServiceError::RecordWrite {
                path: path.clone(),
                source,
            })?;

        {
            let file = tmp.as_file_mut();
            {
                let mut writer = BufWriter::new(&mut *file);
                let serialized = serde_json::to_vec_pretty(record)?;
                writer
                    .write_all(&serialized)
                    .map_err(|source| ServiceError::RecordWrite {
                        path: path.clone(),
                        source,
                    })?;
                writer.write_all(b"\n").ok();
                writer.flush().map_err(|source| ServiceError::RecordWrite {
                    path: path.clone(),
                    source,
                })?;
            }
            file.sync_all().map_err(|source| ServiceError::RecordWrite {
                path: path.clone(),
                source,
            })?;
        }

        let file = tmp.persist(&path).map_err(|err| ServiceError::RecordWrite {
            path: path.clone(),
            source: err.error,
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = file
                .metadata()
                .map_err(|source| ServiceError::RecordWrite {
                    path: path.clone(),
                    source,
                })?
                .permissions();
            perms.set_mode(0o600);
            file.set_permissions(perms)
                .map_err(|source| ServiceError::RecordWrite {
                    path: path.clone(),
                    source,
                })?;
        }

        Ok(())
    }

    fn delete(&self, user_id: &str) -> ServiceResult<bool> {
        let path = self.record_path(user_id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).map_err(|source| ServiceError::RecordWrite {
            path,
            source,
        })?;
        Ok(true)
    }
}

/// Cache-aside composite over the durable store and an optional cache. The
/// durable store is the authority; the cache only ever accelerates reads and
/// its failures downgrade an operation to durable-only, never abort it.
pub struct EncodingStore {
    durable: Box<dyn DurableStore + Send + Sync>,
    cache: Option<Box<dyn EncodingCache + Send + Sync>>,
    cache_ttl: Duration,
}

impl EncodingStore {
    pub fn new(
        durable: Box<dyn DurableStore + Send + Sync>,
        cache: Option<Box<dyn EncodingCache + Send + Sync>>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            durable,
            cache,
            cache_ttl,
        }
    }

    /// Durable write first; the cache is populated only after the durable
    /// store accepted the record.
    pub fn put(&self, record: &EnrollmentRecord) -> ServiceResult<()> {
        self.durable.save(record)?;

        if let Some(cache) = &self.cache {
            if let Err(err) = cache.put(&record.user_id, &record.encoding, self.cache_ttl) {
                warn!(user_id = %record.user_id, error = %err, "failed to populate encoding cache");
            }
        }

        Ok(())
    }

    /// Cache first, durable store on miss or cache trouble; a durable hit
    /// repopulates the cache for the next read.
    pub fn get(&self, user_id: &str) -> ServiceResult<Vec<f64>> {
        if let Some(cache) = &self.cache {
            match cache.get(user_id) {
                Ok(Some(encoding)) => {
                    debug!(user_id, "encoding served from cache");
                    return Ok(encoding);
                }
                Ok(None) => {}
                Err(err) => warn!(user_id, error = %err, "encoding cache read failed"),
            }
        }

        let record = self
            .durable
            .load(user_id)?
            .ok_or_else(|| ServiceError::UserNotEnrolled {
                user_id: user_id.to_string(),
            })?;

        if let Some(cache) = &self.cache {
            if let Err(err) = cache.put(user_id, &record.encoding, self.cache_ttl) {
                warn!(user_id, error = %err, "failed to repopulate encoding cache");
            }
        }

        Ok(record.encoding)
    }

    /// Removes the durable record. An absent record is `UserNotEnrolled`
    /// with no side effects. Once existence is confirmed, cache
    /// invalidation is attempted even when the durable removal itself
    /// errors, so a deleted identity is never served from cache.
    pub fn delete(&self, user_id: &str) -> ServiceResult<()> {
        match self.durable.delete(user_id) {
            Ok(false) => Err(ServiceError::UserNotEnrolled {
                user_id: user_id.to_string(),
            }),
            Ok(true) => {
                self.invalidate_cache(user_id);
                Ok(())
            }
            Err(err) => {
                self.invalidate_cache(user_id);
                Err(err)
            }
        }
    }

    pub fn cache_connected(&self) -> bool {
        match &self.cache {
            Some(cache) => cache.ping().is_ok(),
            None => false,
        }
    }

    fn invalidate_cache(&self, user_id: &str) {
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.remove(user_id) {
                warn!(user_id, error = %err, "failed to invalidate encoding cache");
            }
        }
    }
}
