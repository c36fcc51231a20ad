//! Metadata repository: wrapped keys and IVs per evidence item.
//!
//! Rows are read back as untyped JSON and only become [`EvidenceRecord`]s
//! after [`EvidenceRecord::validate`] passes, so one corrupt row cannot
//! poison a listing.
//!
//! [`JsonRepository`] keeps every row in memory and flushes the whole set
//! atomically (temp file + rename) after each insert, under a lock file
//! shared with any other process using the same path.

use async_trait::async_trait;
use custody_core::{CustodyError, CustodyResult, EvidenceRecord};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// One row as listed by a repository. `record` is `Err` for rows that fail
/// schema validation; the ids are best-effort in that case.
#[derive(Debug)]
pub struct RepositoryRow {
    pub container_id: String,
    pub evidence_id: String,
    pub record: CustodyResult<EvidenceRecord>,
}

/// Relational-style store for decryption material, keyed by
/// `(container_id, evidence_id)`.
#[async_trait]
pub trait MetadataRepository: Send + Sync {
    /// Insert a new row. `Duplicate` if the key is taken.
    async fn insert(&self, record: &EvidenceRecord) -> CustodyResult<()>;

    /// Fetch and validate one row.
    async fn get(&self, container_id: &str, evidence_id: &str)
        -> CustodyResult<Option<EvidenceRecord>>;

    /// Every row, including malformed ones.
    async fn list(&self) -> CustodyResult<Vec<RepositoryRow>>;
}

/// Map a stored JSON row through the record schema.
pub fn parse_row(raw: &Value) -> RepositoryRow {
    let id = |field: &str| {
        raw.get(field)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let record = serde_json::from_value::<EvidenceRecord>(raw.clone())
        .map_err(|e| malformed_row(&format!("{e}")))
        .and_then(|rec| {
            rec.validate().map_err(|e| malformed_row(&e.to_string()))?;
            Ok(rec)
        });
    RepositoryRow {
        container_id: id("container_id"),
        evidence_id: id("evidence_id"),
        record,
    }
}

fn malformed_row(reason: &str) -> CustodyError {
    CustodyError::Other(anyhow::anyhow!("corrupt metadata row: {reason}"))
}

type RowKey = (String, String);

/// How long an insert waits for another writer's lock
const LOCK_WAIT: Duration = Duration::from_secs(10);
const LOCK_RETRY: Duration = Duration::from_millis(25);
/// A lock file older than this is left over from a crashed writer
const LOCK_STALE: Duration = Duration::from_secs(60);

#[derive(Default)]
struct Rows {
    keyed: BTreeMap<RowKey, Value>,
    /// Rows without usable ids, kept so a flush never drops data
    unkeyed: Vec<Value>,
    /// Modification time and length of the file these rows were read from
    stamp: Option<(SystemTime, u64)>,
}

impl Rows {
    fn parse(content: &str, path: &Path) -> CustodyResult<Self> {
        let mut rows = Rows::default();
        if content.trim().is_empty() {
            return Ok(rows);
        }
        let raw: Vec<Value> = serde_json::from_str(content).map_err(|e| {
            CustodyError::RepositoryUnavailable(format!(
                "parsing metadata repository {}: {e}",
                path.display()
            ))
        })?;
        for value in raw {
            match row_key(&value) {
                Some(key) if !rows.keyed.contains_key(&key) => {
                    rows.keyed.insert(key, value);
                }
                _ => {
                    warn!(path = %path.display(), "metadata row without a unique key");
                    rows.unkeyed.push(value);
                }
            }
        }
        Ok(rows)
    }

    fn len(&self) -> usize {
        self.keyed.len() + self.unkeyed.len()
    }
}

/// JSON-file metadata repository.
///
/// Several processes (the daemon and the CLI) may share one file. Every
/// insert takes `{file}.lock`, re-reads the file and merges before writing;
/// reads reload whenever the file changed on disk.
pub struct JsonRepository {
    path: Option<PathBuf>,
    rows: Mutex<Rows>,
}

impl JsonRepository {
    /// Open (or create on first insert) a repository file.
    pub async fn open(path: &Path) -> CustodyResult<Self> {
        let rows = load_rows(path).await?;
        info!(path = %path.display(), rows = rows.len(), "metadata repository opened");
        Ok(Self {
            path: Some(path.to_path_buf()),
            rows: Mutex::new(rows),
        })
    }

    /// Repository that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            rows: Mutex::new(Rows::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Insert an arbitrary JSON row, bypassing the schema. Used to import
    /// records produced elsewhere; malformed rows surface on `list`.
    pub async fn insert_raw(&self, value: Value) -> CustodyResult<()> {
        let mut rows = self.rows.lock().await;
        let Some(path) = &self.path else {
            return insert_row(&mut rows, value);
        };

        let _lock = FileLock::acquire(path).await?;
        let mut merged = load_rows(path).await?;
        insert_row(&mut merged, value)?;
        flush(path, &merged).await?;
        merged.stamp = file_stamp(path).await?;
        *rows = merged;
        Ok(())
    }

    /// Pick up rows written by other processes since the last read.
    async fn refresh(&self, rows: &mut Rows) -> CustodyResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if file_stamp(path).await? != rows.stamp {
            *rows = load_rows(path).await?;
            debug!(path = %path.display(), rows = rows.len(), "metadata repository reloaded");
        }
        Ok(())
    }
}

fn insert_row(rows: &mut Rows, value: Value) -> CustodyResult<()> {
    match row_key(&value) {
        Some(key) => {
            if rows.keyed.contains_key(&key) {
                return Err(duplicate(&key));
            }
            rows.keyed.insert(key, value);
        }
        None => rows.unkeyed.push(value),
    }
    Ok(())
}

async fn file_stamp(path: &Path) -> CustodyResult<Option<(SystemTime, u64)>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => {
            let modified = meta
                .modified()
                .map_err(|e| unavailable("reading repository mtime", path, e))?;
            Ok(Some((modified, meta.len())))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(unavailable("stat metadata repository", path, e)),
    }
}

async fn load_rows(path: &Path) -> CustodyResult<Rows> {
    let stamp = file_stamp(path).await?;
    let mut rows = match tokio::fs::read_to_string(path).await {
        Ok(content) => Rows::parse(&content, path)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Rows::default(),
        Err(e) => return Err(unavailable("reading metadata repository", path, e)),
    };
    rows.stamp = stamp;
    Ok(rows)
}

async fn flush(path: &Path, rows: &Rows) -> CustodyResult<()> {
    let all: Vec<&Value> = rows.keyed.values().chain(rows.unkeyed.iter()).collect();
    let json = serde_json::to_string_pretty(&all).map_err(|e| {
        CustodyError::RepositoryUnavailable(format!("serializing metadata rows: {e}"))
    })?;

    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, json)
        .await
        .map_err(|e| unavailable("writing repository temp", &tmp_path, e))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| unavailable("renaming repository", path, e))?;
    debug!(path = %path.display(), rows = all.len(), "metadata repository flushed");
    Ok(())
}

/// Cooperative writer lock: `{file}.lock` created with `create_new`,
/// removed on drop.
struct FileLock {
    path: PathBuf,
}

impl FileLock {
    async fn acquire(repo_path: &Path) -> CustodyResult<Self> {
        if let Some(parent) = repo_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| unavailable("creating repository dir", parent, e))?;
        }

        let mut name = repo_path.as_os_str().to_owned();
        name.push(".lock");
        let path = PathBuf::from(name);
        let deadline = Instant::now() + LOCK_WAIT;

        loop {
            let created = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match created {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if lock_is_stale(&path).await {
                        warn!(lock = %path.display(), "removing stale repository lock");
                        let _ = tokio::fs::remove_file(&path).await;
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(CustodyError::RepositoryUnavailable(format!(
                            "could not acquire {} (another writer holds it?)",
                            path.display()
                        )));
                    }
                    tokio::time::sleep(LOCK_RETRY).await;
                }
                Err(e) => return Err(unavailable("creating repository lock", &path, e)),
            }
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), "releasing repository lock: {e}");
        }
    }
}

async fn lock_is_stale(path: &Path) -> bool {
    let Ok(meta) = tokio::fs::metadata(path).await else {
        return false;
    };
    meta.modified()
        .ok()
        .and_then(|m| m.elapsed().ok())
        .is_some_and(|age| age > LOCK_STALE)
}

fn row_key(value: &Value) -> Option<RowKey> {
    let container = value.get("container_id")?.as_str()?.trim();
    let evidence = value.get("evidence_id")?.as_str()?.trim();
    if container.is_empty() || evidence.is_empty() {
        return None;
    }
    Some((container.to_string(), evidence.to_string()))
}

fn duplicate(key: &RowKey) -> CustodyError {
    CustodyError::Duplicate(format!("evidence {}/{} already exists", key.0, key.1))
}

fn unavailable(what: &str, path: &Path, e: std::io::Error) -> CustodyError {
    CustodyError::RepositoryUnavailable(format!("{what} {}: {e}", path.display()))
}

#[async_trait]
impl MetadataRepository for JsonRepository {
    async fn insert(&self, record: &EvidenceRecord) -> CustodyResult<()> {
        record.validate()?;
        let value = serde_json::to_value(record).map_err(|e| {
            CustodyError::RepositoryUnavailable(format!("serializing evidence record: {e}"))
        })?;
        self.insert_raw(value).await
    }

    async fn get(
        &self,
        container_id: &str,
        evidence_id: &str,
    ) -> CustodyResult<Option<EvidenceRecord>> {
        let mut rows = self.rows.lock().await;
        self.refresh(&mut rows).await?;
        let key = (container_id.to_string(), evidence_id.to_string());
        match rows.keyed.get(&key) {
            Some(value) => parse_row(value).record.map(Some),
            None => Ok(None),
        }
    }

    async fn list(&self) -> CustodyResult<Vec<RepositoryRow>> {
        let mut rows = self.rows.lock().await;
        self.refresh(&mut rows).await?;
        Ok(rows
            .keyed
            .values()
            .chain(rows.unkeyed.iter())
            .map(parse_row)
            .collect())
    }
}
