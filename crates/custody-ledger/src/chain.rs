//! Hash-chained event log.
//!
//! Object layout under `{prefix}`:
//! ```text
//! events/000000000000.json
//! events/000000000001.json
//! ...
//! ```
//!
//! Each object is a `ChainedEvent`. `entry_hash = SHA-256(seq || prev_hash ||
//! at || event_json)` and `prev_hash` is the previous event's `entry_hash`
//! (64 zeros for the first). Entries are never rewritten: confirmation is a
//! separate `Confirmed` event, and current state is a replay of the log.
//!
//! Several processes may append to one prefix. Each call first replays any
//! events written since its last look, and an event object is only ever
//! created, never overwritten; losing the race for a sequence number means
//! catching up and trying the next one.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use custody_core::{CustodyError, CustodyResult, EvidenceType, LedgerEntry};
use opendal::{ErrorKind, Operator};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::client::{Confirmation, Ledger, Submission};

const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Appends attempted before a contended ledger is reported unavailable
const MAX_APPEND_ATTEMPTS: usize = 8;

/// A freshly created event object can be read before its writer filled it
const IN_FLIGHT_RETRIES: u32 = 40;
const IN_FLIGHT_DELAY: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum LedgerEvent {
    Recorded {
        container_id: String,
        evidence_id: String,
        cid: String,
        hash_original: String,
        evidence_type: EvidenceType,
        submitted_by: String,
    },
    Confirmed {
        container_id: String,
        index: u64,
        confirmed_by: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChainedEvent {
    seq: u64,
    prev_hash: String,
    entry_hash: String,
    at: DateTime<Utc>,
    event: LedgerEvent,
}

impl ChainedEvent {
    fn compute_hash(
        seq: u64,
        prev_hash: &str,
        at: &DateTime<Utc>,
        event: &LedgerEvent,
    ) -> CustodyResult<String> {
        let event_json = serde_json::to_vec(event)
            .map_err(|e| CustodyError::Other(anyhow::anyhow!("serializing ledger event: {e}")))?;
        let mut hasher = Sha256::new();
        hasher.update(seq.to_be_bytes());
        hasher.update(prev_hash.as_bytes());
        hasher.update(at.to_rfc3339_opts(SecondsFormat::Nanos, true).as_bytes());
        hasher.update(&event_json);
        Ok(hex::encode(hasher.finalize()))
    }

    /// True if this event sits at `seq` directly after `head` and its hash
    /// recomputes.
    fn links_to(&self, seq: u64, head: &str) -> CustodyResult<bool> {
        let recomputed = Self::compute_hash(self.seq, &self.prev_hash, &self.at, &self.event)?;
        Ok(self.seq == seq && self.prev_hash == head && self.entry_hash == recomputed)
    }
}

/// Result of re-walking the stored chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    pub events: u64,
    pub head: String,
    /// Sequence number of the first event whose link or hash does not verify
    pub first_broken: Option<u64>,
}

impl ChainReport {
    pub fn is_intact(&self) -> bool {
        self.first_broken.is_none()
    }
}

#[derive(Debug, Default)]
struct ChainState {
    head: String,
    next_seq: u64,
    containers: HashMap<String, Vec<LedgerEntry>>,
}

impl ChainState {
    fn new() -> Self {
        Self {
            head: GENESIS_HASH.to_string(),
            ..Default::default()
        }
    }

    fn find(&self, container_id: &str, evidence_id: &str) -> Option<&LedgerEntry> {
        self.containers
            .get(container_id)?
            .iter()
            .find(|e| e.evidence_id == evidence_id)
    }

    fn apply(&mut self, ev: &ChainedEvent) {
        match &ev.event {
            LedgerEvent::Recorded {
                container_id,
                evidence_id,
                cid,
                hash_original,
                evidence_type,
                submitted_by,
            } => {
                let entries = self.containers.entry(container_id.clone()).or_default();
                entries.push(LedgerEntry {
                    container_id: container_id.clone(),
                    evidence_id: evidence_id.clone(),
                    index: entries.len() as u64,
                    cid: cid.clone(),
                    hash_original: hash_original.clone(),
                    evidence_type: *evidence_type,
                    submitted_by: submitted_by.clone(),
                    submitted_at: ev.at,
                    confirmed: false,
                });
            }
            LedgerEvent::Confirmed {
                container_id,
                index,
                ..
            } => {
                if let Some(entry) = self
                    .containers
                    .get_mut(container_id)
                    .and_then(|v| v.get_mut(*index as usize))
                {
                    entry.confirmed = true;
                }
            }
        }
        self.head = ev.entry_hash.clone();
        self.next_seq = ev.seq + 1;
    }
}

/// Append-only ledger persisted through an OpenDAL operator.
pub struct ChainLedger {
    op: Operator,
    prefix: String,
    submitter: String,
    /// Backend can create-if-absent atomically
    conditional_writes: bool,
    state: Mutex<ChainState>,
}

impl ChainLedger {
    /// Load and verify the stored chain, then replay it into memory.
    ///
    /// Fails with `IntegrityViolation` if any stored event does not verify.
    pub async fn open(op: Operator, prefix: &str, submitter: &str) -> CustodyResult<Self> {
        let prefix = prefix.trim_matches('/').to_string();
        let events = load_events(&op, &prefix).await?;
        let report = walk(&events)?;
        if let Some(seq) = report.first_broken {
            error!(seq, "ledger chain broken");
            return Err(CustodyError::IntegrityViolation {
                expected: format!("intact ledger chain under '{prefix}'"),
                actual: format!("broken link at event {seq}"),
            });
        }

        let mut state = ChainState::new();
        for ev in &events {
            state.apply(ev);
        }
        let conditional_writes = op.info().full_capability().write_with_if_not_exists;
        if !conditional_writes {
            debug!("ledger backend lacks conditional writes; falling back to exists checks");
        }
        info!(events = events.len(), head = %state.head, "ledger loaded");

        Ok(Self {
            op,
            prefix,
            submitter: submitter.to_string(),
            conditional_writes,
            state: Mutex::new(state),
        })
    }

    /// Re-read every stored event and recompute the chain.
    pub async fn verify_chain(&self) -> CustodyResult<ChainReport> {
        verify_stored(&self.op, &self.prefix).await
    }

    fn event_key(&self, seq: u64) -> String {
        event_key(&self.prefix, seq)
    }

    /// Replay events appended by other writers since the last look.
    async fn catch_up(&self, state: &mut ChainState) -> CustodyResult<()> {
        let mut applied = 0u64;
        loop {
            let key = self.event_key(state.next_seq);
            let Some(ev) = read_event(&self.op, &key).await? else {
                break;
            };
            if !ev.links_to(state.next_seq, &state.head)? {
                error!(seq = state.next_seq, "ledger chain broken by another writer");
                return Err(CustodyError::IntegrityViolation {
                    expected: format!("event {} linked to {}", state.next_seq, state.head),
                    actual: format!("event at {key} does not link"),
                });
            }
            state.apply(&ev);
            applied += 1;
        }
        if applied > 0 {
            debug!(applied, head = %state.head, "ledger: replayed events from another writer");
        }
        Ok(())
    }

    /// Write `event` at the next sequence number. `false` if another writer
    /// took that number first; the caller catches up and retries.
    async fn append(&self, state: &mut ChainState, event: LedgerEvent) -> CustodyResult<bool> {
        let seq = state.next_seq;
        let at = Utc::now();
        let entry_hash = ChainedEvent::compute_hash(seq, &state.head, &at, &event)?;
        let chained = ChainedEvent {
            seq,
            prev_hash: state.head.clone(),
            entry_hash,
            at,
            event,
        };

        let bytes = serde_json::to_vec_pretty(&chained)
            .map_err(|e| CustodyError::Other(anyhow::anyhow!("serializing ledger event: {e}")))?;
        let key = self.event_key(seq);
        let unavailable = |e: opendal::Error| {
            CustodyError::LedgerUnavailable(format!("appending event {seq}: {e}"))
        };

        let written = if self.conditional_writes {
            match self.op.write_with(&key, bytes).if_not_exists(true).await {
                Ok(_) => true,
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::ConditionNotMatch | ErrorKind::AlreadyExists
                    ) =>
                {
                    false
                }
                Err(e) => return Err(unavailable(e)),
            }
        } else if self.op.exists(&key).await.map_err(unavailable)? {
            false
        } else {
            self.op.write(&key, bytes).await.map_err(unavailable)?;
            true
        };

        if !written {
            debug!(seq, "ledger: sequence number taken by another writer");
            return Ok(false);
        }
        debug!(seq, hash = %chained.entry_hash, "ledger event appended");
        state.apply(&chained);
        Ok(true)
    }
}

fn contended() -> CustodyError {
    warn!(attempts = MAX_APPEND_ATTEMPTS, "ledger append kept losing to other writers");
    CustodyError::LedgerUnavailable(format!(
        "ledger append contended {MAX_APPEND_ATTEMPTS} times in a row"
    ))
}

#[async_trait]
impl Ledger for ChainLedger {
    async fn record_evidence(&self, submission: Submission) -> CustodyResult<LedgerEntry> {
        let mut state = self.state.lock().await;

        for _ in 0..MAX_APPEND_ATTEMPTS {
            self.catch_up(&mut state).await?;

            if let Some(existing) = state.find(&submission.container_id, &submission.evidence_id)
            {
                if existing.cid == submission.cid
                    && existing.hash_original == submission.hash_original
                {
                    debug!(
                        container = %submission.container_id,
                        evidence = %submission.evidence_id,
                        "ledger: identical entry already recorded"
                    );
                    return Ok(existing.clone());
                }
                return Err(CustodyError::Duplicate(format!(
                    "ledger already holds a different entry for {}/{}",
                    submission.container_id, submission.evidence_id
                )));
            }

            let event = LedgerEvent::Recorded {
                container_id: submission.container_id.clone(),
                evidence_id: submission.evidence_id.clone(),
                cid: submission.cid.clone(),
                hash_original: submission.hash_original.clone(),
                evidence_type: submission.evidence_type,
                submitted_by: self.submitter.clone(),
            };
            if !self.append(&mut state, event).await? {
                continue;
            }

            let entry = state
                .find(&submission.container_id, &submission.evidence_id)
                .cloned()
                .ok_or_else(|| {
                    CustodyError::Other(anyhow::anyhow!("recorded entry missing after replay"))
                })?;
            info!(
                container = %entry.container_id,
                evidence = %entry.evidence_id,
                index = entry.index,
                "evidence anchored"
            );
            return Ok(entry);
        }
        Err(contended())
    }

    async fn get_evidence(
        &self,
        container_id: &str,
        evidence_id: &str,
    ) -> CustodyResult<LedgerEntry> {
        let mut state = self.state.lock().await;
        self.catch_up(&mut state).await?;
        state
            .find(container_id, evidence_id)
            .cloned()
            .ok_or_else(|| {
                CustodyError::not_found(format!("ledger entry {container_id}/{evidence_id}"))
            })
    }

    async fn evidence_at(&self, container_id: &str, index: u64) -> CustodyResult<LedgerEntry> {
        let mut state = self.state.lock().await;
        self.catch_up(&mut state).await?;
        state
            .containers
            .get(container_id)
            .and_then(|v| v.get(index as usize))
            .cloned()
            .ok_or_else(|| {
                CustodyError::not_found(format!("ledger entry {container_id}[{index}]"))
            })
    }

    async fn evidence_count(&self, container_id: &str) -> CustodyResult<u64> {
        let mut state = self.state.lock().await;
        self.catch_up(&mut state).await?;
        Ok(state
            .containers
            .get(container_id)
            .map(|v| v.len() as u64)
            .unwrap_or(0))
    }

    async fn confirm_evidence(
        &self,
        container_id: &str,
        index: u64,
    ) -> CustodyResult<Confirmation> {
        let mut state = self.state.lock().await;

        for _ in 0..MAX_APPEND_ATTEMPTS {
            self.catch_up(&mut state).await?;

            let confirmed = state
                .containers
                .get(container_id)
                .and_then(|v| v.get(index as usize))
                .map(|e| e.confirmed)
                .ok_or_else(|| {
                    CustodyError::not_found(format!("ledger entry {container_id}[{index}]"))
                })?;
            if confirmed {
                return Ok(Confirmation::AlreadyConfirmed);
            }

            let event = LedgerEvent::Confirmed {
                container_id: container_id.to_string(),
                index,
                confirmed_by: self.submitter.clone(),
            };
            if self.append(&mut state, event).await? {
                info!(container = %container_id, index, "evidence confirmed");
                return Ok(Confirmation::Confirmed);
            }
        }
        Err(contended())
    }
}

/// Walk a stored chain without opening it; works on a broken chain.
pub async fn verify_stored(op: &Operator, prefix: &str) -> CustodyResult<ChainReport> {
    let events = load_events(op, prefix.trim_matches('/')).await?;
    walk(&events)
}

fn event_key(prefix: &str, seq: u64) -> String {
    format!("{prefix}/events/{seq:012}.json")
}

async fn load_events(op: &Operator, prefix: &str) -> CustodyResult<Vec<ChainedEvent>> {
    let dir = format!("{prefix}/events/");
    let entries = match op.list(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CustodyError::LedgerUnavailable(format!("listing {dir}: {e}"))),
    };

    let mut paths: Vec<String> = entries
        .iter()
        .map(|e| e.path().to_string())
        .filter(|p| p.ends_with(".json"))
        .collect();
    // zero-padded sequence numbers sort lexically
    paths.sort();

    let mut events = Vec::with_capacity(paths.len());
    for path in paths {
        // a vanished object leaves a gap that `walk` reports
        if let Some(ev) = read_event(op, &path).await? {
            events.push(ev);
        }
    }
    Ok(events)
}

/// Read one event object; `None` if it does not exist.
async fn read_event(op: &Operator, path: &str) -> CustodyResult<Option<ChainedEvent>> {
    let mut attempt = 0;
    loop {
        let buf = match op.read(path).await {
            Ok(buf) => buf,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CustodyError::LedgerUnavailable(format!("reading {path}: {e}")))
            }
        };
        match serde_json::from_slice::<ChainedEvent>(&buf.to_vec()) {
            Ok(ev) => return Ok(Some(ev)),
            Err(e) if e.is_eof() && attempt < IN_FLIGHT_RETRIES => {
                attempt += 1;
                tokio::time::sleep(IN_FLIGHT_DELAY).await;
            }
            Err(e) => {
                return Err(CustodyError::IntegrityViolation {
                    expected: format!("well-formed ledger event at {path}"),
                    actual: e.to_string(),
                })
            }
        }
    }
}

/// Check sequence continuity, back-links and recomputed hashes.
fn walk(events: &[ChainedEvent]) -> CustodyResult<ChainReport> {
    let mut head = GENESIS_HASH.to_string();
    for (i, ev) in events.iter().enumerate() {
        let expected_seq = i as u64;
        if !ev.links_to(expected_seq, &head)? {
            return Ok(ChainReport {
                events: events.len() as u64,
                head,
                first_broken: Some(expected_seq),
            });
        }
        head = ev.entry_hash.clone();
    }
    Ok(ChainReport {
        events: events.len() as u64,
        head,
        first_broken: None,
    })
}
