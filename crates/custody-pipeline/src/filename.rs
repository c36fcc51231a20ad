//! Download filenames and the content-disposition hint.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How long a resolved filename is served from memory
pub const FILENAME_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Entries held before the oldest is dropped
pub const FILENAME_CACHE_CAPACITY: usize = 10_000;

/// Extension appended to names that have none
pub const FALLBACK_EXTENSION: &str = "bin";

/// Stem used when nothing of the evidence id survives sanitizing
pub const FALLBACK_STEM: &str = "evidence";

/// Make a caller-supplied name safe for a header and a filesystem.
///
/// CR, LF and double quotes are dropped; path separators, shell/header
/// metacharacters and other control characters become `_`.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '\r' | '\n' | '"'))
        .map(|c| match c {
            '/' | '\\' | '<' | '>' | ':' | ';' | '|' | '?' | '*' => '_',
            c if c.is_ascii_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// True if `name` ends in `.` followed by 1 to 8 ASCII alphanumerics.
pub fn has_extension(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((stem, ext)) => {
            !stem.is_empty()
                && (1..=8).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        }
        None => false,
    }
}

/// Sanitize and append `.bin` when there is no recognisable extension.
pub fn with_extension(name: &str) -> String {
    let clean = sanitize_filename(name);
    if has_extension(&clean) {
        clean
    } else {
        format!("{clean}.{FALLBACK_EXTENSION}")
    }
}

/// Name recorded next to an uploaded blob.
pub fn stored_filename(original: Option<&str>, evidence_id: &str) -> String {
    match original.map(sanitize_filename).filter(|n| !n.is_empty()) {
        Some(name) => with_extension(&name),
        None => fallback_filename(evidence_id),
    }
}

/// Download name derived from the evidence id alone.
pub fn fallback_filename(evidence_id: &str) -> String {
    let clean = sanitize_filename(evidence_id);
    if clean.is_empty() {
        format!("{FALLBACK_STEM}.{FALLBACK_EXTENSION}")
    } else {
        with_extension(&clean)
    }
}

/// `attachment` disposition with both a quoted and an RFC 5987 filename.
pub fn content_disposition(filename: &str) -> String {
    let clean = sanitize_filename(filename);
    let ascii: String = clean
        .chars()
        .map(|c| if c.is_ascii() { c } else { '_' })
        .collect();
    format!(
        "attachment; filename=\"{ascii}\"; filename*=UTF-8''{}",
        percent_encode(&clean)
    )
}

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// TTL cache of CID → download filename.
///
/// Positive lookups only; a miss in the content store is not cached.
/// Expired entries are swept on insert once per TTL period, and the map never
/// holds more than `capacity` names.
pub struct FilenameCache {
    entries: Mutex<Entries>,
    ttl: Duration,
    capacity: usize,
}

struct Entries {
    map: HashMap<String, (String, Instant)>,
    last_sweep: Instant,
}

impl FilenameCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, FILENAME_CACHE_CAPACITY)
    }

    pub fn with_capacity(ttl: Duration, capacity: usize) -> Self {
        FilenameCache {
            entries: Mutex::new(Entries {
                map: HashMap::new(),
                last_sweep: Instant::now(),
            }),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub fn insert(&self, cid: &str, name: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        if entries.last_sweep.elapsed() >= self.ttl || entries.map.len() >= self.capacity {
            let ttl = self.ttl;
            entries.map.retain(|_, (_, at)| at.elapsed() < ttl);
            entries.last_sweep = Instant::now();
        }
        if entries.map.len() >= self.capacity && !entries.map.contains_key(cid) {
            let oldest = entries
                .map
                .iter()
                .min_by_key(|(_, (_, at))| *at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.map.remove(&oldest);
            }
        }
        entries
            .map
            .insert(cid.to_string(), (name.to_string(), Instant::now()));
    }

    /// Cached name if present and not expired.
    pub fn get(&self, cid: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        match entries.map.get(cid) {
            Some((name, at)) if at.elapsed() < self.ttl => Some(name.clone()),
            _ => None,
        }
    }

    /// Drop expired entries.
    pub fn evict_expired(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let ttl = self.ttl;
        entries.map.retain(|_, (_, at)| at.elapsed() < ttl);
        entries.last_sweep = Instant::now();
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .map
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FilenameCache {
    fn default() -> Self {
        Self::new(FILENAME_CACHE_TTL)
    }
}
