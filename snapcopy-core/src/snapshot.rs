/*!
Snapshot model: references, listing records and selection helpers.

A snapshot is owned by the source server; this crate only refers to it by id
or by one of the server-side sentinels (`$last`, `$prev`, `$lastLocked`),
which are resolved against the server's snapshot list before a copy starts.
*/

use crate::{Result, SnapCopyError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Sentinel for the most recently loaded snapshot
pub const LAST: &str = "$last";
/// Sentinel for the loaded snapshot before `$last`
pub const PREV: &str = "$prev";
/// Sentinel for the most recent locked snapshot
pub const LAST_LOCKED: &str = "$lastLocked";

/// Reference to a snapshot on the source server
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SnapshotRef {
    /// Most recently loaded snapshot
    #[default]
    Latest,
    /// Loaded snapshot preceding the latest one
    Previous,
    /// Most recent loaded snapshot that is locked
    LastLocked,
    /// Literal snapshot id
    Id(String),
}

impl FromStr for SnapshotRef {
    type Err = SnapCopyError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim() {
            "" => Err(SnapCopyError::config("snapshot id cannot be empty")),
            LAST => Ok(SnapshotRef::Latest),
            PREV => Ok(SnapshotRef::Previous),
            LAST_LOCKED => Ok(SnapshotRef::LastLocked),
            other if other.starts_with('$') => Err(SnapCopyError::config(format!(
                "unknown snapshot reference '{other}' (expected an id, {LAST}, {PREV} or {LAST_LOCKED})"
            ))),
            other => Ok(SnapshotRef::Id(other.to_string())),
        }
    }
}

impl fmt::Display for SnapshotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotRef::Latest => f.write_str(LAST),
            SnapshotRef::Previous => f.write_str(PREV),
            SnapshotRef::LastLocked => f.write_str(LAST_LOCKED),
            SnapshotRef::Id(id) => f.write_str(id),
        }
    }
}

impl SnapshotRef {
    /// Pick the snapshot this reference points to from a server listing
    pub fn resolve<'a>(&self, snapshots: &'a [SnapshotInfo]) -> Option<&'a SnapshotInfo> {
        if let SnapshotRef::Id(id) = self {
            return snapshots.iter().find(|s| &s.id == id);
        }

        let loaded = newest_first(snapshots.iter().filter(|s| s.is_loaded()));
        match self {
            SnapshotRef::Latest => loaded.first().copied(),
            SnapshotRef::Previous => loaded.get(1).copied(),
            SnapshotRef::LastLocked => loaded.into_iter().find(|s| s.locked),
            SnapshotRef::Id(_) => None,
        }
    }
}

/// A snapshot as listed by `GET /snapshots`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub ts_start: Option<i64>,
    #[serde(default)]
    pub ts_end: Option<i64>,
}

impl SnapshotInfo {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            name: None,
            status: "done".to_string(),
            state: Some("loaded".to_string()),
            locked: false,
            ts_start: None,
            ts_end: None,
        }
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_end(mut self, ts_end_ms: i64) -> Self {
        self.ts_end = Some(ts_end_ms);
        self
    }

    pub fn unloaded(mut self) -> Self {
        self.status = "unloaded".to_string();
        self.state = Some("unloaded".to_string());
        self
    }

    pub fn locked(mut self) -> Self {
        self.locked = true;
        self
    }

    /// Loaded snapshots are the ones `$last` and friends consider
    pub fn is_loaded(&self) -> bool {
        self.status == "done" || self.state.as_deref() == Some("loaded")
    }

    /// Name for display, falling back to `N/A`
    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|n| !n.is_empty()).unwrap_or("N/A")
    }

    /// Start time, or end time when the start is unknown
    pub fn taken_at(&self) -> Option<DateTime<Utc>> {
        self.ts_start
            .or(self.ts_end)
            .and_then(DateTime::<Utc>::from_timestamp_millis)
    }

    fn sort_key(&self) -> i64 {
        self.ts_end.or(self.ts_start).unwrap_or(i64::MIN)
    }
}

/// Order snapshots by end timestamp, newest first
pub fn newest_first<'a, I>(snapshots: I) -> Vec<&'a SnapshotInfo>
where
    I: IntoIterator<Item = &'a SnapshotInfo>,
{
    let mut sorted: Vec<&SnapshotInfo> = snapshots.into_iter().collect();
    sorted.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
    sorted
}

/// Parse a selection such as `1,3,5-7` into sorted, de-duplicated 0-based
/// indices. Entries outside `1..=max_index` and malformed parts are ignored.
pub fn parse_selection(selection: &str, max_index: usize) -> Vec<usize> {
    let mut indices = BTreeSet::new();
    let in_range = |i: usize| (1..=max_index).contains(&i);

    for part in selection.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if let Some((start, end)) = part.split_once('-') {
            let (Ok(start), Ok(end)) = (start.trim().parse::<usize>(), end.trim().parse::<usize>())
            else {
                continue;
            };
            indices.extend((start.max(1)..=end.min(max_index)).map(|i| i - 1));
        } else if let Ok(index) = part.parse::<usize>() {
            if in_range(index) {
                indices.insert(index - 1);
            }
        }
    }

    indices.into_iter().collect()
}
