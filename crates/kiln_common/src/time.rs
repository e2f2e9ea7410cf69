//! File timestamps with an explicit "confirmed absent" sentinel.
//!
//! A tracked file's freshness has three states. A map entry holding
//! [`FileTimestamp::Modified`] means the file exists with that modification
//! time; [`FileTimestamp::Absent`] means it was looked for and is gone; no map
//! entry at all means freshness is unknown. Every consumer treats unknown and
//! absent as "changed".

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Modification time of a tracked file, in milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileTimestamp {
    /// The file was looked for and does not exist.
    Absent,
    /// The file exists and was last modified at this time.
    Modified(u64),
}

impl FileTimestamp {
    /// Converts a filesystem time to a timestamp.
    ///
    /// Times before the epoch clamp to zero; they still count as existing.
    pub fn from_system_time(time: SystemTime) -> Self {
        FileTimestamp::Modified(millis_since_epoch(time))
    }

    /// Returns `true` if the file exists.
    pub fn exists(self) -> bool {
        matches!(self, FileTimestamp::Modified(_))
    }

    /// Returns `true` if this timestamp is strictly newer than `build_time`.
    ///
    /// An absent file is always newer: its disappearance is a change.
    pub fn is_newer_than(self, build_time: u64) -> bool {
        match self {
            FileTimestamp::Absent => true,
            FileTimestamp::Modified(t) => t > build_time,
        }
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    millis_since_epoch(SystemTime::now())
}

fn millis_since_epoch(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
