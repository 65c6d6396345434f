//! Durable replica snapshots.
//!
//! After every state mutation the shell persists the replica's durable
//! fields to a single per-site file:
//!
//! ```text
//! Offset   Size  Content
//! ──────────────────────────────────────
//! 0x00     8     Magic  b"ROTASNAP"
//! 0x08     4     Format version (u32 LE)
//! 0x0c     4     CRC32 of the payload (u32 LE)
//! 0x10     ...   bincode-encoded SnapshotData
//! ```
//!
//! Writes go to a temporary file in the same directory, are fsynced, and
//! then renamed over the previous snapshot, so a crash mid-write leaves
//! the old file intact. Recovery tolerates an absent file (fresh replica)
//! but treats a present-but-corrupt file as an error: silently starting
//! empty would re-issue appointment ids the cluster has already seen.
//!
//! The full event log is deliberately not persisted. Only the partial log
//! is, and the log is re-seeded from it on recovery; any record that left
//! the partial log was already known to every peer.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use rota_kernel::{CalendarState, NodeId};

use crate::time_table::TimeTable;
use crate::types::{EventClock, EventRecord};

/// Magic bytes identifying a valid snapshot file.
const SNAPSHOT_MAGIC: [u8; 8] = *b"ROTASNAP";

/// Current snapshot format version.
const SNAPSHOT_VERSION: u32 = 1;

/// Size of the fixed header preceding the payload.
const HEADER_SIZE: usize = 16;

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while saving or restoring a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file does not start with the snapshot magic.
    #[error("not a snapshot file (bad magic)")]
    BadMagic,

    /// The file was written by an unknown format version.
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),

    /// The payload does not match its checksum.
    #[error("snapshot checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Checksum from the header.
        expected: u32,
        /// Checksum computed over the stored payload.
        actual: u32,
    },

    /// The payload bytes did not decode.
    #[error("snapshot payload corrupt: {0}")]
    Decode(String),

    /// The state could not be encoded.
    #[error("snapshot encoding failed: {0}")]
    Encode(String),
}

// ============================================================================
// Snapshot Data
// ============================================================================

/// The durable portion of a replica's state.
///
/// Ephemeral projections (the per-send and per-receive event sets) are
/// excluded: they are recomputed from the partial log and time table on
/// the next send or receive and are never read after recovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotData {
    /// The site's event clock.
    pub clock: EventClock,

    /// The full N×N time table.
    pub time_table: TimeTable,

    /// The partial log, in record order.
    pub partial_log: Vec<EventRecord>,

    /// The live appointments and their occupancy grid.
    pub calendar: CalendarState,

    /// The appointment-id counter.
    pub appt_no: u64,
}

// ============================================================================
// Snapshot Store
// ============================================================================

/// Reads and atomically replaces one site's snapshot file.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Creates a store over an explicit file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Creates a store at the conventional per-site path
    /// `<dir>/<node_id>node_state.bin`.
    pub fn in_dir(dir: impl AsRef<Path>, node_id: NodeId) -> Self {
        Self {
            path: dir
                .as_ref()
                .join(format!("{}node_state.bin", node_id.as_u8())),
        }
    }

    /// Returns the snapshot file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persists a snapshot, replacing any previous one atomically.
    pub fn save(&self, data: &SnapshotData) -> Result<(), SnapshotError> {
        let payload =
            bincode::serialize(data).map_err(|e| SnapshotError::Encode(e.to_string()))?;
        let checksum = crc32fast::hash(&payload);

        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        buf.extend_from_slice(&SNAPSHOT_MAGIC);
        buf.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
        buf.extend_from_slice(&checksum.to_le_bytes());
        buf.extend_from_slice(&payload);

        // Temp file in the same directory so the rename cannot cross
        // filesystems.
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&buf)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), bytes = buf.len(), "snapshot written");
        Ok(())
    }

    /// Loads the snapshot, or `None` if no file exists yet.
    pub fn load(&self) -> Result<Option<SnapshotData>, SnapshotError> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        if buf.len() < HEADER_SIZE || buf[0..8] != SNAPSHOT_MAGIC {
            warn!(path = %self.path.display(), "snapshot rejected: bad header");
            return Err(SnapshotError::BadMagic);
        }

        let version = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        if version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(version));
        }

        let expected = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);
        let payload = &buf[HEADER_SIZE..];
        let actual = crc32fast::hash(payload);
        if actual != expected {
            warn!(path = %self.path.display(), "snapshot rejected: checksum mismatch");
            return Err(SnapshotError::ChecksumMismatch { expected, actual });
        }

        let data =
            bincode::deserialize(payload).map_err(|e| SnapshotError::Decode(e.to_string()))?;
        Ok(Some(data))
    }
}
