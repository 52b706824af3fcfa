//! Transfer history for Xhare.
//!
//! Every session that reaches a terminal state leaves one entry here, so a
//! user can review what was sent and received after dismissing it.
//!
//! ## Features
//!
//! - Records finished transfers in both directions
//! - Respects the `max_entries` limit from configuration
//! - Optionally persists to a JSON file in the data directory

use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::HistoryConfig;
use crate::error::{Error, Result};
use crate::gateway::TransferId;
use crate::session::{IncomingTransfer, OutgoingTransfer};

/// Direction of a finished transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    /// File was sent to another device
    Sent,
    /// File was received from another device
    Received,
}

impl std::fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sent => write!(f, "Sent"),
            Self::Received => write!(f, "Received"),
        }
    }
}

/// How a transfer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferOutcome {
    /// The whole file arrived
    Completed,
    /// The transfer failed or was rejected
    Failed,
}

impl std::fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// A single transfer history entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferHistoryEntry {
    /// Unique identifier for this entry
    pub id: Uuid,
    /// Unix timestamp when the transfer ended
    pub timestamp: u64,
    /// Direction of the transfer
    pub direction: TransferDirection,
    /// Host name of the remote device
    pub peer_name: String,
    /// Engine transfer identifier, when known
    pub transfer_id: Option<TransferId>,
    /// File name
    pub file_name: String,
    /// File size in bytes
    pub file_size: u64,
    /// Progress reached before the transfer ended
    pub progress: u8,
    /// How the transfer ended
    pub outcome: TransferOutcome,
    /// Directory a received file was saved in
    pub saved_path: Option<PathBuf>,
    /// Error message (if failed)
    pub error_message: Option<String>,
}

impl TransferHistoryEntry {
    /// Create a completed entry with the current timestamp.
    #[must_use]
    pub fn new(
        direction: TransferDirection,
        peer_name: impl Into<String>,
        file_name: impl Into<String>,
        file_size: u64,
    ) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self {
            id: Uuid::new_v4(),
            timestamp,
            direction,
            peer_name: peer_name.into(),
            transfer_id: None,
            file_name: file_name.into(),
            file_size,
            progress: 0,
            outcome: TransferOutcome::Completed,
            saved_path: None,
            error_message: None,
        }
    }

    /// Build an entry from a finished outgoing session.
    #[must_use]
    pub fn from_outgoing(transfer: &OutgoingTransfer) -> Self {
        let mut entry = Self::new(
            TransferDirection::Sent,
            &transfer.receiver_device_name,
            &transfer.file_name,
            transfer.file_size,
        )
        .with_progress(transfer.progress);
        entry.transfer_id.clone_from(&transfer.transfer_id);
        entry
    }

    /// Build an entry from a finished incoming session.
    #[must_use]
    pub fn from_incoming(transfer: &IncomingTransfer) -> Self {
        let entry = Self::new(
            TransferDirection::Received,
            &transfer.sender_device_name,
            &transfer.file_name,
            transfer.file_size,
        )
        .with_transfer_id(transfer.transfer_id.clone())
        .with_progress(transfer.progress);

        match &transfer.saved_path {
            Some(path) => entry.with_saved_path(path.clone()),
            None => entry,
        }
    }

    /// Set the engine transfer identifier.
    #[must_use]
    pub fn with_transfer_id(mut self, transfer_id: TransferId) -> Self {
        self.transfer_id = Some(transfer_id);
        self
    }

    /// Set the progress reached.
    #[must_use]
    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = progress.min(100);
        self
    }

    /// Set the directory the file was saved in.
    #[must_use]
    pub fn with_saved_path(mut self, path: PathBuf) -> Self {
        self.saved_path = Some(path);
        self
    }

    /// Set an error message.
    #[must_use]
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self.outcome = TransferOutcome::Failed;
        self
    }

    /// Get the timestamp as a human-readable string.
    #[must_use]
    pub fn formatted_timestamp(&self) -> String {
        use chrono::{DateTime, Utc};
        let timestamp_i64 = i64::try_from(self.timestamp).unwrap_or(i64::MAX);
        let dt = DateTime::<Utc>::from_timestamp(timestamp_i64, 0);
        dt.map_or_else(
            || "Unknown".to_string(),
            |dt| dt.format("%Y-%m-%d %H:%M").to_string(),
        )
    }
}

/// Serializable wrapper for the history database.
#[derive(Debug, Serialize, Deserialize)]
struct HistoryDatabase {
    /// Version of the history database format
    version: u32,
    /// Transfer history entries, newest first
    entries: Vec<TransferHistoryEntry>,
}

/// Transfer history store.
#[derive(Debug)]
pub struct HistoryStore {
    /// Backing file, if persisted
    path: Option<PathBuf>,
    /// History entries (newest first)
    entries: Vec<TransferHistoryEntry>,
    /// Configuration settings
    config: HistoryConfig,
}

impl HistoryStore {
    /// Create a store that lives only in memory.
    #[must_use]
    pub const fn in_memory(config: HistoryConfig) -> Self {
        Self {
            path: None,
            entries: Vec::new(),
            config,
        }
    }

    /// Open the store the configuration asks for.
    ///
    /// Persisted stores live at [`HistoryStore::default_path`].
    ///
    /// # Errors
    ///
    /// Returns an error if a persisted store exists but cannot be read.
    pub fn open(config: HistoryConfig) -> Result<Self> {
        if !config.persist {
            return Ok(Self::in_memory(config));
        }
        let path = Self::default_path().unwrap_or_else(|| PathBuf::from("history.json"));
        Self::load_from(path, config)
    }

    /// Load from a specific path, starting empty if the file is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load_from(path: PathBuf, config: HistoryConfig) -> Result<Self> {
        if !path.exists() {
            return Ok(Self {
                path: Some(path),
                entries: Vec::new(),
                config,
            });
        }

        let file = fs::File::open(&path).map_err(|e| {
            Error::HistoryError(format!(
                "Failed to open history store at {}: {}",
                path.display(),
                e
            ))
        })?;

        let db: HistoryDatabase = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            Error::HistoryError(format!(
                "Failed to parse history store at {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut entries = db.entries;
        entries.truncate(config.max_entries);

        Ok(Self {
            path: Some(path),
            entries,
            config,
        })
    }

    /// Get the default history store path.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        crate::config::Config::data_dir().map(|dir| dir.join("history.json"))
    }

    /// Write the store to its backing file, if it has one.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::HistoryError(format!(
                    "Failed to create history store directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let db = HistoryDatabase {
            version: 1,
            entries: self.entries.clone(),
        };

        let file = fs::File::create(path).map_err(|e| {
            Error::HistoryError(format!(
                "Failed to create history store at {}: {}",
                path.display(),
                e
            ))
        })?;

        serde_json::to_writer_pretty(BufWriter::new(file), &db).map_err(|e| {
            Error::HistoryError(format!(
                "Failed to write history store at {}: {}",
                path.display(),
                e
            ))
        })?;

        Ok(())
    }

    /// Add a new entry to the history.
    ///
    /// The entry is added at the beginning (newest first) and old entries are
    /// pruned past `max_entries`. Disabled stores drop the entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be saved.
    pub fn add(&mut self, entry: TransferHistoryEntry) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        self.entries.insert(0, entry);
        self.entries.truncate(self.config.max_entries);

        self.save()
    }

    /// List history entries.
    ///
    /// # Arguments
    ///
    /// * `limit` - Maximum number of entries to return (None for all)
    #[must_use]
    pub fn list(&self, limit: Option<usize>) -> &[TransferHistoryEntry] {
        limit.map_or_else(
            || &self.entries[..],
            |n| &self.entries[..n.min(self.entries.len())],
        )
    }

    /// Get an entry by index (0 = most recent).
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&TransferHistoryEntry> {
        self.entries.get(index)
    }

    /// Get an entry by ID.
    #[must_use]
    pub fn find_by_id(&self, id: &Uuid) -> Option<&TransferHistoryEntry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    /// Get the total number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the history is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear all history entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be saved.
    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.save()
    }

    /// Get the path to the history store file.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
