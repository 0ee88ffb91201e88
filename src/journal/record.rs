//! Journal entries and their line encoding
//!
//! One entry per line, tab separated:
//!
//! ```text
//! timestamp<TAB>operation<TAB>artifact_uuid<TAB>payload
//! ```
//!
//! - timestamp: epoch milliseconds
//! - operation: ADD / MARK_COMMITTED / UPDATE_STORAGE_LOCATION / DELETE
//! - payload: JSON artifact (ADD), JSON string (UPDATE_STORAGE_LOCATION),
//!   empty otherwise
//!
//! serde_json escapes control characters, so an encoded payload never
//! contains a raw tab or newline.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use super::errors::{JournalError, JournalResult};
use crate::artifact::Artifact;

/// First line of every segment
pub const SEGMENT_HEADER: &str = "timestamp\toperation\tartifact_uuid\tpayload";

/// Kind of index mutation an entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JournalOp {
    Add,
    MarkCommitted,
    UpdateStorageLocation,
    Delete,
}

impl JournalOp {
    pub fn as_str(self) -> &'static str {
        match self {
            JournalOp::Add => "ADD",
            JournalOp::MarkCommitted => "MARK_COMMITTED",
            JournalOp::UpdateStorageLocation => "UPDATE_STORAGE_LOCATION",
            JournalOp::Delete => "DELETE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ADD" => Some(JournalOp::Add),
            "MARK_COMMITTED" => Some(JournalOp::MarkCommitted),
            "UPDATE_STORAGE_LOCATION" => Some(JournalOp::UpdateStorageLocation),
            "DELETE" => Some(JournalOp::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for JournalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation-specific data carried by an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalPayload {
    /// Full artifact as added
    Artifact(Box<Artifact>),
    /// New storage location
    StorageUrl(String),
    None,
}

/// One recorded index mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub op: JournalOp,
    pub uuid: Uuid,
    pub payload: JournalPayload,
}

impl JournalEntry {
    pub fn add(artifact: &Artifact) -> Self {
        Self {
            timestamp: Utc::now(),
            op: JournalOp::Add,
            uuid: artifact.uuid(),
            payload: JournalPayload::Artifact(Box::new(artifact.clone())),
        }
    }

    pub fn mark_committed(uuid: Uuid) -> Self {
        Self {
            timestamp: Utc::now(),
            op: JournalOp::MarkCommitted,
            uuid,
            payload: JournalPayload::None,
        }
    }

    pub fn update_storage_location(uuid: Uuid, storage_url: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            op: JournalOp::UpdateStorageLocation,
            uuid,
            payload: JournalPayload::StorageUrl(storage_url.into()),
        }
    }

    pub fn delete(uuid: Uuid) -> Self {
        Self {
            timestamp: Utc::now(),
            op: JournalOp::Delete,
            uuid,
            payload: JournalPayload::None,
        }
    }

    /// Encodes the entry as one line, without the trailing newline.
    pub fn encode(&self) -> JournalResult<String> {
        let payload = match &self.payload {
            JournalPayload::Artifact(artifact) => serde_json::to_string(artifact),
            JournalPayload::StorageUrl(url) => serde_json::to_string(url),
            JournalPayload::None => Ok(String::new()),
        }
        .map_err(|e| {
            JournalError::append_failed(
                format!("Failed to encode {} payload for {}", self.op, self.uuid),
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;

        Ok(format!(
            "{}\t{}\t{}\t{}",
            self.timestamp.timestamp_millis(),
            self.op,
            self.uuid,
            payload
        ))
    }

    /// Decodes one line. `line_no` is only used for error context.
    pub fn decode(line: &str, line_no: u64) -> JournalResult<Self> {
        let columns: Vec<&str> = line.splitn(4, '\t').collect();
        if columns.len() != 4 {
            return Err(JournalError::malformed_at_line(
                line_no,
                format!("expected 4 columns, found {}", columns.len()),
            ));
        }

        let millis: i64 = columns[0].parse().map_err(|_| {
            JournalError::malformed_at_line(line_no, format!("bad timestamp '{}'", columns[0]))
        })?;
        let timestamp = Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
            JournalError::malformed_at_line(line_no, format!("timestamp out of range: {}", millis))
        })?;

        let op = JournalOp::parse(columns[1]).ok_or_else(|| {
            JournalError::malformed_at_line(line_no, format!("unknown operation '{}'", columns[1]))
        })?;

        let uuid = Uuid::parse_str(columns[2]).map_err(|e| {
            JournalError::malformed_at_line(line_no, format!("bad artifact uuid: {}", e))
        })?;

        let raw = columns[3];
        let payload = match op {
            JournalOp::Add => {
                let artifact: Artifact = serde_json::from_str(raw).map_err(|e| {
                    JournalError::malformed_at_line(line_no, format!("bad artifact payload: {}", e))
                })?;
                if artifact.uuid() != uuid {
                    return Err(JournalError::malformed_at_line(
                        line_no,
                        "artifact payload uuid does not match entry uuid",
                    ));
                }
                JournalPayload::Artifact(Box::new(artifact))
            }
            JournalOp::UpdateStorageLocation => {
                let url: String = serde_json::from_str(raw).map_err(|e| {
                    JournalError::malformed_at_line(
                        line_no,
                        format!("bad storage url payload: {}", e),
                    )
                })?;
                JournalPayload::StorageUrl(url)
            }
            JournalOp::MarkCommitted | JournalOp::Delete => JournalPayload::None,
        };

        Ok(Self {
            timestamp,
            op,
            uuid,
            payload,
        })
    }
}
