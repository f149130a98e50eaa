// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Error types for frame capture.

use std::{io, path::PathBuf};
use thiserror::Error;

/// Result type alias using [`CaptureError`].
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Errors raised while opening, mapping or reading physical memory.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The physical-memory device could not be opened.
    #[error("failed to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A window of physical memory could not be mapped.
    #[error("failed to map {len:#x} bytes at {address:#010x}: {source}")]
    Map {
        address: u64,
        len: usize,
        #[source]
        source: io::Error,
    },

    /// An access was attempted against a region that never got mapped.
    #[error("access to {address:#010x} through an unmapped region")]
    UnmappedAccess { address: u64 },

    /// The accessed byte range does not fall inside the mapped window.
    #[error("{width}-byte access at {address:#010x} is outside the mapped window")]
    OutOfWindow { address: u64, width: usize },

    /// The declared payload length does not fit the destination.
    #[error("payload declares {declared} bytes but only {capacity} are available")]
    PayloadOverflow { declared: u64, capacity: u64 },

    /// The channel is owned by another capture.
    #[error("channel {channel} is busy")]
    ChannelBusy { channel: u32 },

    /// Malformed CGI query string.
    #[error("invalid query: {0}")]
    Query(String),

    /// Invalid register layout or capture configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error while writing the payload out.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CaptureError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Returns true for the errors that come from mapping physical memory.
    pub fn is_map_failure(&self) -> bool {
        matches!(self, Self::Map { .. })
    }
}

impl From<serde_json::Error> for CaptureError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(format!("invalid profile: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_message_is_hex() {
        let err = CaptureError::Map {
            address: 0x4000_0000,
            len: 0x1000,
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        let msg = err.to_string();
        assert!(msg.contains("0x40000000"), "{msg}");
        assert!(msg.contains("0x1000"), "{msg}");
        assert!(err.is_map_failure());
    }

    #[test]
    fn test_overflow_message() {
        let err = CaptureError::PayloadOverflow {
            declared: 32,
            capacity: 16,
        };
        assert_eq!(
            err.to_string(),
            "payload declares 32 bytes but only 16 are available"
        );
        assert!(!err.is_map_failure());
    }
}
