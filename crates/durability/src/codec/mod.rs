//! Versioned snapshot codecs.
//!
//! A codec turns a `TransactionSnapshot` (and individual `TransactionEdit`s)
//! into an opaque byte encoding. Every durable file is tagged with the codec
//! version that produced it, and the `CodecRegistry` maps tag -> codec on
//! read, so encodings from different releases can coexist in one snapshot
//! directory. An unknown tag is an explicit `UnsupportedCodecVersion` error,
//! never a best-effort decode.

mod bincodec;
mod msgpack;

pub use bincodec::BincodeCodec;
pub use msgpack::MessagePackCodec;

use crate::snapshot_types::{TransactionEdit, TransactionSnapshot};
use palisade_core::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A versioned (de)serializer for transaction state.
pub trait SnapshotCodec: Send + Sync {
    /// Format-version tag written into every file this codec produces.
    fn version(&self) -> u8;

    /// Encode a full snapshot.
    fn encode_snapshot(&self, snapshot: &TransactionSnapshot) -> Result<Vec<u8>>;

    /// Decode a full snapshot.
    fn decode_snapshot(&self, bytes: &[u8]) -> Result<TransactionSnapshot>;

    /// Encode a single edit-log entry.
    fn encode_edit(&self, edit: &TransactionEdit) -> Result<Vec<u8>>;

    /// Decode a single edit-log entry.
    fn decode_edit(&self, bytes: &[u8]) -> Result<TransactionEdit>;
}

/// Registry mapping format-version tags to codec implementations.
///
/// Writes always use the highest registered version; reads select by the tag
/// found in the file.
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: BTreeMap<u8, Arc<dyn SnapshotCodec>>,
}

impl CodecRegistry {
    /// Empty registry. Most callers want [`CodecRegistry::default`].
    pub fn new() -> Self {
        CodecRegistry {
            codecs: BTreeMap::new(),
        }
    }

    /// Register a codec, replacing any previous one with the same version.
    pub fn register(&mut self, codec: Arc<dyn SnapshotCodec>) {
        self.codecs.insert(codec.version(), codec);
    }

    /// Codec for a specific format-version tag.
    pub fn get(&self, version: u8) -> Result<&Arc<dyn SnapshotCodec>> {
        self.codecs
            .get(&version)
            .ok_or(Error::UnsupportedCodecVersion(version))
    }

    /// Highest-versioned codec, used for all new writes.
    pub fn latest(&self) -> Result<&Arc<dyn SnapshotCodec>> {
        self.codecs
            .values()
            .next_back()
            .ok_or_else(|| Error::InvalidOperation("codec registry is empty".to_string()))
    }

    /// Registered version tags, ascending.
    pub fn versions(&self) -> Vec<u8> {
        self.codecs.keys().copied().collect()
    }
}

impl Default for CodecRegistry {
    /// Registry with every codec this build supports.
    fn default() -> Self {
        let mut registry = CodecRegistry::new();
        registry.register(Arc::new(BincodeCodec));
        registry.register(Arc::new(MessagePackCodec));
        registry
    }
}
