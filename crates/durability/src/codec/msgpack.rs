//! Format version 2: MessagePack encoding.

use super::SnapshotCodec;
use crate::snapshot_types::{TransactionEdit, TransactionSnapshot};
use palisade_core::{Error, Result};

/// Version tag for the MessagePack encoding.
pub const CODEC_VERSION_MSGPACK: u8 = 2;

/// Current snapshot encoding. More compact than v1 for the id-heavy maps
/// that dominate a busy manager's state.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessagePackCodec;

impl SnapshotCodec for MessagePackCodec {
    fn version(&self) -> u8 {
        CODEC_VERSION_MSGPACK
    }

    fn encode_snapshot(&self, snapshot: &TransactionSnapshot) -> Result<Vec<u8>> {
        rmp_serde::to_vec(snapshot).map_err(|e| Error::Serialization(e.to_string()))
    }

    fn decode_snapshot(&self, bytes: &[u8]) -> Result<TransactionSnapshot> {
        rmp_serde::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }

    fn encode_edit(&self, edit: &TransactionEdit) -> Result<Vec<u8>> {
        rmp_serde::to_vec(edit).map_err(|e| Error::Serialization(e.to_string()))
    }

    fn decode_edit(&self, bytes: &[u8]) -> Result<TransactionEdit> {
        rmp_serde::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }
}
