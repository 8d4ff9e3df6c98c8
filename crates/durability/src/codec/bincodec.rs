//! Format version 1: bincode encoding.

use super::SnapshotCodec;
use crate::snapshot_types::{TransactionEdit, TransactionSnapshot};
use palisade_core::Result;

/// Version tag for the bincode encoding.
pub const CODEC_VERSION_BINCODE: u8 = 1;

/// The original snapshot encoding, kept registered so snapshots written by
/// older deployments stay readable.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl SnapshotCodec for BincodeCodec {
    fn version(&self) -> u8 {
        CODEC_VERSION_BINCODE
    }

    fn encode_snapshot(&self, snapshot: &TransactionSnapshot) -> Result<Vec<u8>> {
        Ok(bincode::serialize(snapshot)?)
    }

    fn decode_snapshot(&self, bytes: &[u8]) -> Result<TransactionSnapshot> {
        Ok(bincode::deserialize(bytes)?)
    }

    fn encode_edit(&self, edit: &TransactionEdit) -> Result<Vec<u8>> {
        Ok(bincode::serialize(edit)?)
    }

    fn decode_edit(&self, bytes: &[u8]) -> Result<TransactionEdit> {
        Ok(bincode::deserialize(bytes)?)
    }
}
