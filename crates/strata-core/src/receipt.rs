// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Batch receipts: the per-record outcomes of one commit walk.
//!
//! A receipt records, in journal order, what happened to every record the
//! walk considered — applied, cancelled, stale, or failed — plus a canonical
//! digest so two runs of the same batch can be compared byte-for-byte.
use blake3::Hasher;

use crate::phase::Cause;
use crate::tracker::BatchId;
use crate::{CellPos, OpSeq};

/// Canonical 256-bit digest used for receipts.
pub type Digest = [u8; 32];

/// Outcome of one journal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Disposition {
    /// Processed and applied to the real store.
    Applied,
    /// Skipped: cancelled before the walk reached it.
    Cancelled,
    /// Skipped: captured context went stale and the real store diverged.
    Stale,
    /// Abandoned mid-record: a side effect failed; earlier effects of the
    /// record stand, later ones were rolled back with its sandbox frame.
    Failed,
}

impl Disposition {
    /// Stable single-byte code used in the receipt digest.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Applied => 1,
            Self::Cancelled => 2,
            Self::Stale => 3,
            Self::Failed => 4,
        }
    }
}

/// One record and its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReceiptEntry {
    /// Sequence number of the record.
    pub seq: OpSeq,
    /// Position the record acted on.
    pub pos: CellPos,
    /// Record kind tag (same byte [`CellOp::kind_tag`] yields).
    ///
    /// [`CellOp::kind_tag`]: crate::CellOp::kind_tag
    pub kind_tag: u8,
    /// Outcome of the record.
    pub disposition: Disposition,
}

/// Ordered outcomes for one committed batch.
#[derive(Debug, Clone)]
pub struct BatchReceipt {
    batch: BatchId,
    cause: Cause,
    entries: Vec<ReceiptEntry>,
    digest: Digest,
}

impl BatchReceipt {
    pub(crate) fn new(batch: BatchId, cause: Cause, entries: Vec<ReceiptEntry>) -> Self {
        let digest = compute_batch_receipt_digest(&entries);
        Self {
            batch,
            cause,
            entries,
            digest,
        }
    }

    /// Batch identifier the receipt belongs to.
    #[must_use]
    pub fn batch(&self) -> BatchId {
        self.batch
    }

    /// Root cause the batch ran under.
    #[must_use]
    pub fn cause(&self) -> &Cause {
        &self.cause
    }

    /// Entries in journal order.
    #[must_use]
    pub fn entries(&self) -> &[ReceiptEntry] {
        &self.entries
    }

    /// Number of entries that applied.
    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.disposition == Disposition::Applied)
            .count()
    }

    /// Canonical digest of the entries.
    ///
    /// Stable across architectures; depends only on the format version, the
    /// entry count, and ordered per-entry content. The batch id and cause are
    /// excluded so receipts compare across runs with different numbering.
    #[must_use]
    pub fn digest(&self) -> Digest {
        self.digest
    }

    /// Hex rendering of [`BatchReceipt::digest`] for logs.
    #[must_use]
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }
}

fn compute_batch_receipt_digest(entries: &[ReceiptEntry]) -> Digest {
    let mut hasher = Hasher::new();
    // Receipt format version tag.
    hasher.update(&1u16.to_le_bytes());
    // Entry count.
    hasher.update(&(entries.len() as u64).to_le_bytes());
    for entry in entries {
        hasher.update(&entry.seq.value().to_le_bytes());
        hasher.update(&entry.pos.x.to_le_bytes());
        hasher.update(&entry.pos.y.to_le_bytes());
        hasher.update(&entry.pos.z.to_le_bytes());
        hasher.update(&[entry.kind_tag, entry.disposition.code()]);
    }
    hasher.finalize().into()
}
