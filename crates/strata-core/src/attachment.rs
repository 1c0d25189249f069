// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Secondary objects bound to cells.
//!
//! An attachment is the mutable companion a cell can carry alongside its
//! [`CellState`](crate::CellState): inventories, signal emitters, whatever the
//! host hangs off a position. The subsystem treats the payload as opaque
//! bytes; its job is the lifecycle — capture out of the store, travel inside
//! a pending record, re-bind (or retire) at commit.
//!
//! ## In-flight capture marker
//!
//! While an attachment sits inside a pending record, its `captured` marker is
//! set. Processing clears the marker exactly once per transition, immediately
//! before the attachment is bound into the real store or retired. The marker
//! is how hosts distinguish "absent because removed" from "absent because in
//! flight" when they observe a position mid-batch.
use core::fmt;

use bytes::Bytes;

/// Stable identity of an attachment, independent of where it is bound.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AttachmentId(u64);

impl AttachmentId {
    /// Builds an id from a raw value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a{:016x}", self.0)
    }
}

/// A secondary object bound (or about to be bound) to a cell.
///
/// Cloning is cheap: the payload is reference-counted [`Bytes`]. The clone
/// carries the marker state it had at capture time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    id: AttachmentId,
    kind: crate::KindId,
    payload: Bytes,
    captured: bool,
}

impl Attachment {
    /// Builds an attachment with the marker clear.
    #[must_use]
    pub const fn new(id: AttachmentId, kind: crate::KindId, payload: Bytes) -> Self {
        Self {
            id,
            kind,
            payload,
            captured: false,
        }
    }

    /// Identity of this attachment.
    #[must_use]
    pub const fn id(&self) -> AttachmentId {
        self.id
    }

    /// Kind of this attachment.
    #[must_use]
    pub const fn kind(&self) -> crate::KindId {
        self.kind
    }

    /// Opaque payload bytes.
    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Whether the in-flight marker is set.
    #[must_use]
    pub const fn is_captured(&self) -> bool {
        self.captured
    }

    /// Sets the in-flight marker. Called when the attachment is captured into
    /// a pending record.
    pub fn mark_captured(&mut self) {
        self.captured = true;
    }

    /// Clears the in-flight marker, returning whether it was set.
    ///
    /// Processing calls this exactly once per transition the attachment
    /// participates in; the return value lets callers assert that discipline.
    pub fn release_capture(&mut self) -> bool {
        let was = self.captured;
        self.captured = false;
        was
    }
}

impl fmt::Display for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.id, self.kind)?;
        if self.captured {
            f.write_str("*")?;
        }
        Ok(())
    }
}
