// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Cell occupant kinds, cell state values, and change metadata.
use core::fmt;
use core::ops::BitOr;

use blake3::Hasher;

/// Compact identifier for the kind of thing occupying a cell.
///
/// Kind zero ([`KindId::EMPTY`]) is reserved for the vacant cell. Hosts
/// typically assign kinds from their own registry; [`KindId::from_label`]
/// derives a stable id from a label for tests and fixtures.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KindId(pub u32);

impl KindId {
    /// The vacant kind. A cell holding it contains nothing.
    pub const EMPTY: Self = Self(0);

    /// Derives a stable kind id from a label.
    ///
    /// Takes the low 32 bits of `blake3("kind:" || label)`. Collisions are
    /// possible across labels that share the same low fingerprint (and a
    /// label may, in principle, collide with the reserved empty kind);
    /// choose labels accordingly.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(b"kind:");
        hasher.update(label.as_bytes());
        let digest = hasher.finalize();
        let mut low = [0u8; 4];
        low.copy_from_slice(&digest.as_bytes()[..4]);
        Self(u32::from_le_bytes(low))
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for KindId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "k{:08x}", self.0)
    }
}

/// Immutable value describing what a cell holds.
///
/// A state is an occupant kind plus opaque data bits (orientation, growth
/// stage, power level — whatever the host packs in). The subsystem never
/// interprets `data`; it only compares states for equality and splits out the
/// kind when deciding whether a transition vacates the old occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CellState {
    kind: KindId,
    data: u32,
}

impl CellState {
    /// The vacant cell state.
    pub const EMPTY: Self = Self {
        kind: KindId::EMPTY,
        data: 0,
    };

    /// Builds a state from a kind and opaque data bits.
    #[must_use]
    pub const fn new(kind: KindId, data: u32) -> Self {
        Self { kind, data }
    }

    /// Builds a state with zeroed data bits.
    #[must_use]
    pub const fn of(kind: KindId) -> Self {
        Self { kind, data: 0 }
    }

    /// The occupant kind.
    #[must_use]
    pub const fn kind(self) -> KindId {
        self.kind
    }

    /// The opaque data bits.
    #[must_use]
    pub const fn data(self) -> u32 {
        self.data
    }

    /// Whether this is the vacant state's kind.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.kind.0 == KindId::EMPTY.0
    }
}

impl fmt::Display for CellState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() && self.data == 0 {
            f.write_str("empty")
        } else {
            write!(f, "{}:{:x}", self.kind, self.data)
        }
    }
}

/// Classification of a state transition, for diagnostics and receipts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChangeKind {
    /// Occupant removed; the cell becomes vacant.
    Break,
    /// Occupant removed by ambient decay rather than an actor.
    Decay,
    /// Occupant advanced by growth logic.
    Grow,
    /// Same kind, different data bits.
    Modify,
    /// Occupant placed into a vacant cell.
    Place,
}

impl ChangeKind {
    /// Derives the classification from the old and new states.
    ///
    /// `Decay` and `Grow` are never derived; callers that know the ambient
    /// cause supply them explicitly.
    #[must_use]
    pub const fn classify(old: CellState, new: CellState) -> Self {
        if new.is_empty() && !old.is_empty() {
            Self::Break
        } else if old.is_empty() && !new.is_empty() {
            Self::Place
        } else {
            Self::Modify
        }
    }

    /// Stable single-byte tag used in receipt digests.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Break => b'b',
            Self::Decay => b'd',
            Self::Grow => b'g',
            Self::Modify => b'm',
            Self::Place => b'p',
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Break => "break",
            Self::Decay => "decay",
            Self::Grow => "grow",
            Self::Modify => "modify",
            Self::Place => "place",
        };
        f.write_str(name)
    }
}

/// Per-record side-effect mask for state changes.
///
/// Hand-packed bits on a transparent wrapper; the subsystem carries no
/// bitflags machinery. Bit 0 enqueues neighbor notifications, bit 1
/// dispatches client sync, bit 2 runs on-added logic for the new state.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChangeFlags(u8);

impl ChangeFlags {
    /// No side effects beyond the store write.
    pub const NONE: Self = Self(0);
    /// Enqueue notifications to the six face neighbors after commit.
    pub const NOTIFY_NEIGHBORS: Self = Self(1 << 0);
    /// Dispatch client sync for the position after commit.
    pub const SYNC_CLIENTS: Self = Self(1 << 1);
    /// Run kind-specific on-added logic when the occupant kind changes.
    pub const PHYSICS: Self = Self(1 << 2);
    /// All side effects.
    pub const ALL: Self = Self(0b111);

    /// Whether every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of the two masks.
    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// `self` with every bit of `other` cleared.
    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Raw bits, for diagnostics.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for ChangeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.with(rhs)
    }
}

impl fmt::Display for ChangeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("none");
        }
        let mut first = true;
        for (bit, name) in [
            (Self::NOTIFY_NEIGHBORS, "nbr"),
            (Self::SYNC_CLIENTS, "cli"),
            (Self::PHYSICS, "phy"),
        ] {
            if self.contains(bit) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}
