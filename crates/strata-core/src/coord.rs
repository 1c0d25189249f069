// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Cell coordinates and face adjacency.
use core::fmt;

/// Position of a cell on the grid, addressed by three signed axes.
///
/// `CellPos` is plain data: `Copy`, hashable, and totally ordered so that
/// `BTreeMap<CellPos, _>` iteration is deterministic. The ordering is
/// `(x, y, z)` lexicographic and carries no spatial meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CellPos {
    /// East/west axis.
    pub x: i32,
    /// Vertical axis.
    pub y: i32,
    /// North/south axis.
    pub z: i32,
}

impl CellPos {
    /// Builds a position from its three axes.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Returns the adjacent position one step along `dir`.
    ///
    /// Axis arithmetic wraps on overflow; positions at the numeric edge of an
    /// axis are the caller's responsibility to bound.
    #[must_use]
    pub const fn offset(self, dir: Direction) -> Self {
        let (dx, dy, dz) = dir.delta();
        Self {
            x: self.x.wrapping_add(dx),
            y: self.y.wrapping_add(dy),
            z: self.z.wrapping_add(dz),
        }
    }

    /// Returns the six face-adjacent positions in canonical [`Direction::ALL`]
    /// order.
    ///
    /// Neighbor dispatch walks this array as-is, so the order is part of the
    /// deterministic replay contract: two runs enqueue notifications for the
    /// same position in the same sequence.
    #[must_use]
    pub const fn face_neighbors(self) -> [Self; 6] {
        [
            self.offset(Direction::Down),
            self.offset(Direction::Up),
            self.offset(Direction::North),
            self.offset(Direction::South),
            self.offset(Direction::West),
            self.offset(Direction::East),
        ]
    }
}

impl fmt::Display for CellPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// One of the six grid faces.
///
/// The discriminant order (down, up, north, south, west, east) is canonical:
/// neighbor iteration and notification enqueue order follow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Direction {
    /// Negative `y`.
    Down,
    /// Positive `y`.
    Up,
    /// Negative `z`.
    North,
    /// Positive `z`.
    South,
    /// Negative `x`.
    West,
    /// Positive `x`.
    East,
}

impl Direction {
    /// All six directions in canonical order.
    pub const ALL: [Self; 6] = [
        Self::Down,
        Self::Up,
        Self::North,
        Self::South,
        Self::West,
        Self::East,
    ];

    /// Unit offset of this direction as `(dx, dy, dz)`.
    #[must_use]
    pub const fn delta(self) -> (i32, i32, i32) {
        match self {
            Self::Down => (0, -1, 0),
            Self::Up => (0, 1, 0),
            Self::North => (0, 0, -1),
            Self::South => (0, 0, 1),
            Self::West => (-1, 0, 0),
            Self::East => (1, 0, 0),
        }
    }

    /// The direction pointing back across the same face.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Down => Self::Up,
            Self::Up => Self::Down,
            Self::North => Self::South,
            Self::South => Self::North,
            Self::West => Self::East,
            Self::East => Self::West,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Down => "down",
            Self::Up => "up",
            Self::North => "north",
            Self::South => "south",
            Self::West => "west",
            Self::East => "east",
        };
        f.write_str(name)
    }
}
