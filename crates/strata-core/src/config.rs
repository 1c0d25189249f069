// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tracker tunables.
use crate::PhasePolicy;

/// Default bound on record recursion depth.
pub const DEFAULT_MAX_DEPTH: u32 = 1000;

/// Tunables for a [`Tracker`](crate::Tracker).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackerConfig {
    /// Diagnostic bound on the recursion depth of enqueued records.
    /// Submissions beyond it are refused and reported, never silently
    /// swallowed.
    pub max_depth: u32,
    /// Policy applied by [`Tracker::begin_default`](crate::Tracker::begin_default).
    pub default_policy: PhasePolicy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            default_policy: PhasePolicy::default(),
        }
    }
}
