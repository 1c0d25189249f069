// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! strata-core: journaled grid mutation with a speculative overlay.
//!
//! Mutations are requested, not performed: each request becomes an ordered
//! journal record whose would-be state is staged into an overlay readers see
//! immediately, while the real store changes only when the batch ends and
//! the commit walk replays records in submission order. Hooks run inside the
//! walk and may re-enter it; their follow-up records join the same batch at
//! increased depth.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::unreadable_literal,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::many_single_char_names,
    clippy::module_name_repetitions,
    clippy::use_self,
    clippy::cognitive_complexity,
    clippy::option_if_let_else,
    clippy::significant_drop_tightening,
    clippy::doc_markdown,
    clippy::too_many_lines,
    clippy::struct_excessive_bools,
    clippy::too_long_first_doc_paragraph,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::similar_names,
    clippy::trivially_copy_pass_by_ref,
    clippy::needless_pass_by_value,
    clippy::multiple_crate_versions
)]

mod attachment;
mod config;
mod coord;
mod hooks;
mod journal;
mod overlay;
mod phase;
mod receipt;
mod snapshot;
mod state;
mod store;
mod tracker;

// Re-exports for stable public API
/// Attached-object record and identifier.
pub use attachment::{Attachment, AttachmentId};
/// Tracker tuning knobs.
pub use config::{TrackerConfig, DEFAULT_MAX_DEPTH};
/// Grid coordinates and face directions.
pub use coord::{CellPos, Direction};
/// Behavior hooks, their error type, and well-known game rules.
pub use hooks::{rules, EffectError, NullHooks, WorldHooks};
/// Journal records, entries, and sequence numbers.
pub use journal::{CellOp, Journal, JournalEntry, OpSeq};
/// Speculative overlay, its LIFO frames, and the composite read view.
pub use overlay::{AttachmentOp, Overlay, OverlayFrame, StagedBinding, StagedView};
/// Phase stack: cause chains, dispatch policies, handles, spawn buffers.
pub use phase::{Cause, PhaseContext, PhaseHandle, PhasePolicy, PhaseStack, SpawnRequest};
/// Batch receipts with canonical digests.
pub use receipt::{BatchReceipt, Digest, Disposition, ReceiptEntry};
/// Captured cell pre-images.
pub use snapshot::CellSnapshot;
/// Cell state, kind ids, transition classes, and dispatch flags.
pub use state::{CellState, ChangeFlags, ChangeKind, KindId};
/// The real backing store.
pub use store::GridStore;
/// The tracker orchestrating journal, overlay, phases, and store.
pub use tracker::{BatchId, EffectCtx, SpawnDisposition, Tracker, TrackerError};
