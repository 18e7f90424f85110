//! # tandem-core: operational-transform engine for tandem pads
//!
//! Pure, allocation-light merge algorithms over styled plain-text deltas.
//! Nothing in this crate performs I/O; the collaboration server in
//! `tandem-collab` layers history, fan-out and persistence on top.
//!
//! ## Model
//!
//! ```text
//!  Delta = [Op, Op, ...]            Op = Insert(text, meta)
//!                                      | Delete(len)
//!  document = Delta of Inserts only      | Retain(len, meta)
//!
//!  base_len   = Σ Retain + Σ Delete   (length the delta applies to)
//!  target_len = Σ Retain + Σ Insert   (length it produces)
//! ```
//!
//! ## Algorithms
//!
//! ```text
//!        compose(A, B)            transform(A, B) = (A', B')
//!  doc ──A──► doc' ──B──► doc''        ┌──A──► x ──B'─┐
//!  doc ───── compose(A,B) ───► doc''   doc              ├─► same doc
//!                                      └──B──► y ──A'─┘
//!
//!        invert(D, pre)
//!  pre ──D──► post ──invert(D, pre)──► pre
//! ```
//!
//! Every algorithm is a two-cursor scan that consumes
//! `min(remaining_a, remaining_b)` per step. Inputs whose lengths do not
//! reconcile yield [`OtError`] rather than a panic.
//!
//! ## Modules
//!
//! - [`meta`]: per-character style metadata and its combinators
//! - [`op`]: the three edit operations
//! - [`delta`]: coalescing op sequences
//! - [`compose`], [`transform`], [`invert`]: the merge algorithms
//! - [`sanitize`]: permission clamping for deltas received from clients

pub mod compose;
pub mod delta;
pub mod error;
pub mod invert;
pub mod meta;
pub mod op;
pub mod sanitize;
pub mod transform;

mod cursor;

pub use compose::compose;
pub use delta::Delta;
pub use error::OtError;
pub use invert::invert;
pub use meta::{StyleMeta, UserId};
pub use op::{Op, OpKind};
pub use sanitize::sanitize;
pub use transform::{rebase, transform};
