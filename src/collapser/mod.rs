//! Request collapsing subsystem.
//!
//! Many single-item requests arriving within a short window are merged into
//! one batch command execution; each caller receives the element of the batch
//! result at its own position.

pub mod batcher;

pub use batcher::{CollapsedFuture, Collapser, CollapserError, CollapserSettings};
