//! AI augmentation for dealmatch: rationale and deal-structure suggestions
//! for a scored pair, and agreement drafting for a chosen structure.
//!
//! Completion output is untrusted and validated before use. A schema
//! violation earns exactly one stricter retry. Every path has a deterministic
//! fallback, so a match or draft never waits on the model.

mod adapter;
mod fallback;
mod http;
mod parse;
mod prompt;

pub mod drafting;
pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use adapter::{AugmentConfig, Augmentation, Augmenter};
pub use error::{Error, Result};
pub use http::{HttpCompleter, HttpCompleterConfig};
pub use parse::{parse_structures, MAX_STRUCTURES};
