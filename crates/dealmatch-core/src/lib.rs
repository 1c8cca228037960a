//! Core types and trait definitions for the dealmatch marketplace.
//!
//! This crate is deliberately free of HTTP and database dependencies. The
//! scorer and the agreement state machine live here because they are pure;
//! persistence and text completion are expressed as traits.

pub mod agreement;
pub mod completion;
pub mod entitlement;
pub mod error;
pub mod listing;
pub mod matching;
pub mod scoring;
pub mod store;
pub mod terms;
pub mod user;

pub use error::{Error, Result};
