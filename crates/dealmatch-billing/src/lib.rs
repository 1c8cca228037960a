//! Billing webhook handling for dealmatch.
//!
//! Verifies signed processor deliveries, decodes them into typed events and
//! applies the resulting entitlement changes through the
//! [`dealmatch_core::store::MarketStore`] exactly once per event id.

pub mod error;
pub mod event;
pub mod signature;
pub mod synchronizer;

pub use error::{Error, Result};
pub use signature::{SignatureVerifier, SIGNATURE_HEADER};
pub use synchronizer::{EntitlementSynchronizer, ProcessingResult};
