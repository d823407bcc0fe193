//! Domain models.
//!
//! These mirror the rows of the configuration and operational stores. The
//! HTTP crate serializes `ClientSummary` directly; everything else stays
//! internal to the lifecycle logic.

pub mod client;
pub mod grant;
pub mod resource;

pub use client::{
    ClientClaim, ClientProperty, ClientRecord, ClientSecret, ClientStatus, ClientSummary,
    NewClient, Provenance,
};
pub use grant::PersistedGrant;
pub use resource::ApiResource;
