//! License Module
//!
//! License records, their durable store, the remote licensing authority
//! client, and the background job that keeps the two in sync.

pub mod bootstrap;
pub mod client;
pub mod record;
pub mod revalidation;
pub mod store;

pub use bootstrap::{Bootstrap, LicenseBootstrap};
pub use client::{AuthorityError, CloudClient, LicenseAuthority};
pub use record::{LicenseRecord, LicenseStatus, NewLicense};
pub use revalidation::{RevalidationLoop, RevalidationSummary, Revalidator};
pub use store::{LicenseStore, SqliteLicenseStore, StoreError, StoreHandle};
