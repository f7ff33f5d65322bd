//! Session Management Module
//!
//! One session per caller, keyed by an opaque token issued by the host.
//! Each session owns the channel its requests arrive on and its replies
//! leave by.

pub mod state;
pub mod table;

pub use state::{SessionInfo, SessionState};
pub use table::{DeliveryOutcome, SessionError, SessionTable};
