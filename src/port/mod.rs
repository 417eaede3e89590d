//! Port traits at the seams of the runner
//!
//! Business policy, durable storage and the notification pull interface are
//! injected through these traits; the runner core never names a concrete
//! implementation.

pub mod log;
pub mod policy;
pub mod store;
