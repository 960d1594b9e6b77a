//! Channel session management.

pub mod actor;

pub use actor::SessionHandle;
