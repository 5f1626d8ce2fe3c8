//! Shared error re-exports. Binaries work in `anyhow::Result` at the
//! boundary; domain modules return their own leaf error types, collected
//! here for discoverability.

pub use crate::frame::FrameError;
pub use crate::registry::RegistryFullError;
pub use crate::relay::RelayError;
