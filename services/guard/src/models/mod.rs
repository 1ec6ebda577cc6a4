//! Session guard models

pub mod account;
pub mod device;
pub mod event;
pub mod session;

// Re-export for convenience
pub use account::{LockInfo, LockState};
pub use device::DeviceLedgerEntry;
pub use event::{SecurityEvent, SecurityEventDetails, SecurityEventType};
pub use session::{NewSession, Session, hash_token};
