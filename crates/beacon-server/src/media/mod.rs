//! Storage unit lifecycle.

mod identity;
mod medialist;
mod mountpoint;

pub use identity::MediaIdentity;
pub use medialist::MediaList;
pub use mountpoint::Mountpoint;
