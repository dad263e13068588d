//! Index server for beacon.
//!
//! Wires the pieces that keep the index consistent with the filesystem:
//!
//! - [`Controller`] batches item writes into periodic commits and publishes
//!   [`ServerEvent`](beacon_core::ServerEvent)s to clients.
//! - [`Crawler`] walks one directory subtree, checks mtimes and drives
//!   re-indexing, reacting to kernel change events when available.
//! - [`Mountpoint`] and [`MediaList`] track storage units and their crawlers.
//! - [`DevicePoller`] watches polled drives such as CD-ROMs.
//! - [`BeaconService`] owns all of the above and dispatches [`ServerRequest`]s.

pub mod channels;
mod controller;
pub mod crawler;
pub mod device;
mod hardware;
pub mod media;
mod parser;
mod service;

pub use channels::{Channel, ChannelCache};
pub use controller::Controller;
pub use crawler::{CrawlContext, CrawlPhase, CrawlScheduler, Crawler};
pub use device::{CdromDrive, DeviceChange, DeviceError, DeviceMonitor, DevicePoller, DriveProbe};
pub use hardware::{CommandHardware, CommandThumbnailer, HardwareClient, Thumbnailer};
pub use media::{MediaIdentity, MediaList, Mountpoint};
pub use parser::ExtensionParser;
pub use service::{BeaconService, ServerRequest, ServerResponse};

/// Default channel buffer size for server events.
pub const EVENT_CHANNEL_SIZE: usize = 256;
