//! Client side of beacon.
//!
//! A [`Query`] runs a filter once against a [`QueryBackend`] and then keeps
//! its cached result list in step with the server. On every
//! [`ServerEvent::Changed`](beacon_core::ServerEvent::Changed) it re-fetches
//! and reconciles positionally, keeping the same [`SharedItem`] for every
//! item whose URL survives so references held by callers stay valid.
//!
//! [`QueryBackend`]: beacon_core::QueryBackend

mod query;

pub use query::{Query, QueryEvent, SharedItem};

/// Capacity of a query's event channel.
pub const QUERY_CHANNEL_SIZE: usize = 64;
