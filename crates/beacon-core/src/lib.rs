//! Core types and collaborator traits for beacon.
//!
//! This crate provides the data model shared by the index server and its
//! clients: items, media, query filters, the typed attribute schema and the
//! narrow `Database` / `Parser` interfaces the rest of the system is written
//! against.

mod config;
pub mod database;
mod error;
mod event;
mod filter;
mod item;
mod media;
mod parser;
mod schema;

pub use config::{BeaconConfig, BeaconConfigBuilder};
pub use database::{
    CommitSummary, Database, DatabaseError, MediaRecord, MediaRow, MemoryDatabase, ReadLease,
    ReadLock,
};
pub use error::BeaconError;
pub use event::{QueryBackend, ServerEvent};
pub use filter::{ParentRef, QueryFilter};
pub use item::{AttrValue, Attributes, Item, ItemId, ItemType, dir_filename};
pub use media::{Media, MediaContent, MediaId};
pub use parser::{Metadata, ParseError, Parser};
pub use schema::{AttrKind, AttributeDef, SchemaError, SchemaRegistry, TypeSchema};
