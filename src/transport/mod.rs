//! HTTP/JSON exposure of a [`crate::sync::VersionedChangesSyncStore`] and
//! the matching client.

pub mod client;
pub mod messages;
pub mod server;

pub use client::HttpSyncStoreClient;
pub use server::{SyncStoreServer, router};
