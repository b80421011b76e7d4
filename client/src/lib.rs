//! Client-side cache for the movie review API.
//!
//! Reads go through a keyed [`QueryCache`] with freshness windows driven by an
//! injectable [`Clock`]. Writes are optimistic: the affected cache keys are
//! snapshotted, patched speculatively, and then either reconciled with the
//! server's answer or reverted to the snapshot.

pub mod api;
pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod reconcile;
pub mod view;

pub use api::{Api, HttpApi};
pub use cache::{CacheData, CacheKey, EntryState, FetchTicket, QueryCache};
pub use client::MovieClient;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
