//! Client-side synchronization core for an Ambari cluster-management REST API.
//!
//! Raw JSON flows from the polling [`http::HttpClient`] through a
//! [`mapper::Mapper`] into the shared [`store::RecordStore`]. The
//! [`upgrade::UpgradeTracker`] and [`cluster::ClusterSession`] derive
//! higher-level state from what the store holds.

pub mod ambari;
pub mod cluster;
pub mod common;
pub mod http;
pub mod mapper;
pub mod model;
pub mod store;
pub mod upgrade;

pub use common::error::{Result, SyncError};
