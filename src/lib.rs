//! Storage and access-control core for a multi-tenant hierarchical resource
//! store.
//!
//! Each tenant (cell) owns a tree of collections and files, navigated by name
//! from a root collection and persisted as one document per node in a
//! versioned document store, with file payloads in a filesystem blob store.
//!
//! The main entry points:
//!
//! - [`controller::NodeController`]: per-node operations (PROPFIND, PROPPATCH,
//!   ACL, PUT, GET, MKCOL, DELETE), serialized per owning collection by
//!   advisory locks and guarded by optimistic versioning.
//! - [`cell::CellDeletionPipeline`]: cell bulk deletion with access gating,
//!   drain-wait and a background cascade over the cell's contents.
//! - [`acl::resolver::RoleResolver`]: role reference rewriting between stored
//!   role ids and role resource URLs.
//!
//! Backing stores plug in through the traits in [`store`]; in-memory
//! implementations live in [`store::memory`].

pub mod acl;
pub mod binary;
pub mod cell;
pub mod config;
pub mod controller;
pub mod error;
pub mod etag;
pub mod lock;
pub mod logging;
pub mod node;
pub mod propfind;
pub mod range;
pub mod store;
pub mod types;

pub use config::StoreConfig;
pub use controller::{GetOutcome, NodeController, PutOutcome, TreeEnv};
pub use error::{Error, Result};
