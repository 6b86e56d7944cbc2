//! PROPFIND/PROPPATCH result structures.
//!
//! Typed descriptors the protocol adapter serializes into multistatus bodies.
//! Depth handling is strict: `0` and `1` only, `infinity` is refused outright
//! and a missing header is an invalid-header error.

use crate::acl::Acl;
use crate::error::{Error, Result};
use crate::node::PropKey;
use crate::types::Timestamp;
use chrono::{TimeZone, Utc};

/// PROPFIND depth. Only finite depths 0 and 1 are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
}

impl Depth {
    /// Parse the Depth request header.
    pub fn parse(header: Option<&str>) -> Result<Depth> {
        match header {
            Some("0") => Ok(Depth::Zero),
            Some("1") => Ok(Depth::One),
            Some("infinity") => Err(Error::PropfindFiniteDepth),
            Some(other) => Err(Error::InvalidDepthHeader(other.to_string())),
            None => Err(Error::InvalidDepthHeader("missing".to_string())),
        }
    }
}

/// Resource-type marker reported per descriptor, keyed off the node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Plain WebDAV collection.
    Collection,
    /// Collection marked as a structured-data (OData) service root.
    OdataCollection,
    /// Collection marked as a service execution root.
    ServiceCollection,
    /// Leaf file; carries no collection marker.
    File,
}

/// One multistatus response element: everything reported about a single node.
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    pub href: String,
    pub kind: ResourceKind,
    pub created: Timestamp,
    pub last_modified: Timestamp,
    /// Content metadata, file nodes only.
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    /// Dead properties in typed-key form.
    pub properties: Vec<(PropKey, String)>,
    /// Reconstructed ACL, present when the caller asked for ACL rendering.
    pub acl: Option<Acl>,
}

impl ResourceDescriptor {
    /// RFC 1123 rendering of the last-modified instant.
    pub fn last_modified_http(&self) -> String {
        http_date(self.last_modified)
    }

    /// RFC 1123 rendering of the creation instant.
    pub fn created_http(&self) -> String {
        http_date(self.created)
    }
}

fn http_date(millis: Timestamp) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(|| Utc.timestamp_millis_opt(0).single().unwrap_or_default())
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// PROPFIND result: the addressed node first, then one entry per direct child
/// at depth 1.
#[derive(Debug, Clone)]
pub struct Multistatus {
    pub responses: Vec<ResourceDescriptor>,
}

/// Parsed PROPPATCH request body. Entries are `Option`-wrapped so the parser
/// can hand through structurally null items; the controller rejects those as
/// malformed content instead of panicking mid-update.
#[derive(Debug, Clone, Default)]
pub struct PropPatch {
    pub set: Vec<Option<(PropKey, String)>>,
    pub remove: Vec<Option<PropKey>>,
}

/// Outcome for one property within a PROPPATCH.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropStatus {
    Ok,
    NotFound,
}

/// Per-property multistatus for a PROPPATCH request.
#[derive(Debug, Clone)]
pub struct ProppatchResult {
    pub href: String,
    pub etag: String,
    pub results: Vec<(PropKey, PropStatus)>,
}
