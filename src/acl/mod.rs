//! Access-control-list data model.
//!
//! One parse produces a typed structure consumed by both the property and ACL
//! paths. In stored documents every principal `href` holds a role id; at the
//! protocol boundary it holds a role resource URL. The resolver
//! ([`resolver::RoleResolver`]) rewrites between the two forms.

pub mod resolver;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Allowed values of the reserved schema-authentication level.
const SCHEMA_AUTHZ_LEVELS: &[&str] = &["none", "public", "confidential"];

/// A principal granted privileges by an ACE: a specific role, or everyone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Principal {
    /// Role reference: role id in storage, role resource URL on the wire.
    #[serde(rename = "href")]
    Href(String),
    /// All principals.
    #[serde(rename = "all")]
    All,
}

/// One principal-to-privilege binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ace {
    pub principal: Principal,
    /// Granted privilege names; never empty in a valid ACL.
    #[serde(default)]
    pub grant: Vec<String>,
}

/// Serialized access-control structure attached to a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    #[serde(default)]
    pub ace: Vec<Ace>,
    /// Transport-only `xml:base` for resolving relative role references.
    /// Stripped before persisting.
    #[serde(rename = "@base", skip_serializing_if = "Option::is_none", default)]
    pub base: Option<String>,
    /// Reserved: required confidentiality level for schema-authenticated access.
    #[serde(
        rename = "@requireSchemaAuthz",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub require_schema_authz: Option<String>,
}

impl Acl {
    /// Structural validation. Cell-level and box-level ACLs differ: the
    /// schema-authentication level only has meaning below a box, so its
    /// presence on a cell-level ACL is rejected.
    pub fn validate(&self, is_cell_level: bool) -> Result<()> {
        for ace in &self.ace {
            if ace.grant.is_empty() {
                return Err(Error::AclValidation("ace without grant".into()));
            }
            if ace.grant.iter().any(|g| g.trim().is_empty()) {
                return Err(Error::AclValidation("empty privilege name".into()));
            }
        }
        if let Some(level) = &self.require_schema_authz {
            if is_cell_level {
                return Err(Error::AclValidation(
                    "requireSchemaAuthz is not allowed on a cell-level ACL".into(),
                ));
            }
            if !SCHEMA_AUTHZ_LEVELS.contains(&level.as_str()) {
                return Err(Error::AclValidation(format!(
                    "unknown requireSchemaAuthz level: {level}"
                )));
            }
        }
        Ok(())
    }
}
