//! Role reference resolution.
//!
//! Bidirectional mapping between role ids (stored form) and role resource URLs
//! (wire form), with `xml:base`-relative rendering. A role resource URL has the
//! shape `{cell_url}/__role/{box}/{name}`, where the box segment `__` stands
//! for the default, box-less scope.
//!
//! A role id whose record no longer exists is a tombstone: the ACE carrying it
//! is dropped from rendered output instead of failing the read. A role name
//! matching more than one record is a fatal internal-consistency failure.

use crate::acl::{Ace, Acl, Principal};
use crate::cell::{BoxContext, CellContext};
use crate::error::{Error, Result};
use crate::store::{CellIndex, RoleIndex};
use crate::types::NodeId;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Box segment used when a role is not bound to any box.
pub const DEFAULT_BOX_SEGMENT: &str = "__";

/// Resolves role references against the cell's role collection.
pub struct RoleResolver {
    roles: Arc<dyn RoleIndex>,
    cells: Arc<dyn CellIndex>,
}

impl RoleResolver {
    pub fn new(roles: Arc<dyn RoleIndex>, cells: Arc<dyn CellIndex>) -> Self {
        RoleResolver { roles, cells }
    }

    /// The `xml:base` value for ACLs rendered at this level: the box's role
    /// root below a box, the default box's role root at cell level.
    pub fn base_url(cell: &CellContext, boxc: Option<&BoxContext>) -> String {
        let cell_url = cell.url.trim_end_matches('/');
        match boxc {
            Some(b) => format!("{}/__role/{}/", cell_url, b.name),
            None => format!("{}/__role/{}/", cell_url, DEFAULT_BOX_SEGMENT),
        }
    }

    /// Resolve a role resource URL (optionally relative to `base`) to a role id.
    pub async fn role_url_to_id(
        &self,
        href: &str,
        base: Option<&str>,
        cell: &CellContext,
    ) -> Result<NodeId> {
        let resolved = match base {
            Some(b) if !b.is_empty() => Url::parse(b).and_then(|bu| bu.join(href)),
            _ => Url::parse(href),
        }
        .map_err(|e| Error::RoleNotFound(format!("malformed role URL {href}: {e}")))?;

        let (box_name, role_name) = locate_role(&resolved, cell)?;

        let box_id = if box_name == DEFAULT_BOX_SEGMENT {
            None
        } else {
            Some(
                self.cells
                    .box_by_name(&cell.id, &box_name)
                    .await?
                    .ok_or_else(|| Error::BoxNotFound(box_name.clone()))?,
            )
        };

        let hits = self
            .roles
            .find(&cell.id, &role_name, box_id.as_deref())
            .await?;
        match hits.len() {
            0 => Err(Error::RoleNotFound(role_name)),
            1 => Ok(hits.into_iter().next().unwrap_or_default()),
            n => Err(Error::DataConflict(format!(
                "{n} roles named {role_name} in one scope"
            ))),
        }
    }

    /// Resolve a role id to its role resource URL. `None` marks a tombstone:
    /// the role record has been deleted.
    pub async fn role_id_to_url(&self, role_id: &str, cell: &CellContext) -> Result<Option<String>> {
        let Some(role) = self.roles.get(role_id).await? else {
            debug!(role_id, "role id resolves to deleted role, tombstoning");
            return Ok(None);
        };
        let box_segment = match &role.box_id {
            Some(box_id) => self
                .cells
                .box_by_id(box_id)
                .await?
                .ok_or_else(|| Error::RoleNotFound(format!("box {box_id} linked by role missing")))?
                .name,
            None => DEFAULT_BOX_SEGMENT.to_string(),
        };
        Ok(Some(format!(
            "{}/__role/{}/{}",
            cell.url.trim_end_matches('/'),
            box_segment,
            role.name
        )))
    }

    /// Rewrite an incoming ACL for persistence: every principal href goes from
    /// role resource URL to role id, and the transport-only base is stripped.
    pub async fn rewrite_for_store(&self, mut acl: Acl, cell: &CellContext) -> Result<Acl> {
        let base = acl.base.take();
        for ace in &mut acl.ace {
            if let Principal::Href(href) = &ace.principal {
                let id = self.role_url_to_id(href, base.as_deref(), cell).await?;
                ace.principal = Principal::Href(id);
            }
        }
        Ok(acl)
    }

    /// Rewrite a stored ACL for rendering: role ids become role resource URLs
    /// expressed relative to the level's `xml:base`; ACEs whose role was
    /// deleted are dropped. An ACL whose every ACE was tombstoned renders with
    /// an empty ACE list rather than failing.
    pub async fn rewrite_for_render(
        &self,
        acl: &Acl,
        cell: &CellContext,
        boxc: Option<&BoxContext>,
    ) -> Result<Acl> {
        let base = Self::base_url(cell, boxc);
        let mut rendered = Vec::with_capacity(acl.ace.len());
        for ace in &acl.ace {
            match &ace.principal {
                Principal::All => rendered.push(ace.clone()),
                Principal::Href(role_id) => {
                    match self.role_id_to_url(role_id, cell).await? {
                        None => continue, // deleted role, drop the whole ACE
                        Some(url) => rendered.push(Ace {
                            principal: Principal::Href(relative_href(&base, &url, cell)?),
                            grant: ace.grant.clone(),
                        }),
                    }
                }
            }
        }
        Ok(Acl {
            ace: rendered,
            base: Some(base),
            require_schema_authz: acl.require_schema_authz.clone(),
        })
    }
}

/// Split a resolved role URL into its box segment and role name, failing when
/// the URL names a different cell or is not a role resource URL.
fn locate_role(resolved: &Url, cell: &CellContext) -> Result<(String, String)> {
    let cell_base = format!("{}/", cell.url.trim_end_matches('/'));
    let rest = resolved
        .as_str()
        .strip_prefix(cell_base.as_str())
        .ok_or_else(|| Error::RoleNotFound("role URL names a different cell".into()))?;
    let mut parts = rest.split('/');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("__role"), Some(box_name), Some(name), None) if !box_name.is_empty() && !name.is_empty() => {
            Ok((box_name.to_string(), name.to_string()))
        }
        _ => Err(Error::RoleNotFound(format!(
            "not a role resource URL: {resolved}"
        ))),
    }
}

/// Render a role URL relative to the `xml:base`: a bare name when both share a
/// box, a box-disambiguating relative path otherwise.
fn relative_href(base: &str, role_url: &str, cell: &CellContext) -> Result<String> {
    let base_url =
        Url::parse(base).map_err(|e| Error::RoleNotFound(format!("malformed base URL: {e}")))?;
    let parsed = Url::parse(role_url)
        .map_err(|e| Error::RoleNotFound(format!("malformed role URL: {e}")))?;
    // The base ends in an empty name segment; a placeholder makes it parse as
    // a full role resource URL.
    let (base_box, _) = locate_role(&base_url.join("__")
        .map_err(|e| Error::RoleNotFound(format!("malformed base URL: {e}")))?, cell)?;
    let (role_box, role_name) = locate_role(&parsed, cell)?;
    if base_box == role_box {
        Ok(role_name)
    } else {
        Ok(format!("../{role_box}/{role_name}"))
    }
}
