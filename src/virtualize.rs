use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::store::{MappingKey, MappingStore};
use crate::urlnorm;

/// What a virtualized resource is to its owning entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceRole {
    Cover,
    /// 1-based position in reading order.
    Page(usize),
}

impl ResourceRole {
    pub fn resource_name(self, extension: &str) -> String {
        match self {
            Self::Cover => format!("cover.{extension}"),
            Self::Page(index) => format!("page-{index}.{extension}"),
        }
    }

    /// Inverse of [`ResourceRole::resource_name`]; `None` for names this
    /// proxy never mints.
    pub fn from_resource_name(name: &str) -> Option<Self> {
        let (stem, ext) = name.rsplit_once('.')?;
        if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        if stem == "cover" {
            return Some(Self::Cover);
        }
        let index = stem.strip_prefix("page-")?;
        if index.starts_with('0') || !index.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        index.parse::<usize>().ok().map(Self::Page)
    }
}

/// Opaque `scope/resource-name` identifier handed to clients in place of an
/// origin URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VirtualResourceId(String);

impl VirtualResourceId {
    pub fn new(scope: &str, resource_name: &str) -> Self {
        Self(format!("{scope}/{resource_name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits a raw identifier into `(scope, resource_name)`. Resource names
    /// never contain `/`, so the split happens at the last one.
    pub fn split(raw: &str) -> Option<(&str, &str)> {
        let raw = raw.trim_matches('/');
        let (scope, name) = raw.rsplit_once('/')?;
        if scope.is_empty() || name.is_empty() {
            return None;
        }
        Some((scope, name))
    }
}

impl fmt::Display for VirtualResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rewrites origin resource URLs into [`VirtualResourceId`]s and answers the
/// reverse lookup from the shared [`MappingStore`].
#[derive(Clone)]
pub struct Virtualizer {
    store: Arc<dyn MappingStore>,
    origin: Url,
}

impl Virtualizer {
    pub fn new(store: Arc<dyn MappingStore>, origin: Url) -> Self {
        Self { store, origin }
    }

    /// Returns `None` when `origin_url` cannot be completed into an http(s) URL.
    pub fn virtualize(
        &self,
        scope: &str,
        role: ResourceRole,
        origin_url: &str,
    ) -> Option<VirtualResourceId> {
        let url = urlnorm::normalize_url(&self.origin, origin_url)?;
        let resource_name = role.resource_name(&urlnorm::extension_of(&url));
        let key = MappingKey::new(scope, resource_name.clone());

        let stored = self.store.insert_if_absent(key, url.to_string());
        if stored != url.as_str() {
            tracing::debug!(
                scope,
                resource = %resource_name,
                "resource already mapped to a different origin; keeping the first"
            );
        }

        Some(VirtualResourceId::new(scope, &resource_name))
    }

    pub fn resolve(&self, scope: &str, resource_name: &str) -> Option<String> {
        self.store.get(&MappingKey::new(scope, resource_name))
    }

    pub fn store(&self) -> &Arc<dyn MappingStore> {
        &self.store
    }
}
