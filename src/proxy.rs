//! Composes fetching, extraction and virtualization into the operations the
//! transports expose.

use std::sync::Arc;

use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, REFERER};
use serde::Serialize;
use url::Url;

use crate::config::ProxyConfig;
use crate::extract::{self, Diagnostics, ExtractError, ExtractionProfile};
use crate::fetch::{Fetch, FetchError, HttpFetcher};
use crate::formats::{CatalogListing, Chapter, ImagePage, ItemDetail, ItemImages};
use crate::store::{InMemoryMappingStore, MappingStore};
use crate::urlnorm;
use crate::virtualize::{ResourceRole, VirtualResourceId, Virtualizer};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProxyError {
    #[error("upstream request failed")]
    Network { cause: String },
    #[error("upstream request timed out")]
    Timeout,
    #[error("upstream redirected more than {limit} times")]
    TooManyRedirects { limit: usize },
    #[error("upstream responded with status {code}")]
    UpstreamStatus { code: u16 },
    #[error("upstream page could not be parsed: {0}")]
    Parse(String),
    #[error("no {profile} strategy matched")]
    NoMatch {
        profile: ExtractionProfile,
        diagnostics: Diagnostics,
    },
    #[error("resource not found: {0}")]
    ResourceNotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    TooManyRedirects,
    UpstreamStatus,
    Parse,
    NoMatch,
    ResourceNotFound,
    InvalidInput,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::TooManyRedirects => "too_many_redirects",
            Self::UpstreamStatus => "upstream_status",
            Self::Parse => "parse",
            Self::NoMatch => "no_match",
            Self::ResourceNotFound => "resource_not_found",
            Self::InvalidInput => "invalid_input",
        }
    }
}

impl ProxyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } => ErrorKind::Network,
            Self::Timeout => ErrorKind::Timeout,
            Self::TooManyRedirects { .. } => ErrorKind::TooManyRedirects,
            Self::UpstreamStatus { .. } => ErrorKind::UpstreamStatus,
            Self::Parse(_) => ErrorKind::Parse,
            Self::NoMatch { .. } => ErrorKind::NoMatch,
            Self::ResourceNotFound(_) => ErrorKind::ResourceNotFound,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
        }
    }
}

impl From<FetchError> for ProxyError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Network { cause } => Self::Network { cause },
            FetchError::Timeout { .. } => Self::Timeout,
            FetchError::TooManyRedirects { limit } => Self::TooManyRedirects { limit },
            FetchError::UpstreamStatus { code } => Self::UpstreamStatus { code },
        }
    }
}

impl From<ExtractError> for ProxyError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::Parse(reason) => Self::Parse(reason),
            ExtractError::NoMatch {
                profile,
                diagnostics,
            } => Self::NoMatch {
                profile,
                diagnostics,
            },
        }
    }
}

/// Raw bytes of a resolved resource with the upstream headers worth passing on.
#[derive(Debug, Clone)]
pub struct ResourceBody {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

pub struct ProxyService {
    fetcher: Arc<dyn Fetch>,
    virtualizer: Virtualizer,
    origin: Url,
    listing_url: Url,
    hint_hosts: Vec<String>,
}

impl ProxyService {
    pub fn new(
        config: &ProxyConfig,
        fetcher: Arc<dyn Fetch>,
        store: Arc<dyn MappingStore>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            fetcher,
            virtualizer: Virtualizer::new(store, config.origin.clone()),
            origin: config.origin.clone(),
            listing_url: config.listing_url()?,
            hint_hosts: config.allowed_hint_hosts(),
        })
    }

    /// Service backed by the real HTTP fetcher and an in-memory store.
    pub fn from_config(config: &ProxyConfig) -> anyhow::Result<Self> {
        let fetcher = HttpFetcher::new(config.fetch_options())?;
        let store = InMemoryMappingStore::with_capacity(config.store_capacity);
        Self::new(config, Arc::new(fetcher), Arc::new(store))
    }

    pub fn store(&self) -> &Arc<dyn MappingStore> {
        self.virtualizer.store()
    }

    pub async fn list_catalog(&self) -> Result<CatalogListing, ProxyError> {
        let page = self.fetcher.fetch(&self.listing_url, &HeaderMap::new()).await?;

        match extract::catalog::extract(&page.text(), &page.final_url) {
            Ok(extraction) => {
                tracing::info!(
                    entries = extraction.record.len(),
                    strategy = extraction.strategy,
                    "catalog listed"
                );
                Ok(CatalogListing {
                    entries: extraction.record,
                    strategy: Some(extraction.strategy.to_owned()),
                    diagnostics: extraction.diagnostics,
                    note: None,
                })
            }
            Err(ExtractError::NoMatch { diagnostics, .. }) => Ok(CatalogListing {
                entries: Vec::new(),
                strategy: None,
                note: Some(format!(
                    "no catalog entries found ({} strategies tried, {} anchors on page)",
                    diagnostics.attempts.len(),
                    diagnostics.anchors
                )),
                diagnostics,
            }),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_item_detail(&self, entity_id: &str) -> Result<ItemDetail, ProxyError> {
        ensure_entity_id(entity_id)?;
        let url = self.join_origin(&format!("manga/{entity_id}/"))?;
        let page = self.fetcher.fetch(&url, &HeaderMap::new()).await?;
        let extraction = extract::detail::extract(&page.text(), &page.final_url)?;
        let record = extraction.record;

        let cover_resource_id = record.cover_url.as_ref().and_then(|cover| {
            self.virtualizer
                .virtualize(entity_id, ResourceRole::Cover, cover.as_str())
        });
        let chapters = record
            .chapters
            .into_iter()
            .map(|link| Chapter {
                chapter_ref: urlnorm::chapter_ref_from_url(&self.origin, &link.url),
                origin_url: link.url.to_string(),
                title: link.title,
                date: link.date,
            })
            .collect::<Vec<_>>();

        tracing::info!(
            entity_id,
            strategy = extraction.strategy,
            chapters = chapters.len(),
            has_cover = cover_resource_id.is_some(),
            "item detail extracted"
        );

        Ok(ItemDetail {
            entity_id: entity_id.to_owned(),
            title: record.title,
            localized_title: record.localized_title,
            category: record.category,
            concept: record.concept,
            synopsis: record.synopsis,
            author: record.author,
            status: record.status,
            age_rating: record.age_rating,
            reading_direction: record.reading_direction,
            genres: record.genres,
            cover_resource_id,
            chapters,
        })
    }

    pub async fn get_item_images(
        &self,
        entity_id: &str,
        chapter_ref: &str,
    ) -> Result<ItemImages, ProxyError> {
        ensure_entity_id(entity_id)?;
        let chapter_ref = urlnorm::normalize_chapter_ref(&self.origin, chapter_ref)
            .ok_or_else(|| ProxyError::InvalidInput("malformed chapter reference".to_owned()))?;

        let url = self.join_origin(&format!("{chapter_ref}/"))?;
        let page = self.fetcher.fetch(&url, &HeaderMap::new()).await?;
        let extraction = extract::images::extract(&page.text(), &page.final_url)?;

        let scope = format!("{entity_id}/{chapter_ref}");
        let pages = extraction
            .record
            .pages
            .iter()
            .enumerate()
            .filter_map(|(index, image)| {
                let resource_id = self.virtualizer.virtualize(
                    &scope,
                    ResourceRole::Page(index + 1),
                    image.origin_url.as_str(),
                )?;
                Some(ImagePage {
                    resource_id,
                    alt_text: image.alt_text.clone(),
                })
            })
            .collect::<Vec<_>>();

        tracing::info!(
            entity_id,
            chapter_ref = %chapter_ref,
            strategy = extraction.strategy,
            pages = pages.len(),
            "chapter images extracted"
        );

        Ok(ItemImages {
            entity_id: entity_id.to_owned(),
            chapter_ref,
            title: extraction.record.title,
            pages,
        })
    }

    /// Serves the bytes behind `scope/resource_name`.
    ///
    /// A mapping missing from the store is rebuilt by extracting the owning
    /// page again. `origin_hint` is only consulted after that and only when it
    /// points at an allowed host.
    pub async fn resolve_resource(
        &self,
        scope: &str,
        resource_name: &str,
        origin_hint: Option<&str>,
    ) -> Result<ResourceBody, ProxyError> {
        let resource_id = VirtualResourceId::new(scope, resource_name);
        let not_found = || ProxyError::ResourceNotFound(resource_id.to_string());
        let role = ResourceRole::from_resource_name(resource_name).ok_or_else(not_found)?;
        let owner = Owner::of(scope, role).ok_or_else(not_found)?;

        let mut origin = self.virtualizer.resolve(scope, resource_name);
        if origin.is_none() {
            tracing::debug!(resource = %resource_id, "mapping miss; re-extracting owner page");
            if let Err(err) = self.repopulate(&owner).await {
                tracing::warn!(
                    resource = %resource_id,
                    kind = err.kind().as_str(),
                    %err,
                    "repopulation failed"
                );
            }
            origin = self.virtualizer.resolve(scope, resource_name);
        }

        let target = match (origin, origin_hint) {
            (Some(origin), _) => Url::parse(&origin).map_err(|_| not_found())?,
            (None, Some(hint)) => self.accept_hint(hint)?,
            (None, None) => return Err(not_found()),
        };

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("image/*"));
        if let Ok(referer) = HeaderValue::from_str(self.origin.as_str()) {
            headers.insert(REFERER, referer);
        }
        let fetched = self.fetcher.fetch(&target, &headers).await?;

        let content_type = fetched.header("content-type").map(str::to_owned);
        let content_length = fetched
            .header("content-length")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|len| *len == fetched.body.len() as u64);

        tracing::debug!(
            resource = %resource_id,
            bytes = fetched.body.len(),
            "resource resolved"
        );

        Ok(ResourceBody {
            bytes: fetched.body,
            content_type,
            content_length,
        })
    }

    async fn repopulate(&self, owner: &Owner<'_>) -> Result<(), ProxyError> {
        match owner {
            Owner::Item(entity_id) => self.get_item_detail(entity_id).await.map(|_| ()),
            Owner::Chapter {
                entity_id,
                chapter_ref,
            } => self
                .get_item_images(entity_id, chapter_ref)
                .await
                .map(|_| ()),
        }
    }

    fn accept_hint(&self, hint: &str) -> Result<Url, ProxyError> {
        let url = urlnorm::normalize_url(&self.origin, hint)
            .ok_or_else(|| ProxyError::InvalidInput("origin hint is not an http(s) url".to_owned()))?;
        if !urlnorm::host_allowed(&url, &self.hint_hosts) {
            return Err(ProxyError::InvalidInput(
                "origin hint points at a host that is not allowed".to_owned(),
            ));
        }
        Ok(url)
    }

    /// Joins a site-relative path below the origin. The `./` prefix keeps a
    /// leading `scheme:`-looking segment from being read as an absolute URL.
    fn join_origin(&self, path: &str) -> Result<Url, ProxyError> {
        self.origin
            .join(&format!("./{path}"))
            .map_err(|_| ProxyError::InvalidInput("identifier does not form a valid path".to_owned()))
    }
}

/// Page whose extraction mints the mapping for a scope.
enum Owner<'a> {
    Item(&'a str),
    Chapter {
        entity_id: &'a str,
        chapter_ref: &'a str,
    },
}

impl<'a> Owner<'a> {
    fn of(scope: &'a str, role: ResourceRole) -> Option<Self> {
        match role {
            ResourceRole::Cover => {
                urlnorm::is_valid_entity_id(scope).then_some(Self::Item(scope))
            }
            ResourceRole::Page(_) => {
                let (entity_id, chapter_ref) = scope.split_once('/')?;
                (urlnorm::is_valid_entity_id(entity_id) && !chapter_ref.is_empty()).then_some(
                    Self::Chapter {
                        entity_id,
                        chapter_ref,
                    },
                )
            }
        }
    }
}

fn ensure_entity_id(entity_id: &str) -> Result<(), ProxyError> {
    if urlnorm::is_valid_entity_id(entity_id) {
        Ok(())
    } else {
        Err(ProxyError::InvalidInput("malformed entity id".to_owned()))
    }
}
