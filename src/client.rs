//! Source-selecting library client.
//!
//! Every operation goes to the local replica first. The remote API is tried
//! only when the local call fails with [`Error::SourceUnavailable`]; an empty
//! local result is a valid answer and is returned as is. Other errors (for
//! example [`Error::NotFound`]) are never retried elsewhere.
//!
//! Attachments in every result are run through the [`AttachmentResolver`]
//! so `resolved_path` always points at an existing local file or is `None`.

use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use crate::attachment::AttachmentResolver;
use crate::config::Config;
use crate::connector_local::LocalLibrary;
use crate::connector_remote::RemoteLibrary;
use crate::error::{Error, Result};
use crate::models::{Attachment, Collection, Item};
use crate::traits::LibrarySource;

/// Health of one configured source.
#[derive(Debug, Clone)]
pub struct SourceStatus {
    /// `local` or `remote`.
    pub name: String,
    pub healthy: bool,
    /// `OK`, or the health-check error.
    pub detail: String,
}

/// Library reader that prefers the local replica and falls back to the
/// Web API.
#[derive(Clone)]
pub struct LibraryClient {
    local: Option<Arc<dyn LibrarySource>>,
    remote: Option<Arc<dyn LibrarySource>>,
    resolver: AttachmentResolver,
}

impl LibraryClient {
    /// Assemble a client from explicit readers.
    ///
    /// # Arguments
    ///
    /// * `local` - Tried first for every operation.
    /// * `remote` - Used only when `local` is absent or reports
    ///   [`Error::SourceUnavailable`].
    /// * `resolver` - Maps attachment records to files under the data
    ///   directory.
    pub fn new(
        local: Option<Arc<dyn LibrarySource>>,
        remote: Option<Arc<dyn LibrarySource>>,
        resolver: AttachmentResolver,
    ) -> Self {
        Self {
            local,
            remote,
            resolver,
        }
    }

    /// Build the local and remote readers enabled in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceUnavailable`] when neither source is enabled,
    /// or when `[remote]` is enabled without a usable library id.
    pub fn from_config(config: &Config) -> Result<Self> {
        let local: Option<Arc<dyn LibrarySource>> = if config.library.use_local {
            Some(Arc::new(LocalLibrary::new(config.library.database_path())))
        } else {
            None
        };
        let remote: Option<Arc<dyn LibrarySource>> = if config.remote.is_enabled() {
            Some(Arc::new(RemoteLibrary::from_config(&config.remote)?))
        } else {
            None
        };
        if local.is_none() && remote.is_none() {
            return Err(Error::SourceUnavailable {
                backend: "client",
                reason: "no library source configured (enable [library].use_local or set [remote].library_id)".into(),
            });
        }
        Ok(Self::new(
            local,
            remote,
            AttachmentResolver::from_config(&config.library),
        ))
    }

    pub fn resolver(&self) -> &AttachmentResolver {
        &self.resolver
    }

    /// Run `op` against the local source, falling back to the remote one on
    /// infrastructure failure.
    async fn with_fallback<T, F, Fut>(&self, what: &str, op: F) -> Result<T>
    where
        F: Fn(Arc<dyn LibrarySource>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let local_err = match &self.local {
            Some(local) => match op(local.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_source_unavailable() => e,
                Err(e) => return Err(e),
            },
            None => Error::local("local source disabled"),
        };

        let Some(remote) = &self.remote else {
            return Err(local_err);
        };
        if self.local.is_some() {
            warn!(operation = what, error = %local_err, "local source failed, falling back to remote");
        }
        let value = op(remote.clone()).await?;
        info!(operation = what, "served by remote source");
        Ok(value)
    }

    pub async fn list_collections(&self) -> Result<Vec<Collection>> {
        self.with_fallback("list_collections", |s| async move { s.list_collections().await })
            .await
    }

    /// Items filed directly in a collection, with attachment paths resolved.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown key. Not retried on the remote
    /// source.
    pub async fn collection_items(&self, collection_key: &str) -> Result<Vec<Item>> {
        let mut items = self
            .with_fallback("collection_items", |s| async move {
                s.collection_items(collection_key).await
            })
            .await?;
        self.normalize(&mut items);
        Ok(items)
    }

    /// Keyword search over titles and abstracts of the whole library.
    ///
    /// Both sources rank the same way: `2 × title hits + abstract hits`
    /// descending, newest first on ties, then by key. `offset` and `limit`
    /// apply after ranking.
    pub async fn search_items(&self, query: &str, limit: usize, offset: usize) -> Result<Vec<Item>> {
        let mut items = self
            .with_fallback("search_items", |s| async move {
                s.search_items(query, limit, offset).await
            })
            .await?;
        self.normalize(&mut items);
        Ok(items)
    }

    pub async fn item_attachments(&self, item_key: &str) -> Result<Vec<Attachment>> {
        let mut attachments = self
            .with_fallback("item_attachments", |s| async move {
                s.item_attachments(item_key).await
            })
            .await?;
        self.resolver.resolve_all(&mut attachments);
        Ok(attachments)
    }

    fn normalize(&self, items: &mut [Item]) {
        for item in items.iter_mut() {
            self.resolver.resolve_all(&mut item.attachments);
        }
    }

    /// Health-check each configured source.
    pub async fn source_status(&self) -> Vec<SourceStatus> {
        let mut statuses = Vec::new();
        for source in [&self.local, &self.remote].into_iter().flatten() {
            let status = match source.health_check().await {
                Ok(()) => SourceStatus {
                    name: source.name().to_string(),
                    healthy: true,
                    detail: "OK".to_string(),
                },
                Err(e) => SourceStatus {
                    name: source.name().to_string(),
                    healthy: false,
                    detail: e.to_string(),
                },
            };
            statuses.push(status);
        }
        statuses
    }
}
