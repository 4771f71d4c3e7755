//! Access resolution: owner, share-link holder, or nobody.
//!
//! Nothing here is cached. Each protected call resolves again, so revoking a
//! link takes effect on the very next request.

use std::sync::Arc;

use folio_types::{AccessLevel, Grant, Page, PageId};

use crate::error::{PageError, PageResult};
use crate::store::{ShareLinkStore, VersionedStore};

/// A resolved page and what the caller may do with it.
#[derive(Clone, Debug, PartialEq)]
pub struct Access {
    pub page: Page,
    pub grant: Grant,
}

/// Classifies an actor's permission on a page.
#[derive(Clone)]
pub struct AccessResolver {
    pages: Arc<dyn VersionedStore>,
    links: Arc<dyn ShareLinkStore>,
}

impl AccessResolver {
    pub fn new(pages: Arc<dyn VersionedStore>, links: Arc<dyn ShareLinkStore>) -> Self {
        Self { pages, links }
    }

    /// Resolve `actor`'s access to `page_id` at `required` level.
    ///
    /// The owner is granted [`Grant::Owner`] without looking at the token.
    /// Anyone else needs a live share link for this exact page whose level
    /// satisfies `required`. Empty strings count as absent.
    pub async fn resolve(
        &self,
        actor: Option<&str>,
        page_id: PageId,
        share_token: Option<&str>,
        required: AccessLevel,
    ) -> PageResult<Access> {
        let page = self.load(page_id).await?;
        let grant = self.grant_for(actor, &page, share_token, required).await?;
        Ok(Access { page, grant })
    }

    /// Like [`resolve`](Self::resolve) at view level, but published pages are
    /// readable by anyone.
    pub async fn resolve_read(
        &self,
        actor: Option<&str>,
        page_id: PageId,
        share_token: Option<&str>,
    ) -> PageResult<Access> {
        let page = self.load(page_id).await?;
        match self.grant_for(actor, &page, share_token, AccessLevel::View).await {
            Ok(grant) => Ok(Access { page, grant }),
            Err(PageError::Forbidden) if page.is_public() => {
                tracing::debug!(page_id = %page_id, "access granted: published page");
                Ok(Access {
                    page,
                    grant: Grant::View,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Resolve and insist on ownership (share links never qualify).
    pub async fn require_owner(&self, actor: Option<&str>, page_id: PageId) -> PageResult<Page> {
        let access = self.resolve(actor, page_id, None, AccessLevel::Edit).await?;
        if access.grant.is_owner() {
            Ok(access.page)
        } else {
            Err(PageError::Forbidden)
        }
    }

    /// Ownership check that also sees archived pages, for restore and purge.
    pub async fn require_owner_any(&self, actor: Option<&str>, page_id: PageId) -> PageResult<()> {
        let owner = self
            .pages
            .owner_of(page_id)
            .await?
            .ok_or(PageError::NotFound)?;
        match (non_empty(actor), owner.as_deref()) {
            (Some(actor), Some(owner)) if actor == owner => Ok(()),
            _ => {
                tracing::info!(page_id = %page_id, "access denied: not the owner");
                Err(PageError::Forbidden)
            }
        }
    }

    async fn load(&self, page_id: PageId) -> PageResult<Page> {
        self.pages
            .fetch_by_id(page_id)
            .await?
            .ok_or(PageError::NotFound)
    }

    /// Owner fast path, then the share token.
    async fn grant_for(
        &self,
        actor: Option<&str>,
        page: &Page,
        share_token: Option<&str>,
        required: AccessLevel,
    ) -> PageResult<Grant> {
        if let Some(actor) = non_empty(actor) {
            if page.is_owned_by(actor) {
                tracing::debug!(page_id = %page.id, actor, "access granted: owner");
                return Ok(Grant::Owner);
            }
        }
        self.token_grant(page.id, share_token, required).await
    }

    async fn token_grant(
        &self,
        page_id: PageId,
        share_token: Option<&str>,
        required: AccessLevel,
    ) -> PageResult<Grant> {
        let Some(token) = non_empty(share_token) else {
            tracing::info!(page_id = %page_id, "access denied: no share token");
            return Err(PageError::Forbidden);
        };

        let link = self.links.find_share_link(token.to_string()).await?;
        let Some(link) = link.filter(|link| link.opens(&page_id)) else {
            tracing::info!(page_id = %page_id, "access denied: share token unknown, revoked or for another page");
            return Err(PageError::Forbidden);
        };

        if !link.access.satisfies(required) {
            tracing::info!(
                page_id = %page_id,
                granted = %link.access,
                required = %required,
                "access denied: share link too weak"
            );
            return Err(PageError::Forbidden);
        }

        tracing::debug!(page_id = %page_id, access = %link.access, "access granted: share link");
        Ok(link.access.into())
    }
}

impl std::fmt::Debug for AccessResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessResolver").finish_non_exhaustive()
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}
