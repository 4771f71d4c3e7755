//! Optimistic-concurrency mutation of pages.
//!
//! Every version-gated write is one compare-and-swap in the store. When it
//! touches no rows the guard asks whether the page still exists to tell
//! [`PageError::NotFound`] from [`PageError::Conflict`]. On success the
//! canonical page is re-read and announced on the bus.
//!
//! The guard holds no locks; a conflict is returned immediately and retrying
//! is up to the caller.

use std::sync::Arc;

use folio_types::{BlockInput, MetaPatch, Page, PageId, Version, normalize_blocks};

use crate::error::{PageError, PageResult};
use crate::publish::EventPublisher;
use crate::store::VersionedStore;

/// Title given to pages created without one.
pub const DEFAULT_TITLE: &str = "Untitled";

/// Race-safe page mutation on top of a [`VersionedStore`].
#[derive(Clone)]
pub struct ConcurrencyGuard {
    store: Arc<dyn VersionedStore>,
    publisher: EventPublisher,
}

impl ConcurrencyGuard {
    pub fn new(store: Arc<dyn VersionedStore>, publisher: EventPublisher) -> Self {
        Self { store, publisher }
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    /// Create a page owned by `owner` (anonymous when `None` or empty).
    ///
    /// Initial blocks are validated before anything is written; the page and
    /// its blocks land in one transaction.
    pub async fn create_page(
        &self,
        owner: Option<&str>,
        title: Option<&str>,
        blocks: Vec<BlockInput>,
    ) -> PageResult<Page> {
        let blocks = normalize_blocks(blocks)?;
        let owner = owner.filter(|o| !o.is_empty()).map(str::to_string);
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TITLE)
            .to_string();

        let page = self.store.create_document(owner, title, blocks).await?;
        tracing::info!(page_id = %page.id, version = %page.updated_at, "page created");
        self.publisher.publish_page(&page).await;
        Ok(page)
    }

    /// The page as currently stored, e.g. to attach to a conflict response.
    pub async fn current(&self, page_id: PageId) -> PageResult<Page> {
        self.store
            .fetch_by_id(page_id)
            .await?
            .ok_or(PageError::NotFound)
    }

    /// Replace the full block set. `expected = None` skips the version check.
    pub async fn replace_blocks(
        &self,
        page_id: PageId,
        blocks: Vec<BlockInput>,
        expected: Option<Version>,
    ) -> PageResult<Page> {
        let blocks = normalize_blocks(blocks)?;
        let count = blocks.len();
        let rows = self
            .store
            .atomic_replace_blocks(page_id, blocks, expected)
            .await?;
        let page = self.settle(page_id, rows, expected, "blocks").await?;
        tracing::debug!(page_id = %page_id, blocks = count, "blocks replaced");
        Ok(page)
    }

    /// Apply a metadata patch. Out-of-range mood/intensity are clamped.
    pub async fn update_meta(
        &self,
        page_id: PageId,
        patch: MetaPatch,
        expected: Option<Version>,
    ) -> PageResult<Page> {
        let update = patch.normalize()?;
        let rows = self
            .store
            .atomic_update_meta(page_id, update, expected)
            .await?;
        self.settle(page_id, rows, expected, "meta").await
    }

    /// Flip the publish flags. Last writer wins.
    pub async fn set_published(&self, page_id: PageId, published: bool, unlisted: bool) -> PageResult<Page> {
        let rows = self
            .store
            .set_published(page_id, published, unlisted)
            .await?;
        if rows == 0 {
            return Err(PageError::NotFound);
        }
        let page = self.current(page_id).await?;
        tracing::info!(page_id = %page_id, published, unlisted, "publish flags set");
        self.publisher.publish_page(&page).await;
        Ok(page)
    }

    /// Soft-delete a page. Subscribers get the archived row as stored.
    pub async fn archive(&self, page_id: PageId) -> PageResult<Page> {
        if self.store.archive(page_id).await? == 0 {
            return Err(PageError::NotFound);
        }
        let page = self
            .store
            .fetch_any(page_id)
            .await?
            .ok_or(PageError::NotFound)?;
        tracing::info!(page_id = %page_id, "page archived");
        self.publisher.publish_page(&page).await;
        Ok(page)
    }

    /// Bring an archived page back.
    pub async fn restore(&self, page_id: PageId) -> PageResult<Page> {
        if self.store.restore(page_id).await? == 0 {
            return Err(PageError::NotFound);
        }
        let page = self.current(page_id).await?;
        tracing::info!(page_id = %page_id, version = %page.updated_at, "page restored");
        self.publisher.publish_page(&page).await;
        Ok(page)
    }

    /// Permanently delete an archived page. Live pages must be archived first.
    pub async fn purge(&self, page_id: PageId) -> PageResult<()> {
        if self.store.purge(page_id).await? > 0 {
            tracing::info!(page_id = %page_id, "page purged");
            return Ok(());
        }
        if self.store.exists(page_id).await? {
            Err(PageError::InvalidInput("archive the page before purging it".into()))
        } else {
            Err(PageError::NotFound)
        }
    }

    /// Turn a rows-affected count into the mutated page or the right error.
    async fn settle(
        &self,
        page_id: PageId,
        rows: usize,
        expected: Option<Version>,
        what: &'static str,
    ) -> PageResult<Page> {
        if rows == 0 {
            return if self.store.exists(page_id).await? {
                tracing::info!(
                    page_id = %page_id,
                    expected = ?expected,
                    what,
                    "version conflict"
                );
                Err(PageError::Conflict)
            } else {
                Err(PageError::NotFound)
            };
        }

        let page = self.current(page_id).await?;
        self.publisher.publish_page(&page).await;
        Ok(page)
    }
}

impl std::fmt::Debug for ConcurrencyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyGuard").finish_non_exhaustive()
    }
}
