//! Store contracts consumed by the access resolver and the concurrency guard,
//! and the SQLite implementation of both.
//!
//! All rusqlite work runs in `spawn_blocking` against a single connection
//! behind a mutex. Coordination between concurrent writers lives in the
//! per-call transaction (see [`PageDb`]), not in this lock: the lock only
//! serializes access to the connection handle.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parking_lot::Mutex;
use rand::RngCore;

use folio_types::{AccessLevel, Block, MetaUpdate, Page, PageId, ShareLink, Version};

use crate::db::PageDb;
use crate::error::{PageError, PageResult};

/// Random bytes per share token (encodes to 32 URL-safe characters).
pub const SHARE_TOKEN_BYTES: usize = 24;

/// Durable page storage with an atomic compare-and-swap write.
///
/// Mutating methods return rows affected. Zero is ambiguous between a page
/// that is gone and a stale `expected`; callers disambiguate with
/// [`exists`](Self::exists).
#[async_trait]
pub trait VersionedStore: Send + Sync {
    /// Insert an empty page owned by `owner` (`None` = anonymous).
    /// Insert a page and its initial blocks in one transaction.
    async fn create_document(
        &self,
        owner: Option<String>,
        title: String,
        blocks: Vec<Block>,
    ) -> PageResult<Page>;

    /// Replace the full block set, gated on `expected` (`None` = force-write).
    async fn atomic_replace_blocks(
        &self,
        id: PageId,
        blocks: Vec<Block>,
        expected: Option<Version>,
    ) -> PageResult<usize>;

    /// Apply a metadata update, gated on `expected` (`None` = force-write).
    async fn atomic_update_meta(
        &self,
        id: PageId,
        update: MetaUpdate,
        expected: Option<Version>,
    ) -> PageResult<usize>;

    /// Set publish flags unconditionally. Still advances the stamp.
    async fn set_published(&self, id: PageId, published: bool, unlisted: bool) -> PageResult<usize>;

    /// Whether a live page exists.
    async fn exists(&self, id: PageId) -> PageResult<bool>;

    /// Load a live page with its blocks.
    async fn fetch_by_id(&self, id: PageId) -> PageResult<Option<Page>>;

    /// Load a page whether or not it is archived.
    async fn fetch_any(&self, id: PageId) -> PageResult<Option<Page>>;

    /// Soft-delete. The page stops resolving until restored.
    async fn archive(&self, id: PageId) -> PageResult<usize>;

    /// Undo an archive.
    async fn restore(&self, id: PageId) -> PageResult<usize>;

    /// Hard-delete an archived page.
    async fn purge(&self, id: PageId) -> PageResult<usize>;

    /// Owner of a page, archived rows included. Outer `None` = no such row.
    async fn owner_of(&self, id: PageId) -> PageResult<Option<Option<String>>>;
}

/// Share link persistence.
#[async_trait]
pub trait ShareLinkStore: Send + Sync {
    async fn create_share_link(
        &self,
        page_id: PageId,
        access: AccessLevel,
        created_by: String,
    ) -> PageResult<ShareLink>;

    async fn find_share_link(&self, token: String) -> PageResult<Option<ShareLink>>;

    async fn list_share_links(&self, page_id: PageId) -> PageResult<Vec<ShareLink>>;

    /// Revoke a link. Returns false if the token is unknown for this page or
    /// already revoked.
    async fn revoke_share_link(&self, page_id: PageId, token: String) -> PageResult<bool>;
}

/// Generate a fresh share token.
pub fn generate_share_token() -> String {
    let mut bytes = [0u8; SHARE_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SQLite-backed [`VersionedStore`] and [`ShareLinkStore`].
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<PageDb>>,
}

impl SqliteStore {
    /// Open or create the database file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> PageResult<Self> {
        Ok(Self::from_db(PageDb::open(path)?))
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> PageResult<Self> {
        Ok(Self::from_db(PageDb::in_memory()?))
    }

    fn from_db(db: PageDb) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    async fn with_db<T, F>(&self, f: F) -> PageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PageDb) -> rusqlite::Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let mut db = db.lock();
            f(&mut *db)
        })
        .await
        .map_err(|e| PageError::Storage(format!("spawn_blocking: {}", e)))?
        .map_err(PageError::from)
    }
}

#[async_trait]
impl VersionedStore for SqliteStore {
    async fn create_document(
        &self,
        owner: Option<String>,
        title: String,
        blocks: Vec<Block>,
    ) -> PageResult<Page> {
        let now = Version::now();
        let page = Page {
            id: PageId::new(),
            owner_id: owner,
            title,
            cover: None,
            published: false,
            unlisted: false,
            mood: 0,
            intensity: 0,
            created_at: now.as_datetime(),
            updated_at: now,
            archived_at: None,
            blocks,
        };
        let row = page.clone();
        self.with_db(move |db| db.create_page(&row)).await?;
        Ok(page)
    }

    async fn atomic_replace_blocks(
        &self,
        id: PageId,
        blocks: Vec<Block>,
        expected: Option<Version>,
    ) -> PageResult<usize> {
        self.with_db(move |db| db.replace_blocks(&id, &blocks, expected))
            .await
    }

    async fn atomic_update_meta(
        &self,
        id: PageId,
        update: MetaUpdate,
        expected: Option<Version>,
    ) -> PageResult<usize> {
        self.with_db(move |db| db.update_meta(&id, &update, expected))
            .await
    }

    async fn set_published(&self, id: PageId, published: bool, unlisted: bool) -> PageResult<usize> {
        self.with_db(move |db| db.set_published(&id, published, unlisted))
            .await
    }

    async fn exists(&self, id: PageId) -> PageResult<bool> {
        self.with_db(move |db| db.page_exists(&id)).await
    }

    async fn fetch_by_id(&self, id: PageId) -> PageResult<Option<Page>> {
        self.with_db(move |db| db.get_page(&id, false)).await
    }

    async fn fetch_any(&self, id: PageId) -> PageResult<Option<Page>> {
        self.with_db(move |db| db.get_page(&id, true)).await
    }

    async fn archive(&self, id: PageId) -> PageResult<usize> {
        self.with_db(move |db| db.archive(&id)).await
    }

    async fn restore(&self, id: PageId) -> PageResult<usize> {
        self.with_db(move |db| db.restore(&id)).await
    }

    async fn purge(&self, id: PageId) -> PageResult<usize> {
        self.with_db(move |db| db.purge(&id)).await
    }

    async fn owner_of(&self, id: PageId) -> PageResult<Option<Option<String>>> {
        self.with_db(move |db| db.owner_of(&id)).await
    }
}

#[async_trait]
impl ShareLinkStore for SqliteStore {
    async fn create_share_link(
        &self,
        page_id: PageId,
        access: AccessLevel,
        created_by: String,
    ) -> PageResult<ShareLink> {
        let link = ShareLink {
            token: generate_share_token(),
            page_id,
            access,
            created_by,
            revoked: false,
            created_at: Version::now().as_datetime(),
        };
        let row = link.clone();
        self.with_db(move |db| db.insert_share_link(&row)).await?;
        Ok(link)
    }

    async fn find_share_link(&self, token: String) -> PageResult<Option<ShareLink>> {
        self.with_db(move |db| db.get_share_link(&token)).await
    }

    async fn list_share_links(&self, page_id: PageId) -> PageResult<Vec<ShareLink>> {
        self.with_db(move |db| db.list_share_links(&page_id)).await
    }

    async fn revoke_share_link(&self, page_id: PageId, token: String) -> PageResult<bool> {
        let rows = self
            .with_db(move |db| db.revoke_share_link(&page_id, &token))
            .await?;
        Ok(rows > 0)
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}
