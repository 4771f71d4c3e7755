//! SQLite persistence for pages, blocks and share links.
//!
//! Timestamps are stored as Unix microseconds. `pages.updated_at` is the
//! version stamp; every mutating method compares and bumps it inside one
//! transaction, so a block set is never observed half-replaced and two
//! writers holding the same stamp cannot both land.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Result as SqliteResult, Row, Transaction, params};

use folio_types::{AccessLevel, Block, BlockId, MetaUpdate, Page, PageId, ShareLink, Version};

/// Database handle for page persistence.
pub struct PageDb {
    conn: Connection,
}

const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Pages (updated_at doubles as the optimistic-concurrency version stamp)
CREATE TABLE IF NOT EXISTS pages (
    id TEXT PRIMARY KEY,
    owner_id TEXT,
    title TEXT NOT NULL,
    cover TEXT,
    published INTEGER NOT NULL DEFAULT 0,
    unlisted INTEGER NOT NULL DEFAULT 0,
    mood INTEGER NOT NULL DEFAULT 0,
    intensity INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    archived_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_pages_owner ON pages(owner_id);

-- Blocks (replaced wholesale per page)
CREATE TABLE IF NOT EXISTS blocks (
    page_id TEXT NOT NULL,
    id TEXT NOT NULL,
    parent_id TEXT,
    kind TEXT NOT NULL,
    position INTEGER NOT NULL,
    order_idx INTEGER NOT NULL,
    payload TEXT NOT NULL,
    PRIMARY KEY (page_id, id),
    FOREIGN KEY (page_id) REFERENCES pages(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_blocks_order ON blocks(page_id, position, order_idx);

-- Share links (access immutable, revoked one-way)
CREATE TABLE IF NOT EXISTS share_links (
    token TEXT PRIMARY KEY,
    page_id TEXT NOT NULL,
    access TEXT NOT NULL,
    created_by TEXT NOT NULL,
    revoked INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    FOREIGN KEY (page_id) REFERENCES pages(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_share_links_page ON share_links(page_id);
"#;

const PAGE_COLUMNS: &str = "id, owner_id, title, cover, published, unlisted, mood, intensity, \
     created_at, updated_at, archived_at";

impl PageDb {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> SqliteResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> SqliteResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    // =========================================================================
    // Pages
    // =========================================================================

    /// Insert a new page with its blocks.
    pub fn create_page(&mut self, page: &Page) -> SqliteResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO pages (id, owner_id, title, cover, published, unlisted, mood, intensity,
                                created_at, updated_at, archived_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL)",
            params![
                page.id.to_string(),
                page.owner_id,
                page.title,
                page.cover,
                page.published,
                page.unlisted,
                page.mood,
                page.intensity,
                page.created_at.timestamp_micros(),
                page.updated_at.as_micros(),
            ],
        )?;
        insert_blocks(&tx, &page.id, &page.blocks)?;
        tx.commit()
    }

    /// Load a page and its blocks. Archived pages only with `include_archived`.
    pub fn get_page(&self, id: &PageId, include_archived: bool) -> SqliteResult<Option<Page>> {
        let sql = if include_archived {
            format!("SELECT {PAGE_COLUMNS} FROM pages WHERE id = ?1")
        } else {
            format!("SELECT {PAGE_COLUMNS} FROM pages WHERE id = ?1 AND archived_at IS NULL")
        };

        let page = self
            .conn
            .query_row(&sql, params![id.to_string()], row_to_page)
            .optional()?;

        match page {
            Some(mut page) => {
                page.blocks = self.get_blocks(id)?;
                Ok(Some(page))
            }
            None => Ok(None),
        }
    }

    /// Whether a live (non-archived) page exists.
    pub fn page_exists(&self, id: &PageId) -> SqliteResult<bool> {
        self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM pages WHERE id = ?1 AND archived_at IS NULL)",
            params![id.to_string()],
            |row| row.get(0),
        )
    }

    /// Owner of a page, archived or not. Outer `None` means no such row.
    pub fn owner_of(&self, id: &PageId) -> SqliteResult<Option<Option<String>>> {
        self.conn
            .query_row(
                "SELECT owner_id FROM pages WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
    }

    /// Replace every block of a page, gated on `expected`.
    ///
    /// Returns rows affected: 1 on success, 0 when the page is missing,
    /// archived, or its stamp no longer equals `expected`.
    pub fn replace_blocks(
        &mut self,
        id: &PageId,
        blocks: &[Block],
        expected: Option<Version>,
    ) -> SqliteResult<usize> {
        let tx = self.conn.transaction()?;
        if bump_version(&tx, id, expected)?.is_none() {
            return Ok(0);
        }
        tx.execute("DELETE FROM blocks WHERE page_id = ?1", params![id.to_string()])?;
        insert_blocks(&tx, id, blocks)?;
        tx.commit()?;
        Ok(1)
    }

    /// Apply a metadata update, gated on `expected`. Same return contract as
    /// [`replace_blocks`](Self::replace_blocks).
    pub fn update_meta(
        &mut self,
        id: &PageId,
        update: &MetaUpdate,
        expected: Option<Version>,
    ) -> SqliteResult<usize> {
        let tx = self.conn.transaction()?;
        if bump_version(&tx, id, expected)?.is_none() {
            return Ok(0);
        }
        let (set_cover, cover) = match &update.cover {
            Some(cover) => (true, cover.clone()),
            None => (false, None),
        };
        tx.execute(
            "UPDATE pages SET
                title = COALESCE(?1, title),
                cover = CASE WHEN ?2 THEN ?3 ELSE cover END,
                mood = COALESCE(?4, mood),
                intensity = COALESCE(?5, intensity)
             WHERE id = ?6",
            params![
                update.title,
                set_cover,
                cover,
                update.mood,
                update.intensity,
                id.to_string(),
            ],
        )?;
        tx.commit()?;
        Ok(1)
    }

    /// Set the publish flags. Not version-gated, but still bumps the stamp.
    pub fn set_published(&mut self, id: &PageId, published: bool, unlisted: bool) -> SqliteResult<usize> {
        let tx = self.conn.transaction()?;
        if bump_version(&tx, id, None)?.is_none() {
            return Ok(0);
        }
        tx.execute(
            "UPDATE pages SET published = ?1, unlisted = ?2 WHERE id = ?3",
            params![published, unlisted, id.to_string()],
        )?;
        tx.commit()?;
        Ok(1)
    }

    /// Soft-delete a live page.
    pub fn archive(&mut self, id: &PageId) -> SqliteResult<usize> {
        let tx = self.conn.transaction()?;
        if bump_version(&tx, id, None)?.is_none() {
            return Ok(0);
        }
        tx.execute(
            "UPDATE pages SET archived_at = ?1 WHERE id = ?2",
            params![Utc::now().timestamp_micros(), id.to_string()],
        )?;
        tx.commit()?;
        Ok(1)
    }

    /// Bring an archived page back. The stamp is bumped past its archived value.
    pub fn restore(&mut self, id: &PageId) -> SqliteResult<usize> {
        let tx = self.conn.transaction()?;
        let current: Option<i64> = tx
            .query_row(
                "SELECT updated_at FROM pages WHERE id = ?1 AND archived_at IS NOT NULL",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current.and_then(Version::from_micros) else {
            return Ok(0);
        };
        let rows = tx.execute(
            "UPDATE pages SET archived_at = NULL, updated_at = ?1 WHERE id = ?2",
            params![Version::successor(current).as_micros(), id.to_string()],
        )?;
        tx.commit()?;
        Ok(rows)
    }

    /// Hard-delete an archived page. Blocks and share links cascade.
    pub fn purge(&mut self, id: &PageId) -> SqliteResult<usize> {
        self.conn.execute(
            "DELETE FROM pages WHERE id = ?1 AND archived_at IS NOT NULL",
            params![id.to_string()],
        )
    }

    fn get_blocks(&self, page_id: &PageId) -> SqliteResult<Vec<Block>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, parent_id, kind, position, payload
             FROM blocks WHERE page_id = ?1 ORDER BY position, order_idx",
        )?;
        let blocks = stmt
            .query_map(params![page_id.to_string()], row_to_block)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(blocks)
    }

    // =========================================================================
    // Share links
    // =========================================================================

    /// Insert a new share link.
    pub fn insert_share_link(&self, link: &ShareLink) -> SqliteResult<()> {
        self.conn.execute(
            "INSERT INTO share_links (token, page_id, access, created_by, revoked, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                link.token,
                link.page_id.to_string(),
                link.access.as_str(),
                link.created_by,
                link.revoked,
                link.created_at.timestamp_micros(),
            ],
        )?;
        Ok(())
    }

    /// Look up a share link by token, revoked or not.
    pub fn get_share_link(&self, token: &str) -> SqliteResult<Option<ShareLink>> {
        self.conn
            .query_row(
                "SELECT token, page_id, access, created_by, revoked, created_at
                 FROM share_links WHERE token = ?1",
                params![token],
                row_to_share_link,
            )
            .optional()
    }

    /// All share links of a page, oldest first.
    pub fn list_share_links(&self, page_id: &PageId) -> SqliteResult<Vec<ShareLink>> {
        let mut stmt = self.conn.prepare(
            "SELECT token, page_id, access, created_by, revoked, created_at
             FROM share_links WHERE page_id = ?1 ORDER BY created_at, token",
        )?;
        let links = stmt
            .query_map(params![page_id.to_string()], row_to_share_link)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(links)
    }

    /// Revoke a link of `page_id`. Returns rows affected (0 if unknown or already revoked).
    pub fn revoke_share_link(&self, page_id: &PageId, token: &str) -> SqliteResult<usize> {
        self.conn.execute(
            "UPDATE share_links SET revoked = 1 WHERE token = ?1 AND page_id = ?2 AND revoked = 0",
            params![token, page_id.to_string()],
        )
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Compare-and-bump the stamp of a live page inside `tx`.
///
/// Returns the new stamp, or `None` when the page is missing, archived, or
/// `expected` is set and differs from the stored stamp.
fn bump_version(tx: &Transaction<'_>, id: &PageId, expected: Option<Version>) -> SqliteResult<Option<Version>> {
    let current: Option<i64> = tx
        .query_row(
            "SELECT updated_at FROM pages WHERE id = ?1 AND archived_at IS NULL",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()?;

    let Some(current) = current.and_then(Version::from_micros) else {
        return Ok(None);
    };
    if expected.is_some_and(|expected| expected != current) {
        return Ok(None);
    }

    let next = Version::successor(current);
    let rows = tx.execute(
        "UPDATE pages SET updated_at = ?1 WHERE id = ?2 AND updated_at = ?3",
        params![next.as_micros(), id.to_string(), current.as_micros()],
    )?;
    Ok((rows == 1).then_some(next))
}

fn insert_blocks(tx: &Transaction<'_>, page_id: &PageId, blocks: &[Block]) -> SqliteResult<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO blocks (page_id, id, parent_id, kind, position, order_idx, payload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for (order_idx, block) in blocks.iter().enumerate() {
        stmt.execute(params![
            page_id.to_string(),
            block.id.to_string(),
            block.parent_id.map(|p| p.to_string()),
            block.kind,
            block.position,
            order_idx as i64,
            block.payload.to_string(),
        ])?;
    }
    Ok(())
}

fn conversion_error<E>(idx: usize, ty: Type, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(e))
}

fn parse_page_id(row: &Row<'_>, idx: usize) -> SqliteResult<PageId> {
    let s: String = row.get(idx)?;
    PageId::parse(&s).map_err(|e| conversion_error(idx, Type::Text, e))
}

fn parse_block_id(s: &str, idx: usize) -> SqliteResult<BlockId> {
    BlockId::parse(s).map_err(|e| conversion_error(idx, Type::Text, e))
}

fn micros_to_datetime(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_default()
}

fn row_to_page(row: &Row<'_>) -> SqliteResult<Page> {
    let updated_at: i64 = row.get(9)?;
    let archived_at: Option<i64> = row.get(10)?;
    Ok(Page {
        id: parse_page_id(row, 0)?,
        owner_id: row.get(1)?,
        title: row.get(2)?,
        cover: row.get(3)?,
        published: row.get(4)?,
        unlisted: row.get(5)?,
        mood: row.get(6)?,
        intensity: row.get(7)?,
        created_at: micros_to_datetime(row.get(8)?),
        updated_at: Version::from_micros(updated_at)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(9, updated_at))?,
        archived_at: archived_at.map(micros_to_datetime),
        blocks: Vec::new(),
    })
}

fn row_to_block(row: &Row<'_>) -> SqliteResult<Block> {
    let id: String = row.get(0)?;
    let parent_id: Option<String> = row.get(1)?;
    let payload: String = row.get(4)?;
    Ok(Block {
        id: parse_block_id(&id, 0)?,
        parent_id: parent_id.as_deref().map(|p| parse_block_id(p, 1)).transpose()?,
        kind: row.get(2)?,
        position: row.get(3)?,
        payload: serde_json::from_str(&payload).map_err(|e| conversion_error(4, Type::Text, e))?,
    })
}

fn row_to_share_link(row: &Row<'_>) -> SqliteResult<ShareLink> {
    let access: String = row.get(2)?;
    Ok(ShareLink {
        token: row.get(0)?,
        page_id: parse_page_id(row, 1)?,
        access: AccessLevel::from_str(&access).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(2, Type::Text, format!("unknown access {access:?}").into())
        })?,
        created_by: row.get(3)?,
        revoked: row.get(4)?,
        created_at: micros_to_datetime(row.get(5)?),
    })
}
