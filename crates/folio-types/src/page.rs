//! Pages and their blocks.
//!
//! A [`Page`] is the unit of collaboration: metadata plus an ordered list of
//! [`Block`]s. Blocks have no lifecycle of their own; every edit submits the
//! full set as [`BlockInput`]s, which replace what was there before.
//!
//! Block payloads are opaque JSON. The `type` discriminant tells renderers how
//! to read the payload; nothing on the server interprets it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::ids::{BlockId, PageId};
use crate::version::Version;

/// Mood is clamped to `[-MOOD_BOUND, MOOD_BOUND]`.
pub const MOOD_BOUND: i16 = 5;

/// Intensity is clamped to `[0, MAX_INTENSITY]`.
pub const MAX_INTENSITY: u8 = 10;

/// A client submission that cannot be applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("block {index} has an empty type")]
    EmptyBlockType { index: usize },

    #[error("duplicate block id {0}")]
    DuplicateBlock(BlockId),

    #[error("block {block} references itself as parent")]
    SelfParent { block: BlockId },

    #[error("title must not be empty")]
    EmptyTitle,

    #[error("no metadata fields to update")]
    EmptyPatch,
}

/// A collaboratively edited document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    /// Creating actor. `None` for anonymous pages, which only share links can reach.
    pub owner_id: Option<String>,
    pub title: String,
    pub cover: Option<String>,
    pub published: bool,
    pub unlisted: bool,
    pub mood: i16,
    pub intensity: u8,
    pub created_at: DateTime<Utc>,
    /// Version stamp; strictly increases on every successful mutation.
    pub updated_at: Version,
    /// Set when the page is soft-deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
    /// Ordered by `position`.
    pub blocks: Vec<Block>,
}

impl Page {
    /// Whether `actor` owns this page. Anonymous pages have no owner.
    pub fn is_owned_by(&self, actor: &str) -> bool {
        !actor.is_empty() && self.owner_id.as_deref() == Some(actor)
    }

    /// Published pages are readable without an account or a share link.
    pub fn is_public(&self) -> bool {
        self.published
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}

/// A typed content unit within a page.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    /// Hierarchy hint only; blocks are not owned by their parent.
    #[serde(default)]
    pub parent_id: Option<BlockId>,
    #[serde(rename = "type")]
    pub kind: String,
    /// Render order within the page. Not required to be contiguous.
    pub position: i64,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// A block as submitted by a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockInput {
    /// Generated when absent.
    #[serde(default)]
    pub id: Option<BlockId>,
    #[serde(default)]
    pub parent_id: Option<BlockId>,
    #[serde(rename = "type")]
    pub kind: String,
    /// Missing or negative positions fall back to the array index.
    #[serde(default)]
    pub position: Option<i64>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl BlockInput {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: None,
            parent_id: None,
            kind: kind.into(),
            position: None,
            payload,
        }
    }

    pub fn with_position(mut self, position: i64) -> Self {
        self.position = Some(position);
        self
    }
}

/// Turn a submitted block list into the canonical set to store.
///
/// - ids are generated for blocks that lack one
/// - missing or negative positions become the block's index in `inputs`
/// - the type discriminant is trimmed and must be non-empty
///
/// Output keeps submission order; readers sort by position.
pub fn normalize_blocks(inputs: Vec<BlockInput>) -> Result<Vec<Block>, ValidationError> {
    let mut seen = std::collections::HashSet::with_capacity(inputs.len());
    let mut blocks = Vec::with_capacity(inputs.len());

    for (index, input) in inputs.into_iter().enumerate() {
        let kind = input.kind.trim();
        if kind.is_empty() {
            return Err(ValidationError::EmptyBlockType { index });
        }

        let id = input.id.unwrap_or_default();
        if !seen.insert(id) {
            return Err(ValidationError::DuplicateBlock(id));
        }
        if input.parent_id == Some(id) {
            return Err(ValidationError::SelfParent { block: id });
        }

        let position = match input.position {
            Some(p) if p >= 0 => p,
            _ => index as i64,
        };

        blocks.push(Block {
            id,
            parent_id: input.parent_id,
            kind: kind.to_string(),
            position,
            payload: input.payload,
        });
    }

    Ok(blocks)
}

/// A partial metadata update as submitted by a client.
///
/// `cover` distinguishes "absent" (leave alone) from `null` (clear).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub cover: Option<Option<String>>,
    #[serde(default)]
    pub mood: Option<i64>,
    #[serde(default)]
    pub intensity: Option<i64>,
}

/// A validated metadata update, ready for the store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetaUpdate {
    pub title: Option<String>,
    pub cover: Option<Option<String>>,
    pub mood: Option<i16>,
    pub intensity: Option<u8>,
}

impl MetaPatch {
    /// Validate and clamp. Out-of-range mood/intensity are clamped, not rejected.
    pub fn normalize(self) -> Result<MetaUpdate, ValidationError> {
        let title = match self.title {
            Some(t) => {
                let t = t.trim();
                if t.is_empty() {
                    return Err(ValidationError::EmptyTitle);
                }
                Some(t.to_string())
            }
            None => None,
        };

        // An empty cover string clears it, same as null.
        let cover = self
            .cover
            .map(|c| c.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()));

        let update = MetaUpdate {
            title,
            cover,
            mood: self.mood.map(clamp_mood),
            intensity: self.intensity.map(clamp_intensity),
        };

        if update.is_empty() {
            return Err(ValidationError::EmptyPatch);
        }
        Ok(update)
    }
}

impl MetaUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.cover.is_none() && self.mood.is_none() && self.intensity.is_none()
    }
}

/// Clamp a mood value into `[-MOOD_BOUND, MOOD_BOUND]`.
pub fn clamp_mood(mood: i64) -> i16 {
    mood.clamp(-(MOOD_BOUND as i64), MOOD_BOUND as i64) as i16
}

/// Clamp an intensity value into `[0, MAX_INTENSITY]`.
pub fn clamp_intensity(intensity: i64) -> u8 {
    intensity.clamp(0, MAX_INTENSITY as i64) as u8
}

fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
