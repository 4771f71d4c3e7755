//! Change events carried on the realtime bus.
//!
//! Three kinds share one wire shape, a JSON object tagged by `type`:
//!
//! ```text
//! {"type":"page",     "page_id":"…", "page":{…},                                   "ts":"…"}
//! {"type":"typing",   "page_id":"…", "session_id":"…", "name":"…", "typing":true,  "ts":"…"}
//! {"type":"presence", "page_id":"…", "session_id":"…", "name":"…", "online":false, "ts":"…"}
//! ```
//!
//! `page` events follow a persisted write and carry the full snapshot.
//! `typing` and `presence` are ephemeral and never stored.
//!
//! # Legacy payloads
//!
//! Older publishers pushed the bare page snapshot with no tag. [`ChangeEvent::decode`]
//! still accepts that shape and lifts it into a `page` event. This is a
//! compatibility shim; drop it once no publisher emits the old shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::PageId;
use crate::page::Page;

/// The three event kinds, doubling as relay frame names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Page,
    Typing,
    Presence,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Page => "page",
            EventKind::Typing => "typing",
            EventKind::Presence => "presence",
        }
    }

    /// Map a wire tag to a kind. `None` for tags this build does not know.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "page" => Some(EventKind::Page),
            "typing" => Some(EventKind::Typing),
            "presence" => Some(EventKind::Presence),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A page was persisted; carries the canonical snapshot after the write.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageChanged {
    pub page_id: PageId,
    pub page: Page,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<DateTime<Utc>>,
}

/// Someone started or stopped typing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingEvent {
    pub page_id: PageId,
    pub session_id: String,
    pub name: String,
    pub typing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<DateTime<Utc>>,
}

/// Someone joined or left the page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub page_id: PageId,
    pub session_id: String,
    pub name: String,
    pub online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<DateTime<Utc>>,
}

/// Tagged union of everything the relay forwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChangeEvent {
    Page(PageChanged),
    Typing(TypingEvent),
    Presence(PresenceEvent),
}

/// Result of decoding a bus payload.
#[derive(Debug)]
pub enum Decoded {
    Event(ChangeEvent),
    /// Tagged with a `type` this build does not know; skip it.
    Unknown(String),
    /// Neither the current nor the legacy shape.
    Malformed(String),
}

impl ChangeEvent {
    /// A `page` event for a freshly persisted snapshot.
    pub fn page(page: Page) -> Self {
        ChangeEvent::Page(PageChanged {
            page_id: page.id,
            page,
            ts: Some(Utc::now()),
        })
    }

    pub fn kind(&self) -> EventKind {
        match self {
            ChangeEvent::Page(_) => EventKind::Page,
            ChangeEvent::Typing(_) => EventKind::Typing,
            ChangeEvent::Presence(_) => EventKind::Presence,
        }
    }

    /// The page this event concerns.
    pub fn page_id(&self) -> &PageId {
        match self {
            ChangeEvent::Page(e) => &e.page_id,
            ChangeEvent::Typing(e) => &e.page_id,
            ChangeEvent::Presence(e) => &e.page_id,
        }
    }

    pub fn ts(&self) -> Option<DateTime<Utc>> {
        match self {
            ChangeEvent::Page(e) => e.ts,
            ChangeEvent::Typing(e) => e.ts,
            ChangeEvent::Presence(e) => e.ts,
        }
    }

    /// Fill in `ts` if the publisher left it out.
    pub fn stamp_if_missing(&mut self, now: DateTime<Utc>) {
        let ts = match self {
            ChangeEvent::Page(e) => &mut e.ts,
            ChangeEvent::Typing(e) => &mut e.ts,
            ChangeEvent::Presence(e) => &mut e.ts,
        };
        ts.get_or_insert(now);
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode a bus payload, accepting the legacy untagged page shape.
    pub fn decode(bytes: &[u8]) -> Decoded {
        let value: serde_json::Value = match serde_json::from_slice(bytes) {
            Ok(v) => v,
            Err(e) => return Decoded::Malformed(e.to_string()),
        };

        if let Some(tag) = value.get("type").and_then(|t| t.as_str()) {
            if EventKind::from_tag(tag).is_none() {
                return Decoded::Unknown(tag.to_string());
            }
        }

        match serde_json::from_value::<ChangeEvent>(value.clone()) {
            Ok(event) => Decoded::Event(event),
            Err(current) => match decode_legacy(value) {
                Some(event) => Decoded::Event(event),
                None => Decoded::Malformed(current.to_string()),
            },
        }
    }
}

/// Legacy shape: the bare page snapshot, no tag, no timestamp.
fn decode_legacy(value: serde_json::Value) -> Option<ChangeEvent> {
    let page: Page = serde_json::from_value(value).ok()?;
    Some(ChangeEvent::Page(PageChanged {
        page_id: page.id,
        page,
        ts: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Version;
    use serde_json::json;

    fn page() -> Page {
        Page {
            id: PageId::new(),
            owner_id: None,
            title: "Untitled".into(),
            cover: None,
            published: false,
            unlisted: false,
            mood: 0,
            intensity: 0,
            created_at: Utc::now(),
            updated_at: Version::now(),
            archived_at: None,
            blocks: vec![],
        }
    }

    #[test]
    fn test_tagged_wire_shape() {
        let id = PageId::new();
        let ev = ChangeEvent::Typing(TypingEvent {
            page_id: id,
            session_id: "s1".into(),
            name: "Amy".into(),
            typing: true,
            ts: None,
        });
        let value: serde_json::Value = serde_json::from_str(&ev.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "typing");
        assert_eq!(value["page_id"], id.to_string());
        assert_eq!(value["typing"], true);
        assert!(value.get("ts").is_none());
    }

    #[test]
    fn test_decode_current_shape() {
        let p = page();
        let bytes = ChangeEvent::page(p.clone()).to_json().unwrap();
        match ChangeEvent::decode(bytes.as_bytes()) {
            Decoded::Event(ChangeEvent::Page(e)) => {
                assert_eq!(e.page_id, p.id);
                assert_eq!(e.page, p);
                assert!(e.ts.is_some());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_tag() {
        let bytes = json!({"type": "cursor", "page_id": PageId::new()}).to_string();
        match ChangeEvent::decode(bytes.as_bytes()) {
            Decoded::Unknown(tag) => assert_eq!(tag, "cursor"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_decode_legacy_page_snapshot() {
        let p = page();
        let bytes = serde_json::to_vec(&p).unwrap();
        match ChangeEvent::decode(&bytes) {
            Decoded::Event(ChangeEvent::Page(e)) => {
                assert_eq!(e.page_id, p.id);
                assert_eq!(e.ts, None);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(ChangeEvent::decode(b"not json"), Decoded::Malformed(_)));
        let missing_fields = json!({"type": "presence", "page_id": PageId::new()}).to_string();
        assert!(matches!(
            ChangeEvent::decode(missing_fields.as_bytes()),
            Decoded::Malformed(_)
        ));
    }

    #[test]
    fn test_stamp_if_missing() {
        let now = Utc::now();
        let mut ev = ChangeEvent::Presence(PresenceEvent {
            page_id: PageId::new(),
            session_id: "s".into(),
            name: "n".into(),
            online: true,
            ts: None,
        });
        ev.stamp_if_missing(now);
        assert_eq!(ev.ts(), Some(now));

        let earlier = now - chrono::TimeDelta::seconds(5);
        let mut ev = ChangeEvent::page(page());
        if let ChangeEvent::Page(e) = &mut ev {
            e.ts = Some(earlier);
        }
        ev.stamp_if_missing(now);
        assert_eq!(ev.ts(), Some(earlier));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(EventKind::Page.as_str(), "page");
        assert_eq!(EventKind::from_tag("presence"), Some(EventKind::Presence));
        assert_eq!(EventKind::from_tag("Page"), None);
    }
}
