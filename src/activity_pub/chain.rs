//! Materializing content whose reply chain is not known locally yet.

use std::collections::HashSet;

use anyhow::Result;
use jiff::Timestamp;
use tracing::{debug, info};

use crate::activity_pub::InboxError;
use crate::activity_pub::inbox::{Inbox, now};
use crate::activity_pub::mailman::Mailman;
use crate::activity_pub::message::{ChainMessage, Envelope, QueueItem};
use crate::activity_pub::model::Object;
use crate::activity_pub::repo::{ContentKind, ContentRecord, EntityKey, FindOrCreate, Visibility};

const ENTRY_TYPES: [&str; 6] = ["Page", "Article", "Link", "Image", "Video", "Event"];
const POST_TYPES: [&str; 2] = ["Note", "Question"];

impl<M: Mailman> Inbox<M> {
    /// Create `object` and every missing ancestor it replies to, ancestors
    /// first. Ancestors created before a failure are kept.
    pub(crate) async fn materialize(
        &self,
        object: Object<'static>,
    ) -> Result<FindOrCreate<ContentRecord>> {
        let leaf = object
            .id()
            .ok_or_else(|| InboxError::Malformed("object has no id".to_string()))?
            .to_string();
        let mut visited = HashSet::from([leaf.clone()]);
        let mut pending = vec![object];

        while let Some(parent) = pending
            .last()
            .and_then(|object| object.get_node_iri("inReplyTo"))
            .map(str::to_string)
        {
            if self.lookup_content(&parent)?.is_some() {
                break;
            }
            if !visited.insert(parent.clone()) {
                return Err(InboxError::Malformed(format!("reply chain of {leaf} loops at {parent}")).into());
            }
            if pending.len() > self.config.max_chain_depth {
                return Err(InboxError::Malformed(format!("reply chain of {leaf} is too deep")).into());
            }
            debug!(target: "chain", leaf, parent, depth = pending.len(), "fetching ancestor");
            let ancestor = self.fetch_object(&parent).await?;
            if ancestor.id() != Some(parent.as_str()) {
                return Err(InboxError::Malformed(format!("{parent} returned a different id")).into());
            }
            pending.push(ancestor);
        }

        let mut created = None;
        while let Some(object) = pending.pop() {
            created = Some(self.create_content(&object).await?);
        }
        created.ok_or_else(|| anyhow::anyhow!("empty reply chain for {leaf}"))
    }

    /// Fetch and materialize `iri` unless it is already known.
    pub(crate) async fn ensure_content(&self, iri: &str) -> Result<ContentRecord> {
        if let Some(content) = self.lookup_content(iri)? {
            return Ok(content);
        }
        let object = self.fetch_object(iri).await?;
        if object.id() != Some(iri) {
            return Err(InboxError::Malformed(format!("{iri} returned a different id")).into());
        }
        Ok(self.materialize(object).await?.into_inner())
    }

    /// Resolve a parked chain, then hand the waiting activity back to the
    /// dispatcher.
    pub(crate) async fn resolve_pending(&self, message: ChainMessage) -> Result<()> {
        for iri in &message.objects {
            let content = self.ensure_content(iri).await?;
            debug!(target: "chain", iri, key = %content.key, "resolved");
        }
        if let Some(wrapping) = message.wrapping {
            debug!(target: "chain", kind = ?wrapping.kind, "re-dispatching parked activity");
            self.enqueue(QueueItem::Delivery(Envelope::unsigned(wrapping.payload)))?;
        }
        Ok(())
    }

    /// Proxy for one remote content object whose parent, if any, is known.
    async fn create_content(&self, object: &Object<'_>) -> Result<FindOrCreate<ContentRecord>> {
        let iri = object
            .id()
            .ok_or_else(|| InboxError::Malformed("object has no id".to_string()))?;
        if let Some(existing) = self.lookup_content(iri)? {
            return Ok(FindOrCreate::Found(existing));
        }
        let author_iri = object
            .attributed_to()
            .ok_or_else(|| InboxError::Malformed(format!("{iri} has no author")))?;
        let author = self.resolve_actor(author_iri).await?;
        if author.banned || author.deleted {
            return Err(InboxError::Unauthorized(format!("author {author_iri} is banned")).into());
        }

        let parent = match object.get_node_iri("inReplyTo") {
            Some(parent_iri) => Some(self.lookup_content(parent_iri)?.ok_or_else(|| {
                InboxError::Malformed(format!("parent {parent_iri} of {iri} is missing"))
            })?),
            None => None,
        };
        let (kind, magazine, root) = match &parent {
            Some(parent) => {
                let root = parent.root.unwrap_or(parent.key);
                let thread = match parent.root {
                    Some(root) => self.store.get_content(root)?,
                    None => Some(parent.clone()),
                };
                if parent.locked || thread.is_some_and(|thread| thread.locked) {
                    return Err(InboxError::Unauthorized(format!("thread of {iri} is locked")).into());
                }
                (parent.kind.reply_kind(), parent.magazine, Some(root))
            }
            None => {
                let kind = if ENTRY_TYPES.iter().any(|ty| object.type_is(ty)) {
                    ContentKind::Entry
                } else if POST_TYPES.iter().any(|ty| object.type_is(ty)) {
                    ContentKind::Post
                } else {
                    let ty = object.get_first_type().unwrap_or_default();
                    return Err(InboxError::Unsupported(format!("content type {ty}")).into());
                };
                (kind, self.find_magazine(object).await?, None)
            }
        };
        if let Some(magazine) = magazine {
            if let Some(ban) = self.store.find_ban(magazine, author.key)? {
                if ban.is_active(now()) {
                    return Err(InboxError::Unauthorized(format!(
                        "{author_iri} is banned from the magazine"
                    ))
                    .into());
                }
            }
        }

        let created_at = object
            .get_str("published")
            .and_then(|published| published.parse::<Timestamp>().ok())
            .map_or_else(now, |published| published.as_second());
        let record = ContentRecord {
            key: EntityKey::new(),
            iri: iri.to_string(),
            kind,
            author: author.key,
            magazine,
            parent: parent.as_ref().map(|parent| parent.key),
            root,
            title: object.get_str("name").map(str::to_string),
            body: content_body(object),
            url: link_url(object, kind),
            upvotes: 0,
            downvotes: 0,
            locked: false,
            visibility: Visibility::Visible,
            is_local: self.urls.is_local(iri),
            created_at,
            edited_at: None,
            last_active: created_at,
        };
        let result = self.store.create_content(record)?;
        if let FindOrCreate::Created(content) = &result {
            info!(target: "chain", iri, kind = ?content.kind, "created content proxy");
            if let Some(root) = content.root {
                self.store.modify_content(root, |thread| {
                    thread.last_active = thread.last_active.max(content.created_at);
                    true
                })?;
            }
        }
        Ok(result)
    }

    /// Magazine of new root content: `audience`, then a known magazine among
    /// the recipients, then the local random magazine.
    async fn find_magazine(&self, object: &Object<'_>) -> Result<Option<EntityKey>> {
        if let Some(audience) = object.get_node_iri("audience") {
            let magazine = self.resolve_actor(audience).await?;
            if magazine.is_magazine() {
                return Ok(Some(magazine.key));
            }
        }
        for prop in ["to", "cc"] {
            for iri in object.get_node_iris(prop) {
                if let Some(actor) = self.store.find_actor(iri)? {
                    if actor.is_magazine() {
                        return Ok(Some(actor.key));
                    }
                }
            }
        }
        let random = self.store.find_actor(&self.urls.random_magazine_iri())?;
        Ok(random.map(|magazine| magazine.key))
    }
}

/// Stored body: markdown source when offered, otherwise sanitized HTML.
/// Null or empty content yields no body.
pub(crate) fn content_body(object: &Object<'_>) -> Option<String> {
    let markdown = object.get_node_object("source").and_then(|source| {
        if source.get_str("mediaType") == Some("text/markdown") {
            source.get_str("content").map(str::to_string)
        } else {
            None
        }
    });
    markdown
        .or_else(|| object.get_str("content").map(ammonia::clean))
        .filter(|body| !body.trim().is_empty())
}

fn link_url(object: &Object<'_>, kind: ContentKind) -> Option<String> {
    if kind != ContentKind::Entry {
        return None;
    }
    let url = object.get_node_iri("url")?;
    (Some(url) != object.id()).then(|| url.to_string())
}
