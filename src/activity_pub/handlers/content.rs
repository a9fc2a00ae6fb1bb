use anyhow::Result;
use jiff::Timestamp;
use serde_json::Value;
use tracing::info;

use super::object_iri;
use crate::activity_pub::InboxError;
use crate::activity_pub::chain::content_body;
use crate::activity_pub::inbox::{Inbox, now};
use crate::activity_pub::local_url::UrlMatcher;
use crate::activity_pub::mailman::Mailman;
use crate::activity_pub::model::Object;
use crate::activity_pub::repo::{ActorRecord, ContentRecord, FindOrCreate, Visibility};

impl<M: Mailman> Inbox<M> {
    pub(crate) async fn handle_create(
        &self,
        actor: &ActorRecord,
        activity: &Object<'_>,
    ) -> Result<()> {
        let object = self.activity_object(activity).await?;
        if object.is_actor() {
            return Err(InboxError::Unsupported("Create of an actor".to_string()).into());
        }
        let iri = object
            .id()
            .ok_or_else(|| InboxError::Malformed("created object has no id".to_string()))?;
        if self.urls.is_local(iri) {
            return self.noop("create echoes local content", Some(iri));
        }
        let author = object
            .attributed_to()
            .ok_or_else(|| InboxError::Malformed(format!("{iri} has no author")))?;
        if !UrlMatcher::same_host(author, &actor.iri) {
            return Err(InboxError::Unauthorized(format!(
                "{} cannot create content of {author}",
                actor.iri
            ))
            .into());
        }
        let iri = iri.to_string();

        let FindOrCreate::Created(content) = self.materialize(object).await? else {
            return self.noop("content already known", Some(&iri));
        };
        let Some(magazine) = self.content_magazine(&content)? else {
            return Ok(());
        };
        if magazine.is_local {
            self.announce_to_followers(&magazine, Value::from(iri)).await?;
        }
        Ok(())
    }

    /// Actors update themselves. Content may be edited by its author or a
    /// moderator of its magazine; only title and body change.
    pub(crate) async fn handle_update(
        &self,
        actor: &ActorRecord,
        activity: &Object<'_>,
    ) -> Result<()> {
        let object = self.activity_object(activity).await?;
        if object.is_actor() {
            if object.id() != Some(actor.iri.as_str()) {
                return Err(InboxError::Unauthorized(format!(
                    "{} cannot update another actor",
                    actor.iri
                ))
                .into());
            }
            let updated = self.update_actor(actor.key, &object)?;
            info!(target: "inbox", actor = updated.iri, "actor updated");
            return Ok(());
        }

        let iri = object
            .id()
            .ok_or_else(|| InboxError::Malformed("updated object has no id".to_string()))?;
        let Some(content) = self.lookup_content(iri)? else {
            return self.noop("update of unknown content", Some(iri));
        };
        let moderator = self
            .content_magazine(&content)?
            .is_some_and(|magazine| magazine.is_moderator(actor.key));
        if content.author != actor.key && !moderator {
            return Err(InboxError::Unauthorized(format!(
                "{} cannot edit {}",
                actor.iri, content.iri
            ))
            .into());
        }

        let title = object.has_prop("name").then(|| {
            object
                .get_str("name")
                .filter(|name| !name.trim().is_empty())
                .map(str::to_string)
        });
        let body = (object.has_prop("content") || object.has_prop("source"))
            .then(|| content_body(&object));
        let edited_at = object
            .get_str("updated")
            .and_then(|updated| updated.parse::<Timestamp>().ok())
            .map_or_else(now, |updated| updated.as_second());
        self.store.modify_content(content.key, |content| {
            if let Some(title) = title {
                content.title = title;
            }
            if let Some(body) = body {
                content.body = body;
            }
            content.edited_at = Some(edited_at);
            true
        })?;
        info!(target: "inbox", editor = actor.iri, content = content.iri, "content edited");
        Ok(())
    }

    pub(crate) fn handle_delete(&self, actor: &ActorRecord, activity: &Object<'_>) -> Result<()> {
        let iri = object_iri(activity)?;
        if let Some(content) = self.lookup_content(iri)? {
            return self.delete_content(actor, &content);
        }
        let Some(user) = self.store.find_actor(iri)? else {
            return self.noop("delete of unknown object", Some(iri));
        };
        if user.is_local || !UrlMatcher::same_host(&user.iri, &actor.iri) {
            return Err(InboxError::Unauthorized(format!(
                "{} cannot delete {}",
                actor.iri, user.iri
            ))
            .into());
        }
        let deleted = self.store.modify_actor(user.key, |user| {
            let changed = !user.deleted;
            user.deleted = true;
            changed
        })?;
        if !deleted {
            return self.noop("actor already deleted", Some(iri));
        }
        info!(target: "inbox", actor = user.iri, "actor deleted");
        Ok(())
    }

    /// Comments nobody replied to are removed outright. Anything else stays
    /// as a placeholder so the thread keeps its shape.
    fn delete_content(&self, actor: &ActorRecord, content: &ContentRecord) -> Result<()> {
        let by_author = content.author == actor.key
            || (!content.is_local && UrlMatcher::same_host(&content.iri, &actor.iri));
        let by_moderator = self
            .content_magazine(content)?
            .is_some_and(|magazine| magazine.is_moderator(actor.key));
        if !by_author && !by_moderator {
            return Err(InboxError::Unauthorized(format!(
                "{} cannot delete {}",
                actor.iri, content.iri
            ))
            .into());
        }

        if content.kind.is_comment() && !self.store.has_children(content.key)? {
            self.store.delete_content(content)?;
            info!(target: "inbox", content = content.iri, "comment removed");
            return Ok(());
        }
        let visibility = if by_author {
            Visibility::SoftDeleted
        } else {
            Visibility::Trashed
        };
        let changed = self.store.modify_content(content.key, |content| {
            let changed = content.visibility != visibility;
            content.visibility = visibility;
            changed
        })?;
        if !changed {
            return self.noop("content already deleted", Some(&content.iri));
        }
        info!(target: "inbox", content = content.iri, ?visibility, "content hidden");
        Ok(())
    }

    /// The `object` of `activity`, embedded or fetched from its IRI.
    async fn activity_object(&self, activity: &Object<'_>) -> Result<Object<'static>> {
        match activity.get_node_object("object") {
            Some(object) => Ok(object.into_owned()),
            None => self.fetch_object(object_iri(activity)?).await,
        }
    }

    pub(crate) fn content_magazine(&self, content: &ContentRecord) -> Result<Option<ActorRecord>> {
        match content.magazine {
            Some(key) => self.store.get_actor(key),
            None => Ok(None),
        }
    }
}
