use anyhow::Result;
use tracing::{debug, info};

use crate::activity_pub::InboxError;
use crate::activity_pub::inbox::{Inbox, now};
use crate::activity_pub::local_url::UrlMatcher;
use crate::activity_pub::mailman::Mailman;
use crate::activity_pub::model::Object;
use crate::activity_pub::repo::{ActorKind, ActorRecord, EntityKey};

impl<M: Mailman> Inbox<M> {
    /// Fail fast on IRIs hosted by a banned instance.
    pub(crate) fn check_host(&self, iri: &str) -> Result<(), InboxError> {
        if self.urls.is_banned(iri) {
            return Err(InboxError::BannedInstance(iri.to_string()));
        }
        Ok(())
    }

    /// Local proxy of the actor at `iri`, fetched and created on first sight.
    pub(crate) async fn resolve_actor(&self, iri: &str) -> Result<ActorRecord> {
        self.check_host(iri)?;
        if let Some(actor) = self.store.find_actor(iri)? {
            return Ok(actor);
        }
        if self.urls.is_local(iri) {
            return Err(InboxError::Gone(format!("unknown local actor {iri}")).into());
        }
        let object = self.fetch_object(iri).await?;
        self.create_actor(&object)
    }

    pub(crate) fn create_actor(&self, object: &Object<'_>) -> Result<ActorRecord> {
        let record = actor_from_object(object, EntityKey::new())?;
        self.check_host(&record.iri)?;
        let created = self.store.create_actor(record)?;
        if created.is_created() {
            let actor = created.into_inner();
            info!(target: "resolver", iri = actor.iri, kind = ?actor.kind, "created actor proxy");
            return Ok(actor);
        }
        Ok(created.into_inner())
    }

    /// Re-read an actor from its origin, keeping local-only state.
    pub(crate) async fn refresh_actor(&self, actor: &ActorRecord) -> Result<ActorRecord> {
        let object = self.fetch_object(&actor.iri).await?;
        self.update_actor(actor.key, &object)
    }

    /// Overwrite origin-owned fields of a proxy actor from `object`.
    pub(crate) fn update_actor(&self, key: EntityKey, object: &Object<'_>) -> Result<ActorRecord> {
        let fresh = actor_from_object(object, key)?;
        let mut updated = None;
        self.store.modify_actor(key, |actor| {
            actor.name = fresh.name;
            actor.inbox = fresh.inbox;
            actor.shared_inbox = fresh.shared_inbox;
            actor.public_key_pem = fresh.public_key_pem;
            actor.moderators_url = fresh.moderators_url;
            actor.last_origin_update = fresh.last_origin_update;
            updated = Some(actor.clone());
            true
        })?;
        debug!(target: "resolver", iri = fresh.iri, "refreshed actor");
        updated.ok_or_else(|| anyhow::anyhow!("actor {key} vanished during refresh"))
    }

    /// GET a remote object. The document must be hosted where it claims to
    /// be, on the host of the requested IRI.
    pub(crate) async fn fetch_object(&self, iri: &str) -> Result<Object<'static>> {
        self.check_host(iri)?;
        if self.urls.is_local(iri) {
            return Err(InboxError::Malformed(format!("refusing to fetch local {iri}")).into());
        }
        let object = Object::from(self.mailman.fetch(iri).await?);
        let id = object
            .id()
            .ok_or_else(|| InboxError::Malformed(format!("{iri} has no id")))?;
        if !UrlMatcher::same_host(id, iri) {
            return Err(InboxError::Malformed(format!("{iri} returned foreign object {id}")).into());
        }
        Ok(object)
    }

    /// Fetch an activity from its origin, as done for forwarded or announced
    /// copies. The origin must return the requested id with an actor on the
    /// same host.
    pub(crate) async fn fetch_activity(&self, iri: &str) -> Result<Object<'static>> {
        let activity = self.fetch_object(iri).await?;
        if activity.id() != Some(iri) {
            return Err(InboxError::Malformed(format!("{iri} returned a different id")).into());
        }
        match activity.actor_iri() {
            Some(actor) if UrlMatcher::same_host(actor, iri) => Ok(activity),
            _ => Err(InboxError::Unauthorized(format!("actor of {iri} is not on its host")).into()),
        }
    }
}

fn actor_from_object(object: &Object<'_>, key: EntityKey) -> Result<ActorRecord, InboxError> {
    let iri = object
        .id()
        .ok_or_else(|| InboxError::Malformed("actor has no id".to_string()))?;
    if !object.is_actor() {
        return Err(InboxError::Malformed(format!("{iri} is not an actor")));
    }
    let domain = UrlMatcher::host_of(iri)
        .ok_or_else(|| InboxError::Malformed(format!("actor id {iri} has no host")))?;
    let inbox = object
        .get_str("inbox")
        .ok_or_else(|| InboxError::Malformed(format!("actor {iri} has no inbox")))?;
    let kind = if object.type_is("Group") {
        ActorKind::Magazine
    } else {
        ActorKind::User
    };
    let name = object
        .get_str("preferredUsername")
        .or_else(|| object.get_str("name"))
        .unwrap_or_default();
    let public_key_pem = object
        .get_node_object("publicKey")
        .and_then(|key| key.get_str("publicKeyPem").map(str::to_string));
    Ok(ActorRecord {
        key,
        iri: iri.to_string(),
        kind,
        name: name.to_string(),
        domain,
        inbox: Some(inbox.to_string()),
        shared_inbox: object.get_endpoint("sharedInbox").map(str::to_string),
        public_key_pem,
        moderators_url: object.get_node_iri("moderators").map(str::to_string),
        moderators: vec![],
        is_local: false,
        banned: false,
        deleted: false,
        last_origin_update: now(),
    })
}
