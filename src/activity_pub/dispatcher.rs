use anyhow::Result;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::activity_pub::InboxError;
use crate::activity_pub::inbox::{Inbox, now};
use crate::activity_pub::local_url::UrlMatcher;
use crate::activity_pub::mailman::Mailman;
use crate::activity_pub::message::{Envelope, QueueItem, VerbMessage};
use crate::activity_pub::model::{Object, Verb};
use crate::activity_pub::repo::ActorRecord;
use crate::activity_pub::signature::ValidationOutcome;

impl<M: Mailman> Inbox<M> {
    /// Entry point for a raw delivery. Ends by enqueueing exactly one verb
    /// message, a re-dispatch of an origin copy, or nothing.
    pub(crate) async fn dispatch(&self, envelope: Envelope) -> Result<()> {
        let value: Value = serde_json::from_str(&envelope.body)
            .map_err(|e| InboxError::Malformed(format!("payload is not json: {e}")))?;
        let activity = Object::from(unwrap_payload(value)?);
        let actor_iri = activity
            .actor_iri()
            .ok_or_else(|| InboxError::Malformed("activity has no actor".to_string()))?
            .to_string();
        self.check_host(&actor_iri)?;

        let outcome = self
            .validate_signature(
                envelope.request.as_ref(),
                envelope.body.as_bytes(),
                &activity,
            )
            .await?;
        if let ValidationOutcome::Forwarded { origin } = outcome {
            return self.redispatch_origin(&origin).await;
        }

        let actor = self.resolve_actor(&actor_iri).await?;
        if actor.banned || actor.deleted {
            debug!(target: "inbox", actor = actor.iri, "actor is banned or deleted, dropping");
            return Ok(());
        }
        if let Some(iri) = referenced_iris(&activity)
            .into_iter()
            .find(|iri| self.urls.is_banned(iri))
        {
            debug!(target: "inbox", iri, "object on a banned instance, dropping");
            return Ok(());
        }

        if activity.type_is("Announce") {
            self.refresh_announcer(&actor).await?;
            if let Some(inner) = activity
                .get_node_object("object")
                .filter(|inner| inner.is_activity())
            {
                return self.unwrap_announce(&actor, &activity, &inner).await;
            }
        }

        let activity = if Verb::is_meta(&activity) && activity.get_node_object("object").is_none() {
            self.embed_meta_object(&activity).await?
        } else {
            activity
        };
        let verb = Verb::classify(&activity)?;
        debug!(target: "inbox", ?verb, id = activity.id(), actor = actor.iri, "dispatch");
        self.enqueue(QueueItem::Verb(VerbMessage {
            verb,
            actor: actor.iri,
            payload: activity.to_string(),
        }))
    }

    async fn redispatch_origin(&self, origin: &str) -> Result<()> {
        let activity = self.fetch_activity(origin).await?;
        info!(target: "inbox", origin, "re-dispatching copy fetched from origin");
        self.enqueue(QueueItem::Delivery(Envelope::unsigned(activity.to_string())))
    }

    /// Remote magazines relay their content through Announce; keep their
    /// proxy fresh, at most once per cooldown window.
    async fn refresh_announcer(&self, actor: &ActorRecord) -> Result<()> {
        if !actor.is_magazine() || actor.is_local {
            return Ok(());
        }
        let now = now();
        if now - actor.last_origin_update < self.config.origin_refresh_cooldown_secs as i64 {
            return Ok(());
        }
        // stamp first so a failing origin is not hammered by every Announce
        self.store.modify_actor(actor.key, |actor| {
            actor.last_origin_update = now;
            true
        })?;
        if let Err(error) = self.refresh_actor(actor).await {
            warn!(target: "inbox", actor = actor.iri, error = format!("{error:#}"), "magazine refresh failed");
        }
        Ok(())
    }

    async fn unwrap_announce(
        &self,
        actor: &ActorRecord,
        announce: &Object<'_>,
        inner: &Object<'_>,
    ) -> Result<()> {
        if inner.type_is("Create") {
            let author = inner
                .get_node_object("object")
                .and_then(|object| object.attributed_to().map(str::to_string))
                .or_else(|| inner.actor_iri().map(str::to_string));
            if author.is_some_and(|author| self.urls.is_local(&author)) {
                debug!(target: "inbox", id = inner.id(), "announce echoes local content");
                let object = inner
                    .get_node_iri("object")
                    .ok_or_else(|| InboxError::Malformed("announced Create has no object".to_string()))?;
                let mut boost = announce.to_value();
                if let Some(map) = boost.as_object_mut() {
                    map.insert("object".to_string(), Value::from(object));
                }
                return self.enqueue(QueueItem::Verb(VerbMessage {
                    verb: Verb::Announce,
                    actor: actor.iri.clone(),
                    payload: boost.to_string(),
                }));
            }
        }

        let inner_id = inner
            .id()
            .ok_or_else(|| InboxError::Malformed("announced activity has no id".to_string()))?;
        let trusted = UrlMatcher::same_host(inner_id, &actor.iri)
            && inner
                .actor_iri()
                .is_some_and(|inner_actor| UrlMatcher::same_host(inner_actor, &actor.iri));
        let inner = if trusted {
            inner.to_string()
        } else {
            self.fetch_activity(inner_id).await?.to_string()
        };
        debug!(target: "inbox", id = inner_id, trusted, "unwrapped announced activity");
        self.enqueue(QueueItem::Delivery(Envelope::unsigned(inner)))
    }

    /// Meta verbs name their object by IRI at times; fetch and embed it.
    async fn embed_meta_object(&self, activity: &Object<'_>) -> Result<Object<'static>> {
        let ty = activity.get_first_type().unwrap_or_default();
        let iri = activity
            .get_node_iri("object")
            .ok_or_else(|| InboxError::Malformed(format!("{ty} has no object")))?;
        if self.urls.is_local(iri) {
            return Err(InboxError::Unsupported(format!("{ty} of local {iri} without embedded object")).into());
        }
        let inner = self.fetch_object(iri).await?;
        let mut value = activity.to_value();
        if let Some(map) = value.as_object_mut() {
            map.insert("object".to_string(), inner.to_value());
        }
        Ok(Object::from(value))
    }
}

/// Some senders wrap the activity as `{"payload": ...}`, either as a node or
/// as serialized JSON.
fn unwrap_payload(value: Value) -> Result<Value, InboxError> {
    let Value::Object(mut map) = value else {
        return Err(InboxError::Malformed("payload is not an object".to_string()));
    };
    match map.remove("payload") {
        Some(Value::String(text)) => serde_json::from_str(&text)
            .map_err(|e| InboxError::Malformed(format!("wrapped payload is not json: {e}"))),
        Some(payload @ Value::Object(_)) => Ok(payload),
        Some(_) => Err(InboxError::Malformed("wrapped payload is not an object".to_string())),
        None => Ok(Value::Object(map)),
    }
}

fn referenced_iris<'a>(activity: &'a Object<'_>) -> Vec<&'a str> {
    let mut iris = activity.get_node_iris("object");
    iris.extend(activity.get_node_iri("target"));
    if let Some(Value::Object(inner)) = activity.get_value("object") {
        for prop in ["object", "actor", "attributedTo"] {
            iris.extend(inner.get(prop).and_then(Value::as_str));
        }
    }
    iris
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use serde_json::json;

    use super::unwrap_payload;
    use crate::activity_pub::hs2019::tests::TestSigner;
    use crate::activity_pub::inbox::Step;
    use crate::activity_pub::inbox::tests::{Harness, person};
    use crate::activity_pub::message::{Envelope, QueueItem};
    use crate::activity_pub::repo::{ActorKind, EntityRef, Vote};

    #[test]
    fn payload_envelopes_are_unwrapped() {
        let inner = json!({"type": "Like"});
        assert_eq!(unwrap_payload(json!({"payload": inner})).unwrap(), inner);
        assert_eq!(
            unwrap_payload(json!({"payload": inner.to_string()})).unwrap(),
            inner
        );
        assert_eq!(unwrap_payload(inner.clone()).unwrap(), inner);
        assert!(unwrap_payload(json!([1])).is_err());
    }

    #[tokio::test]
    async fn forwarded_delivery_is_refetched_once() -> Result<()> {
        let harness = Harness::new()?;
        let tech = harness.local_actor(ActorKind::Magazine, "tech")?;
        let carol = harness.local_actor(ActorKind::User, "carol")?;
        let real = harness.local_entry(&tech, &carol)?;
        let decoy = harness.local_entry(&tech, &carol)?;

        let alice = harness.remote_user("remote.example", "alice");
        let like_id = "https://remote.example/like/1";
        harness.remote.publish(
            like_id,
            json!({"id": like_id, "type": "Like", "actor": alice, "object": real.iri}),
        );
        let relay = TestSigner::new();
        let relay_iri = "https://relay.example/u/relay";
        harness
            .remote
            .publish(relay_iri, person(relay_iri, "relay", Some(&relay.public_key_pem)));

        // the relayed copy claims a different object
        let relayed = json!({"id": like_id, "type": "Like", "actor": alice, "object": decoy.iri});
        harness
            .deliver_signed(&relay, &format!("{relay_iri}#main-key"), relayed)
            .await?;

        assert_eq!(harness.remote.fetch_count(like_id), 1);
        let alice = harness.inbox.store.find_actor(&alice)?.unwrap();
        assert_eq!(harness.inbox.store.find_vote(real.key, alice.key)?, Some(Vote::Up));
        assert_eq!(harness.inbox.store.find_vote(decoy.key, alice.key)?, None);
        Ok(())
    }

    #[tokio::test]
    async fn forged_signature_is_dropped() -> Result<()> {
        let harness = Harness::new()?;
        let alice = "https://remote.example/u/alice";
        let real = TestSigner::new();
        harness
            .remote
            .publish(alice, person(alice, "alice", Some(&real.public_key_pem)));
        let forger = TestSigner::new();
        let follow = json!({
            "id": "https://remote.example/f/1",
            "type": "Follow",
            "actor": alice,
            "object": "https://kiosk.example/u/carol",
        });
        let steps = harness
            .deliver_signed(&forger, &format!("{alice}#main-key"), follow)
            .await?;
        assert_eq!(steps, vec![Step::Dropped]);
        assert!(harness.remote.posted().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn body_outside_signature_is_dropped() -> Result<()> {
        let harness = Harness::new()?;
        let tech = harness.local_actor(ActorKind::Magazine, "tech")?;
        let carol = harness.local_actor(ActorKind::User, "carol")?;
        let entry = harness.local_entry(&tech, &carol)?;
        let alice = "https://remote.example/u/alice";
        let signer = TestSigner::new();
        harness
            .remote
            .publish(alice, person(alice, "alice", Some(&signer.public_key_pem)));

        let body = json!({
            "id": "https://remote.example/like/1",
            "type": "Like",
            "actor": alice,
            "object": entry.iri,
        })
        .to_string();
        let request =
            signer.sign_headers(&format!("{alice}#main-key"), &body, "(request-target) host date");
        harness.inbox.enqueue(QueueItem::Delivery(Envelope {
            body,
            request: Some(request),
        }))?;
        assert_eq!(harness.drain().await?, vec![Step::Dropped]);
        let entry = harness.inbox.store.get_content(entry.key)?.unwrap();
        assert_eq!(entry.upvotes, 0);
        Ok(())
    }

    #[tokio::test]
    async fn banned_instances_leave_no_trace() -> Result<()> {
        let harness = Harness::new()?;
        let tech = harness.local_actor(ActorKind::Magazine, "tech")?;
        let carol = harness.local_actor(ActorKind::User, "carol")?;
        let entry = harness.local_entry(&tech, &carol)?;
        let spammer = harness.remote_user("spam.example", "bob");

        let steps = harness
            .deliver(json!({
                "id": "https://spam.example/like/1",
                "type": "Like",
                "actor": spammer,
                "object": entry.iri,
            }))
            .await?;
        assert_eq!(steps, vec![Step::Dropped]);
        assert_eq!(harness.inbox.store.find_entity(&spammer)?, None);
        assert!(harness.remote.fetched().is_empty());
        assert_eq!(harness.inbox.store.get_content(entry.key)?.unwrap().upvotes, 0);

        // a clean actor pointing at banned content is dropped as well
        let alice = harness.remote_user("remote.example", "alice");
        harness
            .deliver(json!({
                "id": "https://remote.example/like/2",
                "type": "Like",
                "actor": alice,
                "object": "https://eu.spam.example/p/1",
            }))
            .await?;
        assert_eq!(harness.inbox.store.find_entity("https://eu.spam.example/p/1")?, None);
        assert_eq!(harness.remote.fetch_count("https://eu.spam.example/p/1"), 0);
        Ok(())
    }

    #[tokio::test]
    async fn banned_actor_is_dropped_silently() -> Result<()> {
        let harness = Harness::new()?;
        let tech = harness.local_actor(ActorKind::Magazine, "tech")?;
        let carol = harness.local_actor(ActorKind::User, "carol")?;
        let entry = harness.local_entry(&tech, &carol)?;
        let alice = harness.remote_user("remote.example", "alice");
        let record = harness.inbox.resolve_actor(&alice).await?;
        harness.inbox.store.modify_actor(record.key, |actor| {
            actor.banned = true;
            true
        })?;

        let steps = harness
            .deliver(json!({"id": "https://remote.example/like/1", "type": "Like", "actor": alice, "object": entry.iri}))
            .await?;
        assert_eq!(steps, vec![Step::Done]);
        assert_eq!(harness.inbox.store.get_content(entry.key)?.unwrap().upvotes, 0);
        Ok(())
    }

    #[tokio::test]
    async fn announced_local_create_only_boosts() -> Result<()> {
        let harness = Harness::new()?;
        let tech = harness.local_actor(ActorKind::Magazine, "tech")?;
        let carol = harness.local_actor(ActorKind::User, "carol")?;
        let entry = harness.local_entry(&tech, &carol)?;
        let alice = harness.remote_user("remote.example", "alice");

        harness
            .deliver(json!({
                "id": "https://remote.example/announce/1",
                "type": "Announce",
                "actor": alice,
                "object": {
                    "id": format!("{}/create", entry.iri),
                    "type": "Create",
                    "actor": carol.iri,
                    "object": {"id": entry.iri, "type": "Page", "attributedTo": carol.iri},
                },
            }))
            .await?;

        let stored = harness.inbox.store.get_content(entry.key)?.unwrap();
        assert_eq!(stored.upvotes, 1);
        assert!(stored.last_active > 0);
        assert!(harness.remote.fetched().iter().all(|iri| iri == &alice));
        Ok(())
    }

    #[tokio::test]
    async fn magazine_echo_of_local_create_only_refreshes() -> Result<()> {
        let harness = Harness::new()?;
        let tech = harness.local_actor(ActorKind::Magazine, "tech")?;
        let carol = harness.local_actor(ActorKind::User, "carol")?;
        let entry = harness.local_entry(&tech, &carol)?;
        let rust = harness.remote_magazine("lemmy.example", "rust");

        let steps = harness
            .deliver(json!({
                "id": "https://lemmy.example/announce/2",
                "type": "Announce",
                "actor": rust,
                "object": {
                    "id": format!("{}/create", entry.iri),
                    "type": "Create",
                    "actor": carol.iri,
                    "object": {"id": entry.iri, "type": "Page", "attributedTo": carol.iri},
                },
            }))
            .await?;
        assert_eq!(steps, vec![Step::Done, Step::Done]);

        let stored = harness.inbox.store.get_content(entry.key)?.unwrap();
        assert_eq!(stored.upvotes, 0);
        assert!(stored.last_active > 0);
        Ok(())
    }

    #[tokio::test]
    async fn magazine_announce_is_unwrapped_and_refreshes_magazine() -> Result<()> {
        let harness = Harness::new()?;
        let rust = harness.remote_magazine("lemmy.example", "rust");
        let alice = harness.remote_user("remote.example", "alice");
        let page = "https://remote.example/p/1";
        let create_id = "https://remote.example/create/1";
        let create = json!({
            "id": create_id,
            "type": "Create",
            "actor": alice,
            "object": {"id": page, "type": "Page", "attributedTo": alice, "name": "hello", "audience": rust},
        });
        harness.remote.publish(create_id, create.clone());
        let magazine = harness.inbox.resolve_actor(&rust).await?;
        harness.inbox.store.modify_actor(magazine.key, |magazine| {
            magazine.last_origin_update = 0;
            true
        })?;

        harness
            .deliver(json!({
                "id": "https://lemmy.example/announce/1",
                "type": "Announce",
                "actor": rust,
                "object": create,
            }))
            .await?;

        // foreign host, so the inner Create came from its origin
        assert_eq!(harness.remote.fetch_count(create_id), 1);
        assert_eq!(harness.remote.fetch_count(&rust), 2);
        assert!(matches!(
            harness.inbox.store.find_entity(page)?,
            Some(EntityRef::Content(..))
        ));
        let magazine = harness.inbox.store.find_actor(&rust)?.unwrap();
        assert!(magazine.last_origin_update > 0);
        Ok(())
    }
}
