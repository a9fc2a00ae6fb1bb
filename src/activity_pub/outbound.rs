use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use serde_json::{Value, json};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::activity_pub::InboxError;
use crate::activity_pub::inbox::Inbox;
use crate::activity_pub::mailman::Mailman;
use crate::activity_pub::model::Object;
use crate::activity_pub::repo::ActorRecord;

pub(crate) const AS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";
pub(crate) const AS_PUBLIC: &str = "https://www.w3.org/ns/activitystreams#Public";

impl<M: Mailman> Inbox<M> {
    /// Send an `Accept` or `Reject` of `activity` from a local actor.
    pub(crate) async fn respond(
        &self,
        kind: &str,
        responder: &ActorRecord,
        remote: &ActorRecord,
        activity: &Object<'_>,
    ) -> Result<()> {
        let inbox = remote
            .inbox
            .as_deref()
            .or(remote.shared_inbox.as_deref())
            .ok_or_else(|| InboxError::Malformed(format!("{} has no inbox", remote.iri)))?;
        let response = json!({
            "@context": AS_CONTEXT,
            "id": self.urls.activity_iri(),
            "type": kind,
            "actor": responder.iri,
            "object": activity.to_value(),
        });
        info!(target: "inbox", kind, inbox, "sending response");
        self.mailman.post(inbox, &response).await
    }

    /// Announce `object` from a local magazine to its remote followers, one
    /// post per shared inbox. Returns the number of successful deliveries.
    pub(crate) async fn announce_to_followers(
        &self,
        magazine: &ActorRecord,
        object: Value,
    ) -> Result<usize> {
        if !magazine.is_local || magazine.iri == self.urls.random_magazine_iri() {
            return Ok(0);
        }
        let mut inboxes = BTreeSet::new();
        for follower in self.store.accepted_followers(magazine.key)? {
            let Some(follower) = self.store.get_actor(follower)? else {
                continue;
            };
            if follower.is_local {
                continue;
            }
            if let Some(inbox) = follower.delivery_inbox() {
                inboxes.insert(inbox.to_string());
            }
        }
        if inboxes.is_empty() {
            return Ok(0);
        }

        let announce = Arc::new(json!({
            "@context": AS_CONTEXT,
            "id": self.urls.activity_iri(),
            "type": "Announce",
            "actor": magazine.iri,
            "object": object,
            "to": [AS_PUBLIC],
            "cc": [format!("{}/followers", magazine.iri)],
        }));
        let mut join_set = JoinSet::new();
        for inbox in inboxes {
            let mailman = self.mailman.clone();
            let announce = announce.clone();
            join_set.spawn(async move {
                let result = mailman.post(&inbox, &announce).await;
                (inbox, result)
            });
        }
        let mut delivered = 0;
        for (inbox, result) in join_set.join_all().await {
            match result {
                Ok(()) => delivered += 1,
                Err(error) => {
                    warn!(target: "inbox", inbox, error = format!("{error:#}"), "announce delivery failed")
                }
            }
        }
        info!(target: "inbox", magazine = magazine.iri, delivered, "re-announced");
        Ok(delivered)
    }
}
