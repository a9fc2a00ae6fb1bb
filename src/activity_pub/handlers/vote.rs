use anyhow::Result;
use tracing::{debug, info};

use super::{object_iri, undone};
use crate::activity_pub::inbox::{Inbox, now};
use crate::activity_pub::mailman::Mailman;
use crate::activity_pub::message::{ChainMessage, QueueItem, WrappingActivity, WrappingKind};
use crate::activity_pub::model::Object;
use crate::activity_pub::repo::{ActorRecord, ContentRecord, Vote, VoteChange};

impl<M: Mailman> Inbox<M> {
    pub(crate) fn handle_vote(
        &self,
        actor: &ActorRecord,
        activity: &Object<'_>,
        vote: Vote,
    ) -> Result<()> {
        let kind = match vote {
            Vote::Up => WrappingKind::Like,
            Vote::Down => WrappingKind::Dislike,
        };
        let Some(content) = self.voted_content(activity, kind)? else {
            return Ok(());
        };
        match self.store.cast_vote(content.key, actor.key, vote)? {
            VoteChange::Unchanged => self.noop("vote already counted", activity.id()),
            change => {
                info!(target: "inbox", voter = actor.iri, content = content.iri, ?vote, ?change, "vote");
                Ok(())
            }
        }
    }

    /// Undo of a Like, Dislike or Announce withdraws whatever vote the actor
    /// holds on the object.
    pub(crate) fn handle_undo_vote(&self, actor: &ActorRecord, activity: &Object<'_>) -> Result<()> {
        let inner = undone(activity, actor)?;
        let iri = object_iri(&inner)?;
        let Some(content) = self.lookup_content(iri)? else {
            return self.noop("undo of a vote on unknown content", activity.id());
        };
        match self.store.remove_vote(content.key, actor.key)? {
            Some(vote) => {
                info!(target: "inbox", voter = actor.iri, content = content.iri, ?vote, "vote withdrawn");
                Ok(())
            }
            None => self.noop("no vote to withdraw", activity.id()),
        }
    }

    /// A boost by a user counts as an upvote. Magazines relay content with
    /// Announce, which only brings the object in.
    pub(crate) fn handle_announce(&self, actor: &ActorRecord, activity: &Object<'_>) -> Result<()> {
        let Some(content) = self.voted_content(activity, WrappingKind::Announce)? else {
            return Ok(());
        };
        if !actor.is_magazine() {
            let change = self.store.cast_vote(content.key, actor.key, Vote::Up)?;
            debug!(target: "inbox", booster = actor.iri, content = content.iri, ?change, "boost");
        }
        if content.is_local {
            let now = now();
            self.store.modify_content(content.key, |content| {
                content.last_active = content.last_active.max(now);
                true
            })?;
        }
        Ok(())
    }

    /// The content `activity` refers to. Unknown remote content parks the
    /// activity behind a chain resolution and yields `None`.
    fn voted_content(
        &self,
        activity: &Object<'_>,
        kind: WrappingKind,
    ) -> Result<Option<ContentRecord>> {
        let iri = object_iri(activity)?;
        if let Some(content) = self.lookup_content(iri)? {
            return Ok(Some(content));
        }
        if self.urls.is_local(iri) {
            self.noop("unknown local content", Some(iri))?;
            return Ok(None);
        }
        debug!(target: "inbox", iri, ?kind, "parking activity until its object is known");
        self.enqueue(QueueItem::Chain(ChainMessage {
            objects: vec![iri.to_string()],
            wrapping: Some(WrappingActivity {
                kind,
                payload: activity.to_string(),
            }),
        }))?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use serde_json::json;

    use crate::activity_pub::inbox::Step;
    use crate::activity_pub::inbox::tests::Harness;
    use crate::activity_pub::repo::{ActorKind, Vote};

    #[tokio::test]
    async fn repeated_like_counts_once() -> Result<()> {
        let harness = Harness::new()?;
        let tech = harness.local_actor(ActorKind::Magazine, "tech")?;
        let carol = harness.local_actor(ActorKind::User, "carol")?;
        let entry = harness.local_entry(&tech, &carol)?;
        let alice = harness.remote_user("remote.example", "alice");
        let like = json!({
            "id": "https://remote.example/like/1",
            "type": "Like",
            "actor": alice,
            "object": entry.iri,
        });

        harness.deliver(like.clone()).await?;
        harness.deliver(like).await?;
        let stored = harness.inbox.store.get_content(entry.key)?.unwrap();
        assert_eq!((stored.upvotes, stored.downvotes), (1, 0));

        harness
            .deliver(json!({
                "id": "https://remote.example/dislike/1",
                "type": "Dislike",
                "actor": alice,
                "object": entry.iri,
            }))
            .await?;
        let stored = harness.inbox.store.get_content(entry.key)?.unwrap();
        assert_eq!((stored.upvotes, stored.downvotes), (0, 1));
        Ok(())
    }

    #[tokio::test]
    async fn like_of_unknown_content_waits_for_it() -> Result<()> {
        let harness = Harness::new()?;
        let alice = harness.remote_user("remote.example", "alice");
        let post = "https://remote.example/n/1";
        harness.remote.publish(
            post,
            json!({"id": post, "type": "Note", "attributedTo": alice, "content": "hi"}),
        );

        let steps = harness
            .deliver(json!({
                "id": "https://remote.example/like/1",
                "type": "Like",
                "actor": alice,
                "object": post,
            }))
            .await?;
        // delivery, parked verb, chain, re-dispatch, verb
        assert_eq!(steps, vec![Step::Done; 5]);
        let post = harness.inbox.store.find_content(post)?.unwrap();
        assert_eq!(post.upvotes, 1);
        Ok(())
    }

    #[tokio::test]
    async fn undo_withdraws_boost_and_like() -> Result<()> {
        let harness = Harness::new()?;
        let tech = harness.local_actor(ActorKind::Magazine, "tech")?;
        let carol = harness.local_actor(ActorKind::User, "carol")?;
        let entry = harness.local_entry(&tech, &carol)?;
        let alice = harness.remote_user("remote.example", "alice");
        let announce = json!({
            "id": "https://remote.example/announce/1",
            "type": "Announce",
            "actor": alice,
            "object": entry.iri,
        });
        harness.deliver(announce.clone()).await?;
        let stored = harness.inbox.store.get_content(entry.key)?.unwrap();
        assert_eq!(stored.upvotes, 1);
        assert!(stored.last_active > 0);

        harness
            .deliver(json!({
                "id": "https://remote.example/undo/1",
                "type": "Undo",
                "actor": alice,
                "object": announce,
            }))
            .await?;
        let alice = harness.inbox.store.find_actor(&alice)?.unwrap();
        assert_eq!(harness.inbox.store.find_vote(entry.key, alice.key)?, None);
        assert_eq!(harness.inbox.store.get_content(entry.key)?.unwrap().upvotes, 0);
        Ok(())
    }

    #[tokio::test]
    async fn undo_of_someone_elses_vote_is_refused() -> Result<()> {
        let harness = Harness::new()?;
        let tech = harness.local_actor(ActorKind::Magazine, "tech")?;
        let carol = harness.local_actor(ActorKind::User, "carol")?;
        let entry = harness.local_entry(&tech, &carol)?;
        let alice = harness.remote_user("remote.example", "alice");
        let mallory = harness.remote_user("other.example", "mallory");
        let like = json!({
            "id": "https://remote.example/like/1",
            "type": "Like",
            "actor": alice,
            "object": entry.iri,
        });
        harness.deliver(like.clone()).await?;

        let steps = harness
            .deliver(json!({
                "id": "https://other.example/undo/1",
                "type": "Undo",
                "actor": mallory,
                "object": like,
            }))
            .await?;
        assert_eq!(steps, vec![Step::Done, Step::Dropped]);
        let alice = harness.inbox.store.find_actor(&alice)?.unwrap();
        assert_eq!(harness.inbox.store.find_vote(entry.key, alice.key)?, Some(Vote::Up));
        Ok(())
    }
}
