use anyhow::Result;
use tracing::info;

use super::{object_iri, undone};
use crate::activity_pub::InboxError;
use crate::activity_pub::inbox::Inbox;
use crate::activity_pub::mailman::Mailman;
use crate::activity_pub::model::Object;
use crate::activity_pub::repo::{ActorRecord, FollowRecord, FollowState};

impl<M: Mailman> Inbox<M> {
    pub(crate) async fn handle_follow(
        &self,
        actor: &ActorRecord,
        activity: &Object<'_>,
    ) -> Result<()> {
        let target_iri = object_iri(activity)?;
        let target = self
            .store
            .find_actor(target_iri)?
            .filter(|target| target.is_local)
            .ok_or_else(|| InboxError::Unsupported(format!("follow of non local {target_iri}")))?;

        if target.is_magazine() && target.iri == self.urls.random_magazine_iri() {
            info!(target: "inbox", follower = actor.iri, "follow of the random magazine rejected");
            return self.respond("Reject", &target, actor, activity).await;
        }

        match self.store.find_follow(target.key, actor.key)? {
            Some(follow) if follow.state == FollowState::Accepted => {
                info!(target: "inbox", follower = actor.iri, target = target.iri, "already following");
            }
            _ => {
                // no manual approval, requests are accepted on arrival
                let follow = FollowRecord {
                    state: FollowState::Accepted,
                    activity_iri: activity.id().map(str::to_string),
                };
                self.store.put_follow(target.key, actor.key, &follow)?;
                info!(target: "inbox", follower = actor.iri, target = target.iri, "follow accepted");
            }
        }
        // a duplicate Follow usually means our Accept got lost, send it again
        self.respond("Accept", &target, actor, activity).await
    }

    /// `actor` accepted a follow request sent by one of our users.
    pub(crate) fn handle_accept_follow(
        &self,
        actor: &ActorRecord,
        activity: &Object<'_>,
    ) -> Result<()> {
        let Some((follower, follow)) = self.outbound_follow(actor, activity)? else {
            return self.noop("accept of unknown follow", activity.id());
        };
        match follow {
            Some(follow) if follow.state == FollowState::Requested => {
                let follow = FollowRecord {
                    state: FollowState::Accepted,
                    ..follow
                };
                self.store.put_follow(actor.key, follower.key, &follow)?;
                info!(target: "inbox", follower = follower.iri, target = actor.iri, "follow accepted by remote");
                Ok(())
            }
            Some(_) => self.noop("follow already accepted", activity.id()),
            None => self.noop("accept without pending follow", activity.id()),
        }
    }

    pub(crate) fn handle_reject_follow(
        &self,
        actor: &ActorRecord,
        activity: &Object<'_>,
    ) -> Result<()> {
        let Some((follower, _)) = self.outbound_follow(actor, activity)? else {
            return self.noop("reject of unknown follow", activity.id());
        };
        if !self.store.remove_follow(actor.key, follower.key)? {
            return self.noop("reject without follow", activity.id());
        }
        info!(target: "inbox", follower = follower.iri, target = actor.iri, "follow rejected by remote");
        Ok(())
    }

    pub(crate) fn handle_undo_follow(
        &self,
        actor: &ActorRecord,
        activity: &Object<'_>,
    ) -> Result<()> {
        let follow = undone(activity, actor)?;
        let target_iri = object_iri(&follow)?;
        let Some(target) = self.store.find_actor(target_iri)? else {
            return self.noop("unfollow of unknown actor", activity.id());
        };
        if !self.store.remove_follow(target.key, actor.key)? {
            return self.noop("unfollow without follow", activity.id());
        }
        info!(target: "inbox", follower = actor.iri, target = target.iri, "unfollowed");
        Ok(())
    }

    /// The local follower of the Follow wrapped in an Accept or Reject sent
    /// by `actor`, with the stored follow if any.
    fn outbound_follow(
        &self,
        actor: &ActorRecord,
        activity: &Object<'_>,
    ) -> Result<Option<(ActorRecord, Option<FollowRecord>)>> {
        let follow = activity
            .get_node_object("object")
            .ok_or_else(|| InboxError::Malformed("missing embedded Follow".to_string()))?;
        if follow.get_node_iri("object") != Some(actor.iri.as_str()) {
            return Err(InboxError::Unauthorized(format!(
                "{} answered a follow addressed to someone else",
                actor.iri
            ))
            .into());
        }
        let Some(follower_iri) = follow.actor_iri() else {
            return Ok(None);
        };
        let Some(follower) = self
            .store
            .find_actor(follower_iri)?
            .filter(|follower| follower.is_local)
        else {
            return Ok(None);
        };
        let state = self.store.find_follow(actor.key, follower.key)?;
        Ok(Some((follower, state)))
    }
}
