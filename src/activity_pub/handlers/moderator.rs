use anyhow::Result;
use tracing::info;

use super::object_iri;
use crate::activity_pub::InboxError;
use crate::activity_pub::inbox::Inbox;
use crate::activity_pub::local_url::UrlMatcher;
use crate::activity_pub::mailman::Mailman;
use crate::activity_pub::model::Object;
use crate::activity_pub::repo::ActorRecord;

impl<M: Mailman> Inbox<M> {
    /// `Add` or `Remove` of a user on a magazine's `/moderators` collection.
    pub(crate) async fn handle_moderator(
        &self,
        actor: &ActorRecord,
        activity: &Object<'_>,
        add: bool,
    ) -> Result<()> {
        let target = activity
            .get_node_iri("target")
            .ok_or_else(|| InboxError::Malformed("moderator change without target".to_string()))?;
        let magazine_iri = target
            .trim_end_matches('/')
            .strip_suffix("/moderators")
            .ok_or_else(|| InboxError::Unsupported(format!("target {target}")))?;
        let magazine = self.resolve_actor(magazine_iri).await?;
        if !magazine.is_magazine() {
            return Err(InboxError::Malformed(format!("{magazine_iri} is not a magazine")).into());
        }
        if !self.may_moderate(actor, &magazine) {
            return Err(InboxError::Unauthorized(format!(
                "{} does not moderate {}",
                actor.iri, magazine.iri
            ))
            .into());
        }
        let user = self.resolve_actor(object_iri(activity)?).await?;

        let changed = self.store.modify_actor(magazine.key, |magazine| {
            let present = magazine.is_moderator(user.key);
            if add && !present {
                magazine.moderators.push(user.key);
            } else if !add && present {
                magazine.moderators.retain(|key| *key != user.key);
            } else {
                return false;
            }
            true
        })?;
        if !changed {
            return self.noop("moderators unchanged", activity.id());
        }
        info!(target: "inbox", magazine = magazine.iri, user = user.iri, add, by = actor.iri, "moderators changed");
        if magazine.is_local {
            self.announce_to_followers(&magazine, activity.to_value()).await?;
        }
        Ok(())
    }

    /// Moderators of a magazine, and for remote magazines any actor of the
    /// magazine's own instance.
    pub(crate) fn may_moderate(&self, actor: &ActorRecord, magazine: &ActorRecord) -> bool {
        magazine.is_moderator(actor.key)
            || (!magazine.is_local && UrlMatcher::same_host(&actor.iri, &magazine.iri))
    }
}
