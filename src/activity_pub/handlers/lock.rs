use anyhow::Result;
use tracing::info;

use super::{object_iri, undone};
use crate::activity_pub::InboxError;
use crate::activity_pub::inbox::Inbox;
use crate::activity_pub::local_url::UrlMatcher;
use crate::activity_pub::mailman::Mailman;
use crate::activity_pub::model::Object;
use crate::activity_pub::repo::ActorRecord;

impl<M: Mailman> Inbox<M> {
    /// Locked threads take no new replies.
    pub(crate) async fn handle_lock(
        &self,
        actor: &ActorRecord,
        activity: &Object<'_>,
        lock: bool,
    ) -> Result<()> {
        let lock_activity = if lock {
            activity.clone()
        } else {
            undone(activity, actor)?
        };
        let iri = object_iri(&lock_activity)?;
        let Some(content) = self.lookup_content(iri)? else {
            return self.noop("lock of unknown content", Some(iri));
        };
        let magazine = self.content_magazine(&content)?;
        let allowed = content.author == actor.key
            || (!content.is_local && UrlMatcher::same_host(&content.iri, &actor.iri))
            || magazine
                .as_ref()
                .is_some_and(|magazine| self.may_moderate(actor, magazine));
        if !allowed {
            return Err(InboxError::Unauthorized(format!(
                "{} cannot lock {}",
                actor.iri, content.iri
            ))
            .into());
        }

        let changed = self.store.modify_content(content.key, |content| {
            let changed = content.locked != lock;
            content.locked = lock;
            changed
        })?;
        if !changed {
            return self.noop("lock state unchanged", activity.id());
        }
        info!(target: "inbox", content = content.iri, lock, by = actor.iri, "lock");
        if let Some(magazine) = magazine.filter(|magazine| magazine.is_local) {
            self.announce_to_followers(&magazine, activity.to_value()).await?;
        }
        Ok(())
    }
}
