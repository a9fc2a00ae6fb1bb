use anyhow::Result;
use jiff::Timestamp;
use tracing::info;

use super::{object_iri, undone};
use crate::activity_pub::InboxError;
use crate::activity_pub::inbox::{Inbox, now};
use crate::activity_pub::local_url::UrlMatcher;
use crate::activity_pub::mailman::Mailman;
use crate::activity_pub::model::Object;
use crate::activity_pub::repo::{ActorRecord, MagazineBan};

/// Reach of a Block.
enum BanScope {
    Instance,
    Magazine(ActorRecord),
}

impl<M: Mailman> Inbox<M> {
    /// `Block` bans a user from a magazine, or from its whole instance when
    /// the target is not a magazine. `Undo(Block)` lifts the ban.
    pub(crate) async fn handle_block(
        &self,
        actor: &ActorRecord,
        activity: &Object<'_>,
        block: bool,
    ) -> Result<()> {
        let block_activity = if block {
            activity.clone()
        } else {
            undone(activity, actor)?
        };
        let user = self.resolve_actor(object_iri(&block_activity)?).await?;
        if user.is_magazine() {
            return Err(InboxError::Unsupported(format!("block of magazine {}", user.iri)).into());
        }

        match self.ban_scope(actor, &block_activity).await? {
            BanScope::Instance => self.instance_ban(actor, &user, block, activity),
            BanScope::Magazine(magazine) => {
                if !self.may_moderate(actor, &magazine) {
                    return Err(InboxError::Unauthorized(format!(
                        "{} does not moderate {}",
                        actor.iri, magazine.iri
                    ))
                    .into());
                }
                let changed = if block {
                    let ban = MagazineBan {
                        banned_by: actor.key,
                        reason: block_activity.get_str("summary").map(str::to_string),
                        expires_at: block_activity
                            .get_str("expires")
                            .or_else(|| block_activity.get_str("endTime"))
                            .and_then(|expires| expires.parse::<Timestamp>().ok())
                            .map(|expires| expires.as_second()),
                        created_at: now(),
                    };
                    self.store.insert_ban(magazine.key, user.key, &ban)?
                } else {
                    self.store.remove_ban(magazine.key, user.key)?
                };
                if !changed {
                    return self.noop("magazine ban unchanged", activity.id());
                }
                info!(target: "inbox", magazine = magazine.iri, user = user.iri, block, by = actor.iri, "magazine ban");
                if magazine.is_local {
                    self.announce_to_followers(&magazine, activity.to_value()).await?;
                }
                Ok(())
            }
        }
    }

    async fn ban_scope(&self, actor: &ActorRecord, block: &Object<'_>) -> Result<BanScope> {
        let Some(target) = block.get_node_iri("target") else {
            return Ok(BanScope::Instance);
        };
        match self.resolve_actor(target).await {
            Ok(magazine) if magazine.is_magazine() => Ok(BanScope::Magazine(magazine)),
            Ok(_) => Ok(BanScope::Instance),
            // instance actors are often not fetchable
            Err(_) if UrlMatcher::same_host(target, &actor.iri) => Ok(BanScope::Instance),
            Err(error) => Err(error),
        }
    }

    /// Only the user's own instance may ban it instance-wide.
    fn instance_ban(
        &self,
        actor: &ActorRecord,
        user: &ActorRecord,
        block: bool,
        activity: &Object<'_>,
    ) -> Result<()> {
        if user.is_local || !UrlMatcher::same_host(&user.iri, &actor.iri) {
            return Err(InboxError::Unauthorized(format!(
                "{} cannot ban {} instance-wide",
                actor.iri, user.iri
            ))
            .into());
        }
        let changed = self.store.modify_actor(user.key, |user| {
            let changed = user.banned != block;
            user.banned = block;
            changed
        })?;
        if !changed {
            return self.noop("instance ban unchanged", activity.id());
        }
        info!(target: "inbox", user = user.iri, block, by = actor.iri, "instance ban");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use serde_json::json;

    use crate::activity_pub::inbox::Step;
    use crate::activity_pub::inbox::tests::Harness;
    use crate::activity_pub::repo::MagazineBan;

    #[tokio::test]
    async fn magazine_ban_is_idempotent_and_undone() -> Result<()> {
        let harness = Harness::new()?;
        let rust = harness.remote_magazine("lemmy.example", "rust");
        let admin = harness.remote_user("lemmy.example", "admin");
        let alice = harness.remote_user("remote.example", "alice");
        let block = json!({
            "id": "https://lemmy.example/block/1",
            "type": "Block",
            "actor": admin,
            "object": alice,
            "target": rust,
            "summary": "spam",
            "expires": "2999-01-01T00:00:00Z",
        });

        assert_eq!(harness.deliver(block.clone()).await?, vec![Step::Done, Step::Done]);
        assert_eq!(harness.deliver(block.clone()).await?, vec![Step::Done, Step::Done]);
        let magazine = harness.inbox.store.find_actor(&rust)?.unwrap();
        let user = harness.inbox.store.find_actor(&alice)?.unwrap();
        let ban = harness.inbox.store.find_ban(magazine.key, user.key)?.unwrap();
        assert_eq!(ban.reason.as_deref(), Some("spam"));
        assert!(ban.expires_at.is_some());
        assert!(!user.banned);

        // banned users cannot post into the magazine
        let steps = harness
            .deliver(json!({
                "id": "https://remote.example/create/1",
                "type": "Create",
                "actor": alice,
                "object": {"id": "https://remote.example/p/1", "type": "Page", "attributedTo": alice, "name": "x", "audience": rust},
            }))
            .await?;
        assert_eq!(steps, vec![Step::Done, Step::Dropped]);

        harness
            .deliver(json!({
                "id": "https://lemmy.example/undo/1",
                "type": "Undo",
                "actor": admin,
                "object": block,
            }))
            .await?;
        assert_eq!(harness.inbox.store.find_ban(magazine.key, user.key)?, None);
        Ok(())
    }

    #[tokio::test]
    async fn expired_ban_is_renewed() -> Result<()> {
        let harness = Harness::new()?;
        let rust = harness.remote_magazine("lemmy.example", "rust");
        let admin = harness.remote_user("lemmy.example", "admin");
        let alice = harness.remote_user("remote.example", "alice");
        let magazine = harness.inbox.resolve_actor(&rust).await?;
        let moderator = harness.inbox.resolve_actor(&admin).await?;
        let user = harness.inbox.resolve_actor(&alice).await?;
        let stale = MagazineBan {
            banned_by: moderator.key,
            reason: None,
            expires_at: Some(1),
            created_at: 0,
        };
        assert!(harness.inbox.store.insert_ban(magazine.key, user.key, &stale)?);

        let steps = harness
            .deliver(json!({
                "id": "https://lemmy.example/block/2",
                "type": "Block",
                "actor": admin,
                "object": alice,
                "target": rust,
            }))
            .await?;
        assert_eq!(steps, vec![Step::Done, Step::Done]);
        let ban = harness.inbox.store.find_ban(magazine.key, user.key)?.unwrap();
        assert_eq!(ban.expires_at, None);

        let steps = harness
            .deliver(json!({
                "id": "https://remote.example/create/2",
                "type": "Create",
                "actor": alice,
                "object": {"id": "https://remote.example/p/2", "type": "Page", "attributedTo": alice, "name": "x", "audience": rust},
            }))
            .await?;
        assert_eq!(steps, vec![Step::Done, Step::Dropped]);
        Ok(())
    }

    #[tokio::test]
    async fn instance_ban_needs_the_users_own_instance() -> Result<()> {
        let harness = Harness::new()?;
        let admin = harness.remote_user("remote.example", "admin");
        let alice = harness.remote_user("remote.example", "alice");
        let mallory = harness.remote_user("other.example", "mallory");

        let steps = harness
            .deliver(json!({"id": "https://other.example/b/1", "type": "Block", "actor": mallory, "object": alice}))
            .await?;
        assert_eq!(steps, vec![Step::Done, Step::Dropped]);
        assert!(!harness.inbox.store.find_actor(&alice)?.unwrap().banned);

        let block = json!({"id": "https://remote.example/b/1", "type": "Block", "actor": admin, "object": alice});
        harness.deliver(block.clone()).await?;
        assert!(harness.inbox.store.find_actor(&alice)?.unwrap().banned);

        harness
            .deliver(json!({"id": "https://remote.example/u/1", "type": "Undo", "actor": admin, "object": block}))
            .await?;
        assert!(!harness.inbox.store.find_actor(&alice)?.unwrap().banned);
        Ok(())
    }
}
