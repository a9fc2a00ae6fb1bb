use anyhow::Result;
use tracing::{debug, info};

use crate::activity_pub::InboxError;
use crate::activity_pub::inbox::{Inbox, now};
use crate::activity_pub::mailman::Mailman;
use crate::activity_pub::model::Object;
use crate::activity_pub::repo::{ActorRecord, ReportRecord};

impl<M: Mailman> Inbox<M> {
    /// Record a report on every known content object the Flag names.
    pub(crate) fn handle_flag(&self, actor: &ActorRecord, activity: &Object<'_>) -> Result<()> {
        let subjects = activity.get_node_iris("object");
        if subjects.is_empty() {
            return Err(InboxError::Malformed("Flag names no object".to_string()).into());
        }
        let reason = activity.get_str("summary").map(str::to_string);

        let mut reported = 0;
        for iri in subjects {
            let Some(content) = self.lookup_content(iri)? else {
                debug!(target: "inbox", iri, "flagged object is not known content");
                continue;
            };
            let report = ReportRecord {
                subject_kind: content.kind,
                reason: reason.clone(),
                created_at: now(),
            };
            if self.store.insert_report(content.key, actor.key, &report)? {
                reported += 1;
                info!(
                    target: "inbox",
                    reporter = actor.iri,
                    content = content.iri,
                    "content reported"
                );
            }
        }
        if reported == 0 {
            return self.noop("no new report", activity.id());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use serde_json::json;

    use crate::activity_pub::inbox::Step;
    use crate::activity_pub::inbox::tests::Harness;
    use crate::activity_pub::repo::{ActorKind, ContentKind};

    #[tokio::test]
    async fn reports_are_recorded_once_per_reporter() -> Result<()> {
        let harness = Harness::new()?;
        let tech = harness.local_actor(ActorKind::Magazine, "tech")?;
        let carol = harness.local_actor(ActorKind::User, "carol")?;
        let entry = harness.local_entry(&tech, &carol)?;
        let alice = harness.remote_user("remote.example", "alice");
        let flag = json!({
            "id": "https://remote.example/flag/1",
            "type": "Flag",
            "actor": alice,
            "object": [entry.iri, carol.iri, "https://kiosk.example/m/tech/t/00000000000000000000000000000000"],
            "summary": "off topic",
        });

        assert_eq!(harness.deliver(flag.clone()).await?, vec![Step::Done, Step::Done]);
        assert_eq!(harness.deliver(flag).await?, vec![Step::Done, Step::Done]);

        let alice = harness.inbox.store.find_actor(&alice)?.unwrap();
        let report = harness.inbox.store.find_report(entry.key, alice.key)?.unwrap();
        assert_eq!(report.subject_kind, ContentKind::Entry);
        assert_eq!(report.reason.as_deref(), Some("off topic"));
        assert_eq!(harness.inbox.store.count_reports(entry.key)?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn flag_without_object_is_dropped() -> Result<()> {
        let harness = Harness::new()?;
        let alice = harness.remote_user("remote.example", "alice");
        let steps = harness
            .deliver(json!({"id": "https://remote.example/flag/1", "type": "Flag", "actor": alice}))
            .await?;
        assert_eq!(steps, vec![Step::Done, Step::Dropped]);
        Ok(())
    }
}
