use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::activity_pub::{Disposition, classify};
use crate::activity_pub::local_url::UrlMatcher;
use crate::activity_pub::mailman::Mailman;
use crate::activity_pub::message::{QueueItem, VerbMessage};
use crate::activity_pub::model::{Object, Verb};
use crate::activity_pub::repo::{ContentRecord, Store, Vote};
use crate::activity_pub::simple_queue::SimpleQueue;
use crate::config::{InboxConfig, RuntimeConfig, WorkerConfig};

/// Unix seconds.
pub(crate) fn now() -> i64 {
    jiff::Timestamp::now().as_second()
}

/// Outcome of one worker loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Nothing visible in the queue
    Idle,
    Done,
    /// Discarded as unrecoverable, by policy or after too many attempts
    Dropped,
    /// Left in the queue, visible again after the visibility timeout
    Retry,
}

/// Shared context of the inbox pipeline. Every collaborator is injected here
/// and handed to the dispatcher and verb handlers through `&self`.
#[derive(Clone)]
pub(crate) struct Inbox<M: Mailman> {
    pub(crate) store: Store,
    pub(crate) queue: SimpleQueue,
    pub(crate) mailman: M,
    pub(crate) urls: UrlMatcher,
    pub(crate) config: InboxConfig,
    worker: WorkerConfig,
}

impl<M: Mailman> Inbox<M> {
    pub(crate) fn new(config: &RuntimeConfig, mailman: M) -> Result<Inbox<M>> {
        let keyspace = config.keyspace.clone();
        Ok(Inbox {
            store: Store::new(keyspace.clone())?,
            queue: SimpleQueue::new(keyspace)?,
            mailman,
            urls: UrlMatcher::new(&config.init.inbox)?,
            config: config.init.inbox.clone(),
            worker: config.init.worker.clone(),
        })
    }

    pub(crate) fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.worker.idle_poll_ms)
    }

    pub(crate) fn enqueue(&self, item: QueueItem) -> Result<()> {
        self.queue.send_message(&item)
    }

    /// Receive one queue item and process it to completion.
    pub(crate) async fn step(&self, now: u64) -> Result<Step> {
        let Some(received) = self
            .queue
            .receive_message(now, self.worker.visibility_timeout_secs)?
        else {
            return Ok(Step::Idle);
        };
        let kind = received.item.label();
        let attempts = received.approximate_receive_count;

        let step = match self.process(received.item).await {
            Ok(()) => Step::Done,
            Err(error) => match classify(&error) {
                Disposition::Silent => {
                    debug!(target: "inbox", kind, error = format!("{error:#}"), "dropped by policy");
                    Step::Dropped
                }
                Disposition::Drop => {
                    warn!(target: "inbox", kind, error = format!("{error:#}"), "dropping unprocessable message");
                    Step::Dropped
                }
                Disposition::Retry if attempts >= self.worker.max_attempts => {
                    error!(target: "inbox", kind, attempts, error = format!("{error:#}"), "giving up on message");
                    Step::Dropped
                }
                Disposition::Retry => {
                    warn!(target: "inbox", kind, attempts, error = format!("{error:#}"), "message will be retried");
                    Step::Retry
                }
            },
        };
        if step != Step::Retry && !self.queue.delete_message(received.key, received.receipt_handle)? {
            warn!(target: "sq", kind, "receipt handle expired before delete, message will be redelivered");
        }
        Ok(step)
    }

    pub(crate) async fn process(&self, item: QueueItem) -> Result<()> {
        match item {
            QueueItem::Delivery(envelope) => self.dispatch(envelope).await,
            QueueItem::Verb(message) => self.handle_verb(message).await,
            QueueItem::Chain(message) => self.resolve_pending(message).await,
        }
    }

    async fn handle_verb(&self, message: VerbMessage) -> Result<()> {
        let value: Value =
            serde_json::from_str(&message.payload).context("unable to decode verb payload")?;
        let activity = Object::from(value);
        let actor = self.resolve_actor(&message.actor).await?;
        debug!(target: "inbox", verb = ?message.verb, id = activity.id(), actor = actor.iri, "handle");

        let result = match message.verb {
            Verb::Follow => self.handle_follow(&actor, &activity).await,
            Verb::AcceptFollow => self.handle_accept_follow(&actor, &activity),
            Verb::RejectFollow => self.handle_reject_follow(&actor, &activity),
            Verb::UndoFollow => self.handle_undo_follow(&actor, &activity),
            Verb::Like => self.handle_vote(&actor, &activity, Vote::Up),
            Verb::Dislike => self.handle_vote(&actor, &activity, Vote::Down),
            Verb::UndoVote => self.handle_undo_vote(&actor, &activity),
            Verb::Create => self.handle_create(&actor, &activity).await,
            Verb::Update => self.handle_update(&actor, &activity).await,
            Verb::Delete => self.handle_delete(&actor, &activity),
            Verb::Announce => self.handle_announce(&actor, &activity),
            Verb::AddModerator => self.handle_moderator(&actor, &activity, true).await,
            Verb::RemoveModerator => self.handle_moderator(&actor, &activity, false).await,
            Verb::Block => self.handle_block(&actor, &activity, true).await,
            Verb::UndoBlock => self.handle_block(&actor, &activity, false).await,
            Verb::Lock => self.handle_lock(&actor, &activity, true).await,
            Verb::UndoLock => self.handle_lock(&actor, &activity, false).await,
            Verb::Flag => self.handle_flag(&actor, &activity),
        };
        result.with_context(|| format!("{:?} {}", message.verb, activity.id().unwrap_or("<no id>")))
    }

    /// Local content addressed by `iri`, through the IRI index or, for local
    /// URLs, the key embedded in the path.
    pub(crate) fn lookup_content(&self, iri: &str) -> Result<Option<ContentRecord>> {
        if let Some(content) = self.store.find_content(iri)? {
            return Ok(Some(content));
        }
        match self.urls.local_content(iri) {
            Some((_, key)) => self.store.get_content(key),
            None => Ok(None),
        }
    }

    pub(crate) fn noop(&self, what: &str, id: Option<&str>) -> Result<()> {
        info!(target: "inbox", id, "{what}, nothing to do");
        Ok(())
    }
}
