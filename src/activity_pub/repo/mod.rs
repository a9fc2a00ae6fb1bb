mod actor_repo;
mod ban_repo;
mod content_repo;
mod follow_repo;
mod iri_index;
mod key;
mod report_repo;
mod vote_repo;

use anyhow::{Context, Result};
use fjall::TransactionalKeyspace;

pub(crate) use actor_repo::{ActorKind, ActorRecord, ActorRepo};
pub(crate) use ban_repo::{BanRepo, MagazineBan};
pub(crate) use content_repo::{ContentKind, ContentRecord, ContentRepo, Visibility};
pub(crate) use follow_repo::{FollowRecord, FollowRepo, FollowState};
pub(crate) use iri_index::{EntityRef, IriIndex};
pub(crate) use key::{EntityKey, pair_key, pair_second};
pub(crate) use report_repo::{ReportRecord, ReportRepo};
pub(crate) use vote_repo::{Vote, VoteRepo};

use crate::activity_pub::InboxError;

/// Outcome of a find-or-create by IRI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FindOrCreate<T> {
    Created(T),
    Found(T),
}

impl<T> FindOrCreate<T> {
    pub(crate) fn into_inner(self) -> T {
        match self {
            FindOrCreate::Created(t) | FindOrCreate::Found(t) => t,
        }
    }
    pub(crate) fn is_created(&self) -> bool {
        matches!(self, FindOrCreate::Created(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VoteChange {
    Added,
    Switched,
    Unchanged,
}

/// Every local proxy the inbox pipeline reads or writes. Writes touching
/// more than one record go through a single write transaction.
#[derive(Clone)]
pub(crate) struct Store {
    keyspace: TransactionalKeyspace,
    iris: IriIndex,
    actors: ActorRepo,
    contents: ContentRepo,
    votes: VoteRepo,
    follows: FollowRepo,
    bans: BanRepo,
    reports: ReportRepo,
}

impl Store {
    pub(crate) fn new(keyspace: TransactionalKeyspace) -> Result<Store> {
        Ok(Store {
            iris: IriIndex::new(&keyspace)?,
            actors: ActorRepo::new(&keyspace)?,
            contents: ContentRepo::new(&keyspace)?,
            votes: VoteRepo::new(&keyspace)?,
            follows: FollowRepo::new(&keyspace)?,
            bans: BanRepo::new(&keyspace)?,
            reports: ReportRepo::new(&keyspace)?,
            keyspace,
        })
    }

    #[cfg(test)]
    pub(crate) fn find_entity(&self, iri: &str) -> Result<Option<EntityRef>> {
        self.iris.find_one(iri)
    }

    pub(crate) fn find_actor(&self, iri: &str) -> Result<Option<ActorRecord>> {
        match self.iris.find_one(iri)? {
            Some(EntityRef::Actor(_, key)) => self.actors.find_one(key),
            _ => Ok(None),
        }
    }

    pub(crate) fn get_actor(&self, key: EntityKey) -> Result<Option<ActorRecord>> {
        self.actors.find_one(key)
    }

    pub(crate) fn find_content(&self, iri: &str) -> Result<Option<ContentRecord>> {
        match self.iris.find_one(iri)? {
            Some(EntityRef::Content(_, key)) => self.contents.find_one(key),
            _ => Ok(None),
        }
    }

    pub(crate) fn get_content(&self, key: EntityKey) -> Result<Option<ContentRecord>> {
        self.contents.find_one(key)
    }

    pub(crate) fn has_children(&self, key: EntityKey) -> Result<bool> {
        self.contents.has_children(key)
    }

    pub(crate) fn create_actor(&self, actor: ActorRecord) -> Result<FindOrCreate<ActorRecord>> {
        let mut tx = self.keyspace.write_tx();
        let claimed = self
            .iris
            .claim(&mut tx, &actor.iri, EntityRef::Actor(actor.kind, actor.key))?;
        match claimed {
            Some(EntityRef::Actor(_, key)) => {
                let found = self
                    .actors
                    .find_in(&mut tx, key)?
                    .context("iri index points to a missing actor")?;
                Ok(FindOrCreate::Found(found))
            }
            Some(EntityRef::Content(..)) => Err(InboxError::Malformed(format!(
                "{} is already known as content",
                actor.iri
            ))
            .into()),
            Some(EntityRef::Deleted) => Err(InboxError::Gone(actor.iri).into()),
            None => {
                self.actors.put(&mut tx, &actor)?;
                tx.commit()?;
                Ok(FindOrCreate::Created(actor))
            }
        }
    }

    pub(crate) fn create_content(
        &self,
        content: ContentRecord,
    ) -> Result<FindOrCreate<ContentRecord>> {
        let mut tx = self.keyspace.write_tx();
        let claimed =
            self.iris
                .claim(&mut tx, &content.iri, EntityRef::Content(content.kind, content.key))?;
        match claimed {
            Some(EntityRef::Content(_, key)) => {
                let found = self
                    .contents
                    .find_in(&mut tx, key)?
                    .context("iri index points to missing content")?;
                Ok(FindOrCreate::Found(found))
            }
            Some(EntityRef::Actor(..)) => Err(InboxError::Malformed(format!(
                "{} is already known as an actor",
                content.iri
            ))
            .into()),
            Some(EntityRef::Deleted) => Err(InboxError::Gone(content.iri).into()),
            None => {
                self.contents.put(&mut tx, &content)?;
                if let Some(parent) = content.parent {
                    self.contents.link_child(&mut tx, parent, content.key);
                }
                tx.commit()?;
                Ok(FindOrCreate::Created(content))
            }
        }
    }

    /// Apply `change` to the stored actor. The record is written back only
    /// when `change` reports a modification.
    pub(crate) fn modify_actor(
        &self,
        key: EntityKey,
        change: impl FnOnce(&mut ActorRecord) -> bool,
    ) -> Result<bool> {
        let mut tx = self.keyspace.write_tx();
        let mut actor = self
            .actors
            .find_in(&mut tx, key)?
            .with_context(|| format!("actor {key} not found"))?;
        if !change(&mut actor) {
            return Ok(false);
        }
        self.actors.put(&mut tx, &actor)?;
        tx.commit()?;
        Ok(true)
    }

    /// Same as [`Store::modify_actor`] for content records.
    pub(crate) fn modify_content(
        &self,
        key: EntityKey,
        change: impl FnOnce(&mut ContentRecord) -> bool,
    ) -> Result<bool> {
        let mut tx = self.keyspace.write_tx();
        let mut content = self
            .contents
            .find_in(&mut tx, key)?
            .with_context(|| format!("content {key} not found"))?;
        if !change(&mut content) {
            return Ok(false);
        }
        self.contents.put(&mut tx, &content)?;
        tx.commit()?;
        Ok(true)
    }

    /// Remove a content record and its votes. The IRI stays mapped to a
    /// tombstone so redelivered copies are not recreated.
    pub(crate) fn delete_content(&self, content: &ContentRecord) -> Result<()> {
        let mut tx = self.keyspace.write_tx();
        self.contents.remove(&mut tx, content);
        self.iris.bury(&mut tx, &content.iri)?;
        self.votes.remove_all(&mut tx, content.key)?;
        tx.commit()?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn find_vote(&self, content: EntityKey, voter: EntityKey) -> Result<Option<Vote>> {
        self.votes.find_one(content, voter)
    }

    /// Record `vote` and keep the content tallies in step.
    pub(crate) fn cast_vote(
        &self,
        content: EntityKey,
        voter: EntityKey,
        vote: Vote,
    ) -> Result<VoteChange> {
        let mut tx = self.keyspace.write_tx();
        let previous = self.votes.find_in(&mut tx, content, voter)?;
        if previous == Some(vote) {
            return Ok(VoteChange::Unchanged);
        }
        let mut record = self
            .contents
            .find_in(&mut tx, content)?
            .with_context(|| format!("content {content} not found"))?;
        if let Some(previous) = previous {
            tally(&mut record, previous, false);
        }
        tally(&mut record, vote, true);
        self.votes.put(&mut tx, content, voter, vote)?;
        self.contents.put(&mut tx, &record)?;
        tx.commit()?;
        Ok(match previous {
            Some(_) => VoteChange::Switched,
            None => VoteChange::Added,
        })
    }

    /// Remove the vote of `voter`, returning what it was.
    pub(crate) fn remove_vote(&self, content: EntityKey, voter: EntityKey) -> Result<Option<Vote>> {
        let mut tx = self.keyspace.write_tx();
        let Some(previous) = self.votes.find_in(&mut tx, content, voter)? else {
            return Ok(None);
        };
        if let Some(mut record) = self.contents.find_in(&mut tx, content)? {
            tally(&mut record, previous, false);
            self.contents.put(&mut tx, &record)?;
        }
        self.votes.remove(&mut tx, content, voter);
        tx.commit()?;
        Ok(Some(previous))
    }

    pub(crate) fn find_follow(
        &self,
        target: EntityKey,
        follower: EntityKey,
    ) -> Result<Option<FollowRecord>> {
        self.follows.find_one(target, follower)
    }

    pub(crate) fn put_follow(
        &self,
        target: EntityKey,
        follower: EntityKey,
        follow: &FollowRecord,
    ) -> Result<()> {
        let mut tx = self.keyspace.write_tx();
        self.follows.put(&mut tx, target, follower, follow)?;
        tx.commit()?;
        Ok(())
    }

    /// Returns `false` when there was nothing to remove.
    pub(crate) fn remove_follow(&self, target: EntityKey, follower: EntityKey) -> Result<bool> {
        let mut tx = self.keyspace.write_tx();
        if !self.follows.contains_in(&mut tx, target, follower)? {
            return Ok(false);
        }
        self.follows.remove(&mut tx, target, follower);
        tx.commit()?;
        Ok(true)
    }

    pub(crate) fn accepted_followers(&self, target: EntityKey) -> Result<Vec<EntityKey>> {
        self.follows.accepted_followers(target)
    }

    pub(crate) fn find_ban(&self, magazine: EntityKey, user: EntityKey) -> Result<Option<MagazineBan>> {
        self.bans.find_one(magazine, user)
    }

    /// Returns `false` when an active ban on the same terms already exists.
    /// Expired bans are replaced.
    pub(crate) fn insert_ban(
        &self,
        magazine: EntityKey,
        user: EntityKey,
        ban: &MagazineBan,
    ) -> Result<bool> {
        let mut tx = self.keyspace.write_tx();
        if let Some(existing) = self.bans.find_in(&mut tx, magazine, user)? {
            if existing.is_active(ban.created_at)
                && existing.reason == ban.reason
                && existing.expires_at == ban.expires_at
            {
                return Ok(false);
            }
        }
        self.bans.put(&mut tx, magazine, user, ban)?;
        tx.commit()?;
        Ok(true)
    }

    /// Returns `false` when the user was not banned.
    pub(crate) fn remove_ban(&self, magazine: EntityKey, user: EntityKey) -> Result<bool> {
        let mut tx = self.keyspace.write_tx();
        if !self.bans.contains_in(&mut tx, magazine, user)? {
            return Ok(false);
        }
        self.bans.remove(&mut tx, magazine, user);
        tx.commit()?;
        Ok(true)
    }

    #[cfg(test)]
    pub(crate) fn find_report(
        &self,
        subject: EntityKey,
        reporter: EntityKey,
    ) -> Result<Option<ReportRecord>> {
        self.reports.find_one(subject, reporter)
    }

    #[cfg(test)]
    pub(crate) fn count_reports(&self, subject: EntityKey) -> Result<usize> {
        self.reports.count(subject)
    }

    /// Returns `false` when `reporter` already reported `subject`.
    pub(crate) fn insert_report(
        &self,
        subject: EntityKey,
        reporter: EntityKey,
        report: &ReportRecord,
    ) -> Result<bool> {
        let mut tx = self.keyspace.write_tx();
        if self.reports.contains_in(&mut tx, subject, reporter)? {
            return Ok(false);
        }
        self.reports.put(&mut tx, subject, reporter, report)?;
        tx.commit()?;
        Ok(true)
    }
}

fn tally(record: &mut ContentRecord, vote: Vote, add: bool) {
    let counter = match vote {
        Vote::Up => &mut record.upvotes,
        Vote::Down => &mut record.downvotes,
    };
    *counter = if add {
        counter.saturating_add(1)
    } else {
        counter.saturating_sub(1)
    };
}
