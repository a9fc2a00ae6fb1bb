use anyhow::{Context, Result};
use fjall::{
    PartitionCreateOptions, TransactionalKeyspace, TransactionalPartitionHandle, WriteTransaction,
};
use minicbor::{Decode, Encode};

use super::{EntityKey, pair_key, pair_second};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub(crate) enum FollowState {
    #[n(0)]
    Requested,
    #[n(1)]
    Accepted,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub(crate) struct FollowRecord {
    #[n(0)]
    pub(crate) state: FollowState,
    /// IRI of the Follow activity, echoed back in Accept and Reject
    #[n(1)]
    pub(crate) activity_iri: Option<String>,
}

/// Follows and subscriptions, keyed by `target ++ follower`.
#[derive(Clone)]
pub(crate) struct FollowRepo {
    follows: TransactionalPartitionHandle,
}

impl FollowRepo {
    pub(crate) fn new(keyspace: &TransactionalKeyspace) -> Result<FollowRepo> {
        let follows = keyspace.open_partition("follows", PartitionCreateOptions::default())?;
        Ok(FollowRepo { follows })
    }
    pub(crate) fn find_one(
        &self,
        target: EntityKey,
        follower: EntityKey,
    ) -> Result<Option<FollowRecord>> {
        if let Some(bytes) = self.follows.get(pair_key(target, follower))? {
            return Ok(Some(
                minicbor::decode(&bytes).context("unable to decode follow")?,
            ));
        }
        Ok(None)
    }
    pub(crate) fn put(
        &self,
        tx: &mut WriteTransaction,
        target: EntityKey,
        follower: EntityKey,
        follow: &FollowRecord,
    ) -> Result<()> {
        let bytes = minicbor::to_vec(follow).context("unable to encode follow")?;
        tx.insert(&self.follows, pair_key(target, follower), bytes);
        Ok(())
    }
    pub(crate) fn contains_in(
        &self,
        tx: &mut WriteTransaction,
        target: EntityKey,
        follower: EntityKey,
    ) -> Result<bool> {
        Ok(tx.get(&self.follows, pair_key(target, follower))?.is_some())
    }
    pub(crate) fn remove(&self, tx: &mut WriteTransaction, target: EntityKey, follower: EntityKey) {
        tx.remove(&self.follows, pair_key(target, follower));
    }
    /// Followers of `target` whose follow has been accepted.
    pub(crate) fn accepted_followers(&self, target: EntityKey) -> Result<Vec<EntityKey>> {
        let mut followers = vec![];
        for item in self.follows.inner().prefix(target) {
            let (key, bytes) = item?;
            let follow: FollowRecord =
                minicbor::decode(&bytes).context("unable to decode follow")?;
            if follow.state != FollowState::Accepted {
                continue;
            }
            if let Some(follower) = pair_second(&key) {
                followers.push(follower);
            }
        }
        Ok(followers)
    }
}
