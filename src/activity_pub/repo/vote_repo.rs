use anyhow::{Context, Result};
use fjall::{
    PartitionCreateOptions, TransactionalKeyspace, TransactionalPartitionHandle, WriteTransaction,
};
use minicbor::{Decode, Encode};

use super::{EntityKey, pair_key};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub(crate) enum Vote {
    #[n(0)]
    Up,
    #[n(1)]
    Down,
}

#[derive(Clone)]
pub(crate) struct VoteRepo {
    votes: TransactionalPartitionHandle,
}

impl VoteRepo {
    pub(crate) fn new(keyspace: &TransactionalKeyspace) -> Result<VoteRepo> {
        let votes = keyspace.open_partition("votes", PartitionCreateOptions::default())?;
        Ok(VoteRepo { votes })
    }
    pub(crate) fn find_in(
        &self,
        tx: &mut WriteTransaction,
        content: EntityKey,
        voter: EntityKey,
    ) -> Result<Option<Vote>> {
        if let Some(bytes) = tx.get(&self.votes, pair_key(content, voter))? {
            return Ok(Some(
                minicbor::decode(&bytes).context("unable to decode vote")?,
            ));
        }
        Ok(None)
    }
    #[cfg(test)]
    pub(crate) fn find_one(&self, content: EntityKey, voter: EntityKey) -> Result<Option<Vote>> {
        if let Some(bytes) = self.votes.get(pair_key(content, voter))? {
            return Ok(Some(
                minicbor::decode(&bytes).context("unable to decode vote")?,
            ));
        }
        Ok(None)
    }
    pub(crate) fn put(
        &self,
        tx: &mut WriteTransaction,
        content: EntityKey,
        voter: EntityKey,
        vote: Vote,
    ) -> Result<()> {
        let bytes = minicbor::to_vec(vote).context("unable to encode vote")?;
        tx.insert(&self.votes, pair_key(content, voter), bytes);
        Ok(())
    }
    pub(crate) fn remove(&self, tx: &mut WriteTransaction, content: EntityKey, voter: EntityKey) {
        tx.remove(&self.votes, pair_key(content, voter));
    }
    /// Drop every vote cast on `content`.
    pub(crate) fn remove_all(&self, tx: &mut WriteTransaction, content: EntityKey) -> Result<()> {
        let keys = self
            .votes
            .inner()
            .prefix(content)
            .map(|item| item.map(|(key, _)| key))
            .collect::<Result<Vec<_>, _>>()
            .context("failed to scan votes")?;
        for key in keys {
            tx.remove(&self.votes, key);
        }
        Ok(())
    }
}
