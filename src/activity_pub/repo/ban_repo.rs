use anyhow::{Context, Result};
use fjall::{
    PartitionCreateOptions, TransactionalKeyspace, TransactionalPartitionHandle, WriteTransaction,
};
use minicbor::{Decode, Encode};

use super::{EntityKey, pair_key};

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub(crate) struct MagazineBan {
    #[n(0)]
    pub(crate) banned_by: EntityKey,
    #[n(1)]
    pub(crate) reason: Option<String>,
    /// Unix seconds, `None` for a permanent ban
    #[n(2)]
    pub(crate) expires_at: Option<i64>,
    #[n(3)]
    pub(crate) created_at: i64,
}

impl MagazineBan {
    pub(crate) fn is_active(&self, now: i64) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

/// Magazine bans, keyed by `magazine ++ user`.
#[derive(Clone)]
pub(crate) struct BanRepo {
    bans: TransactionalPartitionHandle,
}

impl BanRepo {
    pub(crate) fn new(keyspace: &TransactionalKeyspace) -> Result<BanRepo> {
        let bans = keyspace.open_partition("magazine_bans", PartitionCreateOptions::default())?;
        Ok(BanRepo { bans })
    }
    pub(crate) fn find_one(
        &self,
        magazine: EntityKey,
        user: EntityKey,
    ) -> Result<Option<MagazineBan>> {
        if let Some(bytes) = self.bans.get(pair_key(magazine, user))? {
            return Ok(Some(
                minicbor::decode(&bytes).context("unable to decode ban")?,
            ));
        }
        Ok(None)
    }
    pub(crate) fn find_in(
        &self,
        tx: &mut WriteTransaction,
        magazine: EntityKey,
        user: EntityKey,
    ) -> Result<Option<MagazineBan>> {
        if let Some(bytes) = tx.get(&self.bans, pair_key(magazine, user))? {
            return Ok(Some(
                minicbor::decode(&bytes).context("unable to decode ban")?,
            ));
        }
        Ok(None)
    }
    pub(crate) fn contains_in(
        &self,
        tx: &mut WriteTransaction,
        magazine: EntityKey,
        user: EntityKey,
    ) -> Result<bool> {
        Ok(tx.get(&self.bans, pair_key(magazine, user))?.is_some())
    }
    pub(crate) fn put(
        &self,
        tx: &mut WriteTransaction,
        magazine: EntityKey,
        user: EntityKey,
        ban: &MagazineBan,
    ) -> Result<()> {
        let bytes = minicbor::to_vec(ban).context("unable to encode ban")?;
        tx.insert(&self.bans, pair_key(magazine, user), bytes);
        Ok(())
    }
    pub(crate) fn remove(&self, tx: &mut WriteTransaction, magazine: EntityKey, user: EntityKey) {
        tx.remove(&self.bans, pair_key(magazine, user));
    }
}
