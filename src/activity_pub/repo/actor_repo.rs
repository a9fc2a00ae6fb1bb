use anyhow::{Context, Result};
use fjall::{
    PartitionCreateOptions, TransactionalKeyspace, TransactionalPartitionHandle, WriteTransaction,
};
use minicbor::{Decode, Encode};

use super::EntityKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub(crate) enum ActorKind {
    #[n(0)]
    User,
    #[n(1)]
    Magazine,
}

/// Local proxy of a user or magazine, remote or local.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub(crate) struct ActorRecord {
    #[n(0)]
    pub(crate) key: EntityKey,
    #[n(1)]
    pub(crate) iri: String,
    #[n(2)]
    pub(crate) kind: ActorKind,
    #[n(3)]
    pub(crate) name: String,
    #[n(4)]
    pub(crate) domain: String,
    #[n(5)]
    pub(crate) inbox: Option<String>,
    #[n(6)]
    pub(crate) shared_inbox: Option<String>,
    #[n(7)]
    pub(crate) public_key_pem: Option<String>,
    #[n(8)]
    pub(crate) moderators_url: Option<String>,
    /// Magazines only
    #[n(9)]
    pub(crate) moderators: Vec<EntityKey>,
    #[n(10)]
    pub(crate) is_local: bool,
    #[n(11)]
    pub(crate) banned: bool,
    #[n(12)]
    pub(crate) deleted: bool,
    /// Unix seconds of the last refresh from the actor's origin
    #[n(13)]
    pub(crate) last_origin_update: i64,
}

impl ActorRecord {
    pub(crate) fn is_magazine(&self) -> bool {
        self.kind == ActorKind::Magazine
    }
    pub(crate) fn is_moderator(&self, user: EntityKey) -> bool {
        self.moderators.contains(&user)
    }
    /// Shared inbox first, it fans out to every local recipient on the
    /// remote side.
    pub(crate) fn delivery_inbox(&self) -> Option<&str> {
        self.shared_inbox.as_deref().or(self.inbox.as_deref())
    }
}

#[derive(Clone)]
pub(crate) struct ActorRepo {
    actors: TransactionalPartitionHandle,
}

impl ActorRepo {
    pub(crate) fn new(keyspace: &TransactionalKeyspace) -> Result<ActorRepo> {
        let actors = keyspace.open_partition("actors", PartitionCreateOptions::default())?;
        Ok(ActorRepo { actors })
    }
    pub(crate) fn put(&self, tx: &mut WriteTransaction, actor: &ActorRecord) -> Result<()> {
        let bytes = minicbor::to_vec(actor).context("unable to encode actor")?;
        tx.insert(&self.actors, actor.key, bytes);
        Ok(())
    }
    pub(crate) fn find_one(&self, key: EntityKey) -> Result<Option<ActorRecord>> {
        if let Some(bytes) = self.actors.get(key)? {
            return Ok(Some(
                minicbor::decode(&bytes).context("unable to decode actor")?,
            ));
        }
        Ok(None)
    }
    pub(crate) fn find_in(
        &self,
        tx: &mut WriteTransaction,
        key: EntityKey,
    ) -> Result<Option<ActorRecord>> {
        if let Some(bytes) = tx.get(&self.actors, key)? {
            return Ok(Some(
                minicbor::decode(&bytes).context("unable to decode actor")?,
            ));
        }
        Ok(None)
    }
}
