use anyhow::{Context, Result};
use fjall::{
    PartitionCreateOptions, TransactionalKeyspace, TransactionalPartitionHandle, WriteTransaction,
};
use minicbor::{Decode, Encode};

use super::{ActorKind, ContentKind, EntityKey};

/// What a remote or local IRI maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub(crate) enum EntityRef {
    #[n(0)]
    Actor(#[n(0)] ActorKind, #[n(1)] EntityKey),
    #[n(1)]
    Content(#[n(0)] ContentKind, #[n(1)] EntityKey),
    /// Hard-deleted, never recreated
    #[n(2)]
    Deleted,
}

#[derive(Clone)]
pub(crate) struct IriIndex {
    index: TransactionalPartitionHandle,
}

impl IriIndex {
    pub(crate) fn new(keyspace: &TransactionalKeyspace) -> Result<IriIndex> {
        let index = keyspace.open_partition("iri_index", PartitionCreateOptions::default())?;
        Ok(IriIndex { index })
    }
    pub(crate) fn find_one(&self, iri: &str) -> Result<Option<EntityRef>> {
        let Some(bytes) = self.index.get(iri).context("failed to read from iri index")? else {
            return Ok(None);
        };
        Ok(Some(
            minicbor::decode(&bytes).context("unable to decode iri index entry")?,
        ))
    }
    /// Claim `iri` for `entity` inside `tx`. When another writer already
    /// claimed it, nothing is written and the existing mapping is returned.
    pub(crate) fn claim(
        &self,
        tx: &mut WriteTransaction,
        iri: &str,
        entity: EntityRef,
    ) -> Result<Option<EntityRef>> {
        if let Some(bytes) = tx.get(&self.index, iri)? {
            let winner = minicbor::decode(&bytes).context("unable to decode iri index entry")?;
            return Ok(Some(winner));
        }
        let bytes = minicbor::to_vec(entity).context("unable to encode iri index entry")?;
        tx.insert(&self.index, iri, bytes);
        Ok(None)
    }
    pub(crate) fn bury(&self, tx: &mut WriteTransaction, iri: &str) -> Result<()> {
        let bytes =
            minicbor::to_vec(EntityRef::Deleted).context("unable to encode iri index entry")?;
        tx.insert(&self.index, iri, bytes);
        Ok(())
    }
}
