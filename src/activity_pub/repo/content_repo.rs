use anyhow::{Context, Result};
use fjall::{
    PartitionCreateOptions, TransactionalKeyspace, TransactionalPartitionHandle, WriteTransaction,
};
use minicbor::{Decode, Encode};

use super::{EntityKey, pair_key};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub(crate) enum ContentKind {
    #[n(0)]
    Entry,
    #[n(1)]
    EntryComment,
    #[n(2)]
    Post,
    #[n(3)]
    PostComment,
}

impl ContentKind {
    pub(crate) fn is_comment(self) -> bool {
        matches!(self, ContentKind::EntryComment | ContentKind::PostComment)
    }
    /// Kind of a reply to content of this kind.
    pub(crate) fn reply_kind(self) -> ContentKind {
        match self {
            ContentKind::Entry | ContentKind::EntryComment => ContentKind::EntryComment,
            ContentKind::Post | ContentKind::PostComment => ContentKind::PostComment,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub(crate) enum Visibility {
    #[n(0)]
    Visible,
    /// Deleted by its author
    #[n(1)]
    SoftDeleted,
    /// Removed by a moderator
    #[n(2)]
    Trashed,
}

/// Local proxy of an entry, post or comment.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub(crate) struct ContentRecord {
    #[n(0)]
    pub(crate) key: EntityKey,
    #[n(1)]
    pub(crate) iri: String,
    #[n(2)]
    pub(crate) kind: ContentKind,
    #[n(3)]
    pub(crate) author: EntityKey,
    #[n(4)]
    pub(crate) magazine: Option<EntityKey>,
    #[n(5)]
    pub(crate) parent: Option<EntityKey>,
    #[n(6)]
    pub(crate) root: Option<EntityKey>,
    #[n(7)]
    pub(crate) title: Option<String>,
    #[n(8)]
    pub(crate) body: Option<String>,
    #[n(9)]
    pub(crate) url: Option<String>,
    #[n(10)]
    pub(crate) upvotes: u64,
    #[n(11)]
    pub(crate) downvotes: u64,
    #[n(12)]
    pub(crate) locked: bool,
    #[n(13)]
    pub(crate) visibility: Visibility,
    #[n(14)]
    pub(crate) is_local: bool,
    #[n(15)]
    pub(crate) created_at: i64,
    #[n(16)]
    pub(crate) edited_at: Option<i64>,
    #[n(17)]
    pub(crate) last_active: i64,
}

#[derive(Clone)]
pub(crate) struct ContentRepo {
    contents: TransactionalPartitionHandle,
    children: TransactionalPartitionHandle,
}

impl ContentRepo {
    pub(crate) fn new(keyspace: &TransactionalKeyspace) -> Result<ContentRepo> {
        let options = PartitionCreateOptions::default();
        let contents = keyspace.open_partition("contents", options.clone())?;
        let children = keyspace.open_partition("content_children", options)?;
        Ok(ContentRepo { contents, children })
    }
    pub(crate) fn put(&self, tx: &mut WriteTransaction, content: &ContentRecord) -> Result<()> {
        let bytes = minicbor::to_vec(content).context("unable to encode content")?;
        tx.insert(&self.contents, content.key, bytes);
        Ok(())
    }
    pub(crate) fn link_child(&self, tx: &mut WriteTransaction, parent: EntityKey, child: EntityKey) {
        tx.insert(&self.children, pair_key(parent, child), Vec::<u8>::new());
    }
    pub(crate) fn remove(&self, tx: &mut WriteTransaction, content: &ContentRecord) {
        tx.remove(&self.contents, content.key);
        if let Some(parent) = content.parent {
            tx.remove(&self.children, pair_key(parent, content.key));
        }
    }
    pub(crate) fn find_one(&self, key: EntityKey) -> Result<Option<ContentRecord>> {
        if let Some(bytes) = self.contents.get(key)? {
            return Ok(Some(
                minicbor::decode(&bytes).context("unable to decode content")?,
            ));
        }
        Ok(None)
    }
    pub(crate) fn find_in(
        &self,
        tx: &mut WriteTransaction,
        key: EntityKey,
    ) -> Result<Option<ContentRecord>> {
        if let Some(bytes) = tx.get(&self.contents, key)? {
            return Ok(Some(
                minicbor::decode(&bytes).context("unable to decode content")?,
            ));
        }
        Ok(None)
    }
    pub(crate) fn has_children(&self, key: EntityKey) -> Result<bool> {
        match self.children.inner().prefix(key).next() {
            Some(item) => item.map(|_| true).context("failed to read content children"),
            None => Ok(false),
        }
    }
}
