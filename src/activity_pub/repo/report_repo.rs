use anyhow::{Context, Result};
use fjall::{
    PartitionCreateOptions, TransactionalKeyspace, TransactionalPartitionHandle, WriteTransaction,
};
use minicbor::{Decode, Encode};

use super::{ContentKind, EntityKey, pair_key};

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub(crate) struct ReportRecord {
    #[n(0)]
    pub(crate) subject_kind: ContentKind,
    #[n(1)]
    pub(crate) reason: Option<String>,
    #[n(2)]
    pub(crate) created_at: i64,
}

/// Reports, keyed by `subject ++ reporter`.
#[derive(Clone)]
pub(crate) struct ReportRepo {
    reports: TransactionalPartitionHandle,
}

impl ReportRepo {
    pub(crate) fn new(keyspace: &TransactionalKeyspace) -> Result<ReportRepo> {
        let reports = keyspace.open_partition("reports", PartitionCreateOptions::default())?;
        Ok(ReportRepo { reports })
    }
    #[cfg(test)]
    pub(crate) fn find_one(
        &self,
        subject: EntityKey,
        reporter: EntityKey,
    ) -> Result<Option<ReportRecord>> {
        if let Some(bytes) = self.reports.get(pair_key(subject, reporter))? {
            return Ok(Some(
                minicbor::decode(&bytes).context("unable to decode report")?,
            ));
        }
        Ok(None)
    }
    pub(crate) fn contains_in(
        &self,
        tx: &mut WriteTransaction,
        subject: EntityKey,
        reporter: EntityKey,
    ) -> Result<bool> {
        Ok(tx.get(&self.reports, pair_key(subject, reporter))?.is_some())
    }
    pub(crate) fn put(
        &self,
        tx: &mut WriteTransaction,
        subject: EntityKey,
        reporter: EntityKey,
        report: &ReportRecord,
    ) -> Result<()> {
        let bytes = minicbor::to_vec(report).context("unable to encode report")?;
        tx.insert(&self.reports, pair_key(subject, reporter), bytes);
        Ok(())
    }
    #[cfg(test)]
    pub(crate) fn count(&self, subject: EntityKey) -> Result<usize> {
        let mut count = 0;
        for item in self.reports.inner().prefix(subject) {
            item.context("failed to scan reports")?;
            count += 1;
        }
        Ok(count)
    }
}
