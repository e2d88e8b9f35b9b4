//! Receive material of past epochs, for application messages that arrive
//! after the commit that ended their epoch.

use std::{collections::VecDeque, sync::Arc};

use arbor_crypto::Secret;
use arbor_proto::GroupContext;
use tracing::debug;

use crate::{secret_tree::SecretTree, tree::RatchetTree};

/// What a member needs to decrypt an application message of one epoch.
#[derive(Debug, Clone)]
pub(crate) struct EpochRecord {
    pub(crate) context: GroupContext,
    pub(crate) tree: Arc<RatchetTree>,
    pub(crate) secret_tree: SecretTree,
    pub(crate) sender_data_secret: Secret,
}

/// Bounded ring of [`EpochRecord`]s, oldest first.
#[derive(Debug, Clone, Default)]
pub(crate) struct EpochHistory {
    records: VecDeque<EpochRecord>,
}

impl EpochHistory {
    /// Retain `record`, evicting the oldest beyond `limit`. A limit of zero
    /// keeps nothing.
    pub(crate) fn push(&mut self, record: EpochRecord, limit: usize) {
        self.records.push_back(record);
        while self.records.len() > limit {
            if let Some(evicted) = self.records.pop_front() {
                debug!(epoch = evicted.context.epoch, "evicted epoch from history");
            }
        }
    }

    pub(crate) fn get_mut(&mut self, epoch: u64) -> Option<&mut EpochRecord> {
        self.records.iter_mut().find(|record| record.context.epoch == epoch)
    }
}

#[cfg(test)]
mod tests {
    use arbor_crypto::CipherSuite;
    use arbor_proto::{ExtensionList, ProtocolVersion};
    use tls_codec::VLBytes;

    use super::*;
    use crate::tree::test_support::leaf;

    fn record(epoch: u64) -> EpochRecord {
        EpochRecord {
            context: GroupContext {
                version: ProtocolVersion::MLS_10,
                cipher_suite: CipherSuite::Curve25519Aes128,
                group_id: VLBytes::new(b"group1".to_vec()),
                epoch,
                tree_hash: VLBytes::new(Vec::new()),
                confirmed_transcript_hash: VLBytes::new(Vec::new()),
                extensions: ExtensionList::new(),
            },
            tree: Arc::new(RatchetTree::new(leaf(0))),
            secret_tree: SecretTree::new(Secret::new(vec![epoch as u8; 32]), 1),
            sender_data_secret: Secret::new(vec![1; 32]),
        }
    }

    #[test]
    fn keeps_only_the_newest_epochs() {
        let mut history = EpochHistory::default();
        for epoch in 0..5 {
            history.push(record(epoch), 3);
        }
        let retained: Vec<u64> = history.records.iter().map(|record| record.context.epoch).collect();
        assert_eq!(retained, vec![2, 3, 4]);
        assert!(history.get_mut(1).is_none());
        assert!(history.get_mut(3).is_some());
    }

    #[test]
    fn zero_limit_keeps_nothing() {
        let mut history = EpochHistory::default();
        history.push(record(0), 0);
        assert!(history.records.is_empty());
    }
}
