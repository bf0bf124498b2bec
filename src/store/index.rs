//! Bidirectional mapping between resource identifiers and live query records.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use super::record::LiveQueryRecord;
use super::record::RecordId;

/// The tracker at the heart of the store.
///
/// Both directions are kept mutually consistent by every mutation: a record
/// can always be found through each identifier it depends on, and each of a
/// record's identifiers can always be enumerated for cleanup.
#[derive(Default)]
pub(crate) struct LiveQueryIndex {
    by_identifier: HashMap<String, HashSet<RecordId>>,
    by_record: HashMap<RecordId, BTreeSet<String>>,
    records: HashMap<RecordId, Arc<LiveQueryRecord>>,
}

impl LiveQueryIndex {
    /// Make a record reachable. Its identifier buckets fill in on the first
    /// `register` call after its initial execution.
    pub(crate) fn insert_record(&mut self, record: Arc<LiveQueryRecord>) {
        self.records.insert(record.id, record);
    }

    /// Associate the record with each identifier, superseding whatever it was
    /// associated with before.
    pub(crate) fn register(&mut self, id: RecordId, identifiers: BTreeSet<String>) {
        if !self.records.contains_key(&id) {
            // The record was terminated while its execution was in flight.
            return;
        }
        self.clear(id);
        for identifier in &identifiers {
            self.by_identifier
                .entry(identifier.clone())
                .or_default()
                .insert(id);
        }
        self.by_record.insert(id, identifiers);
    }

    /// Remove the record from every bucket it currently appears in.
    pub(crate) fn clear(&mut self, id: RecordId) {
        let Some(identifiers) = self.by_record.remove(&id) else {
            return;
        };
        for identifier in identifiers {
            let Some(bucket) = self.by_identifier.get_mut(&identifier) else {
                tracing::error!(
                    identifier = identifier.as_str(),
                    record = id,
                    "identifier index out of sync: missing bucket"
                );
                continue;
            };
            if !bucket.remove(&id) {
                tracing::error!(
                    identifier = identifier.as_str(),
                    record = id,
                    "identifier index out of sync: record missing from bucket"
                );
            }
            if bucket.is_empty() {
                self.by_identifier.remove(&identifier);
            }
        }
    }

    /// Drop a terminated record entirely.
    pub(crate) fn remove_record(&mut self, id: RecordId) {
        self.clear(id);
        self.records.remove(&id);
    }

    /// The records currently associated with an identifier.
    pub(crate) fn lookup(&self, identifier: &str) -> Vec<Arc<LiveQueryRecord>> {
        self.by_identifier
            .get(identifier)
            .into_iter()
            .flatten()
            .filter_map(|id| self.records.get(id))
            .cloned()
            .collect()
    }

    pub(crate) fn record_count(&self) -> usize {
        self.records.len()
    }

    #[cfg(test)]
    pub(crate) fn identifier_count(&self) -> usize {
        self.by_identifier.len()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::store::test_support::test_record;

    fn identifiers(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn register_supersedes_previous_associations() {
        let mut index = LiveQueryIndex::default();
        let (sender, _receiver) = mpsc::channel(1);
        let record = Arc::new(test_record(1, sender));
        index.insert_record(record.clone());

        index.register(1, identifiers(&["Query.post", "Post:1"]));
        assert_eq!(index.lookup("Post:1").len(), 1);

        index.register(1, identifiers(&["Query.post", "Post:2"]));
        assert!(index.lookup("Post:1").is_empty());
        assert_eq!(index.lookup("Post:2").len(), 1);
        // the empty bucket is gone, not just emptied
        assert_eq!(index.identifier_count(), 2);
    }

    #[test]
    fn register_ignores_unknown_records() {
        let mut index = LiveQueryIndex::default();
        index.register(42, identifiers(&["Query.post"]));
        assert!(index.lookup("Query.post").is_empty());
        assert_eq!(index.identifier_count(), 0);
    }

    #[test]
    fn remove_record_clears_every_bucket() {
        let mut index = LiveQueryIndex::default();
        let (sender, _receiver) = mpsc::channel(1);
        index.insert_record(Arc::new(test_record(1, sender)));
        let (sender, _receiver) = mpsc::channel(1);
        index.insert_record(Arc::new(test_record(2, sender)));

        index.register(1, identifiers(&["Query.post", "Post:1"]));
        index.register(2, identifiers(&["Query.post"]));

        index.remove_record(1);
        assert_eq!(index.record_count(), 1);
        assert!(index.lookup("Post:1").is_empty());
        assert_eq!(index.lookup("Query.post").len(), 1);
        assert_eq!(index.identifier_count(), 1);
    }
}
