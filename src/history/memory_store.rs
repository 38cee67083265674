use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{HistoryEntry, HistoryError, HistoryFilter, HistoryStore, Pagination};
use crate::db::registry::UserId;

/// Process-local store. Entries keep their insertion order so that equal
/// sort keys still list newest first.
#[derive(Default)]
pub struct MemoryHistoryStore {
    entries: RwLock<Vec<HistoryEntry>>,
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, entry: &HistoryEntry) -> Result<(), HistoryError> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }

    async fn query(
        &self,
        user: &UserId,
        filter: &HistoryFilter,
        pagination: Pagination,
    ) -> Result<(Vec<HistoryEntry>, u64), HistoryError> {
        let entries = self.entries.read().await;
        let sort_keys = filter.sort_keys();

        let mut matching: Vec<(usize, &HistoryEntry)> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| &e.user_id == user && filter.matches(e))
            .collect();

        matching.sort_by(|(ia, a), (ib, b)| {
            sort_keys
                .iter()
                .map(|key| key.compare(a, b))
                .find(|ordering| ordering.is_ne())
                .unwrap_or_else(|| ib.cmp(ia))
        });

        let total = matching.len() as u64;
        let offset = usize::try_from(pagination.offset()).unwrap_or(usize::MAX);
        let data = matching
            .into_iter()
            .skip(offset)
            .take(pagination.per_page as usize)
            .map(|(_, e)| e.clone())
            .collect();

        Ok((data, total))
    }

    async fn clear(&self, user: &UserId) -> Result<u64, HistoryError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| &e.user_id != user);
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::filter::{HistoryQuery, SortDirection, SortField, SortKey};
    use crate::history::tests::{draft, user};
    use crate::history::{HistoryRecorder, QueryKind};
    use std::sync::Arc;

    #[tokio::test]
    async fn filters_by_kind_outcome_and_search() {
        let recorder = HistoryRecorder::new(Arc::new(MemoryHistoryStore::default()));
        let alice = user("alice");
        for d in [
            draft(&alice, QueryKind::NaturalLanguage, "count all USERS", true),
            draft(&alice, QueryKind::RawSql, "SELECT * FROM users", false),
            draft(&alice, QueryKind::RawSql, "SELECT * FROM orders", true),
        ] {
            recorder.record(d).await.unwrap();
        }

        let filter = HistoryFilter {
            search: Some("users".to_string()),
            ..Default::default()
        };
        let page = recorder.list(&alice, Pagination::default(), &filter).await.unwrap();
        assert_eq!(page.total, 2);

        let filter = HistoryFilter {
            query_kinds: Some(vec![QueryKind::RawSql]),
            succeeded: Some(true),
            ..Default::default()
        };
        let page = recorder.list(&alice, Pagination::default(), &filter).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.data[0].query_text, "SELECT * FROM orders");

        let filter = HistoryFilter {
            query_kinds: Some(vec![]),
            ..Default::default()
        };
        assert_eq!(recorder.list(&alice, Pagination::default(), &filter).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn sorts_by_requested_keys() {
        let recorder = HistoryRecorder::new(Arc::new(MemoryHistoryStore::default()));
        let alice = user("alice");
        for d in [
            draft(&alice, QueryKind::RawSql, "first", false),
            draft(&alice, QueryKind::NaturalLanguage, "second", true),
            draft(&alice, QueryKind::RawSql, "third", true),
        ] {
            recorder.record(d).await.unwrap();
        }

        let filter = HistoryFilter {
            sort: vec![SortKey { field: SortField::Success, direction: SortDirection::Asc }],
            ..Default::default()
        };
        let page = recorder.list(&alice, Pagination::default(), &filter).await.unwrap();
        let texts: Vec<&str> = page.data.iter().map(|e| e.query_text.as_str()).collect();
        assert_eq!(texts, vec!["first", "third", "second"]);

        let query = HistoryQuery::from_pairs(&[
            ("sort_0_by".to_string(), "query_type".to_string()),
            ("sort_0_dir".to_string(), "ASC".to_string()),
        ])
        .unwrap();
        let page = recorder.list(&alice, Pagination::default(), &query.filter).await.unwrap();
        let texts: Vec<&str> = page.data.iter().map(|e| e.query_text.as_str()).collect();
        assert_eq!(texts, vec!["second", "third", "first"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_all_land() {
        let recorder = Arc::new(HistoryRecorder::new(Arc::new(MemoryHistoryStore::default())));
        let alice = user("alice");

        let tasks: Vec<_> = (0..40)
            .map(|i| {
                let recorder = Arc::clone(&recorder);
                let alice = alice.clone();
                tokio::spawn(async move {
                    recorder
                        .record(draft(&alice, QueryKind::RawSql, &format!("SELECT {}", i), true))
                        .await
                        .unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let page = recorder
            .list(&alice, Pagination::new(1, 50), &HistoryFilter::default())
            .await
            .unwrap();
        assert_eq!(page.total, 40);
        assert_eq!(page.data.len(), 40);
    }
}
