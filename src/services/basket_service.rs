use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};

use crate::persistence::{basket_writer_loop, BasketRecords, BasketWrite};
use crate::services::notify_service::BasketNotifier;
use crate::state::{Basket, BasketMap};

/// Per-session baskets shared by every request handler.
///
/// Each mutation runs under the map's write lock, so concurrent requests for
/// the same session never lose an update. The new contents are queued for
/// the background writer and published to observers before the lock is
/// released, which keeps both in mutation order.
#[derive(Clone)]
pub struct BasketStore {
    inner: Arc<Inner>,
}

struct Inner {
    baskets: RwLock<BasketMap>,
    writer: mpsc::UnboundedSender<BasketWrite>,
    notifier: Arc<BasketNotifier>,
}

impl BasketStore {
    /// Build the store around `restored` baskets and spawn its writer task.
    pub fn start(
        records: Arc<dyn BasketRecords>,
        restored: BasketMap,
        notifier: Arc<BasketNotifier>,
    ) -> Self {
        let (writer, rx) = mpsc::unbounded_channel();
        tokio::spawn(basket_writer_loop(records, rx));

        Self {
            inner: Arc::new(Inner {
                baskets: RwLock::new(restored),
                writer,
                notifier,
            }),
        }
    }

    pub fn notifier(&self) -> &Arc<BasketNotifier> {
        &self.inner.notifier
    }

    /// Number of known sessions.
    pub fn session_count(&self) -> usize {
        self.inner.baskets.read().len()
    }

    /// Current basket of `session_id`. An unseen session gets an empty
    /// basket, which is persisted.
    pub fn get(&self, session_id: &str) -> Vec<u64> {
        if let Some(basket) = self.inner.baskets.read().get(session_id) {
            return to_vec(basket);
        }

        let mut map = self.inner.baskets.write();
        if let Some(basket) = map.get(session_id) {
            return to_vec(basket);
        }
        map.insert(session_id.to_string(), Basket::new());
        self.persist(session_id, Vec::new());
        Vec::new()
    }

    /// Put `kb` in the basket. Adding a present KB changes nothing.
    pub fn add(&self, session_id: &str, kb: u64) -> Vec<u64> {
        self.mutate(session_id, |basket| basket.insert(kb))
    }

    /// Take `kb` out of the basket. Removing an absent KB changes nothing.
    pub fn remove(&self, session_id: &str, kb: u64) -> Vec<u64> {
        self.mutate(session_id, |basket| basket.remove(&kb))
    }

    /// Merge a client-held basket: every local KB is re-added, so the result
    /// is the union of the server and client copies.
    pub fn reconcile(&self, session_id: &str, local: &[u64]) -> Vec<u64> {
        for kb in local {
            self.add(session_id, *kb);
        }
        self.get(session_id)
    }

    /// Wait until every write queued so far has reached the persisted copy.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.inner.writer.send(BasketWrite::Flush(done)).is_err() {
            tracing::warn!("Basket writer is not running; nothing to flush");
            return;
        }
        let _ = wait.await;
    }

    fn mutate(&self, session_id: &str, change: impl FnOnce(&mut Basket) -> bool) -> Vec<u64> {
        let mut map = self.inner.baskets.write();

        let created = !map.contains_key(session_id);
        let basket = map.entry(session_id.to_string()).or_default();
        let changed = change(basket);
        let kbs = to_vec(basket);

        if created || changed {
            self.persist(session_id, kbs.clone());
        }
        if changed {
            let delivered = self.inner.notifier.publish(session_id, kbs.clone());
            tracing::debug!(session = session_id, delivered, "Basket changed");
        }

        kbs
    }

    fn persist(&self, session_id: &str, kbs: Vec<u64>) {
        let job = BasketWrite::Upsert {
            session_id: session_id.to_string(),
            kbs,
        };
        if self.inner.writer.send(job).is_err() {
            tracing::warn!("Basket writer is gone; {session_id} kept in memory only");
        }
    }
}

fn to_vec(basket: &Basket) -> Vec<u64> {
    basket.iter().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryBaskets;
    use crate::services::notify_service::NotifyScope;
    use std::collections::BTreeSet;

    fn store_with(records: Arc<MemoryBaskets>, restored: BasketMap) -> BasketStore {
        BasketStore::start(
            records,
            restored,
            Arc::new(BasketNotifier::new(NotifyScope::Session)),
        )
    }

    fn fresh() -> (BasketStore, Arc<MemoryBaskets>) {
        let records = Arc::new(MemoryBaskets::default());
        (store_with(records.clone(), BasketMap::new()), records)
    }

    #[tokio::test]
    async fn unseen_session_is_created_empty_and_persisted() {
        let (store, records) = fresh();

        assert!(store.get("new").is_empty());
        store.flush().await;

        assert_eq!(records.get("new"), Some(vec![]));
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let (store, _) = fresh();

        store.add("s", 100001);
        let once = store.get("s");
        store.add("s", 100001);

        assert_eq!(store.get("s"), once);
        assert_eq!(once, vec![100001]);
    }

    #[tokio::test]
    async fn add_then_remove_restores_previous_state() {
        let (store, _) = fresh();
        store.add("s", 5);
        let before = store.get("s");

        store.add("s", 9);
        store.remove("s", 9);

        assert_eq!(store.get("s"), before);
        assert_eq!(store.remove("s", 42), before);
    }

    #[tokio::test]
    async fn reconcile_yields_union() {
        let (store, records) = fresh();
        store.add("s", 1);
        store.add("s", 3);

        let merged = store.reconcile("s", &[3, 4, 4, 2]);
        store.flush().await;

        let expected: BTreeSet<u64> = [1, 3].into_iter().chain([3, 4, 4, 2]).collect();
        assert_eq!(merged, expected.into_iter().collect::<Vec<_>>());
        assert_eq!(records.get("s"), Some(merged));
    }

    #[tokio::test]
    async fn restored_baskets_are_served() {
        let mut restored = BasketMap::new();
        restored.insert("old".into(), [100001, 100004].into_iter().collect());
        let store = store_with(Arc::new(MemoryBaskets::default()), restored);

        assert_eq!(store.get("old"), vec![100001, 100004]);
    }

    #[tokio::test]
    async fn changes_are_published_to_the_session() {
        let (store, _) = fresh();
        let mut rx = store.notifier().subscribe("s");

        store.add("s", 7);
        store.add("s", 7);
        store.remove("s", 7);

        assert_eq!(rx.recv().await.unwrap().kbs, vec![7]);
        assert_eq!(rx.recv().await.unwrap().kbs, Vec::<u64>::new());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_to_one_session_are_not_lost() {
        let (store, records) = fresh();

        let tasks: Vec<_> = (0..64u64)
            .map(|kb| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.add("shared", kb);
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }
        store.flush().await;

        let all: Vec<u64> = (0..64).collect();
        assert_eq!(store.get("shared"), all);
        assert_eq!(records.get("shared"), Some(all));
    }
}
