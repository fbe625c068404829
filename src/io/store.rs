//! Tracking order persistence
//!
//! One document per order, keyed by order number. Every write is a single
//! compare-and-swap on the document `version`, so two reconcilers racing on
//! the same order cannot both win.
//!
//! - `MemoryOrderStore` - process-local, used by tests and dry runs
//! - `RocksOrderStore` - RocksDB, one JSON value per order number key

use crate::domain::{RecentActivity, StatusEvent, StoreError, TrackingOrder};
use async_trait::async_trait;
use parking_lot::RwLock;
use rocksdb::{IteratorMode, Options, WriteOptions, DB};
use rustc_hash::FxHashMap;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Storage for tracking documents
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a new document. Fails with `Duplicate` if the order number exists.
    async fn insert(&self, order: TrackingOrder) -> Result<TrackingOrder, StoreError>;

    async fn get(&self, order_number: &str) -> Result<Option<TrackingOrder>, StoreError>;

    /// Non-terminal orders with a docket number, sorted by order number
    async fn list_eligible(&self) -> Result<Vec<TrackingOrder>, StoreError>;

    /// Replace a document if its stored version still equals `expected_version`.
    /// Returns the stored document with its bumped version.
    async fn replace(
        &self,
        order: &TrackingOrder,
        expected_version: u64,
    ) -> Result<TrackingOrder, StoreError>;

    /// Most recent courier updates across all orders, newest first.
    /// Registration entries are not activity.
    async fn recent_activity(&self, limit: usize) -> Result<Vec<RecentActivity>, StoreError>;
}

/// Version check shared by both stores. Returns the document to write.
fn check_version(
    current: Option<&TrackingOrder>,
    order: &TrackingOrder,
    expected_version: u64,
) -> Result<TrackingOrder, StoreError> {
    let Some(current) = current else {
        return Err(StoreError::UnknownOrder(order.order_number.clone()));
    };
    if current.version != expected_version {
        return Err(StoreError::Conflict {
            order_number: order.order_number.clone(),
            expected: expected_version,
            found: current.version,
        });
    }
    let mut stored = order.clone();
    stored.version = expected_version + 1;
    Ok(stored)
}

/// Activity row ranked newest first, ties broken by order number
struct Ranked(RecentActivity);

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .updated_at
            .cmp(&other.0.updated_at)
            .then_with(|| other.0.order_number.cmp(&self.0.order_number))
    }
}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

/// Keeps the `limit` newest courier updates offered to it
///
/// Min-heap of at most `limit` rows; a candidate that does not beat the
/// current worst is rejected before anything is cloned.
struct RecentTop {
    limit: usize,
    heap: BinaryHeap<Reverse<Ranked>>,
}

impl RecentTop {
    fn new(limit: usize) -> Self {
        Self { limit, heap: BinaryHeap::new() }
    }

    fn offer_order(&mut self, order: &TrackingOrder) {
        for entry in order.courier_updates() {
            self.offer(&order.order_number, entry);
        }
    }

    fn offer(&mut self, order_number: &str, entry: &StatusEvent) {
        if self.limit == 0 {
            return;
        }
        if self.heap.len() == self.limit {
            let Some(Reverse(worst)) = self.heap.peek() else { return };
            let beats_worst = entry
                .recorded_at
                .cmp(&worst.0.updated_at)
                .then_with(|| worst.0.order_number.as_str().cmp(order_number))
                == Ordering::Greater;
            if !beats_worst {
                return;
            }
            self.heap.pop();
        }
        self.heap.push(Reverse(Ranked(RecentActivity {
            order_number: order_number.to_string(),
            status: entry.status,
            updated_at: entry.recorded_at,
        })));
    }

    fn into_newest_first(self) -> Vec<RecentActivity> {
        // Ascending by Reverse<Ranked> is best first
        self.heap.into_sorted_vec().into_iter().map(|Reverse(ranked)| ranked.0).collect()
    }
}

/// Process-local order store
#[derive(Debug, Default)]
pub struct MemoryOrderStore {
    docs: RwLock<FxHashMap<String, TrackingOrder>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with existing documents
    pub fn with_orders(orders: Vec<TrackingOrder>) -> Result<Self, StoreError> {
        let mut docs = FxHashMap::default();
        for order in orders {
            if docs.contains_key(&order.order_number) {
                return Err(StoreError::Duplicate(order.order_number));
            }
            docs.insert(order.order_number.clone(), order);
        }
        Ok(Self { docs: RwLock::new(docs) })
    }

    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert(&self, order: TrackingOrder) -> Result<TrackingOrder, StoreError> {
        let mut docs = self.docs.write();
        if docs.contains_key(&order.order_number) {
            return Err(StoreError::Duplicate(order.order_number));
        }
        docs.insert(order.order_number.clone(), order.clone());
        Ok(order)
    }

    async fn get(&self, order_number: &str) -> Result<Option<TrackingOrder>, StoreError> {
        Ok(self.docs.read().get(order_number).cloned())
    }

    async fn list_eligible(&self) -> Result<Vec<TrackingOrder>, StoreError> {
        let mut orders: Vec<TrackingOrder> =
            self.docs.read().values().filter(|o| o.is_eligible()).cloned().collect();
        orders.sort_by(|a, b| a.order_number.cmp(&b.order_number));
        Ok(orders)
    }

    async fn replace(
        &self,
        order: &TrackingOrder,
        expected_version: u64,
    ) -> Result<TrackingOrder, StoreError> {
        let mut docs = self.docs.write();
        let stored = check_version(docs.get(&order.order_number), order, expected_version)?;
        docs.insert(stored.order_number.clone(), stored.clone());
        Ok(stored)
    }

    async fn recent_activity(&self, limit: usize) -> Result<Vec<RecentActivity>, StoreError> {
        let mut top = RecentTop::new(limit);
        for order in self.docs.read().values() {
            top.offer_order(order);
        }
        Ok(top.into_newest_first())
    }
}

fn backend(op: &str) -> impl FnOnce(rocksdb::Error) -> StoreError + '_ {
    move |e| StoreError::Backend(format!("rocksdb {op} failed: {e}"))
}

fn read_doc(db: &DB, order_number: &str) -> Result<Option<TrackingOrder>, StoreError> {
    match db.get(order_number.as_bytes()).map_err(backend("get"))? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn write_doc(db: &DB, order: &TrackingOrder) -> Result<(), StoreError> {
    let value = serde_json::to_vec(order)?;
    let mut write_opts = WriteOptions::default();
    write_opts.set_sync(true);
    db.put_opt(order.order_number.as_bytes(), &value, &write_opts).map_err(backend("put"))
}

/// Visit every stored document in key (order number) order
fn scan_docs(db: &DB, mut visit: impl FnMut(TrackingOrder)) -> Result<(), StoreError> {
    for item in db.iterator(IteratorMode::Start) {
        let (_, value) = item.map_err(backend("scan"))?;
        visit(serde_json::from_slice(&value)?);
    }
    Ok(())
}

/// Order store backed by RocksDB
///
/// Each document is a JSON value under its order number. Reads share the
/// lock; `insert` and `replace` hold it exclusively across the read, the
/// version check and the synced put. All database calls run on the blocking
/// pool.
pub struct RocksOrderStore {
    path: PathBuf,
    db: Arc<RwLock<DB>>,
}

impl RocksOrderStore {
    /// Open the database directory, creating it if missing
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, &path).map_err(backend("open"))?;

        info!(path = %path.display(), "order_store_opened");
        Ok(Self { path, db: Arc::new(RwLock::new(db)) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `op` against the database on the blocking pool
    async fn blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&RwLock<DB>) -> Result<T, StoreError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| StoreError::Backend(format!("store task failed: {e}")))?
    }
}

#[async_trait]
impl OrderStore for RocksOrderStore {
    async fn insert(&self, order: TrackingOrder) -> Result<TrackingOrder, StoreError> {
        self.blocking(move |db| {
            let db = db.write();
            if read_doc(&db, &order.order_number)?.is_some() {
                return Err(StoreError::Duplicate(order.order_number));
            }
            write_doc(&db, &order)?;
            Ok(order)
        })
        .await
    }

    async fn get(&self, order_number: &str) -> Result<Option<TrackingOrder>, StoreError> {
        let order_number = order_number.to_string();
        self.blocking(move |db| read_doc(&db.read(), &order_number)).await
    }

    async fn list_eligible(&self) -> Result<Vec<TrackingOrder>, StoreError> {
        self.blocking(|db| {
            let mut orders = Vec::new();
            scan_docs(&db.read(), |order| {
                if order.is_eligible() {
                    orders.push(order);
                }
            })?;
            Ok(orders)
        })
        .await
    }

    async fn replace(
        &self,
        order: &TrackingOrder,
        expected_version: u64,
    ) -> Result<TrackingOrder, StoreError> {
        let order = order.clone();
        self.blocking(move |db| {
            let db = db.write();
            let current = read_doc(&db, &order.order_number)?;
            let stored = check_version(current.as_ref(), &order, expected_version)?;
            write_doc(&db, &stored)?;
            debug!(order_number = %stored.order_number, version = stored.version, "order_document_replaced");
            Ok(stored)
        })
        .await
    }

    async fn recent_activity(&self, limit: usize) -> Result<Vec<RecentActivity>, StoreError> {
        self.blocking(move |db| {
            let mut top = RecentTop::new(limit);
            scan_docs(&db.read(), |order| top.offer_order(&order))?;
            Ok(top.into_newest_first())
        })
        .await
    }
}
