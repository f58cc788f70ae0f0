use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use crashkit_types::{CrashId, DumpMap, ProcessedCrash, RawCrash, DEFAULT_DUMP_NAME};

use crate::error::{StoreError, StoreResult};
use crate::redact::Redactor;
use crate::traits::{CrashIdStream, CrashStore};

#[derive(Clone, Debug, Default)]
struct Record {
    raw: Option<RawCrash>,
    dumps: DumpMap,
    processed: Option<ProcessedCrash>,
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<CrashId, Record>,
    new_ids: VecDeque<CrashId>,
}

/// In-memory crash store.
///
/// Intended for tests and embedding. Records are held behind a `RwLock`
/// and cloned on read and write. Raw saves queue the id for
/// `enumerate_new`, whose stream pops ids off the queue as it is read.
pub struct InMemoryCrashStore {
    inner: Arc<RwLock<Inner>>,
    redactor: Redactor,
}

impl InMemoryCrashStore {
    /// Create a new empty store with the default redaction rules.
    pub fn new() -> Self {
        Self::with_redactor(Redactor::default())
    }

    /// Create a new empty store with custom redaction rules.
    pub fn with_redactor(redactor: Redactor) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            redactor,
        }
    }

    /// Number of crashes currently stored.
    pub fn len(&self) -> usize {
        self.inner.read().expect("lock poisoned").records.len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().expect("lock poisoned").records.is_empty()
    }

    /// Number of ids waiting for `enumerate_new`.
    pub fn pending_new(&self) -> usize {
        self.inner.read().expect("lock poisoned").new_ids.len()
    }

    /// Sorted list of every stored crash id.
    pub fn all_ids(&self) -> Vec<CrashId> {
        let inner = self.inner.read().expect("lock poisoned");
        let mut ids: Vec<CrashId> = inner.records.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Remove everything, including pending new ids.
    pub fn clear(&self) {
        let mut inner = self.inner.write().expect("lock poisoned");
        inner.records.clear();
        inner.new_ids.clear();
    }

    fn with_raw<T>(&self, id: &CrashId, f: impl FnOnce(&Record) -> StoreResult<T>) -> StoreResult<T> {
        let inner = self.inner.read().expect("lock poisoned");
        match inner.records.get(id) {
            Some(record) if record.raw.is_some() => f(record),
            _ => Err(StoreError::NotFound(id.clone())),
        }
    }
}

impl Default for InMemoryCrashStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CrashStore for InMemoryCrashStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn save_raw(&self, id: &CrashId, raw: &RawCrash, dumps: &DumpMap) -> StoreResult<()> {
        let mut inner = self.inner.write().expect("lock poisoned");
        let record = inner.records.entry(id.clone()).or_default();
        record.raw = Some(raw.clone());
        record.dumps = dumps.clone();
        if !inner.new_ids.contains(id) {
            inner.new_ids.push_back(id.clone());
        }
        Ok(())
    }

    fn save_processed(&self, id: &CrashId, processed: &ProcessedCrash) -> StoreResult<()> {
        let mut inner = self.inner.write().expect("lock poisoned");
        inner.records.entry(id.clone()).or_default().processed = Some(processed.clone());
        Ok(())
    }

    fn get_raw(&self, id: &CrashId) -> StoreResult<RawCrash> {
        self.with_raw(id, |record| Ok(record.raw.clone().unwrap_or_default()))
    }

    fn get_dump(&self, id: &CrashId, name: Option<&str>) -> StoreResult<Vec<u8>> {
        let name = match name {
            None | Some("dump") => DEFAULT_DUMP_NAME,
            Some(n) => n,
        };
        self.with_raw(id, |record| {
            record
                .dumps
                .get(name)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| StoreError::DumpNotFound {
                    id: id.clone(),
                    name: name.to_string(),
                })
        })
    }

    fn get_dumps(&self, id: &CrashId) -> StoreResult<DumpMap> {
        self.with_raw(id, |record| Ok(record.dumps.clone()))
    }

    fn get_unredacted_processed(&self, id: &CrashId) -> StoreResult<ProcessedCrash> {
        let inner = self.inner.read().expect("lock poisoned");
        inner
            .records
            .get(id)
            .and_then(|record| record.processed.clone())
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    fn remove(&self, id: &CrashId) -> StoreResult<()> {
        let mut inner = self.inner.write().expect("lock poisoned");
        if inner.records.remove(id).is_none() {
            return Err(StoreError::NotFound(id.clone()));
        }
        inner.new_ids.retain(|queued| queued != id);
        Ok(())
    }

    fn enumerate_new(&self) -> StoreResult<CrashIdStream> {
        let remaining = self.pending_new();
        Ok(Box::new(PendingNew {
            inner: Arc::clone(&self.inner),
            remaining,
        }))
    }

    fn mark_new(&self, id: &CrashId) -> StoreResult<()> {
        let mut inner = self.inner.write().expect("lock poisoned");
        if !inner.records.get(id).is_some_and(|record| record.raw.is_some()) {
            return Err(StoreError::NotFound(id.clone()));
        }
        if !inner.new_ids.contains(id) {
            inner.new_ids.push_back(id.clone());
        }
        Ok(())
    }
}

/// Pops at most `remaining` ids; ids not yet taken stay queued when the
/// stream is dropped.
struct PendingNew {
    inner: Arc<RwLock<Inner>>,
    remaining: usize,
}

impl Iterator for PendingNew {
    type Item = CrashId;

    fn next(&mut self) -> Option<CrashId> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.inner.write().expect("lock poisoned").new_ids.pop_front()
    }
}

impl std::fmt::Debug for InMemoryCrashStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.len();
        f.debug_struct("InMemoryCrashStore")
            .field("crash_count", &count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn id(s: &str) -> CrashId {
        CrashId::parse(s).unwrap()
    }

    fn doc(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        value.as_object().cloned().unwrap()
    }

    // -----------------------------------------------------------------------
    // Core CRUD
    // -----------------------------------------------------------------------

    #[test]
    fn save_and_read_raw() {
        let store = InMemoryCrashStore::new();
        let crash = id("abc123");
        let raw = doc(json!({"ProductName": "Firefox"}));
        store
            .save_raw(&crash, &raw, &DumpMap::single(b"MDMP".to_vec()))
            .unwrap();

        assert_eq!(store.get_raw(&crash).unwrap(), raw);
        assert_eq!(store.get_dump(&crash, None).unwrap(), b"MDMP");
        assert_eq!(store.get_dump(&crash, Some("dump")).unwrap(), b"MDMP");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn missing_crash_and_missing_dump() {
        let store = InMemoryCrashStore::new();
        let crash = id("abc123");
        assert!(matches!(store.get_raw(&crash), Err(StoreError::NotFound(_))));

        store
            .save_raw(&crash, &RawCrash::new(), &DumpMap::new())
            .unwrap();
        assert!(matches!(
            store.get_dump(&crash, Some("flash1")),
            Err(StoreError::DumpNotFound { .. })
        ));
    }

    #[test]
    fn processed_only_has_no_raw() {
        let store = InMemoryCrashStore::new();
        let crash = id("abc123");
        store
            .save_processed(&crash, &doc(json!({"signature": "x"})))
            .unwrap();
        assert!(matches!(store.get_raw(&crash), Err(StoreError::NotFound(_))));
        assert!(store.get_processed(&crash).is_ok());
        // Processed saves are not "new".
        assert_eq!(store.pending_new(), 0);
    }

    #[test]
    fn processed_reads_are_redacted() {
        let store = InMemoryCrashStore::new();
        let crash = id("abc123");
        let processed = doc(json!({"signature": "x", "email": "a@b.c"}));
        store.save_processed(&crash, &processed).unwrap();
        assert_eq!(store.get_unredacted_processed(&crash).unwrap(), processed);
        assert_eq!(
            store.get_processed(&crash).unwrap(),
            doc(json!({"signature": "x"}))
        );
    }

    #[test]
    fn remove_is_not_idempotent() {
        let store = InMemoryCrashStore::new();
        let crash = id("abc123");
        store
            .save_raw(&crash, &RawCrash::new(), &DumpMap::new())
            .unwrap();
        store.remove(&crash).unwrap();
        assert!(store.is_empty());
        assert!(matches!(store.remove(&crash), Err(StoreError::NotFound(_))));
        assert_eq!(store.enumerate_new().unwrap().count(), 0);
    }

    // -----------------------------------------------------------------------
    // New-crash queue
    // -----------------------------------------------------------------------

    #[test]
    fn enumerate_new_drains_in_save_order() {
        let store = InMemoryCrashStore::new();
        for name in ["c3", "a1", "b2"] {
            store
                .save_raw(&id(name), &RawCrash::new(), &DumpMap::new())
                .unwrap();
        }
        let found: Vec<CrashId> = store.enumerate_new().unwrap().collect();
        assert_eq!(found, vec![id("c3"), id("a1"), id("b2")]);
        assert_eq!(store.enumerate_new().unwrap().count(), 0);
    }

    #[test]
    fn resave_before_drain_is_listed_once() {
        let store = InMemoryCrashStore::new();
        let crash = id("abc123");
        store
            .save_raw(&crash, &RawCrash::new(), &DumpMap::new())
            .unwrap();
        store
            .save_raw(&crash, &RawCrash::new(), &DumpMap::single(vec![1]))
            .unwrap();
        assert_eq!(store.enumerate_new().unwrap().count(), 1);
        assert_eq!(store.get_dump(&crash, None).unwrap(), vec![1]);
    }

    #[test]
    fn dropped_stream_leaves_unread_ids_queued() {
        let store = InMemoryCrashStore::new();
        for name in ["a1", "b2", "c3"] {
            store
                .save_raw(&id(name), &RawCrash::new(), &DumpMap::new())
                .unwrap();
        }
        let mut stream = store.enumerate_new().unwrap();
        assert_eq!(stream.next(), Some(id("a1")));
        drop(stream);
        assert_eq!(store.pending_new(), 2);
        assert_eq!(
            store.enumerate_new().unwrap().collect::<Vec<_>>(),
            vec![id("b2"), id("c3")]
        );
    }

    #[test]
    fn mark_new_requeues_once() {
        let store = InMemoryCrashStore::new();
        let crash = id("abc123");
        store
            .save_raw(&crash, &RawCrash::new(), &DumpMap::new())
            .unwrap();
        assert_eq!(store.enumerate_new().unwrap().count(), 1);

        store.mark_new(&crash).unwrap();
        store.mark_new(&crash).unwrap();
        assert_eq!(store.enumerate_new().unwrap().collect::<Vec<_>>(), vec![crash]);
        assert!(matches!(store.mark_new(&id("zzz999")), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn concurrent_saves() {
        let store = Arc::new(InMemoryCrashStore::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for n in 0..25 {
                        let crash = id(&format!("t{t}n{n}"));
                        store
                            .save_raw(&crash, &RawCrash::new(), &DumpMap::new())
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 200);
        assert_eq!(store.enumerate_new().unwrap().count(), 200);
    }

    #[test]
    fn clear_drops_everything() {
        let store = InMemoryCrashStore::new();
        store
            .save_raw(&id("abc123"), &RawCrash::new(), &DumpMap::new())
            .unwrap();
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.pending_new(), 0);
        assert!(store.all_ids().is_empty());
    }
}
