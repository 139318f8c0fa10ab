//! Persistence seam and the in-memory store.
//!
//! Every write is conditional. Creates may carry conflict guards that are evaluated against the
//! stored records atomically with the insert; updates carry the revision observed when the
//! change was planned and fail if the record moved on since. Both failures surface as
//! [`CareError::Conflict`], which closes the check-then-act window between planning a change
//! and applying it.

use crate::{CareError, CareResult};
use careflow_types::RecordId;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// A stored record with an identity and a revision counter.
pub trait Record: Clone + Send + Sync + 'static {
    fn id(&self) -> RecordId;

    fn revision(&self) -> u64;

    fn set_revision(&mut self, revision: u64);
}

/// A predicate that, if any existing record satisfies it, vetoes a write.
pub struct ConflictGuard<R> {
    reason: String,
    matches: Box<dyn Fn(&R) -> bool + Send + Sync>,
}

impl<R> ConflictGuard<R> {
    pub fn new(
        reason: impl Into<String>,
        matches: impl Fn(&R) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            reason: reason.into(),
            matches: Box::new(matches),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn matches(&self, record: &R) -> bool {
        (self.matches)(record)
    }
}

impl<R> std::fmt::Debug for ConflictGuard<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictGuard")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

/// A conditional write.
#[derive(Debug)]
pub enum Write<R> {
    /// Insert a new record unless a guard matches an existing one.
    Create {
        record: R,
        unless: Vec<ConflictGuard<R>>,
    },
    /// Replace a record if it is still at `expected_revision` and no other record matches a
    /// guard. The record being replaced is never tested against the guards.
    Update {
        record: R,
        expected_revision: u64,
        unless: Vec<ConflictGuard<R>>,
    },
}

impl<R: Record> Write<R> {
    pub fn create(record: R) -> Self {
        Write::Create {
            record,
            unless: Vec::new(),
        }
    }

    /// Update `record`, expecting the store to still hold the revision it was read at.
    pub fn update(record: R) -> Self {
        let expected_revision = record.revision();
        Write::Update {
            record,
            expected_revision,
            unless: Vec::new(),
        }
    }

    pub fn unless(mut self, guard: ConflictGuard<R>) -> Self {
        match &mut self {
            Write::Create { unless, .. } | Write::Update { unless, .. } => unless.push(guard),
        }
        self
    }

    pub fn record(&self) -> &R {
        match self {
            Write::Create { record, .. } | Write::Update { record, .. } => record,
        }
    }

    pub fn guards(&self) -> &[ConflictGuard<R>] {
        match self {
            Write::Create { unless, .. } | Write::Update { unless, .. } => unless,
        }
    }
}

/// Storage for one record type.
pub trait RecordStore<R: Record>: Send + Sync {
    fn find_by_id(&self, id: RecordId) -> CareResult<Option<R>>;

    fn find(&self, filter: &dyn Fn(&R) -> bool) -> CareResult<Vec<R>>;

    /// Applies a conditional write and returns the stored record with its new revision.
    fn apply(&self, write: Write<R>) -> CareResult<R>;

    fn count(&self) -> CareResult<usize> {
        Ok(self.find(&|_| true)?.len())
    }
}

/// Store kept in memory behind a single lock.
pub struct InMemoryStore<R> {
    records: Mutex<BTreeMap<RecordId, R>>,
}

impl<R> Default for InMemoryStore<R> {
    fn default() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<R: Record> InMemoryStore<R> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> CareResult<std::sync::MutexGuard<'_, BTreeMap<RecordId, R>>> {
        self.records
            .lock()
            .map_err(|_| CareError::Store("record store lock poisoned".into()))
    }
}

fn first_conflict<'g, R: Record>(
    records: &BTreeMap<RecordId, R>,
    guards: &'g [ConflictGuard<R>],
    skip: Option<RecordId>,
) -> Option<&'g ConflictGuard<R>> {
    guards.iter().find(|guard| {
        records
            .values()
            .filter(|r| Some(r.id()) != skip)
            .any(|r| guard.matches(r))
    })
}

impl<R: Record> RecordStore<R> for InMemoryStore<R> {
    fn find_by_id(&self, id: RecordId) -> CareResult<Option<R>> {
        Ok(self.lock()?.get(&id).cloned())
    }

    fn find(&self, filter: &dyn Fn(&R) -> bool) -> CareResult<Vec<R>> {
        Ok(self
            .lock()?
            .values()
            .filter(|r| filter(r))
            .cloned()
            .collect())
    }

    fn apply(&self, write: Write<R>) -> CareResult<R> {
        let mut records = self.lock()?;
        match write {
            Write::Create { mut record, unless } => {
                let id = record.id();
                if records.contains_key(&id) {
                    return Err(CareError::Conflict(format!("record {id} already exists")));
                }
                if let Some(guard) = first_conflict(&records, &unless, None) {
                    return Err(CareError::Conflict(guard.reason().to_owned()));
                }
                record.set_revision(1);
                records.insert(id, record.clone());
                Ok(record)
            }
            Write::Update {
                mut record,
                expected_revision,
                unless,
            } => {
                let id = record.id();
                let current = records
                    .get(&id)
                    .map(Record::revision)
                    .ok_or_else(|| CareError::NotFound(format!("record {id}")))?;
                if current != expected_revision {
                    return Err(CareError::Conflict(format!(
                        "record {id} was modified concurrently (expected revision {expected_revision}, found {current})"
                    )));
                }
                if let Some(guard) = first_conflict(&records, &unless, Some(id)) {
                    return Err(CareError::Conflict(guard.reason().to_owned()));
                }
                record.set_revision(current + 1);
                records.insert(id, record.clone());
                Ok(record)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Slot {
        id: RecordId,
        revision: u64,
        room: u32,
    }

    impl Record for Slot {
        fn id(&self) -> RecordId {
            self.id
        }

        fn revision(&self) -> u64 {
            self.revision
        }

        fn set_revision(&mut self, revision: u64) {
            self.revision = revision;
        }
    }

    fn slot(room: u32) -> Slot {
        Slot {
            id: RecordId::new(),
            revision: 0,
            room,
        }
    }

    fn same_room(room: u32) -> ConflictGuard<Slot> {
        ConflictGuard::new(format!("room {room} is taken"), move |s: &Slot| s.room == room)
    }

    #[test]
    fn test_create_assigns_first_revision() {
        let store = InMemoryStore::new();
        let stored = store.apply(Write::create(slot(1))).expect("create");
        assert_eq!(stored.revision, 1);
        assert_eq!(store.find_by_id(stored.id).expect("find"), Some(stored));
    }

    #[test]
    fn test_create_guard_vetoes_insert() {
        let store = InMemoryStore::new();
        store
            .apply(Write::create(slot(1)).unless(same_room(1)))
            .expect("first");
        let err = store
            .apply(Write::create(slot(1)).unless(same_room(1)))
            .expect_err("second");
        assert!(matches!(err, CareError::Conflict(msg) if msg == "room 1 is taken"));
        assert_eq!(store.count().expect("count"), 1);
    }

    #[test]
    fn test_update_requires_observed_revision() {
        let store = InMemoryStore::new();
        let stored = store.apply(Write::create(slot(1))).expect("create");

        let mut first = stored.clone();
        first.room = 2;
        let mut second = stored.clone();
        second.room = 3;

        let updated = store.apply(Write::update(first)).expect("first update");
        assert_eq!(updated.revision, 2);

        let err = store.apply(Write::update(second)).expect_err("stale");
        assert!(matches!(err, CareError::Conflict(_)));
        assert_eq!(
            store.find_by_id(stored.id).expect("find").map(|s| s.room),
            Some(2)
        );
    }

    #[test]
    fn test_update_guard_ignores_the_record_itself() {
        let store = InMemoryStore::new();
        let a = store.apply(Write::create(slot(1))).expect("a");
        store.apply(Write::create(slot(2))).expect("b");

        // Staying in its own room is fine.
        store
            .apply(Write::update(a.clone()).unless(same_room(1)))
            .expect("self is skipped");

        let mut moved = store.find_by_id(a.id).expect("find").expect("present");
        moved.room = 2;
        assert!(matches!(
            store.apply(Write::update(moved).unless(same_room(2))),
            Err(CareError::Conflict(_))
        ));
    }

    #[test]
    fn test_update_of_missing_record_is_not_found() {
        let store: InMemoryStore<Slot> = InMemoryStore::new();
        let mut ghost = slot(1);
        ghost.revision = 1;
        assert!(matches!(
            store.apply(Write::update(ghost)),
            Err(CareError::NotFound(_))
        ));
    }
}
