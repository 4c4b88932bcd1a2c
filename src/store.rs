//! Shared merge target for every source of a run.

use std::collections::hash_map::{DefaultHasher, Entry};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::context::Quality;
use crate::types::{EntityClass, EntityKey, EntityRecord, TextRecord};

const SHARDS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Improved,
    Kept,
}

/// Owned, sorted snapshot of a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Finalized {
    pub entities: BTreeMap<EntityKey, EntityRecord>,
    pub free_text: Vec<TextRecord>,
    pub models: BTreeSet<String>,
}

type Shard<V> = Mutex<HashMap<EntityKey, V>>;

/// Key → best record map. Every operation is atomic per key, and the result
/// does not depend on the order observations arrive in.
pub struct MergeStore {
    entities: Vec<Shard<EntityRecord>>,
    text: Vec<Shard<TextRecord>>,
    models: Mutex<BTreeSet<String>>,
}

impl Default for MergeStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn shard_of(key: &EntityKey) -> usize {
    let mut h = DefaultHasher::new();
    key.hash(&mut h);
    (h.finish() % SHARDS as u64) as usize
}

fn union_sorted<T: Ord + Clone>(into: &mut Vec<T>, more: &[T]) {
    into.extend_from_slice(more);
    into.sort();
    into.dedup();
}

impl MergeStore {
    pub fn new() -> Self {
        MergeStore {
            entities: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
            text: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
            models: Mutex::new(BTreeSet::new()),
        }
    }

    /// Records one observation. The stored description only ever moves to a
    /// strictly higher [`Quality`].
    pub fn upsert(&self, key: EntityKey, description: &str, class: EntityClass) -> Upsert {
        let mut shard = lock(&self.entities[shard_of(&key)]);
        match shard.entry(key) {
            Entry::Vacant(slot) => {
                let key = slot.key().clone();
                slot.insert(EntityRecord {
                    key,
                    description: description.to_string(),
                    class,
                    observation_count: 1,
                });
                Upsert::Inserted
            }
            Entry::Occupied(mut slot) => {
                let rec = slot.get_mut();
                rec.observation_count += 1;
                if Quality::of(description) > Quality::of(&rec.description) {
                    rec.description = description.to_string();
                    Upsert::Improved
                } else {
                    Upsert::Kept
                }
            }
        }
    }

    /// Free text is keyed by content hash, so only byte-identical recoveries
    /// merge. Their part and model references are unioned.
    pub fn upsert_text(&self, mut record: TextRecord) -> Upsert {
        record.part_refs.sort();
        record.part_refs.dedup();
        record.model_refs.sort();
        record.model_refs.dedup();
        let mut shard = lock(&self.text[shard_of(&record.key)]);
        match shard.entry(record.key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(record);
                Upsert::Inserted
            }
            Entry::Occupied(mut slot) => {
                let rec = slot.get_mut();
                rec.observation_count += record.observation_count.max(1);
                union_sorted(&mut rec.part_refs, &record.part_refs);
                union_sorted(&mut rec.model_refs, &record.model_refs);
                Upsert::Kept
            }
        }
    }

    pub fn add_model(&self, model: impl Into<String>) -> bool {
        lock(&self.models).insert(model.into())
    }

    pub fn entity_count(&self) -> usize {
        self.entities.iter().map(|s| lock(s).len()).sum()
    }

    pub fn text_count(&self) -> usize {
        self.text.iter().map(|s| lock(s).len()).sum()
    }

    pub fn model_count(&self) -> usize {
        lock(&self.models).len()
    }

    pub fn get(&self, key: &EntityKey) -> Option<EntityRecord> {
        lock(&self.entities[shard_of(key)]).get(key).cloned()
    }

    /// Sorted owned copies; the store itself is left untouched.
    pub fn finalize(&self) -> Finalized {
        let entities = self
            .entities
            .iter()
            .flat_map(|s| lock(s).values().cloned().collect::<Vec<_>>())
            .map(|r| (r.key.clone(), r))
            .collect();
        let mut free_text: Vec<TextRecord> = self
            .text
            .iter()
            .flat_map(|s| lock(s).values().cloned().collect::<Vec<_>>())
            .collect();
        free_text.sort_by(|a, b| (a.class, &a.key).cmp(&(b.class, &b.key)));
        Finalized {
            entities,
            free_text,
            models: lock(&self.models).clone(),
        }
    }
}
