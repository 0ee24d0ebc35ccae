//! Read caches that remember every answer they got from their base.
//!
//! Each fact (object existence, the complete id set, a revision, a value) is
//! asked of the base at most once. Negative answers are remembered too. Writes
//! to a [`ReadCachingModel`] only change its own index, so the cache can act
//! as a detached working copy; [`ReadCachingRepository`] instead passes model
//! creation and removal through to its base.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace, warn};

use crate::config::CacheConfig;
use crate::ids::{Address, Id, Revision, REVISION_UNDEFINED};
use crate::traits::{
    ReadableModel, ReadableRepository, SnapshotProvider, WritableModel, WritableRepository,
};
use crate::value::Value;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// What a cache knows about one fact.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Knowledge<T = ()> {
    Unknown,
    KnownAbsent,
    KnownPresent(T),
}

impl<T> Default for Knowledge<T> {
    fn default() -> Self {
        Knowledge::Unknown
    }
}

impl<T> Knowledge<T> {
    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(value) => Knowledge::KnownPresent(value),
            None => Knowledge::KnownAbsent,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Knowledge::Unknown)
    }

    /// `None` when unknown, otherwise the known answer.
    pub fn known(&self) -> Option<Option<&T>> {
        match self {
            Knowledge::Unknown => None,
            Knowledge::KnownAbsent => Some(None),
            Knowledge::KnownPresent(value) => Some(Some(value)),
        }
    }
}

impl Knowledge {
    pub fn from_bool(present: bool) -> Self {
        if present {
            Knowledge::KnownPresent(())
        } else {
            Knowledge::KnownAbsent
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.known().map(|present| present.is_some())
    }
}

#[derive(Clone, Debug, Default)]
struct FieldEntry {
    exists: Knowledge,
    revision: Option<Revision>,
    value: Knowledge<Value>,
}

impl FieldEntry {
    fn created() -> Self {
        Self {
            exists: Knowledge::KnownPresent(()),
            revision: Some(REVISION_UNDEFINED),
            value: Knowledge::KnownAbsent,
        }
    }

    fn removed() -> Self {
        Self {
            exists: Knowledge::KnownAbsent,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Default)]
struct ObjectEntry {
    exists: Knowledge,
    revision: Option<Revision>,
    /// Complete field id set, once known.
    field_ids: Option<BTreeSet<Id>>,
    fields: BTreeMap<Id, FieldEntry>,
}

impl ObjectEntry {
    fn created() -> Self {
        Self {
            exists: Knowledge::KnownPresent(()),
            revision: Some(REVISION_UNDEFINED),
            field_ids: Some(BTreeSet::new()),
            fields: BTreeMap::new(),
        }
    }

    fn removed() -> Self {
        Self {
            exists: Knowledge::KnownAbsent,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Default)]
struct CacheIndex {
    revision: Option<Revision>,
    object_ids: Option<BTreeSet<Id>>,
    objects: BTreeMap<Id, ObjectEntry>,
    base_reads: usize,
}

impl CacheIndex {
    /// Marks everything readable from `model` as known.
    fn absorb(&mut self, model: &(impl ReadableModel + ?Sized)) {
        self.revision = Some(model.revision());
        let ids: BTreeSet<Id> = model.object_ids().into_iter().collect();
        for object in &ids {
            let field_ids: BTreeSet<Id> = model.field_ids(object).into_iter().collect();
            let fields = field_ids
                .iter()
                .map(|field| {
                    let entry = FieldEntry {
                        exists: Knowledge::KnownPresent(()),
                        revision: model.field_revision(object, field),
                        value: Knowledge::from_option(model.value(object, field)),
                    };
                    (field.clone(), entry)
                })
                .collect();
            let entry = ObjectEntry {
                exists: Knowledge::KnownPresent(()),
                revision: model.object_revision(object),
                field_ids: Some(field_ids),
                fields,
            };
            self.objects.insert(object.clone(), entry);
        }
        self.object_ids = Some(ids);
    }
}

/// Read-caching wrapper around a model.
#[derive(Debug)]
pub struct ReadCachingModel<B> {
    base: B,
    config: CacheConfig,
    address: Address,
    index: RefCell<CacheIndex>,
}

impl<B: ReadableModel> ReadCachingModel<B> {
    /// Lazy cache; every fact is fetched on first use.
    pub fn new(base: B) -> Self {
        Self::with_config(base, CacheConfig::default())
    }

    pub fn with_config(base: B, config: CacheConfig) -> Self {
        let cache = Self {
            address: base.address(),
            base,
            config,
            index: RefCell::new(CacheIndex::default()),
        };
        if config.prefetch {
            cache.prefetch();
        }
        cache
    }

    /// Cache seeded from a point-in-time snapshot of the model; falls back to
    /// lazy loading when the provider has no snapshot.
    pub fn from_snapshot(
        base: B,
        provider: &(impl SnapshotProvider + ?Sized),
        config: CacheConfig,
    ) -> Self {
        let mut cache = Self::with_config(base, config.with_prefetch(false));
        let Some(model_id) = cache.address.model_id().cloned() else {
            return cache;
        };
        if let Some(snapshot) = provider.model_snapshot(&model_id) {
            let index = cache.index.get_mut();
            index.base_reads += 1;
            index.absorb(&snapshot);
            debug!(model = %snapshot.address(), "read cache seeded from snapshot");
        }
        cache
    }

    /// Loads the whole base model in one pass, replacing anything cached.
    pub fn prefetch(&self) {
        let mut index = CacheIndex {
            base_reads: self.index.borrow().base_reads + 1,
            ..CacheIndex::default()
        };
        index.absorb(&self.base);
        *self.index.borrow_mut() = index;
        debug!(model = %self.address, "read cache prefetched");
    }

    pub fn base(&self) -> &B {
        &self.base
    }

    /// Drops the cache index and returns the base.
    pub fn into_base(self) -> B {
        self.base
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    /// Number of times the base has been consulted, a prefetch counting once.
    pub fn base_reads(&self) -> usize {
        self.index.borrow().base_reads
    }

    fn fetch<T>(&self, fact: &'static str, object: Option<&Id>, read: impl FnOnce(&B) -> T) -> T {
        self.index.borrow_mut().base_reads += 1;
        if self.config.warn_on_uncached_access {
            warn!(model = %self.address, ?object, fact, "uncached read reached the base");
        } else {
            trace!(model = %self.address, ?object, fact, "cache miss");
        }
        read(&self.base)
    }

    fn cached_object<T>(&self, object: &Id, read: impl FnOnce(&ObjectEntry) -> Option<T>) -> Option<T> {
        self.index.borrow().objects.get(object).and_then(read)
    }

    fn cached_field<T>(
        &self,
        object: &Id,
        field: &Id,
        read: impl FnOnce(&FieldEntry) -> Option<T>,
    ) -> Option<T> {
        self.cached_object(object, |entry| entry.fields.get(field).and_then(read))
    }

    fn object_entry_mut<R>(&self, object: &Id, write: impl FnOnce(&mut ObjectEntry) -> R) -> R {
        let mut index = self.index.borrow_mut();
        write(index.objects.entry(object.clone()).or_default())
    }

    fn field_entry_mut<R>(&self, object: &Id, field: &Id, write: impl FnOnce(&mut FieldEntry) -> R) -> R {
        self.object_entry_mut(object, |entry| write(entry.fields.entry(field.clone()).or_default()))
    }
}

impl<B: ReadableModel> ReadableModel for ReadCachingModel<B> {
    fn address(&self) -> Address {
        self.address.clone()
    }

    fn revision(&self) -> Revision {
        if let Some(revision) = self.index.borrow().revision {
            return revision;
        }
        let revision = self.fetch("model revision", None, |base| base.revision());
        self.index.borrow_mut().revision = Some(revision);
        revision
    }

    fn has_object(&self, object: &Id) -> bool {
        let known = {
            let index = self.index.borrow();
            index
                .objects
                .get(object)
                .and_then(|entry| entry.exists.as_bool())
                .or_else(|| index.object_ids.as_ref().map(|ids| ids.contains(object)))
        };
        if let Some(exists) = known {
            return exists;
        }
        let exists = self.fetch("object exists", Some(object), |base| base.has_object(object));
        self.object_entry_mut(object, |entry| entry.exists = Knowledge::from_bool(exists));
        exists
    }

    fn object_ids(&self) -> Vec<Id> {
        if let Some(ids) = &self.index.borrow().object_ids {
            return ids.iter().cloned().collect();
        }
        let ids = self.fetch("object ids", None, |base| base.object_ids());
        let mut index = self.index.borrow_mut();
        let mut merged = BTreeSet::new();
        for id in ids {
            let entry = index.objects.entry(id.clone()).or_default();
            if entry.exists != Knowledge::KnownAbsent {
                entry.exists = Knowledge::KnownPresent(());
                merged.insert(id);
            }
        }
        // Objects created locally before the id set was known.
        merged.extend(
            index
                .objects
                .iter()
                .filter(|(_, entry)| entry.exists == Knowledge::KnownPresent(()))
                .map(|(id, _)| id.clone()),
        );
        let result = merged.iter().cloned().collect();
        index.object_ids = Some(merged);
        result
    }

    fn object_revision(&self, object: &Id) -> Option<Revision> {
        if !self.has_object(object) {
            return None;
        }
        if let Some(revision) = self.cached_object(object, |entry| entry.revision) {
            return Some(revision);
        }
        let revision = self.fetch("object revision", Some(object), |base| base.object_revision(object));
        self.object_entry_mut(object, |entry| entry.revision = revision);
        revision
    }

    fn has_field(&self, object: &Id, field: &Id) -> bool {
        if !self.has_object(object) {
            return false;
        }
        let known = self.cached_object(object, |entry| {
            entry
                .fields
                .get(field)
                .and_then(|f| f.exists.as_bool())
                .or_else(|| entry.field_ids.as_ref().map(|ids| ids.contains(field)))
        });
        if let Some(exists) = known {
            return exists;
        }
        let exists = self.fetch("field exists", Some(object), |base| base.has_field(object, field));
        self.field_entry_mut(object, field, |entry| entry.exists = Knowledge::from_bool(exists));
        exists
    }

    fn field_ids(&self, object: &Id) -> Vec<Id> {
        if !self.has_object(object) {
            return Vec::new();
        }
        if let Some(ids) = self.cached_object(object, |entry| entry.field_ids.clone()) {
            return ids.into_iter().collect();
        }
        let ids = self.fetch("field ids", Some(object), |base| base.field_ids(object));
        self.object_entry_mut(object, |entry| {
            let mut merged = BTreeSet::new();
            for id in ids {
                let field = entry.fields.entry(id.clone()).or_default();
                if field.exists != Knowledge::KnownAbsent {
                    field.exists = Knowledge::KnownPresent(());
                    merged.insert(id);
                }
            }
            for (id, field) in &entry.fields {
                if field.exists == Knowledge::KnownPresent(()) {
                    merged.insert(id.clone());
                }
            }
            let result = merged.iter().cloned().collect();
            entry.field_ids = Some(merged);
            result
        })
    }

    fn field_revision(&self, object: &Id, field: &Id) -> Option<Revision> {
        if !self.has_field(object, field) {
            return None;
        }
        if let Some(revision) = self.cached_field(object, field, |entry| entry.revision) {
            return Some(revision);
        }
        let revision = self.fetch("field revision", Some(object), |base| {
            base.field_revision(object, field)
        });
        self.field_entry_mut(object, field, |entry| entry.revision = revision);
        revision
    }

    fn value(&self, object: &Id, field: &Id) -> Option<Value> {
        if !self.has_field(object, field) {
            return None;
        }
        let known = self.cached_field(object, field, |entry| {
            entry.value.known().map(|value| value.cloned())
        });
        if let Some(value) = known {
            return value;
        }
        let value = self.fetch("value", Some(object), |base| base.value(object, field));
        self.field_entry_mut(object, field, |entry| {
            entry.value = Knowledge::from_option(value.clone())
        });
        value
    }
}

impl<B: ReadableModel> WritableModel for ReadCachingModel<B> {
    fn create_object(&mut self, object: &Id) -> bool {
        if self.has_object(object) {
            return false;
        }
        let index = self.index.get_mut();
        index.objects.insert(object.clone(), ObjectEntry::created());
        if let Some(ids) = &mut index.object_ids {
            ids.insert(object.clone());
        }
        true
    }

    fn remove_object(&mut self, object: &Id) -> bool {
        if !self.has_object(object) {
            return false;
        }
        let index = self.index.get_mut();
        index.objects.insert(object.clone(), ObjectEntry::removed());
        if let Some(ids) = &mut index.object_ids {
            ids.remove(object);
        }
        true
    }

    fn create_field(&mut self, object: &Id, field: &Id) -> bool {
        if !self.has_object(object) || self.has_field(object, field) {
            return false;
        }
        self.object_entry_mut(object, |entry| {
            entry.fields.insert(field.clone(), FieldEntry::created());
            if let Some(ids) = &mut entry.field_ids {
                ids.insert(field.clone());
            }
        });
        true
    }

    fn remove_field(&mut self, object: &Id, field: &Id) -> bool {
        if !self.has_field(object, field) {
            return false;
        }
        self.object_entry_mut(object, |entry| {
            entry.fields.insert(field.clone(), FieldEntry::removed());
            if let Some(ids) = &mut entry.field_ids {
                ids.remove(field);
            }
        });
        true
    }

    fn set_value(&mut self, object: &Id, field: &Id, value: Option<Value>) -> bool {
        if !self.has_field(object, field) || self.value(object, field) == value {
            return false;
        }
        self.field_entry_mut(object, field, |entry| entry.value = Knowledge::from_option(value));
        true
    }
}

#[derive(Clone, Debug, Default)]
struct RepositoryIndex {
    model_ids: Option<BTreeSet<Id>>,
    revisions: BTreeMap<Id, Knowledge<Revision>>,
    base_reads: usize,
}

/// Read-through cache of a repository's model set and model revisions.
#[derive(Debug)]
pub struct ReadCachingRepository<B> {
    base: B,
    config: CacheConfig,
    index: RefCell<RepositoryIndex>,
}

impl<B: ReadableRepository> ReadCachingRepository<B> {
    pub fn new(base: B) -> Self {
        Self::with_config(base, CacheConfig::default())
    }

    pub fn with_config(base: B, config: CacheConfig) -> Self {
        let cache = Self {
            base,
            config,
            index: RefCell::new(RepositoryIndex::default()),
        };
        if config.prefetch {
            let mut index = cache.index.borrow_mut();
            index.base_reads += 1;
            let ids: BTreeSet<Id> = cache.base.model_ids().into_iter().collect();
            for id in &ids {
                let revision = Knowledge::from_option(cache.base.model_revision(id));
                index.revisions.insert(id.clone(), revision);
            }
            index.model_ids = Some(ids);
            drop(index);
        }
        cache
    }

    pub fn base(&self) -> &B {
        &self.base
    }

    pub fn base_reads(&self) -> usize {
        self.index.borrow().base_reads
    }

    fn fetch<T>(&self, fact: &'static str, read: impl FnOnce(&B) -> T) -> T {
        self.index.borrow_mut().base_reads += 1;
        if self.config.warn_on_uncached_access {
            warn!(repository = %self.base.address(), fact, "uncached read reached the base");
        } else {
            trace!(repository = %self.base.address(), fact, "cache miss");
        }
        read(&self.base)
    }

    /// Forgets everything cached about `model`.
    fn invalidate(&mut self, model: &Id, exists: bool) {
        let index = self.index.get_mut();
        index.revisions.remove(model);
        if let Some(ids) = &mut index.model_ids {
            if exists {
                ids.insert(model.clone());
            } else {
                ids.remove(model);
            }
        }
    }
}

impl<B: ReadableRepository> ReadableRepository for ReadCachingRepository<B> {
    fn address(&self) -> Address {
        self.base.address()
    }

    fn has_model(&self, model: &Id) -> bool {
        if let Some(ids) = &self.index.borrow().model_ids {
            return ids.contains(model);
        }
        self.model_revision(model).is_some()
    }

    fn model_ids(&self) -> Vec<Id> {
        if let Some(ids) = &self.index.borrow().model_ids {
            return ids.iter().cloned().collect();
        }
        let ids = self.fetch("model ids", |base| base.model_ids());
        self.index.borrow_mut().model_ids = Some(ids.iter().cloned().collect());
        ids
    }

    fn model_revision(&self, model: &Id) -> Option<Revision> {
        let known = self
            .index
            .borrow()
            .revisions
            .get(model)
            .and_then(|k| k.known().map(|rev| rev.copied()));
        if let Some(revision) = known {
            return revision;
        }
        let revision = self.fetch("model revision", |base| base.model_revision(model));
        self.index
            .borrow_mut()
            .revisions
            .insert(model.clone(), Knowledge::from_option(revision));
        revision
    }
}

impl<B: WritableRepository> WritableRepository for ReadCachingRepository<B> {
    fn create_model(&mut self, model: &Id) -> bool {
        let created = self.base.create_model(model);
        self.invalidate(model, true);
        created
    }

    fn remove_model(&mut self, model: &Id) -> bool {
        let removed = self.base.remove_model(model);
        self.invalidate(model, false);
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryModel, MemoryRepository};

    fn id(s: &str) -> Id {
        Id::new(s).unwrap()
    }

    fn base() -> MemoryModel {
        let mut model = MemoryModel::new(Address::model(id("r"), id("m")));
        model.create_object(&id("o"));
        model.create_field(&id("o"), &id("f"));
        model.set_value(&id("o"), &id("f"), Some(Value::from(1)));
        model
    }

    #[test]
    fn negative_answers_are_remembered() {
        let base = base();
        let cache = ReadCachingModel::new(&base);
        assert!(!cache.has_object(&id("missing")));
        assert!(!cache.has_object(&id("missing")));
        assert_eq!(cache.base_reads(), 1);
    }

    #[test]
    fn id_sets_answer_existence() {
        let base = base();
        let cache = ReadCachingModel::new(&base);
        assert_eq!(cache.object_ids(), vec![id("o")]);
        assert!(cache.has_object(&id("o")));
        assert!(!cache.has_object(&id("x")));
        assert_eq!(cache.base_reads(), 1);
    }

    #[test]
    fn prefetch_answers_everything_up_front() {
        let base = base();
        let cache = ReadCachingModel::with_config(&base, CacheConfig::default().with_prefetch(true));
        assert_eq!(cache.value(&id("o"), &id("f")), Some(Value::from(1)));
        assert_eq!(cache.field_ids(&id("o")), vec![id("f")]);
        assert!(!cache.has_field(&id("o"), &id("g")));
        assert_eq!(cache.base_reads(), 1);
    }

    #[test]
    fn writes_stay_in_the_cache() {
        let base = base();
        let mut cache = ReadCachingModel::new(&base);
        assert!(cache.remove_field(&id("o"), &id("f")));
        assert!(cache.create_object(&id("p")));
        assert!(!cache.has_field(&id("o"), &id("f")));
        assert!(cache.has_object(&id("p")));
        assert!(base.has_field(&id("o"), &id("f")));
        assert!(!base.has_object(&id("p")));
        assert_eq!(cache.object_ids(), vec![id("o"), id("p")]);
    }

    #[test]
    fn repository_cache_passes_writes_through() {
        let mut repo = MemoryRepository::new(id("r"));
        repo.create_model(&id("m"));
        let mut cache = ReadCachingRepository::new(&mut repo);
        assert!(cache.has_model(&id("m")));
        assert!(cache.has_model(&id("m")));
        assert_eq!(cache.base_reads(), 1);
        assert!(cache.create_model(&id("n")));
        assert_eq!(cache.model_ids(), vec![id("m"), id("n")]);
        assert!(cache.remove_model(&id("m")));
        assert!(!cache.has_model(&id("m")));
        assert!(!repo.has_model(&id("m")));
    }
}
