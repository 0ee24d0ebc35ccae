//! In-memory reference backend.
//!
//! Plain writes through the `Writable*` traits never touch revisions; only
//! command execution (see `execute.rs`) and event replay stamp them. That makes
//! these types usable both as live backends and as detached snapshots.

use std::collections::BTreeMap;

use crate::event::Event;
use crate::ids::{Address, Id, Revision, REVISION_UNDEFINED};
use crate::traits::{
    ReadableField, ReadableModel, ReadableObject, ReadableRepository, RevisionWritableModel,
    SnapshotProvider, WritableField, WritableModel, WritableObject, WritableRepository,
};
use crate::value::Value;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MemoryField {
    address: Address,
    revision: Revision,
    value: Option<Value>,
}

impl MemoryField {
    pub fn new(address: Address) -> Self {
        Self::with_revision(address, REVISION_UNDEFINED)
    }

    pub fn with_revision(address: Address, revision: Revision) -> Self {
        Self {
            address,
            revision,
            value: None,
        }
    }

    pub fn value_ref(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn set_revision(&mut self, revision: Revision) {
        self.revision = revision;
    }
}

impl ReadableField for MemoryField {
    fn address(&self) -> Address {
        self.address.clone()
    }

    fn revision(&self) -> Revision {
        self.revision
    }

    fn value(&self) -> Option<Value> {
        self.value.clone()
    }
}

impl WritableField for MemoryField {
    fn set_value(&mut self, value: Option<Value>) -> bool {
        if self.value == value {
            return false;
        }
        self.value = value;
        true
    }
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MemoryObject {
    address: Address,
    revision: Revision,
    fields: BTreeMap<Id, MemoryField>,
}

impl MemoryObject {
    pub fn new(address: Address) -> Self {
        Self::with_revision(address, REVISION_UNDEFINED)
    }

    pub fn with_revision(address: Address, revision: Revision) -> Self {
        Self {
            address,
            revision,
            fields: BTreeMap::new(),
        }
    }

    /// Deep copy of any readable object, revisions included.
    pub fn copy_of(object: &(impl ReadableObject + ?Sized)) -> Self {
        let mut copy = Self::with_revision(object.address(), object.revision());
        for id in object.field_ids() {
            let mut field = MemoryField::with_revision(
                copy.address.with_field(id.clone()),
                object.field_revision(&id).unwrap_or(REVISION_UNDEFINED),
            );
            field.value = object.value(&id);
            copy.fields.insert(id, field);
        }
        copy
    }

    pub fn set_revision(&mut self, revision: Revision) {
        self.revision = revision;
    }

    pub fn memory_field(&self, field: &Id) -> Option<&MemoryField> {
        self.fields.get(field)
    }

    pub fn memory_field_mut(&mut self, field: &Id) -> Option<&mut MemoryField> {
        self.fields.get_mut(field)
    }

    pub fn set_field_revision(&mut self, field: &Id, revision: Revision) -> bool {
        match self.fields.get_mut(field) {
            Some(entry) => {
                entry.revision = revision;
                true
            }
            None => false,
        }
    }

    pub(crate) fn insert_field(&mut self, id: Id, field: MemoryField) {
        self.fields.insert(id, field);
    }

    pub(crate) fn take_field(&mut self, field: &Id) -> Option<MemoryField> {
        self.fields.remove(field)
    }

    pub(crate) fn fields(&self) -> impl Iterator<Item = (&Id, &MemoryField)> {
        self.fields.iter()
    }
}

impl ReadableObject for MemoryObject {
    fn address(&self) -> Address {
        self.address.clone()
    }

    fn revision(&self) -> Revision {
        self.revision
    }

    fn has_field(&self, field: &Id) -> bool {
        self.fields.contains_key(field)
    }

    fn field_ids(&self) -> Vec<Id> {
        self.fields.keys().cloned().collect()
    }

    fn field_revision(&self, field: &Id) -> Option<Revision> {
        self.fields.get(field).map(|f| f.revision)
    }

    fn value(&self, field: &Id) -> Option<Value> {
        self.fields.get(field).and_then(|f| f.value.clone())
    }

    fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl WritableObject for MemoryObject {
    fn create_field(&mut self, field: &Id) -> bool {
        if self.fields.contains_key(field) {
            return false;
        }
        let address = self.address.with_field(field.clone());
        self.fields.insert(field.clone(), MemoryField::new(address));
        true
    }

    fn remove_field(&mut self, field: &Id) -> bool {
        self.fields.remove(field).is_some()
    }

    fn set_value(&mut self, field: &Id, value: Option<Value>) -> bool {
        match self.fields.get_mut(field) {
            Some(entry) => entry.set_value(value),
            None => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MemoryModel {
    address: Address,
    revision: Revision,
    objects: BTreeMap<Id, MemoryObject>,
}

impl MemoryModel {
    pub fn new(address: Address) -> Self {
        Self::with_revision(address, REVISION_UNDEFINED)
    }

    pub fn with_revision(address: Address, revision: Revision) -> Self {
        Self {
            address,
            revision,
            objects: BTreeMap::new(),
        }
    }

    /// Deep copy of any readable model, revisions included.
    pub fn copy_of(model: &(impl ReadableModel + ?Sized)) -> Self {
        let mut copy = Self::with_revision(model.address(), model.revision());
        for id in model.object_ids() {
            let address = copy.address.with_object(id.clone());
            let mut object = MemoryObject::with_revision(
                address.clone(),
                model.object_revision(&id).unwrap_or(REVISION_UNDEFINED),
            );
            for field_id in model.field_ids(&id) {
                let mut field = MemoryField::with_revision(
                    address.with_field(field_id.clone()),
                    model
                        .field_revision(&id, &field_id)
                        .unwrap_or(REVISION_UNDEFINED),
                );
                field.value = model.value(&id, &field_id);
                object.fields.insert(field_id, field);
            }
            copy.objects.insert(id, object);
        }
        copy
    }

    pub fn memory_object(&self, object: &Id) -> Option<&MemoryObject> {
        self.objects.get(object)
    }

    pub fn memory_object_mut(&mut self, object: &Id) -> Option<&mut MemoryObject> {
        self.objects.get_mut(object)
    }

    pub(crate) fn insert_object(&mut self, id: Id, object: MemoryObject) {
        self.objects.insert(id, object);
    }

    pub(crate) fn take_object(&mut self, object: &Id) -> Option<MemoryObject> {
        self.objects.remove(object)
    }

    pub(crate) fn objects(&self) -> impl Iterator<Item = (&Id, &MemoryObject)> {
        self.objects.iter()
    }
}

impl ReadableModel for MemoryModel {
    fn address(&self) -> Address {
        self.address.clone()
    }

    fn revision(&self) -> Revision {
        self.revision
    }

    fn has_object(&self, object: &Id) -> bool {
        self.objects.contains_key(object)
    }

    fn object_ids(&self) -> Vec<Id> {
        self.objects.keys().cloned().collect()
    }

    fn object_revision(&self, object: &Id) -> Option<Revision> {
        self.objects.get(object).map(|o| o.revision)
    }

    fn has_field(&self, object: &Id, field: &Id) -> bool {
        self.objects
            .get(object)
            .is_some_and(|o| o.fields.contains_key(field))
    }

    fn field_ids(&self, object: &Id) -> Vec<Id> {
        self.objects
            .get(object)
            .map(|o| o.field_ids())
            .unwrap_or_default()
    }

    fn field_revision(&self, object: &Id, field: &Id) -> Option<Revision> {
        self.objects
            .get(object)
            .and_then(|o| o.field_revision(field))
    }

    fn value(&self, object: &Id, field: &Id) -> Option<Value> {
        self.objects.get(object).and_then(|o| o.value(field))
    }

    fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl WritableModel for MemoryModel {
    fn create_object(&mut self, object: &Id) -> bool {
        if self.objects.contains_key(object) {
            return false;
        }
        let address = self.address.with_object(object.clone());
        self.objects
            .insert(object.clone(), MemoryObject::new(address));
        true
    }

    fn remove_object(&mut self, object: &Id) -> bool {
        self.objects.remove(object).is_some()
    }

    fn create_field(&mut self, object: &Id, field: &Id) -> bool {
        self.objects
            .get_mut(object)
            .is_some_and(|o| o.create_field(field))
    }

    fn remove_field(&mut self, object: &Id, field: &Id) -> bool {
        self.objects
            .get_mut(object)
            .is_some_and(|o| o.remove_field(field))
    }

    fn set_value(&mut self, object: &Id, field: &Id, value: Option<Value>) -> bool {
        self.objects
            .get_mut(object)
            .is_some_and(|o| WritableObject::set_value(o, field, value))
    }
}

impl RevisionWritableModel for MemoryModel {
    fn set_revision(&mut self, revision: Revision) {
        self.revision = revision;
    }

    fn set_object_revision(&mut self, object: &Id, revision: Revision) -> bool {
        match self.objects.get_mut(object) {
            Some(entry) => {
                entry.revision = revision;
                true
            }
            None => false,
        }
    }

    fn set_field_revision(&mut self, object: &Id, field: &Id, revision: Revision) -> bool {
        self.objects
            .get_mut(object)
            .is_some_and(|o| o.set_field_revision(field, revision))
    }
}

/// Repository of models plus the change log of every executed command.
#[derive(Clone, Debug)]
pub struct MemoryRepository {
    address: Address,
    pub(crate) models: BTreeMap<Id, MemoryModel>,
    /// Last revision of removed models, so a re-created model keeps counting up.
    pub(crate) tombstones: BTreeMap<Id, Revision>,
    pub(crate) logs: BTreeMap<Id, Vec<Event>>,
}

impl MemoryRepository {
    pub fn new(repository: Id) -> Self {
        Self {
            address: Address::repository(repository),
            models: BTreeMap::new(),
            tombstones: BTreeMap::new(),
            logs: BTreeMap::new(),
        }
    }

    pub fn memory_model(&self, model: &Id) -> Option<&MemoryModel> {
        self.models.get(model)
    }

    pub fn memory_model_mut(&mut self, model: &Id) -> Option<&mut MemoryModel> {
        self.models.get_mut(model)
    }

    /// Every event emitted for `model`, oldest first.
    pub fn change_log(&self, model: &Id) -> &[Event] {
        self.logs.get(model).map(Vec::as_slice).unwrap_or_default()
    }

    /// Events that moved `model` past `revision`.
    pub fn events_since(&self, model: &Id, revision: Revision) -> Vec<&Event> {
        self.change_log(model)
            .iter()
            .filter(|event| event.model_revision() > revision)
            .collect()
    }

    pub(crate) fn next_model_revision(&self, model: &Id) -> Revision {
        self.tombstones.get(model).map_or(0, |rev| rev + 1)
    }
}

impl ReadableRepository for MemoryRepository {
    fn address(&self) -> Address {
        self.address.clone()
    }

    fn has_model(&self, model: &Id) -> bool {
        self.models.contains_key(model)
    }

    fn model_ids(&self) -> Vec<Id> {
        self.models.keys().cloned().collect()
    }

    fn model_revision(&self, model: &Id) -> Option<Revision> {
        self.models.get(model).map(|m| m.revision)
    }
}

impl WritableRepository for MemoryRepository {
    fn create_model(&mut self, model: &Id) -> bool {
        if self.models.contains_key(model) {
            return false;
        }
        let revision = self.next_model_revision(model);
        let address = self.address.with_model(model.clone());
        self.tombstones.remove(model);
        self.models
            .insert(model.clone(), MemoryModel::with_revision(address, revision));
        true
    }

    fn remove_model(&mut self, model: &Id) -> bool {
        match self.models.remove(model) {
            Some(removed) => {
                self.tombstones.insert(model.clone(), removed.revision + 1);
                true
            }
            None => false,
        }
    }
}

impl SnapshotProvider for MemoryRepository {
    fn model_snapshot(&self, model: &Id) -> Option<MemoryModel> {
        self.models.get(model).cloned()
    }

    fn object_snapshot(&self, model: &Id, object: &Id) -> Option<MemoryObject> {
        self.models
            .get(model)
            .and_then(|m| m.objects.get(object))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> Id {
        Id::new(s).unwrap()
    }

    fn model() -> MemoryModel {
        MemoryModel::new(Address::model(id("r"), id("m")))
    }

    #[test]
    fn plain_writes_leave_revisions_alone() {
        let mut m = model();
        assert!(m.create_object(&id("o")));
        assert!(!m.create_object(&id("o")));
        assert!(m.create_field(&id("o"), &id("f")));
        assert!(m.set_value(&id("o"), &id("f"), Some("v".into())));
        assert!(!m.set_value(&id("o"), &id("f"), Some("v".into())));

        assert_eq!(m.revision(), REVISION_UNDEFINED);
        assert_eq!(m.object_revision(&id("o")), Some(REVISION_UNDEFINED));
        assert_eq!(m.value(&id("o"), &id("f")), Some(Value::from("v")));
    }

    #[test]
    fn set_value_on_missing_field_is_rejected() {
        let mut m = model();
        m.create_object(&id("o"));
        assert!(!m.set_value(&id("o"), &id("missing"), Some(Value::from(1))));
        assert!(!m.create_field(&id("missing"), &id("f")));
    }

    #[test]
    fn copy_of_preserves_revisions_and_values() {
        let mut m = model();
        m.create_object(&id("o"));
        m.create_field(&id("o"), &id("f"));
        m.set_value(&id("o"), &id("f"), Some(Value::from(true)));
        m.set_revision(7);
        m.set_object_revision(&id("o"), 5);
        m.set_field_revision(&id("o"), &id("f"), 3);

        let copy = MemoryModel::copy_of(&m);
        assert_eq!(copy, m);
        assert_eq!(copy.field_revision(&id("o"), &id("f")), Some(3));
    }

    #[test]
    fn views_read_through_the_owner() {
        let mut m = model();
        m.create_object(&id("o"));
        m.create_field(&id("o"), &id("f"));
        m.set_value(&id("o"), &id("f"), Some(Value::from("x")));

        let object = m.object(&id("o")).unwrap();
        assert_eq!(object.address().to_string(), "/r/m/o/-");
        let field = object.field(&id("f")).unwrap();
        assert_eq!(field.value(), Some(Value::from("x")));
        assert!(m.object(&id("missing")).is_none());
    }

    #[test]
    fn recreated_model_continues_revisions() {
        let mut repo = MemoryRepository::new(id("r"));
        assert!(repo.create_model(&id("m")));
        assert_eq!(repo.model_revision(&id("m")), Some(0));
        repo.memory_model_mut(&id("m")).unwrap().set_revision(4);
        assert!(repo.remove_model(&id("m")));
        assert!(repo.create_model(&id("m")));
        assert_eq!(repo.model_revision(&id("m")), Some(6));
    }
}
