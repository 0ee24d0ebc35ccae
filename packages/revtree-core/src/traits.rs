//! Read and write capabilities for the four entity levels.
//!
//! Every cache, overlay, and builder in this crate is written against these
//! traits rather than a concrete backend, so wrappers compose freely (a diff
//! overlay over a read cache over a remote store, and so on). Child entities
//! are addressed by id from their parent instead of being handed out as owned
//! references; [`ObjectView`] and [`FieldView`] are the thin handles for when a
//! per-entity view is needed.

use crate::command::{Command, Outcome};
use crate::ids::{Address, Id, Revision, REVISION_UNDEFINED};
use crate::memory::{MemoryModel, MemoryObject};
use crate::value::Value;

pub trait ReadableField {
    fn address(&self) -> Address;
    fn revision(&self) -> Revision;
    fn value(&self) -> Option<Value>;

    fn is_empty(&self) -> bool {
        self.value().is_none()
    }
}

pub trait WritableField: ReadableField {
    /// Returns `true` when the stored value changed.
    fn set_value(&mut self, value: Option<Value>) -> bool;
}

pub trait ReadableObject {
    fn address(&self) -> Address;
    fn revision(&self) -> Revision;
    fn has_field(&self, field: &Id) -> bool;
    fn field_ids(&self) -> Vec<Id>;
    fn field_revision(&self, field: &Id) -> Option<Revision>;
    fn value(&self, field: &Id) -> Option<Value>;

    fn is_empty(&self) -> bool {
        self.field_ids().is_empty()
    }

    fn field(&self, field: &Id) -> Option<FieldView<'_, Self>>
    where
        Self: Sized,
    {
        self.has_field(field)
            .then(|| FieldView::new(self, field.clone()))
    }
}

pub trait WritableObject: ReadableObject {
    /// Returns `true` when the field did not exist before.
    fn create_field(&mut self, field: &Id) -> bool;
    /// Returns `true` when the field existed.
    fn remove_field(&mut self, field: &Id) -> bool;
    /// Returns `true` when the value changed; `false` also when the field is missing.
    fn set_value(&mut self, field: &Id, value: Option<Value>) -> bool;
}

pub trait ReadableModel {
    fn address(&self) -> Address;
    fn revision(&self) -> Revision;
    fn has_object(&self, object: &Id) -> bool;
    fn object_ids(&self) -> Vec<Id>;
    fn object_revision(&self, object: &Id) -> Option<Revision>;
    fn has_field(&self, object: &Id, field: &Id) -> bool;
    fn field_ids(&self, object: &Id) -> Vec<Id>;
    fn field_revision(&self, object: &Id, field: &Id) -> Option<Revision>;
    fn value(&self, object: &Id, field: &Id) -> Option<Value>;

    fn is_empty(&self) -> bool {
        self.object_ids().is_empty()
    }

    fn object(&self, object: &Id) -> Option<ObjectView<'_, Self>>
    where
        Self: Sized,
    {
        self.has_object(object)
            .then(|| ObjectView::new(self, object.clone()))
    }
}

pub trait WritableModel: ReadableModel {
    fn create_object(&mut self, object: &Id) -> bool;
    fn remove_object(&mut self, object: &Id) -> bool;
    fn create_field(&mut self, object: &Id, field: &Id) -> bool;
    fn remove_field(&mut self, object: &Id, field: &Id) -> bool;
    fn set_value(&mut self, object: &Id, field: &Id, value: Option<Value>) -> bool;
}

/// Writable model whose revision numbers can be stamped directly, as needed
/// when reconstructing state from a change log.
pub trait RevisionWritableModel: WritableModel {
    fn set_revision(&mut self, revision: Revision);
    fn set_object_revision(&mut self, object: &Id, revision: Revision) -> bool;
    fn set_field_revision(&mut self, object: &Id, field: &Id, revision: Revision) -> bool;
}

pub trait ReadableRepository {
    fn address(&self) -> Address;
    fn has_model(&self, model: &Id) -> bool;
    fn model_ids(&self) -> Vec<Id>;
    fn model_revision(&self, model: &Id) -> Option<Revision>;

    fn is_empty(&self) -> bool {
        self.model_ids().is_empty()
    }
}

pub trait WritableRepository: ReadableRepository {
    fn create_model(&mut self, model: &Id) -> bool;
    fn remove_model(&mut self, model: &Id) -> bool;
}

/// Point-in-time copies of whole subtrees, used by prefetching caches.
pub trait SnapshotProvider {
    fn model_snapshot(&self, model: &Id) -> Option<MemoryModel>;
    fn object_snapshot(&self, model: &Id, object: &Id) -> Option<MemoryObject>;
}

/// Executes commands under optimistic concurrency control.
pub trait CommandExecutor {
    fn execute(&mut self, command: &Command) -> Outcome;
}

/// Object handle reading through its owning model.
#[derive(Debug)]
pub struct ObjectView<'a, M: ?Sized> {
    model: &'a M,
    address: Address,
    id: Id,
}

impl<'a, M: ReadableModel + ?Sized> ObjectView<'a, M> {
    pub fn new(model: &'a M, id: Id) -> Self {
        let address = model.address().with_object(id.clone());
        Self { model, address, id }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }
}

impl<M: ReadableModel + ?Sized> ReadableObject for ObjectView<'_, M> {
    fn address(&self) -> Address {
        self.address.clone()
    }

    fn revision(&self) -> Revision {
        self.model
            .object_revision(&self.id)
            .unwrap_or(REVISION_UNDEFINED)
    }

    fn has_field(&self, field: &Id) -> bool {
        self.model.has_field(&self.id, field)
    }

    fn field_ids(&self) -> Vec<Id> {
        self.model.field_ids(&self.id)
    }

    fn field_revision(&self, field: &Id) -> Option<Revision> {
        self.model.field_revision(&self.id, field)
    }

    fn value(&self, field: &Id) -> Option<Value> {
        self.model.value(&self.id, field)
    }
}

/// Field handle reading through its owning object.
#[derive(Debug)]
pub struct FieldView<'a, O: ?Sized> {
    object: &'a O,
    address: Address,
    id: Id,
}

impl<'a, O: ReadableObject + ?Sized> FieldView<'a, O> {
    pub fn new(object: &'a O, id: Id) -> Self {
        let address = object.address().with_field(id.clone());
        Self {
            object,
            address,
            id,
        }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }
}

impl<O: ReadableObject + ?Sized> ReadableField for FieldView<'_, O> {
    fn address(&self) -> Address {
        self.address.clone()
    }

    fn revision(&self) -> Revision {
        self.object
            .field_revision(&self.id)
            .unwrap_or(REVISION_UNDEFINED)
    }

    fn value(&self) -> Option<Value> {
        self.object.value(&self.id)
    }
}

macro_rules! forward_readable_object {
    ($($ty:ty),*) => {$(
        impl<T: ReadableObject + ?Sized> ReadableObject for $ty {
            fn address(&self) -> Address {
                (**self).address()
            }
            fn revision(&self) -> Revision {
                (**self).revision()
            }
            fn has_field(&self, field: &Id) -> bool {
                (**self).has_field(field)
            }
            fn field_ids(&self) -> Vec<Id> {
                (**self).field_ids()
            }
            fn field_revision(&self, field: &Id) -> Option<Revision> {
                (**self).field_revision(field)
            }
            fn value(&self, field: &Id) -> Option<Value> {
                (**self).value(field)
            }
            fn is_empty(&self) -> bool {
                (**self).is_empty()
            }
        }
    )*};
}

macro_rules! forward_readable_model {
    ($($ty:ty),*) => {$(
        impl<T: ReadableModel + ?Sized> ReadableModel for $ty {
            fn address(&self) -> Address {
                (**self).address()
            }
            fn revision(&self) -> Revision {
                (**self).revision()
            }
            fn has_object(&self, object: &Id) -> bool {
                (**self).has_object(object)
            }
            fn object_ids(&self) -> Vec<Id> {
                (**self).object_ids()
            }
            fn object_revision(&self, object: &Id) -> Option<Revision> {
                (**self).object_revision(object)
            }
            fn has_field(&self, object: &Id, field: &Id) -> bool {
                (**self).has_field(object, field)
            }
            fn field_ids(&self, object: &Id) -> Vec<Id> {
                (**self).field_ids(object)
            }
            fn field_revision(&self, object: &Id, field: &Id) -> Option<Revision> {
                (**self).field_revision(object, field)
            }
            fn value(&self, object: &Id, field: &Id) -> Option<Value> {
                (**self).value(object, field)
            }
            fn is_empty(&self) -> bool {
                (**self).is_empty()
            }
        }
    )*};
}

forward_readable_object!(&T, &mut T);
forward_readable_model!(&T, &mut T);

impl<T: WritableObject + ?Sized> WritableObject for &mut T {
    fn create_field(&mut self, field: &Id) -> bool {
        (**self).create_field(field)
    }

    fn remove_field(&mut self, field: &Id) -> bool {
        (**self).remove_field(field)
    }

    fn set_value(&mut self, field: &Id, value: Option<Value>) -> bool {
        (**self).set_value(field, value)
    }
}

impl<T: WritableModel + ?Sized> WritableModel for &mut T {
    fn create_object(&mut self, object: &Id) -> bool {
        (**self).create_object(object)
    }

    fn remove_object(&mut self, object: &Id) -> bool {
        (**self).remove_object(object)
    }

    fn create_field(&mut self, object: &Id, field: &Id) -> bool {
        (**self).create_field(object, field)
    }

    fn remove_field(&mut self, object: &Id, field: &Id) -> bool {
        (**self).remove_field(object, field)
    }

    fn set_value(&mut self, object: &Id, field: &Id, value: Option<Value>) -> bool {
        (**self).set_value(object, field, value)
    }
}

macro_rules! forward_readable_repository {
    ($($ty:ty),*) => {$(
        impl<T: ReadableRepository + ?Sized> ReadableRepository for $ty {
            fn address(&self) -> Address {
                (**self).address()
            }
            fn has_model(&self, model: &Id) -> bool {
                (**self).has_model(model)
            }
            fn model_ids(&self) -> Vec<Id> {
                (**self).model_ids()
            }
            fn model_revision(&self, model: &Id) -> Option<Revision> {
                (**self).model_revision(model)
            }
        }
    )*};
}

forward_readable_repository!(&T, &mut T);

impl<T: WritableRepository + ?Sized> WritableRepository for &mut T {
    fn create_model(&mut self, model: &Id) -> bool {
        (**self).create_model(model)
    }

    fn remove_model(&mut self, model: &Id) -> bool {
        (**self).remove_model(model)
    }
}
