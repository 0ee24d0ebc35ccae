//! Diff overlays: speculative edits layered over an untouched base.
//!
//! Reads fall through to the base for anything the overlay does not track.
//! Writes only ever touch the overlay, which can be turned into the command
//! list that reproduces the edits against the base.

use std::collections::{BTreeMap, BTreeSet};

use crate::command::{AtomicCommand, Command, RevisionCheck};
use crate::error::Result;
use crate::ids::{Address, Id, Revision, REVISION_UNDEFINED};
use crate::memory::MemoryObject;
use crate::traits::{ObjectView, ReadableModel, ReadableObject, WritableModel, WritableObject};
use crate::transaction::TransactionBuilder;
use crate::value::Value;

fn check_or_forced(forced: bool, check: RevisionCheck) -> RevisionCheck {
    if forced {
        RevisionCheck::Forced
    } else {
        check
    }
}

/// Field-level edits of one object. `added` holds fields created locally and
/// base fields whose value was edited; `removed` holds base fields that were
/// removed. The two never share a key.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct FieldOverlay {
    added: BTreeMap<Id, Option<Value>>,
    removed: BTreeSet<Id>,
}

impl FieldOverlay {
    /// Overlay that hides every field of `base`.
    pub(crate) fn removing_all(base: &(impl ReadableObject + ?Sized)) -> Self {
        Self {
            added: BTreeMap::new(),
            removed: base.field_ids().into_iter().collect(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    fn debug_check(&self) {
        debug_assert!(
            self.added.keys().all(|id| !self.removed.contains(id)),
            "field both added and removed"
        );
    }

    pub(crate) fn has_field(&self, base: &(impl ReadableObject + ?Sized), field: &Id) -> bool {
        if self.added.contains_key(field) {
            return true;
        }
        !self.removed.contains(field) && base.has_field(field)
    }

    pub(crate) fn field_ids(&self, base: &(impl ReadableObject + ?Sized)) -> Vec<Id> {
        let mut ids: BTreeSet<Id> = base
            .field_ids()
            .into_iter()
            .filter(|id| !self.removed.contains(id))
            .collect();
        ids.extend(self.added.keys().cloned());
        ids.into_iter().collect()
    }

    pub(crate) fn field_revision(
        &self,
        base: &(impl ReadableObject + ?Sized),
        field: &Id,
    ) -> Option<Revision> {
        if self.removed.contains(field) {
            return None;
        }
        match base.field_revision(field) {
            Some(revision) => Some(revision),
            None if self.added.contains_key(field) => Some(REVISION_UNDEFINED),
            None => None,
        }
    }

    pub(crate) fn value(&self, base: &(impl ReadableObject + ?Sized), field: &Id) -> Option<Value> {
        if let Some(value) = self.added.get(field) {
            return value.clone();
        }
        if self.removed.contains(field) {
            return None;
        }
        base.value(field)
    }

    pub(crate) fn create_field(&mut self, base: &(impl ReadableObject + ?Sized), field: &Id) -> bool {
        if self.has_field(base, field) {
            return false;
        }
        self.removed.remove(field);
        self.added.insert(field.clone(), None);
        self.debug_check();
        true
    }

    pub(crate) fn remove_field(&mut self, base: &(impl ReadableObject + ?Sized), field: &Id) -> bool {
        if !self.has_field(base, field) {
            return false;
        }
        self.added.remove(field);
        if base.has_field(field) {
            self.removed.insert(field.clone());
        }
        self.debug_check();
        true
    }

    pub(crate) fn set_value(
        &mut self,
        base: &(impl ReadableObject + ?Sized),
        field: &Id,
        value: Option<Value>,
    ) -> bool {
        if !self.has_field(base, field) || self.value(base, field) == value {
            return false;
        }
        self.added.insert(field.clone(), value);
        true
    }

    /// Fields that exist only in the overlay.
    pub(crate) fn added_fields(&self, base: &(impl ReadableObject + ?Sized)) -> Vec<Id> {
        self.added
            .keys()
            .filter(|id| !base.has_field(id))
            .cloned()
            .collect()
    }

    pub(crate) fn removed_fields(&self) -> Vec<Id> {
        self.removed.iter().cloned().collect()
    }

    /// Base fields whose value was written, whether or not it ended up different.
    pub(crate) fn potentially_changed_fields(&self, base: &(impl ReadableObject + ?Sized)) -> Vec<Id> {
        self.added
            .keys()
            .filter(|id| base.has_field(id))
            .cloned()
            .collect()
    }

    pub(crate) fn has_changes(&self, base: &(impl ReadableObject + ?Sized)) -> bool {
        !self.removed.is_empty()
            || self
                .added
                .iter()
                .any(|(id, value)| !base.has_field(id) || base.value(id) != *value)
    }

    pub(crate) fn append_commands(
        &self,
        base: &(impl ReadableObject + ?Sized),
        forced: bool,
        out: &mut Vec<AtomicCommand>,
    ) {
        let object = base.address();
        for id in &self.removed {
            let revision = base.field_revision(id).unwrap_or(REVISION_UNDEFINED);
            out.push(AtomicCommand::remove_field(
                object.with_field(id.clone()),
                check_or_forced(forced, RevisionCheck::Exact(revision)),
            ));
        }
        for (id, value) in &self.added {
            let address = object.with_field(id.clone());
            let (old, value_check) = match base.field_revision(id) {
                Some(revision) => (base.value(id), RevisionCheck::Exact(revision)),
                None => {
                    out.push(AtomicCommand::add_field(
                        address.clone(),
                        check_or_forced(forced, RevisionCheck::Safe),
                    ));
                    (None, RevisionCheck::New)
                }
            };
            if let Some(command) =
                value_command(address, old, value.clone(), check_or_forced(forced, value_check))
            {
                out.push(command);
            }
        }
    }
}

/// Command turning `old` into `new`, or `None` when they are equal.
pub(crate) fn value_command(
    field: Address,
    old: Option<Value>,
    new: Option<Value>,
    check: RevisionCheck,
) -> Option<AtomicCommand> {
    match (old, new) {
        (None, Some(value)) => Some(AtomicCommand::add_value(field, value, check)),
        (Some(_), None) => Some(AtomicCommand::remove_value(field, check)),
        (Some(old), Some(new)) if old != new => Some(AtomicCommand::change_value(field, new, check)),
        _ => None,
    }
}

/// Object-level diff overlay.
#[derive(Clone, Debug)]
pub struct DiffObject<B> {
    base: B,
    overlay: FieldOverlay,
}

impl<B: ReadableObject> DiffObject<B> {
    pub fn new(base: B) -> Self {
        Self {
            base,
            overlay: FieldOverlay::default(),
        }
    }

    pub fn base(&self) -> &B {
        &self.base
    }

    /// Drops all pending edits and returns the base.
    pub fn into_base(self) -> B {
        self.base
    }

    pub fn has_changes(&self) -> bool {
        self.overlay.has_changes(&self.base)
    }

    pub fn added_fields(&self) -> Vec<Id> {
        self.overlay.added_fields(&self.base)
    }

    pub fn removed_fields(&self) -> Vec<Id> {
        self.overlay.removed_fields()
    }

    pub fn potentially_changed_fields(&self) -> Vec<Id> {
        self.overlay.potentially_changed_fields(&self.base)
    }

    pub fn to_command_list(&self, forced: bool) -> Vec<AtomicCommand> {
        let mut out = Vec::new();
        self.overlay.append_commands(&self.base, forced, &mut out);
        out
    }

    /// The pending edits as one command, or `None` when there are none.
    pub fn to_transaction(&self, forced: bool) -> Result<Option<Command>> {
        Command::from_commands(self.base.address(), self.to_command_list(forced))
    }

    pub fn commit_to(&self, builder: &mut TransactionBuilder, forced: bool) -> Result<()> {
        for command in self.to_command_list(forced) {
            builder.add_command(command)?;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.overlay = FieldOverlay::default();
    }
}

impl<B: ReadableObject> ReadableObject for DiffObject<B> {
    fn address(&self) -> Address {
        self.base.address()
    }

    fn revision(&self) -> Revision {
        self.base.revision()
    }

    fn has_field(&self, field: &Id) -> bool {
        self.overlay.has_field(&self.base, field)
    }

    fn field_ids(&self) -> Vec<Id> {
        self.overlay.field_ids(&self.base)
    }

    fn field_revision(&self, field: &Id) -> Option<Revision> {
        self.overlay.field_revision(&self.base, field)
    }

    fn value(&self, field: &Id) -> Option<Value> {
        self.overlay.value(&self.base, field)
    }
}

impl<B: ReadableObject> WritableObject for DiffObject<B> {
    fn create_field(&mut self, field: &Id) -> bool {
        self.overlay.create_field(&self.base, field)
    }

    fn remove_field(&mut self, field: &Id) -> bool {
        self.overlay.remove_field(&self.base, field)
    }

    fn set_value(&mut self, field: &Id, value: Option<Value>) -> bool {
        self.overlay.set_value(&self.base, field, value)
    }
}

/// Model-level diff overlay. Objects unknown to the base live in `added`,
/// removed base objects in `removed`, and field edits of surviving base
/// objects in per-object overlays.
#[derive(Clone, Debug)]
pub struct DiffModel<B> {
    base: B,
    added: BTreeMap<Id, MemoryObject>,
    removed: BTreeSet<Id>,
    changed: BTreeMap<Id, FieldOverlay>,
}

impl<B: ReadableModel> DiffModel<B> {
    pub fn new(base: B) -> Self {
        Self {
            base,
            added: BTreeMap::new(),
            removed: BTreeSet::new(),
            changed: BTreeMap::new(),
        }
    }

    pub fn base(&self) -> &B {
        &self.base
    }

    pub fn into_base(self) -> B {
        self.base
    }

    fn view(&self, object: &Id) -> ObjectView<'_, B> {
        ObjectView::new(&self.base, object.clone())
    }

    /// Runs `f` on the overlay of a surviving base object, dropping it again if it ends up empty.
    fn with_overlay<R>(
        &mut self,
        object: &Id,
        f: impl FnOnce(&mut FieldOverlay, &ObjectView<'_, B>) -> R,
    ) -> R {
        let view = ObjectView::new(&self.base, object.clone());
        let overlay = self.changed.entry(object.clone()).or_default();
        let result = f(overlay, &view);
        if overlay.is_empty() {
            self.changed.remove(object);
        }
        result
    }

    pub fn has_changes(&self) -> bool {
        !self.added.is_empty()
            || !self.removed.is_empty()
            || self
                .changed
                .iter()
                .any(|(id, overlay)| overlay.has_changes(&self.view(id)))
    }

    pub fn added_objects(&self) -> Vec<Id> {
        self.added.keys().cloned().collect()
    }

    pub fn removed_objects(&self) -> Vec<Id> {
        self.removed.iter().cloned().collect()
    }

    /// Base objects with field edits; some may net out to no change.
    pub fn potentially_changed_objects(&self) -> Vec<Id> {
        self.changed.keys().cloned().collect()
    }

    /// Field-level diff queries for one surviving base object.
    pub fn added_fields(&self, object: &Id) -> Vec<Id> {
        self.changed
            .get(object)
            .map(|overlay| overlay.added_fields(&self.view(object)))
            .unwrap_or_default()
    }

    pub fn removed_fields(&self, object: &Id) -> Vec<Id> {
        self.changed
            .get(object)
            .map(FieldOverlay::removed_fields)
            .unwrap_or_default()
    }

    /// Removals first, then new objects with their content, then field edits.
    pub fn to_command_list(&self, forced: bool) -> Vec<AtomicCommand> {
        let model = self.base.address();
        let mut out = Vec::new();
        for id in &self.removed {
            let revision = self.base.object_revision(id).unwrap_or(REVISION_UNDEFINED);
            out.push(AtomicCommand::remove_object(
                model.with_object(id.clone()),
                check_or_forced(forced, RevisionCheck::Exact(revision)),
            ));
        }
        for (id, object) in &self.added {
            let address = model.with_object(id.clone());
            out.push(AtomicCommand::add_object(
                address.clone(),
                check_or_forced(forced, RevisionCheck::Safe),
            ));
            for field in object.field_ids() {
                let field_address = address.with_field(field.clone());
                out.push(AtomicCommand::add_field(
                    field_address.clone(),
                    check_or_forced(forced, RevisionCheck::Safe),
                ));
                if let Some(value) = object.value(&field) {
                    out.push(AtomicCommand::add_value(
                        field_address,
                        value,
                        check_or_forced(forced, RevisionCheck::New),
                    ));
                }
            }
        }
        for (id, overlay) in &self.changed {
            overlay.append_commands(&self.view(id), forced, &mut out);
        }
        out
    }

    pub fn to_transaction(&self, forced: bool) -> Result<Option<Command>> {
        Command::from_commands(self.base.address(), self.to_command_list(forced))
    }

    pub fn commit_to(&self, builder: &mut TransactionBuilder, forced: bool) -> Result<()> {
        for command in self.to_command_list(forced) {
            builder.add_command(command)?;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.added.clear();
        self.removed.clear();
        self.changed.clear();
    }
}

impl<B: ReadableModel> ReadableModel for DiffModel<B> {
    fn address(&self) -> Address {
        self.base.address()
    }

    fn revision(&self) -> Revision {
        self.base.revision()
    }

    fn has_object(&self, object: &Id) -> bool {
        if self.added.contains_key(object) {
            return true;
        }
        !self.removed.contains(object) && self.base.has_object(object)
    }

    fn object_ids(&self) -> Vec<Id> {
        let mut ids: BTreeSet<Id> = self
            .base
            .object_ids()
            .into_iter()
            .filter(|id| !self.removed.contains(id))
            .collect();
        ids.extend(self.added.keys().cloned());
        ids.into_iter().collect()
    }

    fn object_revision(&self, object: &Id) -> Option<Revision> {
        if let Some(added) = self.added.get(object) {
            return Some(added.revision());
        }
        if self.removed.contains(object) {
            return None;
        }
        self.base.object_revision(object)
    }

    fn has_field(&self, object: &Id, field: &Id) -> bool {
        if let Some(added) = self.added.get(object) {
            return added.has_field(field);
        }
        if self.removed.contains(object) {
            return false;
        }
        match self.changed.get(object) {
            Some(overlay) => overlay.has_field(&self.view(object), field),
            None => self.base.has_field(object, field),
        }
    }

    fn field_ids(&self, object: &Id) -> Vec<Id> {
        if let Some(added) = self.added.get(object) {
            return added.field_ids();
        }
        if self.removed.contains(object) {
            return Vec::new();
        }
        match self.changed.get(object) {
            Some(overlay) => overlay.field_ids(&self.view(object)),
            None => self.base.field_ids(object),
        }
    }

    fn field_revision(&self, object: &Id, field: &Id) -> Option<Revision> {
        if let Some(added) = self.added.get(object) {
            return added.field_revision(field);
        }
        if self.removed.contains(object) {
            return None;
        }
        match self.changed.get(object) {
            Some(overlay) => overlay.field_revision(&self.view(object), field),
            None => self.base.field_revision(object, field),
        }
    }

    fn value(&self, object: &Id, field: &Id) -> Option<Value> {
        if let Some(added) = self.added.get(object) {
            return added.value(field);
        }
        if self.removed.contains(object) {
            return None;
        }
        match self.changed.get(object) {
            Some(overlay) => overlay.value(&self.view(object), field),
            None => self.base.value(object, field),
        }
    }
}

impl<B: ReadableModel> WritableModel for DiffModel<B> {
    fn create_object(&mut self, object: &Id) -> bool {
        if self.has_object(object) {
            return false;
        }
        if self.removed.remove(object) {
            // Re-created base object starts out empty.
            let overlay = FieldOverlay::removing_all(&self.view(object));
            if !overlay.is_empty() {
                self.changed.insert(object.clone(), overlay);
            }
            return true;
        }
        let address = self.base.address().with_object(object.clone());
        self.added
            .insert(object.clone(), MemoryObject::new(address));
        true
    }

    fn remove_object(&mut self, object: &Id) -> bool {
        if !self.has_object(object) {
            return false;
        }
        if self.added.remove(object).is_none() {
            self.changed.remove(object);
            self.removed.insert(object.clone());
        }
        true
    }

    fn create_field(&mut self, object: &Id, field: &Id) -> bool {
        if let Some(added) = self.added.get_mut(object) {
            return added.create_field(field);
        }
        if !self.has_object(object) {
            return false;
        }
        self.with_overlay(object, |overlay, view| overlay.create_field(view, field))
    }

    fn remove_field(&mut self, object: &Id, field: &Id) -> bool {
        if let Some(added) = self.added.get_mut(object) {
            return added.remove_field(field);
        }
        if !self.has_object(object) {
            return false;
        }
        self.with_overlay(object, |overlay, view| overlay.remove_field(view, field))
    }

    fn set_value(&mut self, object: &Id, field: &Id, value: Option<Value>) -> bool {
        if let Some(added) = self.added.get_mut(object) {
            return WritableObject::set_value(added, field, value);
        }
        if !self.has_object(object) {
            return false;
        }
        self.with_overlay(object, |overlay, view| overlay.set_value(view, field, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryModel;
    use crate::traits::RevisionWritableModel;

    fn id(s: &str) -> Id {
        Id::new(s).unwrap()
    }

    fn base() -> MemoryModel {
        let mut model = MemoryModel::new(Address::model(id("r"), id("m")));
        model.create_object(&id("o"));
        model.create_field(&id("o"), &id("f"));
        model.set_value(&id("o"), &id("f"), Some(Value::from("x")));
        model.set_revision(3);
        model.set_object_revision(&id("o"), 3);
        model.set_field_revision(&id("o"), &id("f"), 2);
        model
    }

    #[test]
    fn create_then_remove_of_unseen_field_cancels_out() {
        let base = base();
        let mut diff = DiffModel::new(&base);
        assert!(diff.create_field(&id("o"), &id("g")));
        assert!(diff.remove_field(&id("o"), &id("g")));
        assert!(!diff.has_changes());
        assert!(diff.to_command_list(false).is_empty());
        assert!(diff.potentially_changed_objects().is_empty());
    }

    #[test]
    fn recreated_base_object_starts_empty() {
        let base = base();
        let mut diff = DiffModel::new(&base);
        assert!(diff.remove_object(&id("o")));
        assert!(!diff.has_object(&id("o")));
        assert!(diff.create_object(&id("o")));
        assert!(diff.field_ids(&id("o")).is_empty());
        assert_eq!(diff.removed_fields(&id("o")), vec![id("f")]);
        let commands = diff.to_command_list(false);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].check(), RevisionCheck::Exact(2));
    }

    #[test]
    fn recreating_a_removed_field_clears_its_value() {
        let base = base();
        let mut diff = DiffModel::new(&base);
        assert!(diff.remove_field(&id("o"), &id("f")));
        assert!(diff.create_field(&id("o"), &id("f")));
        assert_eq!(diff.value(&id("o"), &id("f")), None);
        let commands = diff.to_command_list(false);
        assert_eq!(commands.len(), 1);
        assert!(matches!(&commands[0], AtomicCommand::Field(cmd) if cmd.value.is_none()));
    }

    #[test]
    fn forced_commands_carry_no_revisions() {
        let base = base();
        let mut diff = DiffModel::new(&base);
        diff.set_value(&id("o"), &id("f"), Some(Value::from("y")));
        diff.create_object(&id("p"));
        let commands = diff.to_command_list(true);
        assert_eq!(commands.len(), 2);
        assert!(commands.iter().all(AtomicCommand::is_forced));
    }
}
