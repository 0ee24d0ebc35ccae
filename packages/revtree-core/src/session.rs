//! Session cache: one index of everything a session has read or edited.
//!
//! Objects and fields carry an [`EntityState`]. Entities the session never
//! heard of are simply missing from the index and read as absent. Fields
//! remember the value they had when indexed (`initial`) next to the edited
//! one (`current`), so value changes are tracked independently of whether
//! the field itself was added or removed.

use std::collections::BTreeMap;

use crate::command::{AtomicCommand, Command, RevisionCheck};
use crate::diff::value_command;
use crate::error::Result;
use crate::ids::{Address, Id, Revision, REVISION_UNDEFINED};
use crate::traits::{ObjectView, ReadableModel, ReadableObject, WritableModel};
use crate::transaction::TransactionBuilder;
use crate::value::Value;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EntityState {
    /// Created in this session.
    Added,
    /// Known not to exist.
    NotPresent,
    /// Exists in the base and was not removed.
    Present,
    /// Exists in the base and was removed in this session.
    Removed,
}

impl EntityState {
    pub fn exists(self) -> bool {
        matches!(self, EntityState::Added | EntityState::Present)
    }
}

fn check_or_forced(forced: bool, check: RevisionCheck) -> RevisionCheck {
    if forced {
        RevisionCheck::Forced
    } else {
        check
    }
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
struct SessionField {
    state: EntityState,
    revision: Revision,
    initial: Option<Value>,
    current: Option<Value>,
}

impl SessionField {
    fn indexed(revision: Revision, value: Option<Value>) -> Self {
        Self {
            state: EntityState::Present,
            revision,
            initial: value.clone(),
            current: value,
        }
    }

    fn added() -> Self {
        Self {
            state: EntityState::Added,
            revision: REVISION_UNDEFINED,
            initial: None,
            current: None,
        }
    }

    fn absent() -> Self {
        Self {
            state: EntityState::NotPresent,
            ..Self::added()
        }
    }

    fn value_changed(&self) -> bool {
        self.state == EntityState::Present && self.initial != self.current
    }

    fn has_changes(&self) -> bool {
        matches!(self.state, EntityState::Added | EntityState::Removed) || self.value_changed()
    }
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
struct SessionObject {
    state: EntityState,
    /// Revision in the base; kept while removed so the removal can be checked.
    revision: Revision,
    /// Added object standing in for a removed base object.
    replaces_base: bool,
    knows_all_field_ids: bool,
    fields: BTreeMap<Id, SessionField>,
}

impl SessionObject {
    fn with_state(state: EntityState, revision: Revision) -> Self {
        Self {
            state,
            revision,
            replaces_base: false,
            knows_all_field_ids: true,
            fields: BTreeMap::new(),
        }
    }

    fn field_state(&self, field: &Id) -> Option<EntityState> {
        match self.fields.get(field) {
            Some(entry) => Some(entry.state),
            None if self.knows_all_field_ids => Some(EntityState::NotPresent),
            None => None,
        }
    }

    fn live_field(&self, field: &Id) -> Option<&SessionField> {
        if !self.state.exists() {
            return None;
        }
        self.fields.get(field).filter(|entry| entry.state.exists())
    }

    fn has_field_changes(&self) -> bool {
        self.fields.values().any(SessionField::has_changes)
    }

    fn ids_in(&self, state: EntityState) -> Vec<Id> {
        self.fields
            .iter()
            .filter(|(_, entry)| entry.state == state)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Session-wide cache of one model.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SessionCachedModel {
    address: Address,
    revision: Revision,
    knows_all_object_ids: bool,
    objects: BTreeMap<Id, SessionObject>,
}

impl SessionCachedModel {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            revision: REVISION_UNDEFINED,
            knows_all_object_ids: false,
            objects: BTreeMap::new(),
        }
    }

    /// Session seeded with everything in `model`.
    pub fn from_model(model: &(impl ReadableModel + ?Sized)) -> Self {
        let mut session = Self::new(model.address());
        session.index_model(model);
        session
    }

    pub fn knows_all_object_ids(&self) -> bool {
        self.knows_all_object_ids
    }

    /// Absorbs the contents of `model` without touching anything already indexed.
    pub fn index_model(&mut self, model: &(impl ReadableModel + ?Sized)) {
        self.revision = model.revision();
        for id in model.object_ids() {
            self.index_object(&ObjectView::new(model, id));
        }
        self.knows_all_object_ids = true;
    }

    pub fn index_object(&mut self, object: &(impl ReadableObject + ?Sized)) {
        let id = object.address().id().clone();
        let entry = self
            .objects
            .entry(id)
            .or_insert_with(|| SessionObject {
                knows_all_field_ids: false,
                ..SessionObject::with_state(EntityState::Present, object.revision())
            });
        if entry.state != EntityState::Present || entry.knows_all_field_ids {
            return;
        }
        for field in object.field_ids() {
            entry.fields.entry(field.clone()).or_insert_with(|| {
                SessionField::indexed(
                    object.field_revision(&field).unwrap_or(REVISION_UNDEFINED),
                    object.value(&field),
                )
            });
        }
        entry.knows_all_field_ids = true;
    }

    pub fn index_absent_object(&mut self, object: &Id) {
        self.objects
            .entry(object.clone())
            .or_insert_with(|| SessionObject::with_state(EntityState::NotPresent, REVISION_UNDEFINED));
    }

    pub fn index_absent_field(&mut self, object: &Id, field: &Id) {
        if let Some(entry) = self.objects.get_mut(object) {
            entry
                .fields
                .entry(field.clone())
                .or_insert_with(SessionField::absent);
        }
    }

    /// `None` when the session knows nothing about `object`.
    pub fn object_state(&self, object: &Id) -> Option<EntityState> {
        match self.objects.get(object) {
            Some(entry) => Some(entry.state),
            None if self.knows_all_object_ids => Some(EntityState::NotPresent),
            None => None,
        }
    }

    pub fn field_state(&self, object: &Id, field: &Id) -> Option<EntityState> {
        match self.objects.get(object) {
            Some(entry) if entry.state.exists() => entry.field_state(field),
            _ => self.object_state(object).map(|_| EntityState::NotPresent),
        }
    }

    fn live_object(&self, object: &Id) -> Option<&SessionObject> {
        self.objects.get(object).filter(|entry| entry.state.exists())
    }

    fn live_object_mut(&mut self, object: &Id) -> Option<&mut SessionObject> {
        self.objects
            .get_mut(object)
            .filter(|entry| entry.state.exists())
    }

    pub fn has_changes(&self) -> bool {
        self.objects.values().any(|entry| match entry.state {
            EntityState::Added | EntityState::Removed => true,
            EntityState::Present => entry.has_field_changes(),
            EntityState::NotPresent => false,
        })
    }

    pub fn added_objects(&self) -> Vec<Id> {
        self.ids_in(EntityState::Added)
    }

    pub fn removed_objects(&self) -> Vec<Id> {
        let mut ids = self.ids_in(EntityState::Removed);
        ids.extend(
            self.objects
                .iter()
                .filter(|(_, entry)| entry.replaces_base)
                .map(|(id, _)| id.clone()),
        );
        ids.sort();
        ids
    }

    /// Present objects with any field-level edit.
    pub fn potentially_changed_objects(&self) -> Vec<Id> {
        self.objects
            .iter()
            .filter(|(_, entry)| entry.state == EntityState::Present && entry.has_field_changes())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn added_fields(&self, object: &Id) -> Vec<Id> {
        self.objects
            .get(object)
            .map(|entry| entry.ids_in(EntityState::Added))
            .unwrap_or_default()
    }

    pub fn removed_fields(&self, object: &Id) -> Vec<Id> {
        self.objects
            .get(object)
            .map(|entry| entry.ids_in(EntityState::Removed))
            .unwrap_or_default()
    }

    /// Present fields whose value differs from the indexed one.
    pub fn changed_fields(&self, object: &Id) -> Vec<Id> {
        self.objects
            .get(object)
            .map(|entry| {
                entry
                    .fields
                    .iter()
                    .filter(|(_, field)| field.value_changed())
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn ids_in(&self, state: EntityState) -> Vec<Id> {
        self.objects
            .iter()
            .filter(|(_, entry)| entry.state == state)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Removals first, then new objects, then field edits of present objects.
    pub fn to_command_list(&self, forced: bool) -> Vec<AtomicCommand> {
        let mut out = Vec::new();
        for (id, entry) in &self.objects {
            if entry.state == EntityState::Removed || entry.replaces_base {
                out.push(AtomicCommand::remove_object(
                    self.address.with_object(id.clone()),
                    check_or_forced(forced, RevisionCheck::Exact(entry.revision)),
                ));
            }
        }
        for (id, entry) in &self.objects {
            if entry.state != EntityState::Added {
                continue;
            }
            let object = self.address.with_object(id.clone());
            out.push(AtomicCommand::add_object(
                object.clone(),
                check_or_forced(forced, RevisionCheck::Safe),
            ));
            for (field_id, field) in &entry.fields {
                if field.state.exists() {
                    push_added_field(&object, field_id, field, forced, &mut out);
                }
            }
        }
        for (id, entry) in &self.objects {
            if entry.state != EntityState::Present {
                continue;
            }
            let object = self.address.with_object(id.clone());
            for (field_id, field) in &entry.fields {
                let address = object.with_field(field_id.clone());
                match field.state {
                    EntityState::Removed => out.push(AtomicCommand::remove_field(
                        address,
                        check_or_forced(forced, RevisionCheck::Exact(field.revision)),
                    )),
                    EntityState::Added => push_added_field(&object, field_id, field, forced, &mut out),
                    EntityState::Present => {
                        let check = check_or_forced(forced, RevisionCheck::Exact(field.revision));
                        if let Some(command) =
                            value_command(address, field.initial.clone(), field.current.clone(), check)
                        {
                            out.push(command);
                        }
                    }
                    EntityState::NotPresent => {}
                }
            }
        }
        out
    }

    pub fn to_transaction(&self, forced: bool) -> Result<Option<Command>> {
        Command::from_commands(self.address.clone(), self.to_command_list(forced))
    }

    pub fn commit_to(&self, builder: &mut TransactionBuilder, forced: bool) -> Result<()> {
        for command in self.to_command_list(forced) {
            builder.add_command(command)?;
        }
        Ok(())
    }

    /// Replays the session's edits as plain writes on `target`.
    pub fn commit_to_model(&self, target: &mut (impl WritableModel + ?Sized)) {
        for (id, entry) in &self.objects {
            match entry.state {
                EntityState::Removed => {
                    target.remove_object(id);
                }
                EntityState::Added => {
                    if entry.replaces_base {
                        target.remove_object(id);
                    }
                    target.create_object(id);
                    for (field_id, field) in &entry.fields {
                        if field.state.exists() {
                            target.create_field(id, field_id);
                            target.set_value(id, field_id, field.current.clone());
                        }
                    }
                }
                EntityState::Present => {
                    for (field_id, field) in &entry.fields {
                        match field.state {
                            EntityState::Removed => {
                                target.remove_field(id, field_id);
                            }
                            EntityState::Added => {
                                target.create_field(id, field_id);
                                target.set_value(id, field_id, field.current.clone());
                            }
                            EntityState::Present if field.value_changed() => {
                                target.set_value(id, field_id, field.current.clone());
                            }
                            _ => {}
                        }
                    }
                }
                EntityState::NotPresent => {}
            }
        }
    }

    /// Folds the edits into base knowledge after they were applied at
    /// `revision`: added entities become present, removed ones not present,
    /// and every changed entity takes the new revision.
    pub fn mark_as_committed(&mut self, revision: Revision) {
        let mut model_changed = false;
        for entry in self.objects.values_mut() {
            match entry.state {
                EntityState::Added => {
                    model_changed = true;
                    entry.state = EntityState::Present;
                    entry.replaces_base = false;
                    entry.revision = revision;
                    for field in entry.fields.values_mut() {
                        fold_field(field, revision);
                    }
                    entry.fields.retain(|_, field| field.state == EntityState::Present);
                }
                EntityState::Removed => {
                    model_changed = true;
                    entry.state = EntityState::NotPresent;
                    entry.revision = REVISION_UNDEFINED;
                    entry.fields.clear();
                }
                EntityState::Present => {
                    if entry.has_field_changes() {
                        model_changed = true;
                        entry.revision = revision;
                    }
                    for field in entry.fields.values_mut() {
                        fold_field(field, revision);
                    }
                }
                EntityState::NotPresent => {}
            }
        }
        if model_changed {
            self.revision = revision;
        }
    }
}

fn push_added_field(
    object: &Address,
    field_id: &Id,
    field: &SessionField,
    forced: bool,
    out: &mut Vec<AtomicCommand>,
) {
    let address = object.with_field(field_id.clone());
    out.push(AtomicCommand::add_field(
        address.clone(),
        check_or_forced(forced, RevisionCheck::Safe),
    ));
    if let Some(value) = &field.current {
        out.push(AtomicCommand::add_value(
            address,
            value.clone(),
            check_or_forced(forced, RevisionCheck::New),
        ));
    }
}

fn fold_field(field: &mut SessionField, revision: Revision) {
    match field.state {
        EntityState::Added => {
            field.state = EntityState::Present;
            field.revision = revision;
        }
        EntityState::Removed => {
            field.state = EntityState::NotPresent;
            field.revision = REVISION_UNDEFINED;
            field.current = None;
        }
        EntityState::Present if field.value_changed() => field.revision = revision,
        _ => {}
    }
    field.initial = field.current.clone();
}

impl ReadableModel for SessionCachedModel {
    fn address(&self) -> Address {
        self.address.clone()
    }

    fn revision(&self) -> Revision {
        self.revision
    }

    fn has_object(&self, object: &Id) -> bool {
        self.live_object(object).is_some()
    }

    fn object_ids(&self) -> Vec<Id> {
        self.objects
            .iter()
            .filter(|(_, entry)| entry.state.exists())
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn object_revision(&self, object: &Id) -> Option<Revision> {
        self.live_object(object).map(|entry| match entry.state {
            EntityState::Added => REVISION_UNDEFINED,
            _ => entry.revision,
        })
    }

    fn has_field(&self, object: &Id, field: &Id) -> bool {
        self.live_object(object)
            .and_then(|entry| entry.live_field(field))
            .is_some()
    }

    fn field_ids(&self, object: &Id) -> Vec<Id> {
        self.live_object(object)
            .map(|entry| {
                entry
                    .fields
                    .iter()
                    .filter(|(_, field)| field.state.exists())
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn field_revision(&self, object: &Id, field: &Id) -> Option<Revision> {
        self.live_object(object)
            .and_then(|entry| entry.live_field(field))
            .map(|field| field.revision)
    }

    fn value(&self, object: &Id, field: &Id) -> Option<Value> {
        self.live_object(object)
            .and_then(|entry| entry.live_field(field))
            .and_then(|field| field.current.clone())
    }
}

impl WritableModel for SessionCachedModel {
    fn create_object(&mut self, object: &Id) -> bool {
        match self.objects.get_mut(object) {
            Some(entry) if entry.state.exists() => return false,
            Some(entry) if entry.state == EntityState::Removed => {
                entry.state = EntityState::Added;
                entry.replaces_base = true;
                entry.knows_all_field_ids = true;
                entry.fields.clear();
                return true;
            }
            _ => {}
        }
        self.objects.insert(
            object.clone(),
            SessionObject::with_state(EntityState::Added, REVISION_UNDEFINED),
        );
        true
    }

    fn remove_object(&mut self, object: &Id) -> bool {
        let Some(entry) = self.live_object_mut(object) else {
            return false;
        };
        entry.state = match (entry.state, entry.replaces_base) {
            (EntityState::Added, false) => EntityState::NotPresent,
            _ => EntityState::Removed,
        };
        entry.replaces_base = false;
        entry.knows_all_field_ids = true;
        entry.fields.clear();
        true
    }

    fn create_field(&mut self, object: &Id, field: &Id) -> bool {
        let Some(entry) = self.live_object_mut(object) else {
            return false;
        };
        match entry.fields.get_mut(field) {
            Some(existing) if existing.state.exists() => return false,
            Some(existing) if existing.state == EntityState::Removed => {
                existing.state = EntityState::Present;
                existing.current = None;
                return true;
            }
            _ => {}
        }
        entry.fields.insert(field.clone(), SessionField::added());
        true
    }

    fn remove_field(&mut self, object: &Id, field: &Id) -> bool {
        let Some(entry) = self.live_object_mut(object) else {
            return false;
        };
        let Some(existing) = entry.fields.get_mut(field) else {
            return false;
        };
        match existing.state {
            EntityState::Added => existing.state = EntityState::NotPresent,
            EntityState::Present => existing.state = EntityState::Removed,
            EntityState::NotPresent | EntityState::Removed => return false,
        }
        existing.current = None;
        true
    }

    fn set_value(&mut self, object: &Id, field: &Id, value: Option<Value>) -> bool {
        let Some(existing) = self
            .live_object_mut(object)
            .and_then(|entry| entry.fields.get_mut(field))
            .filter(|existing| existing.state.exists())
        else {
            return false;
        };
        if existing.current == value {
            return false;
        }
        existing.current = value;
        true
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
        model.set_revision(4);
        model.set_object_revision(&id("o"), 4);
        model.set_field_revision(&id("o"), &id("f"), 4);
        model
    }

    #[test]
    fn indexing_never_clobbers_edits() {
        let base = base();
        let mut session = SessionCachedModel::from_model(&base);
        session.set_value(&id("o"), &id("f"), Some(Value::from("y")));
        session.index_model(&base);
        assert_eq!(session.value(&id("o"), &id("f")), Some(Value::from("y")));
        assert_eq!(session.changed_fields(&id("o")), vec![id("f")]);
    }

    #[test]
    fn unknown_entities_read_as_absent() {
        let mut session = SessionCachedModel::new(Address::model(id("r"), id("m")));
        assert_eq!(session.object_state(&id("o")), None);
        assert!(!session.has_object(&id("o")));
        session.index_absent_object(&id("o"));
        assert_eq!(session.object_state(&id("o")), Some(EntityState::NotPresent));
        assert!(!session.create_field(&id("o"), &id("f")));
    }

    #[test]
    fn replacing_a_removed_object_removes_then_adds() {
        let base = base();
        let mut session = SessionCachedModel::from_model(&base);
        assert!(session.remove_object(&id("o")));
        assert!(session.create_object(&id("o")));
        assert_eq!(session.object_state(&id("o")), Some(EntityState::Added));
        let commands = session.to_command_list(false);
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].check(), RevisionCheck::Exact(4));
        assert!(matches!(commands[1], AtomicCommand::Model(_)));
        assert_eq!(session.removed_objects(), vec![id("o")]);
    }

    #[test]
    fn removing_an_added_object_leaves_nothing() {
        let base = base();
        let mut session = SessionCachedModel::from_model(&base);
        session.create_object(&id("p"));
        session.create_field(&id("p"), &id("f"));
        session.remove_object(&id("p"));
        assert!(!session.has_changes());
        assert!(session.to_command_list(false).is_empty());
    }

    #[test]
    fn mark_as_committed_folds_states() {
        let base = base();
        let mut session = SessionCachedModel::from_model(&base);
        session.create_field(&id("o"), &id("g"));
        session.set_value(&id("o"), &id("g"), Some(Value::from(1)));
        session.remove_field(&id("o"), &id("f"));
        session.mark_as_committed(5);

        assert!(!session.has_changes());
        assert_eq!(session.field_state(&id("o"), &id("g")), Some(EntityState::Present));
        assert_eq!(session.field_state(&id("o"), &id("f")), Some(EntityState::NotPresent));
        assert_eq!(session.field_revision(&id("o"), &id("g")), Some(5));
        assert_eq!(session.object_revision(&id("o")), Some(5));
        assert_eq!(session.revision(), 5);
    }
}
