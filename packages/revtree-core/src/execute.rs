//! Command execution for the in-memory backend.
//!
//! Every successful command or transaction produces exactly one new model
//! revision, stamped on the model and on every object and field it changed.
//! Revision checks compare against the state before the command started, so
//! the members of a transaction all see the same snapshot. A transaction that
//! hits any rejected member leaves the model untouched.

use std::collections::BTreeSet;

use tracing::debug;

use crate::command::{
    AtomicCommand, ChangeType, Command, EntityCommand, FieldCommand, Outcome, RevisionCheck,
};
use crate::event::{AtomicEvent, EntityEvent, Event, EventRevisions, FieldEvent};
use crate::ids::{Address, Id, Revision, REVISION_NOT_EXISTING, REVISION_UNDEFINED};
use crate::memory::{MemoryField, MemoryModel, MemoryObject, MemoryRepository};
use crate::traits::{
    CommandExecutor, ReadableField, ReadableModel, ReadableObject, ReadableRepository,
    RevisionWritableModel, WritableField, WritableRepository,
};

/// Why a command was rejected; only ever logged.
type Step = std::result::Result<(), String>;

struct ModelExecution<'a> {
    original: &'a MemoryModel,
    working: MemoryModel,
    revision: Revision,
    actor: Option<Id>,
    created: BTreeSet<Address>,
    events: Vec<AtomicEvent>,
}

impl<'a> ModelExecution<'a> {
    fn new(original: &'a MemoryModel, actor: Option<&Id>) -> Self {
        Self {
            original,
            working: original.clone(),
            revision: original.revision().max(REVISION_UNDEFINED) + 1,
            actor: actor.cloned(),
            created: BTreeSet::new(),
            events: Vec::new(),
        }
    }

    /// `Safe` only covers adding an object or field shell; everything else
    /// has to name a revision or be forced.
    fn check_revision(
        &self,
        target: &Address,
        current: Option<Revision>,
        check: RevisionCheck,
        entity_add: bool,
    ) -> Step {
        match check {
            RevisionCheck::Forced => Ok(()),
            RevisionCheck::Safe if entity_add => Ok(()),
            RevisionCheck::Safe => Err("safe checks only apply to additions".into()),
            RevisionCheck::New if self.created.contains(target) => Ok(()),
            RevisionCheck::New => Err("expected an entity created in this transaction".into()),
            RevisionCheck::Exact(expected) => {
                if self.created.contains(target) {
                    return Err("entity was created in this transaction".into());
                }
                match current {
                    Some(actual) if actual == expected => Ok(()),
                    Some(actual) => Err(format!("expected revision {expected}, found {actual}")),
                    None => Err(format!("expected revision {expected}, entity is missing")),
                }
            }
        }
    }

    fn apply(&mut self, command: &AtomicCommand) -> Step {
        if !self.working.address().contains(command.target()) {
            return Err(format!("target is outside model {}", self.working.address()));
        }
        match command {
            AtomicCommand::Repository(_) => Err("repository command sent to a model".into()),
            AtomicCommand::Model(cmd) => self.apply_model(cmd),
            AtomicCommand::Object(cmd) => self.apply_object(cmd),
            AtomicCommand::Field(cmd) => self.apply_field(cmd),
        }
    }

    fn entity_event(&self, cmd: &EntityCommand, revisions: EventRevisions) -> EntityEvent {
        EntityEvent {
            change: cmd.change,
            target: cmd.target.clone(),
            actor: self.actor.clone(),
            revisions,
            in_transaction: false,
            implied: false,
        }
    }

    fn apply_model(&mut self, cmd: &EntityCommand) -> Step {
        let object_id = cmd.target.id().clone();
        let exists = self.working.has_object(&object_id);
        let forced = cmd.check.is_forced();
        match cmd.change {
            ChangeType::Add => {
                if exists {
                    return if forced { Ok(()) } else { Err("object already exists".into()) };
                }
                self.check_revision(&cmd.target, self.original.object_revision(&object_id), cmd.check, true)?;
                self.working.insert_object(
                    object_id,
                    MemoryObject::with_revision(cmd.target.clone(), self.revision),
                );
                self.created.insert(cmd.target.clone());
                let event = self.entity_event(cmd, EventRevisions::object(self.revision, self.revision));
                self.events.push(AtomicEvent::Model(event));
                Ok(())
            }
            ChangeType::Remove => {
                if !exists {
                    return if forced { Ok(()) } else { Err("object does not exist".into()) };
                }
                self.check_revision(&cmd.target, self.original.object_revision(&object_id), cmd.check, false)?;
                if let Some(object) = self.working.take_object(&object_id) {
                    push_implied_field_removals(&object, self.revision, &self.actor, &mut self.events);
                }
                self.created.remove(&cmd.target);
                let event = self.entity_event(cmd, EventRevisions::model(self.revision));
                self.events.push(AtomicEvent::Model(event));
                Ok(())
            }
            ChangeType::Change => Err("objects cannot be changed, only added or removed".into()),
        }
    }

    fn apply_object(&mut self, cmd: &EntityCommand) -> Step {
        let (object_id, field_id) = split_field(&cmd.target)?;
        let forced = cmd.check.is_forced();
        let revision = self.revision;
        let Some(object) = self.working.memory_object_mut(&object_id) else {
            return match (cmd.change, forced) {
                (ChangeType::Remove, true) => Ok(()),
                _ => Err("object does not exist".into()),
            };
        };
        let exists = object.has_field(&field_id);
        let original_revision = self.original.field_revision(&object_id, &field_id);
        match cmd.change {
            ChangeType::Add => {
                if exists {
                    return if forced { Ok(()) } else { Err("field already exists".into()) };
                }
                self.check_revision(&cmd.target, original_revision, cmd.check, true)?;
                let Some(object) = self.working.memory_object_mut(&object_id) else {
                    return Err("object does not exist".into());
                };
                object.insert_field(field_id, MemoryField::with_revision(cmd.target.clone(), revision));
                object.set_revision(revision);
                self.created.insert(cmd.target.clone());
                let event = self.entity_event(cmd, EventRevisions::field(revision, revision, revision));
                self.events.push(AtomicEvent::Object(event));
                Ok(())
            }
            ChangeType::Remove => {
                if !exists {
                    return if forced { Ok(()) } else { Err("field does not exist".into()) };
                }
                self.check_revision(&cmd.target, original_revision, cmd.check, false)?;
                let Some(object) = self.working.memory_object_mut(&object_id) else {
                    return Err("object does not exist".into());
                };
                let removed = object.take_field(&field_id);
                object.set_revision(revision);
                if let Some(field) = removed {
                    if let Some(old_value) = field.value_ref() {
                        self.events.push(AtomicEvent::Field(FieldEvent {
                            change: ChangeType::Remove,
                            target: cmd.target.clone(),
                            actor: self.actor.clone(),
                            old_value: Some(old_value.clone()),
                            new_value: None,
                            revisions: EventRevisions::field(revision, revision, revision),
                            in_transaction: true,
                            implied: true,
                        }));
                    }
                }
                self.created.remove(&cmd.target);
                let event = self.entity_event(cmd, EventRevisions::object(revision, revision));
                self.events.push(AtomicEvent::Object(event));
                Ok(())
            }
            ChangeType::Change => Err("fields cannot be changed, only their values".into()),
        }
    }

    fn apply_field(&mut self, cmd: &FieldCommand) -> Step {
        let (object_id, field_id) = split_field(&cmd.target)?;
        let forced = cmd.check.is_forced();
        let revision = self.revision;
        if !self.working.has_field(&object_id, &field_id) {
            return match (cmd.change, forced) {
                (ChangeType::Remove, true) => Ok(()),
                _ => Err("field does not exist".into()),
            };
        }
        let old_value = self.working.value(&object_id, &field_id);
        if !forced {
            let original_revision = self.original.field_revision(&object_id, &field_id);
            self.check_revision(&cmd.target, original_revision, cmd.check, false)?;
            match (cmd.change, &old_value) {
                (ChangeType::Add, Some(_)) => return Err("field already has a value".into()),
                (ChangeType::Change | ChangeType::Remove, None) => {
                    return Err("field has no value".into())
                }
                _ => {}
            }
        }
        let new_value = match cmd.change {
            ChangeType::Remove => None,
            ChangeType::Add | ChangeType::Change => match &cmd.value {
                Some(value) => Some(value.clone()),
                None => return Err("value command without a value".into()),
            },
        };
        if old_value == new_value {
            return Ok(());
        }
        let change = match (&old_value, &new_value) {
            (None, _) => ChangeType::Add,
            (_, None) => ChangeType::Remove,
            _ => ChangeType::Change,
        };
        let Some(object) = self.working.memory_object_mut(&object_id) else {
            return Err("object does not exist".into());
        };
        let Some(field) = object.memory_field_mut(&field_id) else {
            return Err("field does not exist".into());
        };
        field.set_value(new_value.clone());
        field.set_revision(revision);
        object.set_revision(revision);
        self.events.push(AtomicEvent::Field(FieldEvent {
            change,
            target: cmd.target.clone(),
            actor: self.actor.clone(),
            old_value,
            new_value,
            revisions: EventRevisions::field(revision, revision, revision),
            in_transaction: false,
            implied: false,
        }));
        Ok(())
    }
}

fn split_field(target: &Address) -> std::result::Result<(Id, Id), String> {
    match (target.object_id(), target.field_id()) {
        (Some(object), Some(field)) => Ok((object.clone(), field.clone())),
        _ => Err(format!("{target} does not address a field")),
    }
}

/// Events for the contents of a removed object: value removals, then field removals.
fn push_implied_field_removals(
    object: &MemoryObject,
    revision: Revision,
    actor: &Option<Id>,
    events: &mut Vec<AtomicEvent>,
) {
    for (_, field) in object.fields() {
        if let Some(value) = field.value_ref() {
            events.push(AtomicEvent::Field(FieldEvent {
                change: ChangeType::Remove,
                target: field.address(),
                actor: actor.clone(),
                old_value: Some(value.clone()),
                new_value: None,
                revisions: EventRevisions::field(revision, revision, revision),
                in_transaction: true,
                implied: true,
            }));
        }
    }
    for (_, field) in object.fields() {
        events.push(AtomicEvent::Object(EntityEvent {
            change: ChangeType::Remove,
            target: field.address(),
            actor: actor.clone(),
            revisions: EventRevisions::object(revision, revision),
            in_transaction: true,
            implied: true,
        }));
    }
}

impl MemoryModel {
    /// Executes `command` against this model. Repository commands are rejected.
    pub fn execute(&mut self, command: &Command) -> Outcome {
        self.execute_with_events(command, None).0
    }

    pub(crate) fn execute_with_events(
        &mut self,
        command: &Command,
        actor: Option<&Id>,
    ) -> (Outcome, Option<Event>) {
        if self.revision() == REVISION_NOT_EXISTING {
            debug!(target_address = %command.target(), "command rejected: model was removed");
            return (Outcome::Failed, None);
        }
        let mut execution = ModelExecution::new(self, actor);
        for atomic in command.atomic_commands() {
            if let Err(reason) = execution.apply(atomic) {
                debug!(target_address = %atomic.target(), %reason, "command rejected");
                return (Outcome::Failed, None);
            }
        }
        if execution.events.is_empty() {
            return (Outcome::NoChange, None);
        }
        let ModelExecution {
            mut working,
            revision,
            actor,
            events,
            ..
        } = execution;
        working.set_revision(revision);
        *self = working;
        let (scope, in_transaction) = match command {
            Command::Atomic(_) => (self.address(), false),
            Command::Transaction(tx) => (tx.target().clone(), true),
        };
        let event = Event::from_atomic_events(scope, actor, events, in_transaction);
        (Outcome::Applied(revision), event)
    }
}

impl CommandExecutor for MemoryModel {
    fn execute(&mut self, command: &Command) -> Outcome {
        MemoryModel::execute(self, command)
    }
}

impl MemoryRepository {
    pub fn execute(&mut self, command: &Command) -> Outcome {
        self.run(None, command)
    }

    /// Like [`MemoryRepository::execute`], recording `actor` on the emitted events.
    pub fn execute_as(&mut self, actor: &Id, command: &Command) -> Outcome {
        self.run(Some(actor), command)
    }

    fn run(&mut self, actor: Option<&Id>, command: &Command) -> Outcome {
        if let Command::Atomic(AtomicCommand::Repository(cmd)) = command {
            return self.apply_repository(actor, cmd);
        }
        let target = command.target();
        if target.repository_id() != self.address().repository_id() {
            debug!(target_address = %target, "command rejected: foreign repository");
            return Outcome::Failed;
        }
        let Some(model_id) = target.model_id().cloned() else {
            debug!(target_address = %target, "command rejected: no model in target");
            return Outcome::Failed;
        };
        let Some(model) = self.models.get_mut(&model_id) else {
            debug!(target_address = %target, "command rejected: model does not exist");
            return Outcome::Failed;
        };
        let (outcome, event) = model.execute_with_events(command, actor);
        if let Some(event) = event {
            self.logs.entry(model_id).or_default().push(event);
        }
        outcome
    }

    fn apply_repository(&mut self, actor: Option<&Id>, cmd: &EntityCommand) -> Outcome {
        let model_id = cmd.target.id().clone();
        let forced = cmd.check.is_forced();
        let current = self.models.get(&model_id).map(|m| m.revision());
        let rejected = |reason: &str| {
            debug!(target_address = %cmd.target, reason, "command rejected");
            Outcome::Failed
        };
        let mut events = Vec::new();
        let revision = match (cmd.change, current) {
            (ChangeType::Add, Some(_)) | (ChangeType::Remove, None) if forced => {
                return Outcome::NoChange
            }
            (ChangeType::Add, Some(_)) => return rejected("model already exists"),
            (ChangeType::Remove, None) => return rejected("model does not exist"),
            (ChangeType::Change, _) => return rejected("models cannot be changed"),
            (ChangeType::Add, None) => {
                if matches!(cmd.check, RevisionCheck::New | RevisionCheck::Exact(_)) {
                    return rejected("model additions take a safe or forced check");
                }
                let revision = self.next_model_revision(&model_id);
                self.create_model(&model_id);
                revision
            }
            (ChangeType::Remove, Some(current)) => {
                match cmd.check {
                    RevisionCheck::Exact(expected) if expected != current => {
                        return rejected("stale model revision")
                    }
                    RevisionCheck::New => return rejected("model was not created in a transaction"),
                    RevisionCheck::Safe => return rejected("model removals take an exact or forced check"),
                    _ => {}
                }
                let revision = current + 1;
                if let Some(model) = self.models.remove(&model_id) {
                    let actor = actor.cloned();
                    for (_, object) in model.objects() {
                        push_implied_field_removals(object, revision, &actor, &mut events);
                        events.push(AtomicEvent::Model(EntityEvent {
                            change: ChangeType::Remove,
                            target: object.address(),
                            actor: actor.clone(),
                            revisions: EventRevisions::model(revision),
                            in_transaction: true,
                            implied: true,
                        }));
                    }
                }
                self.tombstones.insert(model_id.clone(), revision);
                revision
            }
        };
        events.push(AtomicEvent::Repository(EntityEvent {
            change: cmd.change,
            target: cmd.target.clone(),
            actor: actor.cloned(),
            revisions: EventRevisions::model(revision),
            in_transaction: false,
            implied: false,
        }));
        let in_transaction = events.len() > 1;
        if let Some(event) = Event::from_atomic_events(cmd.target.clone(), actor.cloned(), events, in_transaction) {
            self.logs.entry(model_id).or_default().push(event);
        }
        Outcome::Applied(revision)
    }
}

impl CommandExecutor for MemoryRepository {
    fn execute(&mut self, command: &Command) -> Outcome {
        MemoryRepository::execute(self, command)
    }
}
