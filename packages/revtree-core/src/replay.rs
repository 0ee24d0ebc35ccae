//! Rebuilding model state from events.
//!
//! Each event first stamps the revisions it carries onto the model (and, for
//! object and field events, onto the object) and then applies its change.
//! Events flagged as implied inside a transaction are skipped; the event
//! that caused them already covers their effect.

use tracing::trace;

use crate::command::ChangeType;
use crate::error::{Error, Result};
use crate::event::{AtomicEvent, EntityEvent, Event, FieldEvent};
use crate::ids::{Address, Id, Revision, REVISION_NOT_EXISTING};
use crate::memory::MemoryModel;
use crate::traits::{ReadableModel, RevisionWritableModel};

fn inconsistent(target: &Address, what: &str) -> Error {
    Error::InconsistentState(format!("{target}: {what}"))
}

fn object_id(target: &Address) -> Result<&Id> {
    target
        .object_id()
        .ok_or_else(|| inconsistent(target, "event target has no object"))
}

fn field_id(target: &Address) -> Result<&Id> {
    target
        .field_id()
        .ok_or_else(|| inconsistent(target, "event target has no field"))
}

/// Applies `event` to `model`. On error the model may be partially updated.
pub fn apply_event(model: &mut (impl RevisionWritableModel + ?Sized), event: &Event) -> Result<()> {
    let in_transaction = matches!(event, Event::Transaction(_));
    for atomic in event.atomic_events() {
        if in_transaction && atomic.is_implied() {
            trace!(target_address = %atomic.target(), "skipping implied event");
            continue;
        }
        apply_atomic(model, atomic)?;
    }
    Ok(())
}

pub fn apply_events<'a>(
    model: &mut (impl RevisionWritableModel + ?Sized),
    events: impl IntoIterator<Item = &'a Event>,
) -> Result<()> {
    for event in events {
        apply_event(model, event)?;
    }
    Ok(())
}

/// Replays a model's change log into a fresh snapshot.
pub fn rebuild_model<'a>(
    address: Address,
    events: impl IntoIterator<Item = &'a Event>,
) -> Result<MemoryModel> {
    let mut model = MemoryModel::new(address);
    apply_events(&mut model, events)?;
    Ok(model)
}

fn apply_atomic(model: &mut (impl RevisionWritableModel + ?Sized), event: &AtomicEvent) -> Result<()> {
    let target = event.target();
    if target.model_address().as_ref() != Some(&model.address()) {
        return Err(inconsistent(target, "event belongs to another model"));
    }
    match event {
        AtomicEvent::Repository(e) => apply_repository(model, e),
        AtomicEvent::Model(e) => {
            model.set_revision(e.revisions.model);
            apply_model(model, e)
        }
        AtomicEvent::Object(e) => {
            model.set_revision(e.revisions.model);
            stamp_object(model, &e.target, e.revisions.object)?;
            apply_object(model, e)
        }
        AtomicEvent::Field(e) => {
            model.set_revision(e.revisions.model);
            stamp_object(model, &e.target, e.revisions.object)?;
            apply_field(model, e)
        }
    }
}

fn stamp_object(
    model: &mut (impl RevisionWritableModel + ?Sized),
    target: &Address,
    revision: Revision,
) -> Result<()> {
    let object = object_id(target)?;
    if !model.set_object_revision(object, revision) {
        return Err(inconsistent(target, "object does not exist"));
    }
    Ok(())
}

fn apply_repository(model: &mut (impl RevisionWritableModel + ?Sized), e: &EntityEvent) -> Result<()> {
    match e.change {
        ChangeType::Add => {
            if !model.is_empty() {
                return Err(inconsistent(&e.target, "added model is not empty"));
            }
            model.set_revision(e.revisions.model);
        }
        ChangeType::Remove => {
            model.set_revision(REVISION_NOT_EXISTING);
            for object in model.object_ids() {
                model.remove_object(&object);
            }
        }
        ChangeType::Change => return Err(inconsistent(&e.target, "models cannot change")),
    }
    Ok(())
}

fn apply_model(model: &mut (impl RevisionWritableModel + ?Sized), e: &EntityEvent) -> Result<()> {
    let object = object_id(&e.target)?;
    match e.change {
        ChangeType::Add => {
            if !model.create_object(object) {
                return Err(inconsistent(&e.target, "added object already exists"));
            }
            model.set_object_revision(object, e.revisions.object);
        }
        ChangeType::Remove => {
            if !model.remove_object(object) {
                return Err(inconsistent(&e.target, "removed object does not exist"));
            }
        }
        ChangeType::Change => return Err(inconsistent(&e.target, "objects cannot change")),
    }
    Ok(())
}

fn apply_object(model: &mut (impl RevisionWritableModel + ?Sized), e: &EntityEvent) -> Result<()> {
    let object = object_id(&e.target)?;
    let field = field_id(&e.target)?;
    match e.change {
        ChangeType::Add => {
            if !model.create_field(object, field) {
                return Err(inconsistent(&e.target, "added field already exists"));
            }
            model.set_field_revision(object, field, e.revisions.field);
        }
        ChangeType::Remove => {
            if !model.remove_field(object, field) {
                return Err(inconsistent(&e.target, "removed field does not exist"));
            }
        }
        ChangeType::Change => return Err(inconsistent(&e.target, "fields cannot change")),
    }
    Ok(())
}

fn apply_field(model: &mut (impl RevisionWritableModel + ?Sized), e: &FieldEvent) -> Result<()> {
    let object = object_id(&e.target)?;
    let field = field_id(&e.target)?;
    if !model.has_field(object, field) {
        return Err(inconsistent(&e.target, "field does not exist"));
    }
    let current = model.value(object, field);
    match (e.change, &current) {
        (ChangeType::Add, Some(_)) => return Err(inconsistent(&e.target, "added value over a value")),
        (ChangeType::Change, None) => return Err(inconsistent(&e.target, "changed value is empty")),
        (ChangeType::Remove, None) => return Err(inconsistent(&e.target, "removed value is empty")),
        _ => {}
    }
    let value = match e.change {
        ChangeType::Remove => None,
        ChangeType::Add | ChangeType::Change => e.new_value.clone(),
    };
    model.set_value(object, field, value);
    model.set_field_revision(object, field, e.revisions.field);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventRevisions;
    use crate::value::Value;

    fn id(s: &str) -> Id {
        Id::new(s).unwrap()
    }

    fn model() -> MemoryModel {
        MemoryModel::new(Address::model(id("r"), id("m")))
    }

    fn add_object(object: &str, revision: Revision, implied: bool) -> AtomicEvent {
        AtomicEvent::Model(EntityEvent {
            change: ChangeType::Add,
            target: Address::object(id("r"), id("m"), id(object)),
            actor: None,
            revisions: EventRevisions::object(revision, revision),
            in_transaction: implied,
            implied,
        })
    }

    #[test]
    fn implied_events_apply_outside_transactions() {
        let mut m = model();
        apply_event(&mut m, &Event::Atomic(add_object("o", 2, true))).unwrap();
        assert!(m.has_object(&id("o")));
        assert_eq!(m.revision(), 2);
    }

    #[test]
    fn implied_events_are_skipped_inside_transactions() {
        let mut m = model();
        let tx = Event::from_atomic_events(
            m.address(),
            None,
            vec![add_object("a", 1, false), add_object("b", 1, true)],
            true,
        )
        .unwrap();
        // from_atomic_events marks membership but keeps the implied flag.
        apply_event(&mut m, &tx).unwrap();
        assert!(m.has_object(&id("a")));
        assert!(!m.has_object(&id("b")));
    }

    #[test]
    fn violations_are_reported() {
        let mut m = model();
        apply_event(&mut m, &Event::Atomic(add_object("o", 1, false))).unwrap();
        let err = apply_event(&mut m, &Event::Atomic(add_object("o", 2, false))).unwrap_err();
        assert!(matches!(err, Error::InconsistentState(_)));

        let change = AtomicEvent::Field(FieldEvent {
            change: ChangeType::Change,
            target: Address::field(id("r"), id("m"), id("o"), id("missing")),
            actor: None,
            old_value: None,
            new_value: Some(Value::from(1)),
            revisions: EventRevisions::field(3, 3, 3),
            in_transaction: false,
            implied: false,
        });
        assert!(apply_event(&mut m, &Event::Atomic(change)).is_err());

        let foreign = AtomicEvent::Model(EntityEvent {
            change: ChangeType::Add,
            target: Address::object(id("r"), id("other"), id("x")),
            actor: None,
            revisions: EventRevisions::object(4, 4),
            in_transaction: false,
            implied: false,
        });
        assert!(apply_event(&mut m, &Event::Atomic(foreign)).is_err());
    }

    #[test]
    fn repository_remove_clears_the_model() {
        let mut m = model();
        apply_event(&mut m, &Event::Atomic(add_object("o", 1, false))).unwrap();
        let remove = AtomicEvent::Repository(EntityEvent {
            change: ChangeType::Remove,
            target: m.address(),
            actor: None,
            revisions: EventRevisions::model(2),
            in_transaction: false,
            implied: false,
        });
        apply_event(&mut m, &Event::Atomic(remove)).unwrap();
        assert!(m.is_empty());
        assert_eq!(m.revision(), REVISION_NOT_EXISTING);
    }
}
