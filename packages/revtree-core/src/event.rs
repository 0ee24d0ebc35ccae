use crate::command::ChangeType;
use crate::ids::{Address, Id, Revision, REVISION_UNDEFINED};
use crate::value::Value;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Revisions of the model, object, and field *after* the change. Slots below
/// the level an event touches are `REVISION_UNDEFINED`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventRevisions {
    pub model: Revision,
    pub object: Revision,
    pub field: Revision,
}

impl EventRevisions {
    pub fn model(model: Revision) -> Self {
        Self {
            model,
            object: REVISION_UNDEFINED,
            field: REVISION_UNDEFINED,
        }
    }

    pub fn object(model: Revision, object: Revision) -> Self {
        Self {
            model,
            object,
            field: REVISION_UNDEFINED,
        }
    }

    pub fn field(model: Revision, object: Revision, field: Revision) -> Self {
        Self {
            model,
            object,
            field,
        }
    }
}

/// Addition or removal of a model, object, or field.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EntityEvent {
    pub change: ChangeType,
    pub target: Address,
    pub actor: Option<Id>,
    pub revisions: EventRevisions,
    pub in_transaction: bool,
    /// Direct consequence of another event in the same transaction, such as
    /// removing the fields of a removed object.
    pub implied: bool,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FieldEvent {
    pub change: ChangeType,
    pub target: Address,
    pub actor: Option<Id>,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub revisions: EventRevisions,
    pub in_transaction: bool,
    pub implied: bool,
}

/// Fact about exactly one entity; mirrors [`crate::AtomicCommand`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AtomicEvent {
    Repository(EntityEvent),
    Model(EntityEvent),
    Object(EntityEvent),
    Field(FieldEvent),
}

impl AtomicEvent {
    pub fn target(&self) -> &Address {
        match self {
            AtomicEvent::Repository(e) | AtomicEvent::Model(e) | AtomicEvent::Object(e) => {
                &e.target
            }
            AtomicEvent::Field(e) => &e.target,
        }
    }

    pub fn change(&self) -> ChangeType {
        match self {
            AtomicEvent::Repository(e) | AtomicEvent::Model(e) | AtomicEvent::Object(e) => e.change,
            AtomicEvent::Field(e) => e.change,
        }
    }

    pub fn revisions(&self) -> EventRevisions {
        match self {
            AtomicEvent::Repository(e) | AtomicEvent::Model(e) | AtomicEvent::Object(e) => {
                e.revisions
            }
            AtomicEvent::Field(e) => e.revisions,
        }
    }

    pub fn actor(&self) -> Option<&Id> {
        match self {
            AtomicEvent::Repository(e) | AtomicEvent::Model(e) | AtomicEvent::Object(e) => {
                e.actor.as_ref()
            }
            AtomicEvent::Field(e) => e.actor.as_ref(),
        }
    }

    pub fn is_implied(&self) -> bool {
        match self {
            AtomicEvent::Repository(e) | AtomicEvent::Model(e) | AtomicEvent::Object(e) => {
                e.implied
            }
            AtomicEvent::Field(e) => e.implied,
        }
    }

    pub fn is_in_transaction(&self) -> bool {
        match self {
            AtomicEvent::Repository(e) | AtomicEvent::Model(e) | AtomicEvent::Object(e) => {
                e.in_transaction
            }
            AtomicEvent::Field(e) => e.in_transaction,
        }
    }

    pub(crate) fn mark_in_transaction(&mut self) {
        match self {
            AtomicEvent::Repository(e) | AtomicEvent::Model(e) | AtomicEvent::Object(e) => {
                e.in_transaction = true
            }
            AtomicEvent::Field(e) => e.in_transaction = true,
        }
    }
}

/// Atomic events that happened together as one unit.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TransactionEvent {
    pub target: Address,
    pub actor: Option<Id>,
    pub events: Vec<AtomicEvent>,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Event {
    Atomic(AtomicEvent),
    Transaction(TransactionEvent),
}

impl Event {
    pub fn target(&self) -> &Address {
        match self {
            Event::Atomic(e) => e.target(),
            Event::Transaction(tx) => &tx.target,
        }
    }

    pub fn atomic_events(&self) -> &[AtomicEvent] {
        match self {
            Event::Atomic(e) => std::slice::from_ref(e),
            Event::Transaction(tx) => &tx.events,
        }
    }

    /// Model revision after the whole event was applied.
    pub fn model_revision(&self) -> Revision {
        self.atomic_events()
            .iter()
            .map(|e| e.revisions().model)
            .max()
            .unwrap_or(REVISION_UNDEFINED)
    }

    /// A single event outside a transaction stays atomic; anything else is
    /// wrapped and every member is flagged as part of the transaction.
    pub(crate) fn from_atomic_events(
        target: Address,
        actor: Option<Id>,
        mut events: Vec<AtomicEvent>,
        in_transaction: bool,
    ) -> Option<Event> {
        if events.is_empty() {
            return None;
        }
        if events.len() == 1 && !in_transaction {
            return events.pop().map(Event::Atomic);
        }
        for event in &mut events {
            event.mark_in_transaction();
        }
        Some(Event::Transaction(TransactionEvent {
            target,
            actor,
            events,
        }))
    }
}

impl From<AtomicEvent> for Event {
    fn from(event: AtomicEvent) -> Self {
        Event::Atomic(event)
    }
}

impl From<TransactionEvent> for Event {
    fn from(event: TransactionEvent) -> Self {
        Event::Transaction(event)
    }
}
