use crate::error::{Error, Result};
use crate::ids::{Address, EntityKind, Revision};
use crate::value::Value;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ChangeType {
    Add,
    Remove,
    /// Only meaningful for field values.
    Change,
}

/// Precondition a command carries about the entity it targets.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RevisionCheck {
    /// Ignore existence and revision; last writer wins.
    Forced,
    /// Existence check only. Intended for adding models, objects, and fields.
    Safe,
    /// The field was created earlier in the same transaction.
    New,
    /// The entity must currently be at exactly this revision.
    Exact(Revision),
}

impl RevisionCheck {
    pub fn is_forced(self) -> bool {
        matches!(self, RevisionCheck::Forced)
    }
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EntityCommand {
    pub change: ChangeType,
    /// Address of the entity being added or removed.
    pub target: Address,
    pub check: RevisionCheck,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FieldCommand {
    pub change: ChangeType,
    pub target: Address,
    /// New value for `Add`/`Change`; always `None` for `Remove`.
    pub value: Option<Value>,
    pub check: RevisionCheck,
}

/// A command touching exactly one entity. The variant names the level that
/// owns the change: a `Model` command adds or removes an object, an `Object`
/// command adds or removes a field.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AtomicCommand {
    Repository(EntityCommand),
    Model(EntityCommand),
    Object(EntityCommand),
    Field(FieldCommand),
}

impl AtomicCommand {
    pub fn add_model(model: Address, check: RevisionCheck) -> Self {
        debug_assert_eq!(model.kind(), EntityKind::Model);
        Self::Repository(EntityCommand {
            change: ChangeType::Add,
            target: model,
            check,
        })
    }

    pub fn remove_model(model: Address, check: RevisionCheck) -> Self {
        debug_assert_eq!(model.kind(), EntityKind::Model);
        Self::Repository(EntityCommand {
            change: ChangeType::Remove,
            target: model,
            check,
        })
    }

    pub fn add_object(object: Address, check: RevisionCheck) -> Self {
        debug_assert_eq!(object.kind(), EntityKind::Object);
        Self::Model(EntityCommand {
            change: ChangeType::Add,
            target: object,
            check,
        })
    }

    pub fn remove_object(object: Address, check: RevisionCheck) -> Self {
        debug_assert_eq!(object.kind(), EntityKind::Object);
        Self::Model(EntityCommand {
            change: ChangeType::Remove,
            target: object,
            check,
        })
    }

    pub fn add_field(field: Address, check: RevisionCheck) -> Self {
        debug_assert_eq!(field.kind(), EntityKind::Field);
        Self::Object(EntityCommand {
            change: ChangeType::Add,
            target: field,
            check,
        })
    }

    pub fn remove_field(field: Address, check: RevisionCheck) -> Self {
        debug_assert_eq!(field.kind(), EntityKind::Field);
        Self::Object(EntityCommand {
            change: ChangeType::Remove,
            target: field,
            check,
        })
    }

    pub fn add_value(field: Address, value: Value, check: RevisionCheck) -> Self {
        Self::field(ChangeType::Add, field, Some(value), check)
    }

    pub fn change_value(field: Address, value: Value, check: RevisionCheck) -> Self {
        Self::field(ChangeType::Change, field, Some(value), check)
    }

    pub fn remove_value(field: Address, check: RevisionCheck) -> Self {
        Self::field(ChangeType::Remove, field, None, check)
    }

    fn field(
        change: ChangeType,
        target: Address,
        value: Option<Value>,
        check: RevisionCheck,
    ) -> Self {
        debug_assert_eq!(target.kind(), EntityKind::Field);
        Self::Field(FieldCommand {
            change,
            target,
            value,
            check,
        })
    }

    pub fn target(&self) -> &Address {
        match self {
            AtomicCommand::Repository(cmd)
            | AtomicCommand::Model(cmd)
            | AtomicCommand::Object(cmd) => &cmd.target,
            AtomicCommand::Field(cmd) => &cmd.target,
        }
    }

    pub fn change(&self) -> ChangeType {
        match self {
            AtomicCommand::Repository(cmd)
            | AtomicCommand::Model(cmd)
            | AtomicCommand::Object(cmd) => cmd.change,
            AtomicCommand::Field(cmd) => cmd.change,
        }
    }

    pub fn check(&self) -> RevisionCheck {
        match self {
            AtomicCommand::Repository(cmd)
            | AtomicCommand::Model(cmd)
            | AtomicCommand::Object(cmd) => cmd.check,
            AtomicCommand::Field(cmd) => cmd.check,
        }
    }

    pub fn is_forced(&self) -> bool {
        self.check().is_forced()
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            AtomicCommand::Field(cmd) => cmd.value.as_ref(),
            _ => None,
        }
    }
}

/// Ordered, non-empty group of atomic commands executed all-or-nothing,
/// scoped to one model or object.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Transaction {
    target: Address,
    commands: Vec<AtomicCommand>,
}

impl Transaction {
    pub fn new(target: Address, commands: Vec<AtomicCommand>) -> Result<Self> {
        check_scope(&target)?;
        if commands.is_empty() {
            return Err(Error::EmptyTransaction);
        }
        for command in &commands {
            check_member(&target, command)?;
        }
        Ok(Self { target, commands })
    }

    pub fn target(&self) -> &Address {
        &self.target
    }

    pub fn commands(&self) -> &[AtomicCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn into_commands(self) -> Vec<AtomicCommand> {
        self.commands
    }
}

pub(crate) fn check_scope(scope: &Address) -> Result<()> {
    match scope.kind() {
        EntityKind::Model | EntityKind::Object => Ok(()),
        kind => Err(Error::InvalidOperation(format!(
            "transactions are scoped to a model or object, not a {kind:?} ({scope})"
        ))),
    }
}

pub(crate) fn check_member(scope: &Address, command: &AtomicCommand) -> Result<()> {
    if let AtomicCommand::Repository(cmd) = command {
        return Err(Error::InvalidOperation(format!(
            "repository command on {} cannot join a transaction",
            cmd.target
        )));
    }
    // Model and object commands belong to the level above their target.
    let owner = match command {
        AtomicCommand::Model(_) | AtomicCommand::Object(_) => command.target().parent(),
        _ => Some(command.target().clone()),
    };
    if !owner.is_some_and(|owner| scope.contains(&owner)) {
        return Err(Error::OutOfScope {
            target: command.target().clone(),
            scope: scope.clone(),
        });
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Command {
    Atomic(AtomicCommand),
    Transaction(Transaction),
}

impl Command {
    pub fn target(&self) -> &Address {
        match self {
            Command::Atomic(cmd) => cmd.target(),
            Command::Transaction(tx) => tx.target(),
        }
    }

    /// Member commands in execution order; an atomic command is its own only member.
    pub fn atomic_commands(&self) -> &[AtomicCommand] {
        match self {
            Command::Atomic(cmd) => std::slice::from_ref(cmd),
            Command::Transaction(tx) => tx.commands(),
        }
    }

    /// Wraps a command list: nothing for an empty list, the command itself for
    /// a single one, a transaction otherwise.
    pub fn from_commands(scope: Address, mut commands: Vec<AtomicCommand>) -> Result<Option<Self>> {
        match commands.len() {
            0 => Ok(None),
            1 => Ok(commands.pop().map(Command::Atomic)),
            _ => Transaction::new(scope, commands).map(|tx| Some(Command::Transaction(tx))),
        }
    }
}

impl From<AtomicCommand> for Command {
    fn from(command: AtomicCommand) -> Self {
        Command::Atomic(command)
    }
}

impl From<Transaction> for Command {
    fn from(transaction: Transaction) -> Self {
        Command::Transaction(transaction)
    }
}

/// Result of executing a command.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Outcome {
    /// The command changed state; carries the new model revision.
    Applied(Revision),
    /// Legal, but nothing observable changed.
    NoChange,
    /// A precondition did not hold; nothing was changed.
    Failed,
}

impl Outcome {
    pub fn is_failed(self) -> bool {
        matches!(self, Outcome::Failed)
    }

    pub fn is_applied(self) -> bool {
        matches!(self, Outcome::Applied(_))
    }

    pub fn revision(self) -> Option<Revision> {
        match self {
            Outcome::Applied(revision) => Some(revision),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Id;

    fn object(o: &str) -> Address {
        Address::object(Id::new("r").unwrap(), Id::new("m").unwrap(), Id::new(o).unwrap())
    }

    #[test]
    fn transaction_rejects_foreign_targets() {
        let scope = object("a");
        let inside = AtomicCommand::add_field(scope.with_field(Id::new("f").unwrap()), RevisionCheck::Safe);
        let outside = AtomicCommand::add_field(
            object("b").with_field(Id::new("f").unwrap()),
            RevisionCheck::Safe,
        );
        assert!(Transaction::new(scope.clone(), vec![inside.clone()]).is_ok());
        assert!(matches!(
            Transaction::new(scope.clone(), vec![inside, outside]),
            Err(Error::OutOfScope { .. })
        ));
        assert_eq!(Transaction::new(scope, vec![]), Err(Error::EmptyTransaction));
    }

    #[test]
    fn object_scope_rejects_commands_on_the_object_itself() {
        let scope = object("a");
        let model = scope.parent().unwrap();
        let own = AtomicCommand::remove_object(scope.clone(), RevisionCheck::Exact(1));
        assert!(matches!(
            Transaction::new(scope.clone(), vec![own.clone()]),
            Err(Error::OutOfScope { .. })
        ));
        assert!(Transaction::new(model, vec![own]).is_ok());

        let shell = AtomicCommand::remove_field(scope.with_field(Id::new("f").unwrap()), RevisionCheck::Exact(1));
        assert!(Transaction::new(scope, vec![shell]).is_ok());
    }

    #[test]
    fn from_commands_unwraps_single_command() {
        let scope = object("a").parent().unwrap();
        let add = AtomicCommand::add_object(object("a"), RevisionCheck::Safe);
        assert_eq!(Command::from_commands(scope.clone(), vec![]).unwrap(), None);
        assert_eq!(
            Command::from_commands(scope.clone(), vec![add.clone()]).unwrap(),
            Some(Command::Atomic(add.clone()))
        );
        let tx = Command::from_commands(scope, vec![add.clone(), add]).unwrap().unwrap();
        assert_eq!(tx.atomic_commands().len(), 2);
    }
}
