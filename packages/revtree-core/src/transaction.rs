//! Assembling commands into transactions.

use crate::command::{check_member, check_scope, AtomicCommand, Command, RevisionCheck, Transaction};
use crate::diff::value_command;
use crate::error::{Error, Result};
use crate::ids::{Address, Revision, REVISION_UNDEFINED};
use crate::traits::{ObjectView, ReadableModel, ReadableObject};
use crate::value::Value;

/// Ordered list of atomic commands scoped to one model or object.
#[derive(Clone, Debug, PartialEq)]
pub struct TransactionBuilder {
    target: Address,
    commands: Vec<AtomicCommand>,
}

impl TransactionBuilder {
    pub fn new(target: Address) -> Result<Self> {
        check_scope(&target)?;
        Ok(Self {
            target,
            commands: Vec::new(),
        })
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

    /// Appends `command`; transactions are flattened into their members. Nothing is
    /// added if any member falls outside the builder's scope.
    pub fn add_command(&mut self, command: impl Into<Command>) -> Result<()> {
        let command = command.into();
        for atomic in command.atomic_commands() {
            check_member(&self.target, atomic)?;
        }
        match command {
            Command::Atomic(atomic) => self.commands.push(atomic),
            Command::Transaction(tx) => self.commands.extend(tx.into_commands()),
        }
        Ok(())
    }

    /// Removes the first command equal to `command`.
    pub fn remove_command(&mut self, command: &AtomicCommand) -> bool {
        match self.commands.iter().position(|c| c == command) {
            Some(idx) => {
                self.commands.remove(idx);
                true
            }
            None => false,
        }
    }

    /// The single command itself, or a transaction around several.
    pub fn build(self) -> Result<Command> {
        Command::from_commands(self.target, self.commands)?.ok_or(Error::EmptyTransaction)
    }

    pub fn build_transaction(self) -> Result<Transaction> {
        Transaction::new(self.target, self.commands)
    }

    /// Adds the commands that turn `old` into `new`. Generated commands carry
    /// the revisions of `old`, so they apply to the state `old` was read from.
    pub fn change_model(
        &mut self,
        old: &(impl ReadableModel + ?Sized),
        new: &(impl ReadableModel + ?Sized),
    ) -> Result<()> {
        let model = old.address();
        for id in old.object_ids() {
            if !new.has_object(&id) {
                let revision = old.object_revision(&id).unwrap_or(REVISION_UNDEFINED);
                self.add_command(AtomicCommand::remove_object(
                    model.with_object(id),
                    RevisionCheck::Exact(revision),
                ))?;
            }
        }
        for id in new.object_ids() {
            let new_object = ObjectView::new(new, id.clone());
            if old.has_object(&id) {
                self.change_object(&ObjectView::new(old, id), &new_object)?;
            } else {
                self.add_command(AtomicCommand::add_object(
                    model.with_object(id),
                    RevisionCheck::Safe,
                ))?;
                self.add_fields(&new_object)?;
            }
        }
        Ok(())
    }

    pub fn change_object(
        &mut self,
        old: &(impl ReadableObject + ?Sized),
        new: &(impl ReadableObject + ?Sized),
    ) -> Result<()> {
        let object = old.address();
        for id in old.field_ids() {
            if !new.has_field(&id) {
                let revision = old.field_revision(&id).unwrap_or(REVISION_UNDEFINED);
                self.add_command(AtomicCommand::remove_field(
                    object.with_field(id),
                    RevisionCheck::Exact(revision),
                ))?;
            }
        }
        for id in new.field_ids() {
            match old.field_revision(&id) {
                Some(revision) => self.change_value(
                    object.with_field(id.clone()),
                    revision,
                    old.value(&id),
                    new.value(&id),
                )?,
                None => {
                    let field = object.with_field(id.clone());
                    self.add_command(AtomicCommand::add_field(field.clone(), RevisionCheck::Safe))?;
                    if let Some(value) = new.value(&id) {
                        self.add_command(AtomicCommand::add_value(field, value, RevisionCheck::New))?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Adds the value command for `old -> new` on an existing field, if they differ.
    pub fn change_value(
        &mut self,
        field: Address,
        old_revision: Revision,
        old: Option<Value>,
        new: Option<Value>,
    ) -> Result<()> {
        match value_command(field, old, new, RevisionCheck::Exact(old_revision)) {
            Some(command) => self.add_command(command),
            None => Ok(()),
        }
    }

    fn add_fields(&mut self, object: &(impl ReadableObject + ?Sized)) -> Result<()> {
        let address = object.address();
        for id in object.field_ids() {
            let field = address.with_field(id.clone());
            self.add_command(AtomicCommand::add_field(field.clone(), RevisionCheck::Safe))?;
            if let Some(value) = object.value(&id) {
                self.add_command(AtomicCommand::add_value(field, value, RevisionCheck::New))?;
            }
        }
        Ok(())
    }
}
