use crate::command::{AtomicCommand, Command};
use crate::config::CacheConfig;
use crate::diff::DiffModel;
use crate::error::Result;
use crate::ids::{Address, Id, Revision};
use crate::read_cache::ReadCachingModel;
use crate::traits::{ReadableModel, WritableModel};
use crate::transaction::TransactionBuilder;
use crate::value::Value;

/// Reads go through a [`ReadCachingModel`], writes collect in a [`DiffModel`]
/// on top of it. The base is never written.
#[derive(Debug)]
pub struct ReadWriteCachingModel<B> {
    diff: DiffModel<ReadCachingModel<B>>,
}

impl<B: ReadableModel> ReadWriteCachingModel<B> {
    pub fn new(base: B) -> Self {
        Self::with_config(base, CacheConfig::default())
    }

    pub fn with_config(base: B, config: CacheConfig) -> Self {
        Self {
            diff: DiffModel::new(ReadCachingModel::with_config(base, config)),
        }
    }

    pub fn read_cache(&self) -> &ReadCachingModel<B> {
        self.diff.base()
    }

    pub fn base(&self) -> &B {
        self.diff.base().base()
    }

    pub fn base_reads(&self) -> usize {
        self.diff.base().base_reads()
    }

    pub fn has_changes(&self) -> bool {
        self.diff.has_changes()
    }

    pub fn added_objects(&self) -> Vec<Id> {
        self.diff.added_objects()
    }

    pub fn removed_objects(&self) -> Vec<Id> {
        self.diff.removed_objects()
    }

    pub fn potentially_changed_objects(&self) -> Vec<Id> {
        self.diff.potentially_changed_objects()
    }

    pub fn to_command_list(&self, forced: bool) -> Vec<AtomicCommand> {
        self.diff.to_command_list(forced)
    }

    pub fn to_transaction(&self, forced: bool) -> Result<Option<Command>> {
        self.diff.to_transaction(forced)
    }

    pub fn commit_to(&self, builder: &mut TransactionBuilder, forced: bool) -> Result<()> {
        self.diff.commit_to(builder, forced)
    }

    /// Discards pending edits; cached reads are kept.
    pub fn clear(&mut self) {
        self.diff.clear();
    }

    pub fn into_base(self) -> B {
        self.diff.into_base().into_base()
    }
}

impl<B: ReadableModel> ReadableModel for ReadWriteCachingModel<B> {
    fn address(&self) -> Address {
        self.diff.address()
    }

    fn revision(&self) -> Revision {
        self.diff.revision()
    }

    fn has_object(&self, object: &Id) -> bool {
        self.diff.has_object(object)
    }

    fn object_ids(&self) -> Vec<Id> {
        self.diff.object_ids()
    }

    fn object_revision(&self, object: &Id) -> Option<Revision> {
        self.diff.object_revision(object)
    }

    fn has_field(&self, object: &Id, field: &Id) -> bool {
        self.diff.has_field(object, field)
    }

    fn field_ids(&self, object: &Id) -> Vec<Id> {
        self.diff.field_ids(object)
    }

    fn field_revision(&self, object: &Id, field: &Id) -> Option<Revision> {
        self.diff.field_revision(object, field)
    }

    fn value(&self, object: &Id, field: &Id) -> Option<Value> {
        self.diff.value(object, field)
    }
}

impl<B: ReadableModel> WritableModel for ReadWriteCachingModel<B> {
    fn create_object(&mut self, object: &Id) -> bool {
        self.diff.create_object(object)
    }

    fn remove_object(&mut self, object: &Id) -> bool {
        self.diff.remove_object(object)
    }

    fn create_field(&mut self, object: &Id, field: &Id) -> bool {
        self.diff.create_field(object, field)
    }

    fn remove_field(&mut self, object: &Id, field: &Id) -> bool {
        self.diff.remove_field(object, field)
    }

    fn set_value(&mut self, object: &Id, field: &Id, value: Option<Value>) -> bool {
        self.diff.set_value(object, field, value)
    }
}
