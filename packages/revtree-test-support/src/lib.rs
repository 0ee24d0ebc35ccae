//! Fixtures, counting wrappers, and a conformance suite shared by the tests of
//! every model implementation (plain, diff overlay, caches, session).

use std::cell::Cell;
use std::sync::Once;

use proptest::prelude::*;
use revtree_core::{
    Address, AtomicCommand, Id, MemoryModel, Outcome, ReadableModel, Revision, RevisionCheck,
    TransactionBuilder, Value, WritableModel,
};

pub fn id(s: &str) -> Id {
    Id::new(s).unwrap()
}

pub fn model_address() -> Address {
    Address::model(id("repo"), id("m"))
}

/// Installs a test-writer subscriber once per process. Filter with `RUST_LOG`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Revision the seeded fixture was written at.
pub const SEEDED_REVISION: Revision = 1;

/// `o0 { f0 = 0, f1 }` and `o1 { f0 = 1 }`, written through the executor in
/// one transaction.
pub fn seeded_model() -> MemoryModel {
    let address = model_address();
    let mut model = MemoryModel::with_revision(address.clone(), 0);
    let mut builder = TransactionBuilder::new(address.clone()).unwrap();
    for (object, field, value) in [("o0", "f0", Some(0)), ("o0", "f1", None), ("o1", "f0", Some(1))] {
        let object = address.with_object(id(object));
        if !builder.commands().iter().any(|c| c.target() == &object) {
            builder
                .add_command(AtomicCommand::add_object(object.clone(), RevisionCheck::Safe))
                .unwrap();
        }
        let field = object.with_field(id(field));
        builder
            .add_command(AtomicCommand::add_field(field.clone(), RevisionCheck::Safe))
            .unwrap();
        if let Some(value) = value {
            builder
                .add_command(AtomicCommand::add_value(field, Value::from(value), RevisionCheck::New))
                .unwrap();
        }
    }
    assert_eq!(model.execute(&builder.build().unwrap()), Outcome::Applied(SEEDED_REVISION));
    model
}

/// Readable model that counts every query reaching it.
#[derive(Debug)]
pub struct CountingModel<M> {
    inner: M,
    reads: Cell<usize>,
}

impl<M: ReadableModel> CountingModel<M> {
    pub fn new(inner: M) -> Self {
        Self {
            inner,
            reads: Cell::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.get()
    }

    fn count(&self) -> &M {
        self.reads.set(self.reads.get() + 1);
        &self.inner
    }
}

impl<M: ReadableModel> ReadableModel for CountingModel<M> {
    fn address(&self) -> Address {
        self.inner.address()
    }

    fn revision(&self) -> Revision {
        self.count().revision()
    }

    fn has_object(&self, object: &Id) -> bool {
        self.count().has_object(object)
    }

    fn object_ids(&self) -> Vec<Id> {
        self.count().object_ids()
    }

    fn object_revision(&self, object: &Id) -> Option<Revision> {
        self.count().object_revision(object)
    }

    fn has_field(&self, object: &Id, field: &Id) -> bool {
        self.count().has_field(object, field)
    }

    fn field_ids(&self, object: &Id) -> Vec<Id> {
        self.count().field_ids(object)
    }

    fn field_revision(&self, object: &Id, field: &Id) -> Option<Revision> {
        self.count().field_revision(object, field)
    }

    fn value(&self, object: &Id, field: &Id) -> Option<Value> {
        self.count().value(object, field)
    }
}

/// Ordered object ids, each with its ordered field ids and values.
pub type Content = Vec<(Id, Vec<(Id, Option<Value>)>)>;

pub fn content(model: &(impl ReadableModel + ?Sized)) -> Content {
    model
        .object_ids()
        .into_iter()
        .map(|object| {
            let fields = model
                .field_ids(&object)
                .into_iter()
                .map(|field| {
                    let value = model.value(&object, &field);
                    (field, value)
                })
                .collect();
            (object, fields)
        })
        .collect()
}

#[track_caller]
pub fn assert_same_content(
    actual: &(impl ReadableModel + ?Sized),
    expected: &(impl ReadableModel + ?Sized),
) {
    assert_eq!(content(actual), content(expected));
}

#[derive(Clone, Debug)]
pub enum Edit {
    CreateObject(u8),
    RemoveObject(u8),
    CreateField(u8, u8),
    RemoveField(u8, u8),
    SetValue(u8, u8, Option<i64>),
}

fn object_id(n: u8) -> Id {
    id(&format!("o{n}"))
}

fn field_id(n: u8) -> Id {
    id(&format!("f{n}"))
}

/// Edits over a small id pool so creations and removals keep colliding.
pub fn edit_strategy() -> impl Strategy<Value = Edit> {
    prop_oneof![
        (0u8..3).prop_map(Edit::CreateObject),
        (0u8..3).prop_map(Edit::RemoveObject),
        (0u8..3, 0u8..3).prop_map(|(o, f)| Edit::CreateField(o, f)),
        (0u8..3, 0u8..3).prop_map(|(o, f)| Edit::RemoveField(o, f)),
        (0u8..3, 0u8..3, proptest::option::of(0i64..3)).prop_map(|(o, f, v)| Edit::SetValue(o, f, v)),
    ]
}

pub fn edits_strategy(max: usize) -> impl Strategy<Value = Vec<Edit>> {
    proptest::collection::vec(edit_strategy(), 0..max)
}

/// Applies `edit`, returning what the model reported.
pub fn apply_edit(model: &mut (impl WritableModel + ?Sized), edit: &Edit) -> bool {
    match *edit {
        Edit::CreateObject(o) => model.create_object(&object_id(o)),
        Edit::RemoveObject(o) => model.remove_object(&object_id(o)),
        Edit::CreateField(o, f) => model.create_field(&object_id(o), &field_id(f)),
        Edit::RemoveField(o, f) => model.remove_field(&object_id(o), &field_id(f)),
        Edit::SetValue(o, f, v) => model.set_value(&object_id(o), &field_id(f), v.map(Value::from)),
    }
}

/// Checks shared by every model layered over [`seeded_model`]. Each check
/// expects a model that still shows the seeded content.
pub mod conformance {
    use super::*;

    pub fn reads(model: &(impl ReadableModel + ?Sized)) {
        assert_eq!(model.address(), model_address());
        assert_eq!(model.object_ids(), vec![id("o0"), id("o1")]);
        assert!(model.has_object(&id("o0")));
        assert!(!model.has_object(&id("o9")));
        assert_eq!(model.field_ids(&id("o0")), vec![id("f0"), id("f1")]);
        assert!(model.field_ids(&id("o9")).is_empty());
        assert!(model.has_field(&id("o0"), &id("f1")));
        assert!(!model.has_field(&id("o1"), &id("f1")));
        assert_eq!(model.value(&id("o0"), &id("f0")), Some(Value::from(0)));
        assert_eq!(model.value(&id("o0"), &id("f1")), None);
        assert_eq!(model.value(&id("o9"), &id("f0")), None);
        assert_eq!(model.object_revision(&id("o1")), Some(SEEDED_REVISION));
        assert_eq!(model.field_revision(&id("o1"), &id("f0")), Some(SEEDED_REVISION));
        assert_eq!(model.object_revision(&id("o9")), None);
    }

    pub fn object_lifecycle(model: &mut (impl WritableModel + ?Sized)) {
        assert!(!model.create_object(&id("o0")));
        assert!(model.create_object(&id("o2")));
        assert!(!model.create_object(&id("o2")));
        assert!(model.has_object(&id("o2")));
        assert!(model.field_ids(&id("o2")).is_empty());

        assert!(model.remove_object(&id("o1")));
        assert!(!model.remove_object(&id("o1")));
        assert!(!model.has_object(&id("o1")));
        assert!(!model.create_field(&id("o1"), &id("f0")));
        assert!(!model.set_value(&id("o1"), &id("f0"), Some(Value::from(5))));
        assert_eq!(model.value(&id("o1"), &id("f0")), None);

        // A removed object comes back empty.
        assert!(model.create_object(&id("o1")));
        assert!(model.field_ids(&id("o1")).is_empty());
        assert_eq!(model.object_ids(), vec![id("o0"), id("o1"), id("o2")]);
    }

    pub fn field_lifecycle(model: &mut (impl WritableModel + ?Sized)) {
        assert!(!model.create_field(&id("o0"), &id("f0")));
        assert!(!model.create_field(&id("o9"), &id("f0")));
        assert!(model.remove_field(&id("o0"), &id("f0")));
        assert!(!model.remove_field(&id("o0"), &id("f0")));
        assert!(!model.set_value(&id("o0"), &id("f0"), Some(Value::from(3))));

        // A removed field comes back without its value.
        assert!(model.create_field(&id("o0"), &id("f0")));
        assert_eq!(model.value(&id("o0"), &id("f0")), None);
        assert!(model.create_field(&id("o0"), &id("f2")));
        assert_eq!(model.field_ids(&id("o0")), vec![id("f0"), id("f1"), id("f2")]);
    }

    pub fn value_semantics(model: &mut (impl WritableModel + ?Sized)) {
        assert!(!model.set_value(&id("o0"), &id("f0"), Some(Value::from(0))));
        assert!(model.set_value(&id("o0"), &id("f0"), Some(Value::from("zero"))));
        assert_eq!(model.value(&id("o0"), &id("f0")), Some(Value::from("zero")));
        assert!(model.set_value(&id("o0"), &id("f1"), Some(Value::from(true))));
        assert!(model.set_value(&id("o0"), &id("f0"), None));
        assert!(!model.set_value(&id("o0"), &id("f0"), None));
        assert_eq!(model.value(&id("o0"), &id("f0")), None);
        assert!(model.has_field(&id("o0"), &id("f0")));
        assert!(!model.set_value(&id("o0"), &id("missing"), Some(Value::from(1))));
    }

    /// Applies `edits` to `model` and to a plain copy of the fixture and
    /// checks both ends up with the same content and return values.
    pub fn matches_plain_writes(model: &mut (impl WritableModel + ?Sized), edits: &[Edit]) {
        let mut plain = seeded_model();
        for edit in edits {
            let expected = apply_edit(&mut plain, edit);
            assert_eq!(apply_edit(model, edit), expected, "{edit:?}");
        }
        assert_same_content(&*model, &plain);
    }
}
