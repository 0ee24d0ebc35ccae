use revtree_core::{
    apply_event, AtomicCommand, AtomicEvent, ChangeType, DiffModel, EntityEvent, Event,
    EventRevisions, FieldEvent, Id, MemoryModel, MemoryRepository, Outcome, ReadableModel,
    ReadableRepository, RevisionCheck, Transaction, TransactionEvent, Value, WritableModel,
    WritableRepository,
};

fn id(s: &str) -> Id {
    Id::new(s).unwrap()
}

fn repo_with_model() -> MemoryRepository {
    let mut repo = MemoryRepository::new(id("repo"));
    repo.create_model(&id("m"));
    repo
}

/// Model `m` holding `O1.F1 = value`, written in one transaction.
fn repo_with_field(value: &str) -> MemoryRepository {
    let mut repo = repo_with_model();
    let model = repo.address().with_model(id("m"));
    let object = model.with_object(id("O1"));
    let field = object.with_field(id("F1"));
    let tx = Transaction::new(
        model,
        vec![
            AtomicCommand::add_object(object, RevisionCheck::Safe),
            AtomicCommand::add_field(field.clone(), RevisionCheck::Safe),
            AtomicCommand::add_value(field, Value::from(value), RevisionCheck::New),
        ],
    )
    .unwrap();
    assert_eq!(repo.execute(&tx.into()), Outcome::Applied(1));
    repo
}

#[test]
fn new_object_with_value_yields_three_ordered_commands() {
    let repo = repo_with_model();
    let base = repo.memory_model(&id("m")).unwrap();
    let mut diff = DiffModel::new(base);

    assert!(diff.create_object(&id("O1")));
    assert!(diff.create_field(&id("O1"), &id("F1")));
    assert!(diff.set_value(&id("O1"), &id("F1"), Some(Value::from("hello"))));

    let model = base.address();
    let object = model.with_object(id("O1"));
    let field = object.with_field(id("F1"));
    assert_eq!(
        diff.to_command_list(false),
        vec![
            AtomicCommand::add_object(object, RevisionCheck::Safe),
            AtomicCommand::add_field(field.clone(), RevisionCheck::Safe),
            AtomicCommand::add_value(field, Value::from("hello"), RevisionCheck::New),
        ]
    );
}

#[test]
fn reverted_value_yields_no_commands() {
    let repo = repo_with_field("a");
    let base = repo.memory_model(&id("m")).unwrap();
    let mut diff = DiffModel::new(base);

    assert!(diff.set_value(&id("O1"), &id("F1"), Some(Value::from("b"))));
    assert!(diff.set_value(&id("O1"), &id("F1"), Some(Value::from("a"))));

    assert!(diff.to_command_list(false).is_empty());
    assert!(!diff.has_changes());
    assert_eq!(diff.to_transaction(false).unwrap(), None);
}

#[test]
fn removed_field_yields_one_safe_remove() {
    let repo = repo_with_field("x");
    let base = repo.memory_model(&id("m")).unwrap();
    let mut diff = DiffModel::new(base);

    assert!(diff.remove_field(&id("O1"), &id("F1")));

    let commands = diff.to_command_list(false);
    assert_eq!(commands.len(), 1);
    let field_revision = base.field_revision(&id("O1"), &id("F1")).unwrap();
    assert_eq!(base.object_revision(&id("O1")), Some(field_revision));
    assert_eq!(
        commands[0],
        AtomicCommand::remove_field(
            base.address().with_object(id("O1")).with_field(id("F1")),
            RevisionCheck::Exact(field_revision),
        )
    );
    assert_eq!(diff.removed_fields(&id("O1")), vec![id("F1")]);
}

#[test]
fn replayed_transaction_event_stamps_revisions_per_event() {
    let model_address = repo_with_model().address().with_model(id("m"));
    let object = model_address.with_object(id("O1"));
    let field = object.with_field(id("F1"));

    let events = vec![
        AtomicEvent::Model(EntityEvent {
            change: ChangeType::Add,
            target: object.clone(),
            actor: None,
            revisions: EventRevisions::object(5, 5),
            in_transaction: true,
            implied: false,
        }),
        AtomicEvent::Object(EntityEvent {
            change: ChangeType::Add,
            target: field.clone(),
            actor: None,
            revisions: EventRevisions::field(6, 6, 6),
            in_transaction: true,
            implied: false,
        }),
        AtomicEvent::Field(FieldEvent {
            change: ChangeType::Add,
            target: field,
            actor: None,
            old_value: None,
            new_value: Some(Value::from("v")),
            revisions: EventRevisions::field(7, 7, 7),
            in_transaction: true,
            implied: false,
        }),
    ];

    // Each member applied on its own leaves exactly its own revisions behind.
    let mut stepwise = MemoryModel::new(model_address.clone());
    for event in &events {
        apply_event(&mut stepwise, &Event::Atomic(event.clone())).unwrap();
        let revisions = event.revisions();
        assert_eq!(stepwise.revision(), revisions.model);
        assert_eq!(stepwise.object_revision(&id("O1")), Some(revisions.object));
        if event.target().field_id().is_some() {
            assert_eq!(stepwise.field_revision(&id("O1"), &id("F1")), Some(revisions.field));
        }
    }

    let mut snapshot = MemoryModel::new(model_address.clone());
    let tx = Event::Transaction(TransactionEvent {
        target: model_address,
        actor: None,
        events,
    });
    apply_event(&mut snapshot, &tx).unwrap();
    assert_eq!(snapshot, stepwise);
    assert_eq!(snapshot.value(&id("O1"), &id("F1")), Some(Value::from("v")));
}
