use revtree_core::{
    Address, AtomicCommand, CacheConfig, Id, MemoryRepository, Outcome, ReadCachingModel,
    ReadWriteCachingModel, ReadableModel, RevisionCheck, SessionCachedModel, TransactionBuilder,
    Value, WritableModel, WritableRepository,
};

fn id(s: &str) -> Id {
    Id::new(s).unwrap()
}

fn model_address() -> Address {
    Address::model(id("repo"), id("m"))
}

/// `a.x = 1`, `a.y = 2`, `b.x = 3`, all written at revision 1.
fn seeded_repo() -> MemoryRepository {
    let mut repo = MemoryRepository::new(id("repo"));
    repo.create_model(&id("m"));
    let mut builder = TransactionBuilder::new(model_address()).unwrap();
    for object in ["a", "b"] {
        builder
            .add_command(AtomicCommand::add_object(model_address().with_object(id(object)), RevisionCheck::Safe))
            .unwrap();
    }
    for (object, field, value) in [("a", "x", 1), ("a", "y", 2), ("b", "x", 3)] {
        let field = model_address().with_object(id(object)).with_field(id(field));
        builder
            .add_command(AtomicCommand::add_field(field.clone(), RevisionCheck::Safe))
            .unwrap();
        builder
            .add_command(AtomicCommand::add_value(field, Value::from(value), RevisionCheck::New))
            .unwrap();
    }
    assert_eq!(repo.execute(&builder.build().unwrap()), Outcome::Applied(1));
    repo
}

#[test]
fn snapshot_seeded_cache_never_reaches_the_base() {
    let repo = seeded_repo();
    let base = repo.memory_model(&id("m")).unwrap();
    let cache = ReadCachingModel::from_snapshot(base, &repo, CacheConfig::default());
    assert_eq!(cache.base_reads(), 1);

    assert_eq!(cache.object_ids(), vec![id("a"), id("b")]);
    assert_eq!(cache.field_ids(&id("a")), vec![id("x"), id("y")]);
    assert_eq!(cache.value(&id("b"), &id("x")), Some(Value::from(3)));
    assert!(!cache.has_object(&id("zzz")));
    assert!(!cache.has_field(&id("a"), &id("zzz")));
    assert_eq!(cache.field_revision(&id("a"), &id("y")), Some(1));
    assert_eq!(cache.base_reads(), 1);
}

#[test]
fn lazy_cache_reads_each_fact_once() {
    let repo = seeded_repo();
    let base = repo.memory_model(&id("m")).unwrap();
    let cache = ReadCachingModel::new(base);

    assert_eq!(cache.value(&id("a"), &id("x")), Some(Value::from(1)));
    let after_first = cache.base_reads();
    assert!(after_first > 0);
    for _ in 0..3 {
        assert_eq!(cache.value(&id("a"), &id("x")), Some(Value::from(1)));
        assert!(!cache.has_object(&id("missing")));
        assert!(!cache.has_object(&id("missing")));
    }
    assert_eq!(cache.base_reads(), after_first + 1);
}

#[test]
fn caches_hand_back_their_base() {
    let repo = seeded_repo();
    let base = repo.memory_model(&id("m")).unwrap();

    let cache = ReadCachingModel::new(base);
    assert_eq!(cache.value(&id("a"), &id("x")), Some(Value::from(1)));
    assert!(std::ptr::eq(cache.into_base(), base));

    let mut overlay = ReadWriteCachingModel::new(base.clone());
    assert!(overlay.remove_object(&id("a")));
    let unchanged = overlay.into_base();
    assert_eq!(&unchanged, base);
    assert!(unchanged.has_object(&id("a")));
}

#[test]
fn read_write_cache_commits_through_the_repository() {
    let mut repo = seeded_repo();
    let snapshot = repo.memory_model(&id("m")).unwrap().clone();

    let mut cache = ReadWriteCachingModel::new(&snapshot);
    assert!(cache.remove_object(&id("b")));
    assert!(cache.set_value(&id("a"), &id("x"), Some(Value::from("changed"))));
    assert!(cache.remove_field(&id("a"), &id("y")));
    assert!(cache.create_object(&id("c")));
    assert!(cache.create_field(&id("c"), &id("z")));
    assert!(cache.set_value(&id("c"), &id("z"), Some(Value::from(5))));
    assert_eq!(cache.removed_objects(), vec![id("b")]);
    assert_eq!(cache.added_objects(), vec![id("c")]);

    let mut builder = TransactionBuilder::new(model_address()).unwrap();
    cache.commit_to(&mut builder, false).unwrap();
    assert_eq!(repo.execute(&builder.build().unwrap()), Outcome::Applied(2));

    let applied = repo.memory_model(&id("m")).unwrap();
    assert_eq!(applied.object_ids(), cache.object_ids());
    assert_eq!(applied.field_ids(&id("a")), vec![id("x")]);
    assert_eq!(applied.value(&id("a"), &id("x")), Some(Value::from("changed")));
    assert_eq!(applied.value(&id("c"), &id("z")), Some(Value::from(5)));

    cache.clear();
    assert!(!cache.has_changes());
    assert!(cache.has_object(&id("b")));
}

#[test]
fn read_write_cache_detects_concurrent_changes() {
    let mut repo = seeded_repo();
    let snapshot = repo.memory_model(&id("m")).unwrap().clone();
    let mut cache = ReadWriteCachingModel::new(&snapshot);
    cache.set_value(&id("b"), &id("x"), Some(Value::from(30)));

    let concurrent = AtomicCommand::remove_value(
        model_address().with_object(id("b")).with_field(id("x")),
        RevisionCheck::Exact(1),
    );
    assert!(repo.execute(&concurrent.into()).is_applied());

    let command = cache.to_transaction(false).unwrap().unwrap();
    assert_eq!(repo.execute(&command), Outcome::Failed);

    let forced = cache.to_transaction(true).unwrap().unwrap();
    assert_eq!(repo.execute(&forced), Outcome::Applied(3));
    assert_eq!(
        repo.memory_model(&id("m")).unwrap().value(&id("b"), &id("x")),
        Some(Value::from(30))
    );
}

#[test]
fn session_commits_twice_after_marking() {
    let mut repo = seeded_repo();
    let mut session = SessionCachedModel::from_model(repo.memory_model(&id("m")).unwrap());

    assert!(session.set_value(&id("a"), &id("x"), Some(Value::from(10))));
    assert!(session.create_object(&id("c")));
    assert!(session.create_field(&id("c"), &id("f")));
    let first = session.to_transaction(false).unwrap().unwrap();
    let Outcome::Applied(revision) = repo.execute(&first) else {
        panic!("first commit failed");
    };
    session.mark_as_committed(revision);
    assert!(!session.has_changes());
    assert_eq!(session.revision(), revision);
    assert_eq!(session.field_revision(&id("a"), &id("x")), Some(revision));
    assert_eq!(session.object_revision(&id("c")), Some(revision));

    // A second round must check against the revisions of the first commit.
    assert!(session.set_value(&id("a"), &id("x"), Some(Value::from(11))));
    assert!(session.set_value(&id("c"), &id("f"), Some(Value::from("new"))));
    assert!(session.remove_object(&id("b")));
    let second = session.to_command_list(false);
    assert!(second.iter().any(|c| c.check() == RevisionCheck::Exact(revision)));
    let command = session.to_transaction(false).unwrap().unwrap();
    let Outcome::Applied(next) = repo.execute(&command) else {
        panic!("second commit failed");
    };
    assert_eq!(next, revision + 1);
    session.mark_as_committed(next);

    let applied = repo.memory_model(&id("m")).unwrap();
    assert_eq!(session.object_ids(), applied.object_ids());
    assert_eq!(applied.value(&id("a"), &id("x")), Some(Value::from(11)));
    assert_eq!(applied.value(&id("c"), &id("f")), Some(Value::from("new")));
    assert!(!session.has_object(&id("b")));
}

#[test]
fn session_commit_to_model_matches_executed_commands() {
    let repo = seeded_repo();
    let base = repo.memory_model(&id("m")).unwrap();
    let mut session = SessionCachedModel::from_model(base);
    session.remove_object(&id("a"));
    session.create_object(&id("a"));
    session.create_field(&id("a"), &id("fresh"));
    session.set_value(&id("a"), &id("fresh"), Some(Value::from(1)));
    session.remove_field(&id("b"), &id("x"));

    let mut plain = base.clone();
    session.commit_to_model(&mut plain);

    let mut executed = base.clone();
    let command = session.to_transaction(false).unwrap().unwrap();
    assert!(executed.execute(&command).is_applied());

    for model in [&plain, &executed] {
        assert_eq!(model.object_ids(), vec![id("a"), id("b")]);
        assert_eq!(model.field_ids(&id("a")), vec![id("fresh")]);
        assert_eq!(model.value(&id("a"), &id("fresh")), Some(Value::from(1)));
        assert!(model.field_ids(&id("b")).is_empty());
    }
}
