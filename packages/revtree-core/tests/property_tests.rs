use proptest::prelude::*;

use revtree_core::{
    AtomicCommand, Command, DiffModel, MemoryModel, Outcome, ReadWriteCachingModel, ReadableModel,
    SessionCachedModel,
};
use revtree_test_support::{apply_edit, content, edits_strategy, seeded_model};

fn execute_commands(base: &MemoryModel, commands: Vec<AtomicCommand>) -> MemoryModel {
    let mut target = base.clone();
    if let Some(command) = Command::from_commands(base.address(), commands).unwrap() {
        let outcome = target.execute(&command);
        assert_eq!(outcome, Outcome::Applied(base.revision() + 1), "{command:?}");
    }
    target
}

proptest! {
    #[test]
    fn diff_commands_reproduce_overlay(edits in edits_strategy(40)) {
        let base = seeded_model();
        let mut diff = DiffModel::new(&base);
        for edit in &edits {
            apply_edit(&mut diff, edit);
        }
        let commands = diff.to_command_list(false);
        prop_assert_eq!(commands.is_empty(), !diff.has_changes());
        let applied = execute_commands(&base, commands);
        prop_assert_eq!(content(&applied), content(&diff));
    }

    #[test]
    fn read_write_cache_commands_reproduce_overlay(edits in edits_strategy(40)) {
        let base = seeded_model();
        let mut cache = ReadWriteCachingModel::new(&base);
        for edit in &edits {
            apply_edit(&mut cache, edit);
        }
        let applied = execute_commands(&base, cache.to_command_list(false));
        prop_assert_eq!(content(&applied), content(&cache));
    }

    #[test]
    fn session_commands_reproduce_session(edits in edits_strategy(40)) {
        let base = seeded_model();
        let mut session = SessionCachedModel::from_model(&base);
        let mut plain = base.clone();
        for edit in &edits {
            prop_assert_eq!(apply_edit(&mut session, edit), apply_edit(&mut plain, edit));
        }
        prop_assert_eq!(content(&session), content(&plain));

        let applied = execute_commands(&base, session.to_command_list(false));
        prop_assert_eq!(content(&applied), content(&session));

        let mut written = base.clone();
        session.commit_to_model(&mut written);
        prop_assert_eq!(content(&written), content(&session));
    }
}
