use proptest::prelude::*;

use revtree_core::{
    CacheConfig, DiffModel, ReadCachingModel, ReadWriteCachingModel, SessionCachedModel,
};
use revtree_test_support::{
    assert_same_content, conformance, edits_strategy, init_tracing, seeded_model, CountingModel,
};

macro_rules! conformance_suite {
    ($name:ident, |$base:ident| $make:expr) => {
        mod $name {
            use super::*;

            #[test]
            fn reads() {
                init_tracing();
                let seeded = seeded_model();
                let $base = &seeded;
                let model = $make;
                conformance::reads(&model);
            }

            #[test]
            fn object_lifecycle() {
                let seeded = seeded_model();
                let $base = &seeded;
                let mut model = $make;
                conformance::object_lifecycle(&mut model);
            }

            #[test]
            fn field_lifecycle() {
                let seeded = seeded_model();
                let $base = &seeded;
                let mut model = $make;
                conformance::field_lifecycle(&mut model);
            }

            #[test]
            fn value_semantics() {
                let seeded = seeded_model();
                let $base = &seeded;
                let mut model = $make;
                conformance::value_semantics(&mut model);
            }

            proptest! {
                #[test]
                fn matches_plain_writes(edits in edits_strategy(30)) {
                    let seeded = seeded_model();
                    let $base = &seeded;
                    let mut model = $make;
                    conformance::matches_plain_writes(&mut model, &edits);
                }
            }
        }
    };
}

conformance_suite!(memory, |base| base.clone());
conformance_suite!(diff, |base| DiffModel::new(base));
conformance_suite!(read_cache, |base| ReadCachingModel::new(base));
conformance_suite!(read_cache_prefetched, |base| ReadCachingModel::with_config(
    base,
    CacheConfig::default().with_prefetch(true)
));
conformance_suite!(read_write_cache, |base| ReadWriteCachingModel::new(base));
conformance_suite!(session, |base| SessionCachedModel::from_model(base));

#[test]
fn read_cache_consults_base_once_per_fact() {
    init_tracing();
    let cache = ReadCachingModel::new(CountingModel::new(seeded_model()));

    conformance::reads(&cache);
    let after_first_pass = cache.base().reads();
    assert!(after_first_pass > 0);
    assert_eq!(cache.base_reads(), after_first_pass);

    conformance::reads(&cache);
    assert_eq!(cache.base().reads(), after_first_pass);
}

#[test]
fn prefetched_cache_is_served_from_one_pass() {
    let cache = ReadCachingModel::with_config(
        CountingModel::new(seeded_model()),
        CacheConfig::default()
            .with_prefetch(true)
            .with_warn_on_uncached_access(true),
    );
    let prefetch_reads = cache.base().reads();
    assert_eq!(cache.base_reads(), 1);

    conformance::reads(&cache);
    assert_eq!(cache.base().reads(), prefetch_reads);
}

#[test]
fn overlay_edits_never_reach_the_base() {
    let mut cache = ReadWriteCachingModel::new(CountingModel::new(seeded_model()));
    conformance::object_lifecycle(&mut cache);
    conformance::field_lifecycle(&mut cache);

    assert!(cache.has_changes());
    assert_same_content(cache.base(), &seeded_model());
}
