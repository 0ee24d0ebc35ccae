use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use revtree_core::{
    Address, CacheConfig, DiffModel, Id, MemoryModel, ReadCachingModel, ReadableModel, Value,
    WritableModel,
};

fn id(prefix: &str, n: u64) -> Id {
    Id::new(format!("{prefix}{n}")).unwrap()
}

fn populated(count: u64) -> MemoryModel {
    let mut model = MemoryModel::new(Address::model(Id::new("r").unwrap(), Id::new("m").unwrap()));
    let field = Id::new("f").unwrap();
    for i in 0..count {
        let object = id("o", i);
        model.create_object(&object);
        model.create_field(&object, &field);
        model.set_value(&object, &field, Some(Value::from(i as i64)));
    }
    model
}

fn diff_to_commands(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff_to_commands");
    let field = Id::new("f").unwrap();
    for count in [100u64, 1_000, 10_000] {
        let base = populated(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let mut diff = DiffModel::new(&base);
                for i in (0..count).step_by(2) {
                    diff.set_value(&id("o", i), &field, Some(Value::from("changed")));
                }
                black_box(diff.to_command_list(false))
            })
        });
    }
    group.finish();
}

fn read_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_cache");
    let field = Id::new("f").unwrap();
    for count in [100u64, 1_000] {
        let base = populated(count);
        group.bench_with_input(BenchmarkId::new("lazy", count), &count, |b, &count| {
            b.iter(|| {
                let cache = ReadCachingModel::new(&base);
                for i in 0..count {
                    black_box(cache.value(&id("o", i), &field));
                }
            })
        });
        group.bench_with_input(BenchmarkId::new("prefetch", count), &count, |b, &count| {
            b.iter(|| {
                let cache = ReadCachingModel::with_config(&base, CacheConfig::default().with_prefetch(true));
                for i in 0..count {
                    black_box(cache.value(&id("o", i), &field));
                }
            })
        });
    }
    group.finish();
}

criterion_group!(benches, diff_to_commands, read_cache);
criterion_main!(benches);
