use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use revtree_core::{
    DiffModel, Id, MemoryRepository, Outcome, ReadableModel, ReadableRepository,
    TransactionBuilder, Value, WritableModel, WritableRepository,
};

#[derive(serde::Serialize)]
struct Output {
    implementation: &'static str,
    storage: &'static str,
    workload: String,
    timestamp: String,
    name: String,
    total_ops: u64,
    duration_ms: f64,
    ops_per_sec: f64,
    extra: Extra,
    source_file: Option<String>,
}

#[derive(serde::Serialize)]
struct Extra {
    count: u64,
    commands: usize,
}

fn id(prefix: &str, n: u64) -> Id {
    Id::new(format!("{prefix}{n}")).expect("generated id")
}

fn main() {
    let mut count: u64 = 200;
    let mut out_file: Option<PathBuf> = None;
    for arg in env::args().skip(1) {
        if let Some(val) = arg.strip_prefix("--count=") {
            count = val.parse().unwrap_or(count);
        } else if let Some(val) = arg.strip_prefix("--out=") {
            out_file = Some(PathBuf::from(val));
        }
    }

    let model_id = Id::new("bench").expect("model id");
    let mut repo = MemoryRepository::new(Id::new("repo").expect("repo id"));
    repo.create_model(&model_id);
    let address = repo.address().with_model(model_id.clone());
    let field = Id::new("value").expect("field id");

    let start = Instant::now();
    let snapshot = repo.memory_model(&model_id).expect("model").clone();
    let mut diff = DiffModel::new(&snapshot);
    for i in 0..count {
        let object = id("o", i);
        diff.create_object(&object);
        diff.create_field(&object, &field);
        diff.set_value(&object, &field, Some(Value::from(i as i64)));
    }
    let mut builder = TransactionBuilder::new(address).expect("model scope");
    diff.commit_to(&mut builder, false).expect("commands in scope");
    let commands = builder.len();
    let outcome = repo.execute(&builder.build().expect("non-empty"));
    assert!(matches!(outcome, Outcome::Applied(_)), "commit failed: {outcome:?}");
    let committed = repo.memory_model(&model_id).expect("model");
    assert_eq!(committed.object_ids().len() as u64, count);
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

    let output = Output {
        implementation: "core-memory",
        storage: "memory",
        workload: format!("diff-commit-{}", count),
        timestamp: chrono::Utc::now().to_rfc3339(),
        name: format!("diff-commit-{}", count),
        total_ops: count * 3,
        duration_ms,
        ops_per_sec: if duration_ms > 0.0 {
            (count as f64 * 3.0) / duration_ms * 1000.0
        } else {
            f64::INFINITY
        },
        extra: Extra { count, commands },
        source_file: out_file.as_ref().map(|p| p.display().to_string()),
    };

    let json = serde_json::to_string_pretty(&output).expect("serialize");
    if let Some(path) = out_file {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdirs");
        }
        fs::write(&path, &json).expect("write output");
    }
    println!("{}", json);
}
