//! Task Manifest Integration Tests
//!
//! The bundled sample manifest must parse and seed workspaces.

use std::sync::Arc;
use tempfile::TempDir;
use toolsmith::task::Verifier;
use toolsmith::{HostCommandRunner, TaskManifest};

const SAMPLE: &str = include_str!("../demos/tasks.toml");

#[test]
fn test_sample_manifest_parses() {
    let manifest = TaskManifest::parse(SAMPLE).unwrap();
    assert_eq!(manifest.ids(), vec!["hello_world", "fibonacci", "fix_the_bug"]);

    let fib = manifest.get("fibonacci").unwrap();
    assert!(fib.tags.contains(&"hidden-tests".to_string()));
    assert!(matches!(fib.verify, Verifier::TestsPass { .. }));
    assert!(fib.files["test_fibonacci.py"].starts_with("from fibonacci import fibonacci"));

    let hello = manifest.get("hello_world").unwrap();
    assert!(matches!(&hello.verify, Verifier::AllOf { checks } if checks.len() == 2));
}

#[tokio::test]
async fn test_sample_setup_seeds_files() {
    let tasks = TaskManifest::parse(SAMPLE)
        .unwrap()
        .into_tasks(Arc::new(HostCommandRunner::default()));
    let task = tasks.iter().find(|t| t.id() == "fix_the_bug").unwrap();

    let temp = TempDir::new().unwrap();
    task.setup(temp.path()).await.unwrap();

    let seeded = |name: &str| std::fs::read_to_string(temp.path().join(name)).unwrap();
    assert!(seeded("word_utils.py").contains("text.split(\" \")"));
    assert!(seeded("test_word_utils.py").contains("\"hello\\tworld\\nfoo\""));
    assert!(!temp.path().join("hello.py").exists());
}
