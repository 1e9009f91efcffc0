// tests/pipeline.rs

//! End-to-end pipeline runs against a fake toolchain.

mod common;

use common::{CountingFetcher, FakeMeson, RecordingTarget, metadata, meson, upstream, workspace};
use forgeline::package::{FileRules, PackageRef, PackagingSpec, SubpackageSpec};
use forgeline::patch::PatchSet;
use forgeline::target::{TarballDistribution, inspect};
use forgeline::{BuildPipeline, BuildRecipe, PipelineExecutor, PipelineState, Stage};
use std::fs;
use std::path::Path;
use std::sync::Arc;

const FILE: &str = "line one\nline two\nline three\n";

const P1: &str = "\
--- a/src/file.txt
+++ b/src/file.txt
@@ -1,3 +1,3 @@
 line one
-line two
+line 2
 line three
";

const P2_CONFLICT: &str = "\
--- a/src/file.txt
+++ b/src/file.txt
@@ -1,3 +1,3 @@
 line one
-line TWO
+line deux
 line three
";

fn patch_set(root: &Path, patches: &[(&str, &str)]) -> PatchSet {
    let dir = root.join("patches");
    fs::create_dir_all(&dir).unwrap();
    for (name, body) in patches {
        fs::write(dir.join(name), body).unwrap();
    }
    PatchSet::new(dir)
}

#[test]
fn test_one_build_fans_out_to_every_target() {
    let (temp, config) = workspace();
    let source = upstream(temp.path(), "zchunk", &[("src/file.txt", FILE)]);
    let tools = Arc::new(FakeMeson::default());
    let recorder = Arc::new(RecordingTarget::new("ubuntu"));

    let recipe = BuildRecipe::builder(meson(), Arc::new(CountingFetcher::new(&source)))
        .patch(patch_set(temp.path(), &[("0001-two.patch", P1)]))
        .build()
        .unwrap();
    let pipeline = BuildPipeline::new("zchunk", recipe)
        .target(
            Arc::new(TarballDistribution::new("debian")),
            metadata("zchunk", "zchunk library"),
        )
        .target(recorder.clone(), metadata("zchunk", "zchunk library"));

    let executor = PipelineExecutor::new(&config)
        .unwrap()
        .with_command_executor(tools.clone());
    let report = executor.run(&pipeline);

    assert!(report.succeeded(), "{:?}", report.error);
    assert_eq!(tools.stages(), vec!["configure", "build", "install"]);
    assert_eq!(recorder.call_count(), 1);
    assert_eq!(report.patches_applied, vec!["0001-two.patch"]);
    assert_eq!(report.targets.len(), 2);
    assert!(report.targets.iter().all(|t| t.succeeded()));

    // The patched file made it into the package
    let debian = inspect(&config.output_dir.join("debian")).unwrap();
    assert_eq!(debian.len(), 1);
    assert!(debian[0].files.contains(&"usr/share/zchunk/file.txt".to_string()));
    assert_eq!(inspect(&config.output_dir.join("ubuntu")).unwrap().len(), 1);

    // Both targets saw the identical staged tree
    let seen = recorder.seen.lock().unwrap();
    assert_eq!(seen[0], debian[0].files);
}

#[test]
fn test_rerun_is_idempotent() {
    let (temp, config) = workspace();
    let source = upstream(temp.path(), "comps", &[]);
    let tools = Arc::new(FakeMeson::default());
    let fetcher = Arc::new(CountingFetcher::new(&source));

    let recipe = BuildRecipe::builder(meson(), fetcher.clone())
        .option("ENABLE_DOCS", false)
        .build()
        .unwrap();
    let pipeline = BuildPipeline::new("comps", recipe).target(
        Arc::new(TarballDistribution::new("debian")),
        metadata("comps", "comps library"),
    );
    let executor = PipelineExecutor::new(&config)
        .unwrap()
        .with_command_executor(tools.clone());

    let first = executor.run(&pipeline);
    let listing = |dir: &Path| {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    };
    let before = listing(&config.output_dir.join("debian"));

    let second = executor.run(&pipeline);
    assert!(first.succeeded() && second.succeeded());
    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(first.fingerprint, second.fingerprint);
    assert_eq!(tools.count("install"), 1);
    assert_eq!(fetcher.fetch_count(), 1);
    assert_eq!(
        second.history,
        vec![
            PipelineState::Pending,
            PipelineState::Built,
            PipelineState::Packaged,
            PipelineState::Succeeded
        ]
    );
    assert_eq!(listing(&config.output_dir.join("debian")), before);

    let first_paths: Vec<_> = first.artifacts().map(|a| a.path.clone()).collect();
    let second_paths: Vec<_> = second.artifacts().map(|a| a.path.clone()).collect();
    assert_eq!(first_paths, second_paths);
}

#[test]
fn test_changed_inputs_rebuild() {
    let (temp, config) = workspace();
    let source = upstream(temp.path(), "repo", &[]);
    let tools = Arc::new(FakeMeson::default());
    let executor = PipelineExecutor::new(&config)
        .unwrap()
        .with_command_executor(tools.clone());

    let pipeline = |zchunk: bool| {
        let recipe = BuildRecipe::builder(meson(), Arc::new(CountingFetcher::new(&source)))
            .option("WITH_ZCHUNK", zchunk)
            .build()
            .unwrap();
        BuildPipeline::new("repo", recipe).target(
            Arc::new(TarballDistribution::new("debian")),
            metadata("repo", "repository downloader"),
        )
    };

    let a = executor.run(&pipeline(true));
    let b = executor.run(&pipeline(false));
    assert!(a.succeeded() && b.succeeded());
    assert_ne!(a.fingerprint, b.fingerprint);
    assert!(!b.cache_hit);
    assert_eq!(tools.count("install"), 2);

    // Editing the upstream tree changes the identity of a directory source
    fs::write(source.join("NEWS"), "1.0\n").unwrap();
    let c = executor.run(&pipeline(true));
    assert!(!c.cache_hit);
    assert_eq!(tools.count("install"), 3);
}

#[test]
fn test_unpinned_source_fetches_before_cache_lookup() {
    let (temp, config) = workspace();
    let source = upstream(temp.path(), "solv", &[]);
    let tools = Arc::new(FakeMeson::default());
    let fetcher = Arc::new(CountingFetcher::new(&source).unpinned());
    let recipe = BuildRecipe::builder(meson(), fetcher.clone()).build().unwrap();
    let pipeline = BuildPipeline::new("solv", recipe).target(
        Arc::new(TarballDistribution::new("debian")),
        metadata("solv", "package solver"),
    );
    let executor = PipelineExecutor::new(&config)
        .unwrap()
        .with_command_executor(tools.clone());

    let first = executor.run(&pipeline);
    let second = executor.run(&pipeline);
    assert!(second.succeeded());
    assert!(second.cache_hit);
    assert_eq!(fetcher.fetch_count(), 2);
    assert_eq!(tools.count("install"), 1);
    assert_eq!(first.revision, second.revision);
    assert_eq!(
        second.history,
        vec![
            PipelineState::Pending,
            PipelineState::Fetched,
            PipelineState::Built,
            PipelineState::Packaged,
            PipelineState::Succeeded
        ]
    );
}

#[test]
fn test_patch_conflict_fails_and_leaves_tree_untouched() {
    let (temp, mut config) = workspace();
    config.keep_workdirs = true;
    let source = upstream(temp.path(), "rpm", &[("src/file.txt", FILE)]);
    let tools = Arc::new(FakeMeson::default());

    let recipe = BuildRecipe::builder(meson(), Arc::new(CountingFetcher::new(&source)))
        .patch(patch_set(
            temp.path(),
            &[("0001-two.patch", P1), ("0002-deux.patch", P2_CONFLICT)],
        ))
        .build()
        .unwrap();
    let pipeline = BuildPipeline::new("rpm", recipe).target(
        Arc::new(TarballDistribution::new("debian")),
        metadata("rpm", "RPM shared library"),
    );
    let report = PipelineExecutor::new(&config)
        .unwrap()
        .with_command_executor(tools.clone())
        .run(&pipeline);

    assert_eq!(report.state, PipelineState::Failed(Stage::Patch));
    let error = report.error.unwrap();
    assert!(error.contains("0002-deux.patch"), "{}", error);
    assert!(error.contains("src/file.txt"), "{}", error);
    assert!(tools.stages().is_empty());
    assert!(report.log.contains("=== failed: patch ==="));

    // Neither the first patch nor the second touched the working copy
    let worked = config.work_root.join("rpm/source/src/file.txt");
    assert_eq!(fs::read_to_string(worked).unwrap(), FILE);
    assert_eq!(fs::read_to_string(source.join("src/file.txt")).unwrap(), FILE);
    assert!(!config.output_dir.join("debian").exists());
}

#[test]
fn test_target_failure_does_not_undo_other_targets() {
    let (temp, config) = workspace();
    let source = upstream(temp.path(), "dnf", &[]);
    let tools = Arc::new(FakeMeson::default());
    let broken = Arc::new(RecordingTarget::failing("ubuntu"));

    let recipe = BuildRecipe::builder(meson(), Arc::new(CountingFetcher::new(&source)))
        .build()
        .unwrap();
    let pipeline = BuildPipeline::new("dnf", recipe)
        .target(broken.clone(), metadata("dnf", "package manager library"))
        .target(
            Arc::new(TarballDistribution::new("debian")),
            metadata("dnf", "package manager library"),
        );
    let report = PipelineExecutor::new(&config)
        .unwrap()
        .with_command_executor(tools)
        .run(&pipeline);

    assert_eq!(report.state, PipelineState::Failed(Stage::Package));
    assert!(!report.targets[0].succeeded());
    assert!(report.targets[1].succeeded());
    assert_eq!(report.targets[1].artifacts.len(), 1);
    assert!(report.targets[1].artifacts[0].path.exists());
    assert_eq!(broken.call_count(), 1);
}

#[test]
fn test_subpackage_split() {
    let (temp, config) = workspace();
    let source = upstream(temp.path(), "modulemd", &[]);
    let base = metadata("modulemd", "module metadata library");
    let spec = PackagingSpec::new(
        base,
        vec![
            SubpackageSpec::new(
                PackageRef::new("libmodulemd1").unwrap(),
                FileRules::include(["usr/lib/*.so.*"]),
            ),
            SubpackageSpec::new(
                PackageRef::new("libmodulemd-dev").unwrap(),
                FileRules::include(["usr/include"]),
            ),
            SubpackageSpec::new(
                PackageRef::new("modulemd-tools").unwrap(),
                FileRules::include(["usr/bin/**"]),
            ),
        ],
    )
    .unwrap();
    let recipe = BuildRecipe::builder(meson(), Arc::new(CountingFetcher::new(&source)))
        .build()
        .unwrap();
    let pipeline = BuildPipeline::new("modulemd", recipe)
        .target(Arc::new(TarballDistribution::new("debian")), spec);

    let report = PipelineExecutor::new(&config)
        .unwrap()
        .with_command_executor(Arc::new(FakeMeson::default()))
        .run(&pipeline);
    assert!(report.succeeded(), "{:?}", report.error);

    let manifests = inspect(&config.output_dir.join("debian")).unwrap();
    let names: Vec<&str> = manifests.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["libmodulemd-dev", "libmodulemd1", "modulemd-tools"]);
    let mut all: Vec<String> = manifests.iter().flat_map(|m| m.files.clone()).collect();
    all.sort();
    assert_eq!(
        all,
        vec![
            "usr/bin/modulemd",
            "usr/include/modulemd.h",
            "usr/lib/libmodulemd.so.1"
        ]
    );
}
