// tests/fetch.rs

//! Fetchers driven through pipelines: moving git refs, release discovery
//! and checksum verification.

mod common;

use common::{FakeMeson, git, have_git, metadata, meson, workspace};
use flate2::Compression;
use flate2::write::GzEncoder;
use forgeline::fetch::{
    DiscoverDownloadVerifyUnpackFetcher, GitRepoFetcher, IndexPageDiscovery, SourceCache,
};
use forgeline::hash::{HashAlgorithm, hash_file};
use forgeline::target::TarballDistribution;
use forgeline::{BuildPipeline, BuildRecipe, PipelineExecutor, PipelineState, Stage};
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use url::Url;

/// Write `<dir>/<stem>.tar.gz` wrapping a meson project in `<stem>/`
fn release(dir: &Path, stem: &str) -> std::path::PathBuf {
    let path = dir.join(format!("{}.tar.gz", stem));
    let file = File::create(&path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    let body = format!("project('zchunk', 'c', version: '{}')\n", stem);
    let mut header = tar::Header::new_gnu();
    header.set_size(body.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, format!("{}/meson.build", stem), body.as_bytes())
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap();
    path
}

fn sidecar(archive: &Path, digest: &str) {
    let name = archive.file_name().unwrap().to_string_lossy();
    fs::write(
        archive.with_file_name(format!("{}.sha256", name)),
        format!("{}  {}\n", digest, name),
    )
    .unwrap();
}

fn release_index(dir: &Path) -> String {
    fs::create_dir_all(dir).unwrap();
    for stem in ["zchunk-1.1.9", "zchunk-1.1.10"] {
        let archive = release(dir, stem);
        let sum = hash_file(HashAlgorithm::Sha256, &archive).unwrap();
        sidecar(&archive, &sum.value);
    }
    fs::write(
        dir.join("index.html"),
        "<a href=\"zchunk-1.1.9.tar.gz\">1.1.9</a>\n\
         <a href=\"zchunk-1.1.10.tar.gz\">1.1.10</a>\n\
         <a href=\"zchunk-1.1.10.tar.gz.sha256\">sum</a>\n",
    )
    .unwrap();
    Url::from_file_path(dir.join("index.html")).unwrap().to_string()
}

fn index_fetcher(index: &str) -> DiscoverDownloadVerifyUnpackFetcher {
    DiscoverDownloadVerifyUnpackFetcher::new(
        IndexPageDiscovery::new(index, r"zchunk-(?P<version>[0-9.]+[0-9])\.tar\.gz").unwrap(),
    )
}

#[test]
fn test_index_discovery_picks_newest_release() {
    let (temp, config) = workspace();
    let index = release_index(&temp.path().join("mirror"));
    let fetcher = index_fetcher(&index);

    let cache = SourceCache::new(&config);
    let dest = temp.path().join("checkout");
    let tree = cache.checkout(&fetcher, &dest, &config).unwrap();

    let meson_build = fs::read_to_string(dest.join("meson.build")).unwrap();
    assert!(meson_build.contains("zchunk-1.1.10"));
    let expected = hash_file(
        HashAlgorithm::Sha256,
        &temp.path().join("mirror/zchunk-1.1.10.tar.gz"),
    )
    .unwrap();
    assert_eq!(tree.revision(), Some(expected.to_prefixed_string().as_str()));
    assert!(cache.entry_path(&fetcher).join("meson.build").exists());
}

#[test]
fn test_bad_sidecar_fails_pipeline_in_fetch() {
    let (temp, config) = workspace();
    let mirror = temp.path().join("mirror");
    let index = release_index(&mirror);
    sidecar(&mirror.join("zchunk-1.1.10.tar.gz"), &"0".repeat(64));

    let recipe = BuildRecipe::builder(meson(), Arc::new(index_fetcher(&index)))
        .build()
        .unwrap();
    let pipeline = BuildPipeline::new("zchunk", recipe).target(
        Arc::new(TarballDistribution::new("debian")),
        metadata("zchunk", "zchunk library"),
    );
    let tools = Arc::new(FakeMeson::default());
    let report = PipelineExecutor::new(&config)
        .unwrap()
        .with_command_executor(tools.clone())
        .run(&pipeline);

    assert_eq!(report.state, PipelineState::Failed(Stage::Fetch));
    assert!(tools.stages().is_empty());
    assert!(!config.output_dir.join("debian").exists());
    let entry = SourceCache::new(&config).entry_path(pipeline.recipe().fetcher());
    assert!(!entry.exists());
}

#[test]
fn test_moving_git_branch_rebuilds() {
    if !have_git() {
        eprintln!("Skipping: git not installed");
        return;
    }
    let (temp, config) = workspace();
    let repo = temp.path().join("upstream/librepo");
    fs::create_dir_all(&repo).unwrap();
    git(&repo, &["init", "--quiet", "-b", "master"]);
    fs::write(repo.join("meson.build"), "project('librepo', 'c')\n").unwrap();
    git(&repo, &["add", "."]);
    git(&repo, &["commit", "--quiet", "-m", "init"]);

    let fetcher = GitRepoFetcher::new(repo.to_string_lossy()).with_refspec("master");
    let recipe = BuildRecipe::builder(meson(), Arc::new(fetcher)).build().unwrap();
    let pipeline = BuildPipeline::new("repo", recipe).target(
        Arc::new(TarballDistribution::new("debian")),
        metadata("repo", "repository downloader"),
    );
    let tools = Arc::new(FakeMeson::default());
    let executor = PipelineExecutor::new(&config)
        .unwrap()
        .with_command_executor(tools.clone());

    let first = executor.run(&pipeline);
    assert!(first.succeeded(), "{:?}", first.error);
    assert_eq!(first.revision.as_deref(), Some(git(&repo, &["rev-parse", "HEAD"]).as_str()));

    let unchanged = executor.run(&pipeline);
    assert!(unchanged.cache_hit);
    assert_eq!(tools.count("install"), 1);

    fs::write(repo.join("NEWS"), "moved\n").unwrap();
    git(&repo, &["add", "."]);
    git(&repo, &["commit", "--quiet", "-m", "move"]);

    let moved = executor.run(&pipeline);
    assert!(moved.succeeded());
    assert!(!moved.cache_hit);
    assert_ne!(moved.revision, first.revision);
    assert_ne!(moved.fingerprint, first.fingerprint);
    assert_eq!(tools.count("install"), 2);
}

#[test]
fn test_offline_without_cache_is_fetch_failure() {
    let (temp, config) = workspace();
    let config = config.with_offline(true);
    let index = release_index(&temp.path().join("mirror"));

    let recipe = BuildRecipe::builder(meson(), Arc::new(index_fetcher(&index)))
        .build()
        .unwrap();
    let pipeline = BuildPipeline::new("zchunk", recipe).target(
        Arc::new(TarballDistribution::new("debian")),
        metadata("zchunk", "zchunk library"),
    );
    let report = PipelineExecutor::new(&config)
        .unwrap()
        .with_command_executor(Arc::new(FakeMeson::default()))
        .run(&pipeline);
    assert_eq!(report.state, PipelineState::Failed(Stage::Fetch));
    assert!(report.error.unwrap().contains("offline"));
}

#[test]
fn test_concurrent_checkouts_share_one_entry() {
    let (temp, config) = workspace();
    let source = common::upstream(temp.path(), "libcomps", &[("src/file.txt", "comps\n")]);
    let fetcher = Arc::new(
        common::CountingFetcher::new(&source).slow(std::time::Duration::from_millis(20)),
    );
    let cache = SourceCache::new(&config);

    std::thread::scope(|scope| {
        for i in 0..4 {
            let fetcher = fetcher.clone();
            let cache = cache.clone();
            let config = &config;
            let dest = temp.path().join(format!("work/{}/source", i));
            scope.spawn(move || {
                cache.checkout(fetcher.as_ref(), &dest, config).unwrap();
                assert_eq!(
                    fs::read_to_string(dest.join("src/file.txt")).unwrap(),
                    "comps\n"
                );
            });
        }
    });

    assert_eq!(fetcher.peak_concurrency(), 1);
    let entries: Vec<String> = fs::read_dir(cache.root())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| !name.starts_with('.'))
        .collect();
    assert_eq!(entries, vec![SourceCache::key_for(fetcher.as_ref())]);
}
