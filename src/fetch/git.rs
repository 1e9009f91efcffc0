// src/fetch/git.rs

//! Git repository fetcher
//!
//! A fresh destination is populated with `git init` + `git fetch <refspec>`
//! in a staging directory and renamed into place. An existing checkout is
//! updated in place: fetch the refspec again, force-checkout the fetched
//! commit and clean untracked files, so two fetches of an unchanged ref give
//! the same tree.

use super::{SourceFetcher, SourceTree, stage_then_rename};
use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::process;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};

/// Fetches `uri` at `refspec` (a branch, tag or commit id)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRepoFetcher {
    uri: String,
    refspec: Option<String>,
}

impl GitRepoFetcher {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            refspec: None,
        }
    }

    pub fn with_refspec(mut self, refspec: impl Into<String>) -> Self {
        self.refspec = Some(refspec.into());
        self
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The requested ref; the remote's default branch when unset
    pub fn refspec(&self) -> &str {
        self.refspec.as_deref().unwrap_or("HEAD")
    }

    fn git(&self, dir: &Path, args: &[&str], config: &RunConfig) -> Result<String> {
        let mut cmd = Command::new("git");
        cmd.arg("-C")
            .arg(dir)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0");

        let output = process::run(cmd, "fetch", config.fetch_timeout, &config.cancel).map_err(
            |e| match e {
                Error::IoError(reason) => self.error(reason),
                other => other,
            },
        )?;

        if !output.success {
            return Err(self.error(format!(
                "git {} exited with {:?}: {}",
                args.first().copied().unwrap_or_default(),
                output.status,
                output.stderr.trim()
            )));
        }
        Ok(output.stdout.trim().to_string())
    }

    fn error(&self, reason: String) -> Error {
        Error::Fetch {
            source_ref: self.identity(),
            reason,
        }
    }

    fn clone_into(&self, dir: &Path, config: &RunConfig) -> Result<()> {
        info!("Cloning {} ({})", self.uri, self.refspec());
        self.git(dir, &["init", "--quiet"], config)?;
        self.git(dir, &["remote", "add", "origin", &self.uri], config)?;
        self.update(dir, config)
    }

    fn update(&self, dir: &Path, config: &RunConfig) -> Result<()> {
        self.git(
            dir,
            &["fetch", "--quiet", "--force", "--tags", "origin", self.refspec()],
            config,
        )?;
        self.git(dir, &["checkout", "--quiet", "--force", "--detach", "FETCH_HEAD"], config)?;
        self.sync_worktree(dir, config)
    }

    /// Drop local modifications and bring submodules to the recorded commits
    fn sync_worktree(&self, dir: &Path, config: &RunConfig) -> Result<()> {
        self.git(dir, &["reset", "--quiet", "--hard"], config)?;
        self.git(dir, &["clean", "-ffdxq"], config)?;
        if dir.join(".gitmodules").exists() {
            debug!("Updating submodules of {}", self.uri);
            self.git(
                dir,
                &["submodule", "update", "--init", "--recursive", "--force"],
                config,
            )?;
        }
        Ok(())
    }

    fn head(&self, dir: &Path, config: &RunConfig) -> Result<String> {
        self.git(dir, &["rev-parse", "HEAD"], config)
    }
}

impl SourceFetcher for GitRepoFetcher {
    fn kind(&self) -> &'static str {
        "git"
    }

    fn identity(&self) -> String {
        format!("git+{}#{}", self.uri, self.refspec())
    }

    /// Only a full commit id pins the tree; branches and tags can move
    fn is_pinned(&self) -> bool {
        let r = self.refspec();
        r.len() == 40 && r.bytes().all(|b| b.is_ascii_hexdigit())
    }

    fn fetch(&self, dest: &Path, config: &RunConfig) -> Result<SourceTree> {
        config.cancel.check("fetch")?;

        if dest.join(".git").is_dir() {
            if config.offline {
                debug!("Offline: reusing checkout of {} at {}", self.uri, dest.display());
                self.sync_worktree(dest, config)?;
            } else {
                info!("Updating {} ({})", self.uri, self.refspec());
                self.update(dest, config)?;
            }
        } else {
            if config.offline {
                return Err(self.error(format!(
                    "offline mode and no existing checkout at {}",
                    dest.display()
                )));
            }
            stage_then_rename(dest, |staging| self.clone_into(staging, config))?;
        }

        let revision = self.head(dest, config)?;
        debug!("{} is at {}", self.identity(), revision);
        Ok(SourceTree::new(dest, Some(revision)))
    }
}
