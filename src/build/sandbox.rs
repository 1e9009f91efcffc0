// src/build/sandbox.rs

//! Isolation policy for build and install commands
//!
//! A recipe may carry a [`SandboxPolicy`]; the adapter hands it to the
//! executor for the build and install stages only. No policy (or a policy
//! with `disable = true`) means commands run with the caller's privileges
//! and network.

use crate::hash::Hasher;
use serde::{Deserialize, Serialize};
use std::io;
use std::os::unix::process::CommandExt;
use std::process::Command;

use nix::sched::{CloneFlags, unshare};
use nix::sys::resource::{Resource, setrlimit};

/// Resource and namespace restrictions applied to a child process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxPolicy {
    /// Turn the policy off entirely
    pub disable: bool,
    /// Run in a private network namespace
    pub deny_network: bool,
    /// Address space limit in bytes (0 = unlimited)
    pub memory_limit: u64,
    /// CPU time limit in seconds (0 = unlimited)
    pub cpu_time_limit: u64,
    /// Largest file the build may write, in bytes (0 = unlimited)
    pub file_size_limit: u64,
    /// Maximum number of processes for the user (0 = unlimited)
    pub nproc_limit: u64,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            disable: false,
            deny_network: true,
            memory_limit: 0,
            cpu_time_limit: 0,
            file_size_limit: 0,
            nproc_limit: 0,
        }
    }
}

impl SandboxPolicy {
    /// A policy that enforces nothing
    pub fn disabled() -> Self {
        Self {
            disable: true,
            deny_network: false,
            ..Self::default()
        }
    }

    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit = bytes;
        self
    }

    pub fn with_cpu_time_limit(mut self, seconds: u64) -> Self {
        self.cpu_time_limit = seconds;
        self
    }

    pub fn allow_network(mut self) -> Self {
        self.deny_network = false;
        self
    }

    /// Whether anything would actually be enforced
    pub fn is_active(&self) -> bool {
        !self.disable
            && (self.deny_network
                || self.memory_limit > 0
                || self.cpu_time_limit > 0
                || self.file_size_limit > 0
                || self.nproc_limit > 0)
    }

    /// Short description for build logs
    pub fn describe(&self) -> String {
        if !self.is_active() {
            return "none".to_string();
        }
        let mut parts = Vec::new();
        if self.deny_network {
            parts.push("no-network".to_string());
        }
        if self.memory_limit > 0 {
            parts.push(format!("mem={}", self.memory_limit));
        }
        if self.cpu_time_limit > 0 {
            parts.push(format!("cpu={}s", self.cpu_time_limit));
        }
        if self.file_size_limit > 0 {
            parts.push(format!("fsize={}", self.file_size_limit));
        }
        if self.nproc_limit > 0 {
            parts.push(format!("nproc={}", self.nproc_limit));
        }
        parts.join(",")
    }

    /// Mix the enforced restrictions into a recipe fingerprint
    ///
    /// Inactive policies add nothing, so they fingerprint like no policy.
    pub fn digest_into(&self, hasher: &mut Hasher) {
        if self.is_active() {
            hasher.field("sandbox", self.describe().as_bytes());
        }
    }

    /// Install the restrictions as a `pre_exec` hook on `cmd`
    pub fn apply(&self, cmd: &mut Command) {
        if !self.is_active() {
            return;
        }

        let mut flags = CloneFlags::empty();
        if self.deny_network {
            // Unprivileged callers need a user namespace to own the new netns
            if !nix::unistd::geteuid().is_root() {
                flags |= CloneFlags::CLONE_NEWUSER;
            }
            flags |= CloneFlags::CLONE_NEWNET;
        }
        let limits = [
            (Resource::RLIMIT_AS, self.memory_limit),
            (Resource::RLIMIT_CPU, self.cpu_time_limit),
            (Resource::RLIMIT_FSIZE, self.file_size_limit),
            (Resource::RLIMIT_NPROC, self.nproc_limit),
        ];

        // SAFETY: the hook only issues raw syscalls (unshare, setrlimit) and
        // does not allocate or take locks between fork and exec.
        unsafe {
            cmd.pre_exec(move || {
                if !flags.is_empty() {
                    unshare(flags).map_err(io::Error::from)?;
                }
                for (resource, value) in limits {
                    if value > 0 {
                        setrlimit(resource, value, value).map_err(io::Error::from)?;
                    }
                }
                Ok(())
            });
        }
    }
}

/// Check if unprivileged network isolation can work on this host
pub fn isolation_available() -> bool {
    if nix::unistd::geteuid().is_root() {
        return true;
    }

    // Debian-patched kernels gate unprivileged user namespaces
    match std::fs::read_to_string("/proc/sys/kernel/unprivileged_userns_clone") {
        Ok(content) => content.trim() == "1",
        Err(_) => true,
    }
}
