// src/build/autotools.rs

//! Autotools adapter
//!
//! Option keys follow configure's own spelling without the leading dashes:
//!
//! | key | `true` | `false` | string/int/path |
//! |---|---|---|---|
//! | `with-x` | `--with-x` | `--without-x` | `--with-x=v` |
//! | `enable-x` | `--enable-x` | `--disable-x` | `--enable-x=v` |
//! | anything else | `--key` | skipped, warned | `--key=v` |
//!
//! Trees without a generated `configure` script are bootstrapped with
//! `autoreconf`. The build and install steps run `make`, or `ckati` when
//! the recipe asks for kati.

use super::{
    BuildCommand, BuildOptions, BuildPlan, BuildSystemAdapter, INSTALL_PREFIX, OptionValue,
    TranslatedOptions,
};
use crate::error::Result;
use std::path::Path;

#[derive(Debug, Default, Clone, Copy)]
pub struct AutoTools {
    use_kati: bool,
}

impl AutoTools {
    pub fn new() -> Self {
        Self { use_kati: false }
    }

    pub fn with_kati() -> Self {
        Self { use_kati: true }
    }

    pub fn uses_kati(&self) -> bool {
        self.use_kati
    }

    fn make(&self, plan: &BuildPlan) -> BuildCommand {
        let program = if self.use_kati { "ckati" } else { "make" };
        BuildCommand::new(program, &plan.build_dir).arg(format!("-j{}", plan.jobs))
    }
}

fn translate_switch(key: &str, value: &OptionValue) -> std::result::Result<String, String> {
    let negated = key
        .strip_prefix("with-")
        .map(|name| format!("--without-{}", name))
        .or_else(|| key.strip_prefix("enable-").map(|name| format!("--disable-{}", name)));

    match value {
        OptionValue::Bool(true) => Ok(format!("--{}", key)),
        OptionValue::Bool(false) => negated.ok_or_else(|| {
            format!("option '{}' has no negative form and was skipped", key)
        }),
        other => Ok(format!("--{}={}", key, other)),
    }
}

impl BuildSystemAdapter for AutoTools {
    fn name(&self) -> &'static str {
        if self.use_kati {
            "autotools+kati"
        } else {
            "autotools"
        }
    }

    fn translate_options(&self, options: &BuildOptions) -> Result<TranslatedOptions> {
        let mut translated = TranslatedOptions::default();
        for (key, value) in options.iter() {
            let key = key.trim_start_matches('-');
            match translate_switch(key, value) {
                Ok(arg) => translated.args.push(arg),
                Err(warning) => translated.warnings.push(warning),
            }
        }
        Ok(translated)
    }

    fn configure_commands(
        &self,
        source_dir: &Path,
        build_dir: &Path,
        args: &[String],
    ) -> Vec<BuildCommand> {
        let mut commands = Vec::new();
        if !source_dir.join("configure").exists() {
            commands.push(
                BuildCommand::new("autoreconf", source_dir)
                    .arg("--install")
                    .arg("--force"),
            );
        }
        commands.push(
            BuildCommand::new("sh", build_dir)
                .arg(source_dir.join("configure").to_string_lossy())
                .arg(format!("--prefix={}", INSTALL_PREFIX))
                .args(args.iter().cloned()),
        );
        commands
    }

    fn build_commands(&self, plan: &BuildPlan) -> Vec<BuildCommand> {
        vec![self.make(plan)]
    }

    fn install_commands(&self, plan: &BuildPlan, staging_root: &Path) -> Vec<BuildCommand> {
        vec![
            self.make(plan)
                .arg("install")
                .arg(format!("DESTDIR={}", staging_root.display())),
        ]
    }
}
