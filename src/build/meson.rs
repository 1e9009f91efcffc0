// src/build/meson.rs

//! Meson adapter

use super::{
    BuildCommand, BuildOptions, BuildPlan, BuildSystemAdapter, INSTALL_PREFIX, OptionValue,
    TranslatedOptions, destdir,
};
use crate::error::Result;
use std::path::Path;

/// `meson setup` + `meson compile` + `meson install`
#[derive(Debug, Default, Clone, Copy)]
pub struct Meson;

impl BuildSystemAdapter for Meson {
    fn name(&self) -> &'static str {
        "meson"
    }

    fn translate_options(&self, options: &BuildOptions) -> Result<TranslatedOptions> {
        let args = options
            .iter()
            .map(|(key, value)| match value {
                OptionValue::Bool(b) => format!("-D{}={}", key, b),
                other => format!("-D{}={}", key, other),
            })
            .collect();
        Ok(TranslatedOptions {
            args,
            warnings: Vec::new(),
        })
    }

    fn configure_commands(
        &self,
        source_dir: &Path,
        build_dir: &Path,
        args: &[String],
    ) -> Vec<BuildCommand> {
        vec![
            BuildCommand::new("meson", source_dir)
                .arg("setup")
                .arg(build_dir.to_string_lossy())
                .arg(source_dir.to_string_lossy())
                .arg(format!("--prefix={}", INSTALL_PREFIX))
                .arg("--buildtype=plain")
                .args(args.iter().cloned()),
        ]
    }

    fn build_commands(&self, plan: &BuildPlan) -> Vec<BuildCommand> {
        vec![
            BuildCommand::new("meson", &plan.build_dir)
                .arg("compile")
                .arg("-C")
                .arg(plan.build_dir.to_string_lossy())
                .arg("-j")
                .arg(plan.jobs.to_string()),
        ]
    }

    fn install_commands(&self, plan: &BuildPlan, staging_root: &Path) -> Vec<BuildCommand> {
        let (key, value) = destdir(staging_root);
        vec![
            BuildCommand::new("meson", &plan.build_dir)
                .arg("install")
                .arg("-C")
                .arg(plan.build_dir.to_string_lossy())
                .arg("--no-rebuild")
                .env(key, value),
        ]
    }
}
