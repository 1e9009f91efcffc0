// src/build/cmake.rs

//! CMake adapter

use super::{
    BuildCommand, BuildOptions, BuildPlan, BuildSystemAdapter, INSTALL_PREFIX, OptionValue,
    TranslatedOptions, destdir,
};
use crate::error::Result;
use std::path::Path;

/// Out-of-tree CMake build driven by `cmake --build` and `cmake --install`
///
/// Every option becomes a cache variable, so no key is ever rejected:
/// booleans map to `ON`/`OFF`, everything else is passed verbatim.
#[derive(Debug, Default, Clone, Copy)]
pub struct CMake;

impl BuildSystemAdapter for CMake {
    fn name(&self) -> &'static str {
        "cmake"
    }

    fn translate_options(&self, options: &BuildOptions) -> Result<TranslatedOptions> {
        let args = options
            .iter()
            .map(|(key, value)| match value {
                OptionValue::Bool(true) => format!("-D{}=ON", key),
                OptionValue::Bool(false) => format!("-D{}=OFF", key),
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
            BuildCommand::new("cmake", build_dir)
                .arg("-S")
                .arg(source_dir.to_string_lossy())
                .arg("-B")
                .arg(build_dir.to_string_lossy())
                .arg(format!("-DCMAKE_INSTALL_PREFIX={}", INSTALL_PREFIX))
                .arg("-DCMAKE_BUILD_TYPE=RelWithDebInfo")
                .args(args.iter().cloned()),
        ]
    }

    fn build_commands(&self, plan: &BuildPlan) -> Vec<BuildCommand> {
        vec![
            BuildCommand::new("cmake", &plan.build_dir)
                .arg("--build")
                .arg(plan.build_dir.to_string_lossy())
                .arg("--parallel")
                .arg(plan.jobs.to_string()),
        ]
    }

    fn install_commands(&self, plan: &BuildPlan, staging_root: &Path) -> Vec<BuildCommand> {
        let (key, value) = destdir(staging_root);
        vec![
            BuildCommand::new("cmake", &plan.build_dir)
                .arg("--install")
                .arg(plan.build_dir.to_string_lossy())
                .env(key, value),
        ]
    }
}
