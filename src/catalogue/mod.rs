// src/catalogue/mod.rs

//! Recipe catalogues
//!
//! A [`Catalogue`] is a set of named units, each able to produce one
//! [`BuildPipeline`] and each declaring which other units it depends on.
//! Units are either declared in code ([`Catalogue::declare`]) or loaded
//! from a TOML file ([`Catalogue::load`], format in [`file`]).
//!
//! Producing a pipeline may itself fetch things: a unit can import its
//! subpackage layout from a companion repository. That is why pipelines
//! are produced lazily, by the runner, with the run's [`RunConfig`].

pub mod file;

pub use file::{CatalogueFile, RecipeEntry};

use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::pipeline::BuildPipeline;
use crate::recipe::RecipeGraph;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// A named producer of one build pipeline
pub trait RecipeUnit: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Names of units that must succeed before this one runs
    fn depends(&self) -> &[String];

    fn pipeline(&self, config: &RunConfig) -> Result<BuildPipeline>;
}

type MakePipeline = dyn Fn(&RunConfig) -> Result<BuildPipeline> + Send + Sync;

/// Unit backed by a closure
pub struct FnUnit {
    name: String,
    depends: Vec<String>,
    make: Box<MakePipeline>,
}

impl FnUnit {
    pub fn new<F>(name: impl Into<String>, depends: &[&str], make: F) -> Self
    where
        F: Fn(&RunConfig) -> Result<BuildPipeline> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            depends: depends.iter().map(|d| d.to_string()).collect(),
            make: Box::new(make),
        }
    }
}

impl fmt::Debug for FnUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnUnit")
            .field("name", &self.name)
            .field("depends", &self.depends)
            .finish_non_exhaustive()
    }
}

impl RecipeUnit for FnUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn depends(&self) -> &[String] {
        &self.depends
    }

    fn pipeline(&self, config: &RunConfig) -> Result<BuildPipeline> {
        (self.make)(config)
    }
}

/// Named recipe units in declaration order
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    units: Vec<Arc<dyn RecipeUnit>>,
}

impl Catalogue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a TOML catalogue; relative paths resolve against its directory
    pub fn load(path: &Path) -> Result<Self> {
        CatalogueFile::load(path)?.into_catalogue()
    }

    pub fn add(&mut self, unit: Arc<dyn RecipeUnit>) -> Result<()> {
        if self.get(unit.name()).is_some() {
            return Err(Error::ConfigError(format!(
                "Recipe {} is declared twice",
                unit.name()
            )));
        }
        self.units.push(unit);
        Ok(())
    }

    /// Declare a unit from a closure
    pub fn declare<F>(&mut self, name: &str, depends: &[&str], make: F) -> Result<()>
    where
        F: Fn(&RunConfig) -> Result<BuildPipeline> + Send + Sync + 'static,
    {
        self.add(Arc::new(FnUnit::new(name, depends, make)))
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn RecipeUnit>> {
        self.units.iter().find(|u| u.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.units.iter().map(|u| u.name()).collect()
    }

    pub fn units(&self) -> &[Arc<dyn RecipeUnit>] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Dependency graph of the catalogue
    ///
    /// Fails on dependencies that name no unit and on cycles.
    pub fn graph(&self) -> Result<RecipeGraph> {
        let mut graph = RecipeGraph::new();
        for unit in &self.units {
            for dep in unit.depends() {
                if self.get(dep).is_none() {
                    return Err(Error::ResolutionError(format!(
                        "Recipe {} depends on unknown recipe {}",
                        unit.name(),
                        dep
                    )));
                }
            }
            let deps: Vec<&str> = unit.depends().iter().map(String::as_str).collect();
            graph.add_recipe(unit.name(), &deps);
        }
        graph.topological_sort()?;
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &RunConfig) -> Result<BuildPipeline> {
        Err(Error::NotFound("not needed".to_string()))
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut catalogue = Catalogue::new();
        catalogue.declare("zchunk", &[], noop).unwrap();
        assert!(catalogue.declare("zchunk", &[], noop).is_err());
        assert_eq!(catalogue.names(), vec!["zchunk"]);
    }

    #[test]
    fn test_graph_orders_units() {
        let mut catalogue = Catalogue::new();
        catalogue.declare("rpm", &["comps", "solv", "repo"], noop).unwrap();
        catalogue.declare("solv", &["zchunk"], noop).unwrap();
        catalogue.declare("repo", &["zchunk"], noop).unwrap();
        catalogue.declare("comps", &[], noop).unwrap();
        catalogue.declare("zchunk", &[], noop).unwrap();

        let order = catalogue.graph().unwrap().topological_sort().unwrap();
        assert_eq!(order, vec!["comps", "zchunk", "repo", "solv", "rpm"]);
    }

    #[test]
    fn test_unknown_dependency() {
        let mut catalogue = Catalogue::new();
        catalogue.declare("dnf", &["rpm"], noop).unwrap();
        assert!(matches!(catalogue.graph(), Err(Error::ResolutionError(_))));
    }

    #[test]
    fn test_cycle_rejected() {
        let mut catalogue = Catalogue::new();
        catalogue.declare("a", &["b"], noop).unwrap();
        catalogue.declare("b", &["a"], noop).unwrap();
        assert!(catalogue.graph().is_err());
    }
}
