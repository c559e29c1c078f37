//! Module locators

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The discovery layer's answer for one dotted module name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Located {
    /// Compilable source is available at this path.
    Source(PathBuf),
    /// No source, but the module's exported names could be probed.
    Probed(Vec<String>),
    /// Nothing known; the resolver tolerates this with a stub binding.
    Missing,
}

/// The interface the excluded discovery layer implements: dotted module
/// name plus the requesting module's directory.
pub trait ModuleLocator {
    fn locate(&self, dotted: &str, requesting_dir: &Path) -> Located;
}

/// A locator that knows nothing; every lookup misses.
pub struct NullLocator;

impl ModuleLocator for NullLocator {
    fn locate(&self, _dotted: &str, _requesting_dir: &Path) -> Located {
        Located::Missing
    }
}

/// In-memory project map, used by the test suites and by drivers that
/// resolve paths up front.
#[derive(Debug, Clone, Default)]
pub struct ProjectLocator {
    sources: HashMap<String, PathBuf>,
    probed: HashMap<String, Vec<String>>,
}

impl ProjectLocator {
    pub fn new() -> Self {
        ProjectLocator::default()
    }

    pub fn add_source(&mut self, dotted: impl Into<String>, path: impl Into<PathBuf>) {
        self.sources.insert(dotted.into(), path.into());
    }

    pub fn add_probed(&mut self, dotted: impl Into<String>, names: Vec<String>) {
        self.probed.insert(dotted.into(), names);
    }
}

impl ModuleLocator for ProjectLocator {
    fn locate(&self, dotted: &str, _requesting_dir: &Path) -> Located {
        if let Some(path) = self.sources.get(dotted) {
            return Located::Source(path.clone());
        }
        if let Some(names) = self.probed.get(dotted) {
            return Located::Probed(names.clone());
        }
        Located::Missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_locator_precedence() {
        let mut locator = ProjectLocator::new();
        locator.add_source("a", "a.na");
        locator.add_probed("b", vec!["x".to_string()]);

        assert!(matches!(
            locator.locate("a", Path::new(".")),
            Located::Source(_)
        ));
        assert!(matches!(
            locator.locate("b", Path::new(".")),
            Located::Probed(_)
        ));
        assert_eq!(locator.locate("c", Path::new(".")), Located::Missing);
    }
}
