//! Function module resolution.
//!
//! A module name (e.g. `dbWriterFn`) maps to a container build context
//! under the module root. Packaging the image is someone else's job; we
//! only check that the build context is there so assembly fails before
//! anything is provisioned.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Build file every module directory must contain.
pub const BUILD_FILE: &str = "Dockerfile";

#[derive(Debug, Error, PartialEq)]
pub enum ModuleError {
    #[error("module name is empty")]
    Empty,
    #[error("invalid module name: {0}")]
    InvalidName(String),
    #[error("module `{module}` not found at {}", .path.display())]
    NotFound { module: String, path: PathBuf },
    #[error("module `{module}` has no Dockerfile in {}", .path.display())]
    MissingBuildFile { module: String, path: PathBuf },
}

/// Resolves a module name to a deployable build path.
pub trait ModuleResolver {
    fn resolve(&self, module: &str) -> Result<PathBuf, ModuleError>;
}

/// Resolves modules as subdirectories of a root directory.
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    root: PathBuf,
}

impl DirectoryResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve `module_root` relative to the directory holding the config file.
    pub fn relative_to(config_dir: &Path, module_root: &Path) -> Self {
        if module_root.is_absolute() {
            Self::new(module_root)
        } else {
            Self::new(config_dir.join(module_root))
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ModuleResolver for DirectoryResolver {
    fn resolve(&self, module: &str) -> Result<PathBuf, ModuleError> {
        if module.is_empty() {
            return Err(ModuleError::Empty);
        }
        if module.contains(['/', '\\']) || module == "." || module == ".." {
            return Err(ModuleError::InvalidName(module.to_string()));
        }

        let path = self.root.join(module);
        if !path.is_dir() {
            return Err(ModuleError::NotFound {
                module: module.to_string(),
                path,
            });
        }
        if !path.join(BUILD_FILE).is_file() {
            return Err(ModuleError::MissingBuildFile {
                module: module.to_string(),
                path,
            });
        }
        debug!(module, path = %path.display(), "module resolved");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_dir(root: &Path, name: &str, with_build_file: bool) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        if with_build_file {
            std::fs::write(dir.join(BUILD_FILE), "FROM public.ecr.aws/lambda/python:3.12\n").unwrap();
        }
    }

    #[test]
    fn resolves_existing_module() {
        let tmp = tempfile::tempdir().unwrap();
        module_dir(tmp.path(), "dbWriterFn", true);

        let resolver = DirectoryResolver::new(tmp.path());
        assert_eq!(resolver.resolve("dbWriterFn").unwrap(), tmp.path().join("dbWriterFn"));
    }

    #[test]
    fn missing_module_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = DirectoryResolver::new(tmp.path());
        assert!(matches!(
            resolver.resolve("writer-a"),
            Err(ModuleError::NotFound { module, .. }) if module == "writer-a"
        ));
    }

    #[test]
    fn module_without_build_file_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        module_dir(tmp.path(), "dbInitializerFn", false);
        let resolver = DirectoryResolver::new(tmp.path());
        assert!(matches!(
            resolver.resolve("dbInitializerFn"),
            Err(ModuleError::MissingBuildFile { .. })
        ));
    }

    #[test]
    fn path_like_names_are_rejected() {
        let resolver = DirectoryResolver::new("/tmp");
        assert_eq!(resolver.resolve(""), Err(ModuleError::Empty));
        assert!(matches!(resolver.resolve("../x"), Err(ModuleError::InvalidName(_))));
        assert!(matches!(resolver.resolve(".."), Err(ModuleError::InvalidName(_))));
    }

    #[test]
    fn relative_root_is_joined_to_config_dir() {
        let resolver = DirectoryResolver::relative_to(Path::new("/srv/app"), Path::new("lambda"));
        assert_eq!(resolver.root(), Path::new("/srv/app/lambda"));
        let resolver = DirectoryResolver::relative_to(Path::new("/srv/app"), Path::new("/opt/fns"));
        assert_eq!(resolver.root(), Path::new("/opt/fns"));
    }
}
