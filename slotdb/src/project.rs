//! Projects: named path prefixes grouping targets.
//!
//! A target belongs to a project when its name is a path below the project
//! path, compared component-wise (`/work/app/src/main.rs` belongs to
//! `/work/app`, `/work/application` does not). Membership lists are persisted
//! in `projects.json` and grow as new targets are first written.

use std::path::{Path, PathBuf};

use crate::error::{ProjectError, Result};
use crate::index::KeyValueIndex;

/// Name of the project index file in the store directory.
pub(crate) const PROJECT_INDEX_FILE: &str = "projects.json";

/// Persisted project → member targets table.
#[derive(Debug)]
pub struct ProjectIndex {
    index: KeyValueIndex<Vec<String>>,
}

impl ProjectIndex {
    /// Opens the project index at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index file exists but cannot be loaded.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            index: KeyValueIndex::open(path)?,
        })
    }

    /// Creates `project` if it does not exist yet.
    ///
    /// The new project is seeded with every target from `known_targets` that
    /// belongs to it. `known_targets` is evaluated while the index is held, so
    /// a target registered concurrently is either seen here or added later by
    /// [`register_target`](Self::register_target).
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be persisted.
    pub fn create(&self, project: &str, known_targets: impl FnOnce() -> Vec<String>) -> Result<()> {
        let project = normalize(project);

        if self.index.contains_key(&project) {
            return Ok(());
        }

        self.index.update(|projects| {
            if projects.contains_key(&project) {
                return;
            }
            let members = known_targets()
                .into_iter()
                .filter(|target| belongs_to(target, &project))
                .collect();
            projects.insert(project, members);
        })
    }

    /// Returns the member targets of `project`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectError::NotFound`] if the project was never created.
    pub fn targets(&self, project: &str) -> Result<Vec<String>> {
        let project = normalize(project);
        self.index
            .get(&project)
            .ok_or_else(|| ProjectError::NotFound { project }.into())
    }

    /// Adds `target` to `project`. Adding an existing member is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectError::NotFound`] for an unknown project and
    /// [`ProjectError::TargetNotInProject`] if the target is not below it.
    pub fn add_target(&self, project: &str, target: &str) -> Result<()> {
        let project = normalize(project);

        if !belongs_to(target, &project) {
            return Err(ProjectError::TargetNotInProject {
                project,
                target: target.to_string(),
            }
            .into());
        }

        self.index.update(|projects| {
            let Some(members) = projects.get_mut(&project) else {
                return Err(ProjectError::NotFound {
                    project: project.clone(),
                });
            };
            if !members.iter().any(|m| m == target) {
                members.push(target.to_string());
            }
            Ok(())
        })??;

        Ok(())
    }

    /// Adds a newly created target to every project it belongs to.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be persisted.
    pub fn register_target(&self, target: &str) -> Result<()> {
        let matches = self
            .index
            .keys()
            .iter()
            .any(|project| belongs_to(target, project));
        if !matches {
            return Ok(());
        }

        self.index.update(|projects| {
            for (project, members) in projects.iter_mut() {
                if belongs_to(target, project) && !members.iter().any(|m| m == target) {
                    members.push(target.to_string());
                }
            }
        })
    }

    /// All project paths in sorted order.
    pub fn list(&self) -> Vec<String> {
        self.index.keys()
    }
}

/// Normalizes a project path: redundant separators and `.` components are
/// dropped, as is any trailing separator.
pub fn normalize(project: &str) -> String {
    let cleaned: PathBuf = Path::new(project).components().collect();
    cleaned.to_string_lossy().into_owned()
}

/// Whether `target` lies strictly below `project`.
pub fn belongs_to(target: &str, project: &str) -> bool {
    let target = Path::new(target);
    target != Path::new(project) && target.starts_with(project)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SlotDbError;
    use tempfile::tempdir;

    #[test]
    fn test_belongs_to() {
        assert!(belongs_to("/work/app/src/main.rs", "/work/app"));
        assert!(belongs_to("/work/app/a", "/work/app"));
        assert!(!belongs_to("/work/application/a", "/work/app"));
        assert!(!belongs_to("/work/app", "/work/app"));
        assert!(!belongs_to("/other/a", "/work/app"));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/work/app/"), "/work/app");
        assert_eq!(normalize("/work//app/./"), "/work/app");
        assert_eq!(normalize("/"), "/");
    }

    #[test]
    fn test_create_seeds_existing_targets() {
        let dir = tempdir().unwrap();
        let projects = ProjectIndex::open(dir.path().join(PROJECT_INDEX_FILE)).unwrap();

        projects
            .create("/work/app/", || {
                vec![
                    "/work/app/a.rs".to_string(),
                    "/work/other/b.rs".to_string(),
                    "/work/app/lib/c.rs".to_string(),
                ]
            })
            .unwrap();

        assert_eq!(
            projects.targets("/work/app").unwrap(),
            vec!["/work/app/a.rs".to_string(), "/work/app/lib/c.rs".to_string()]
        );

        // Second create is a no-op and does not consult the target list.
        projects
            .create("/work/app", || panic!("should not list targets"))
            .unwrap();
        assert_eq!(projects.list(), vec!["/work/app".to_string()]);
    }

    #[test]
    fn test_unknown_project() {
        let dir = tempdir().unwrap();
        let projects = ProjectIndex::open(dir.path().join(PROJECT_INDEX_FILE)).unwrap();

        assert!(matches!(
            projects.targets("/nope"),
            Err(SlotDbError::Project(ProjectError::NotFound { .. }))
        ));
        assert!(matches!(
            projects.add_target("/nope", "/nope/a"),
            Err(SlotDbError::Project(ProjectError::NotFound { .. }))
        ));
    }

    #[test]
    fn test_add_target() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(PROJECT_INDEX_FILE);
        let projects = ProjectIndex::open(&path).unwrap();
        projects.create("/p", Vec::new).unwrap();

        projects.add_target("/p", "/p/x").unwrap();
        projects.add_target("/p", "/p/x").unwrap();
        assert!(matches!(
            projects.add_target("/p", "/q/x"),
            Err(SlotDbError::Project(ProjectError::TargetNotInProject { .. }))
        ));

        let reopened = ProjectIndex::open(&path).unwrap();
        assert_eq!(reopened.targets("/p").unwrap(), vec!["/p/x".to_string()]);
    }

    #[test]
    fn test_register_target() {
        let dir = tempdir().unwrap();
        let projects = ProjectIndex::open(dir.path().join(PROJECT_INDEX_FILE)).unwrap();
        projects.create("/a", Vec::new).unwrap();
        projects.create("/a/b", Vec::new).unwrap();
        projects.create("/c", Vec::new).unwrap();

        projects.register_target("/a/b/file").unwrap();
        projects.register_target("/a/b/file").unwrap();

        assert_eq!(projects.targets("/a").unwrap(), vec!["/a/b/file".to_string()]);
        assert_eq!(projects.targets("/a/b").unwrap(), vec!["/a/b/file".to_string()]);
        assert!(projects.targets("/c").unwrap().is_empty());
    }
}
