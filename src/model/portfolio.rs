use std::collections::HashMap;
use std::sync::RwLock;

use super::container::Container;
use super::project::{NotPresent, Project};

/// The empty project name, always present in a [`Portfolio`], holding
/// standalone containers that do not belong to a composer project.
pub const NO_PROJECT: &str = "";

/// The in-memory snapshot of all alive containers grouped by project.
///
/// Always contains the empty-name project. A non-empty-name project is
/// dropped as soon as its last container is removed.
pub struct Portfolio {
    projects: RwLock<HashMap<String, std::sync::Arc<Project>>>,
}

impl Default for Portfolio {
    fn default() -> Self {
        Self::new()
    }
}

impl Portfolio {
    pub fn new() -> Self {
        let mut projects = HashMap::new();
        projects.insert(NO_PROJECT.to_string(), std::sync::Arc::new(Project::new()));
        Self {
            projects: RwLock::new(projects),
        }
    }

    /// All project names except the empty one.
    pub fn names(&self) -> Vec<String> {
        self.projects
            .read()
            .unwrap()
            .keys()
            .filter(|name| name.as_str() != NO_PROJECT)
            .cloned()
            .collect()
    }

    /// The [`Project`] for `name`, if present. The empty-name project is
    /// always present.
    pub fn project(&self, name: &str) -> Result<std::sync::Arc<Project>, NotPresent> {
        self.projects
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or(NotPresent)
    }

    /// First-match lookup of a container by id or name across all projects.
    pub fn container(&self, id_or_name: &str) -> Result<Container, NotPresent> {
        let projects = self.projects.read().unwrap();
        for project in projects.values() {
            if let Ok(c) = project.find(id_or_name) {
                return Ok(c);
            }
        }
        Err(NotPresent)
    }

    /// Sum of container counts across all projects.
    pub fn container_total(&self) -> usize {
        self.projects.read().unwrap().values().map(|p| p.len()).sum()
    }

    /// Ensures the container's project exists, creating it on demand, then
    /// delegates to [`Project::add`].
    pub fn add(&self, container: Container) -> super::project::AddOutcome {
        let project_name = container.project().to_string();
        let project = {
            let projects = self.projects.read().unwrap();
            projects.get(&project_name).cloned()
        };
        let project = match project {
            Some(project) => project,
            None => {
                let mut projects = self.projects.write().unwrap();
                projects
                    .entry(project_name)
                    .or_insert_with(|| std::sync::Arc::new(Project::new()))
                    .clone()
            }
        };
        project.add(container)
    }

    /// Removes a container from the named project, erasing the project
    /// entry if it becomes empty and its name is non-empty.
    pub fn remove(&self, id_or_name: &str, project_name: &str) -> Result<Container, NotPresent> {
        let project = {
            let projects = self.projects.read().unwrap();
            projects.get(project_name).cloned().ok_or(NotPresent)?
        };

        let removed = project.remove(id_or_name)?;

        if project.is_empty() && project_name != NO_PROJECT {
            let mut projects = self.projects.write().unwrap();
            // Re-check under the write lock: another writer may have
            // repopulated the project in the meantime.
            if let Some(p) = projects.get(project_name) {
                if p.is_empty() {
                    projects.remove(project_name);
                }
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn container(id: &str, name: &str, project: &str) -> Container {
        Container::new(id, name, Map::new(), 1, project, false)
    }

    #[test]
    fn empty_name_project_always_present() {
        let p = Portfolio::new();
        assert!(p.project(NO_PROJECT).is_ok());
        assert_eq!(p.container_total(), 0);
    }

    #[test]
    fn add_creates_project_on_demand() {
        let p = Portfolio::new();
        p.add(container("a", "ff", "grumpy"));
        assert_eq!(p.names(), vec!["grumpy".to_string()]);
        assert_eq!(
            p.project("grumpy").unwrap().container_names(),
            vec!["ff".to_string()]
        );
    }

    #[test]
    fn remove_erases_empty_non_default_project() {
        let p = Portfolio::new();
        p.add(container("a", "ff", "grumpy"));
        p.remove("a", "grumpy").unwrap();
        assert!(p.names().is_empty());
        assert!(p.project("grumpy").is_err());
    }

    #[test]
    fn remove_keeps_empty_default_project() {
        let p = Portfolio::new();
        p.add(container("a", "ff", NO_PROJECT));
        p.remove("a", NO_PROJECT).unwrap();
        assert!(p.project(NO_PROJECT).is_ok());
    }

    #[test]
    fn add_remove_round_trips() {
        let p = Portfolio::new();
        p.add(container("a", "ff", "grumpy"));
        let before = p.container_total();
        let c = p.container("a").unwrap();
        p.remove(&c.id().to_string(), c.project()).unwrap();
        p.add(c);
        assert_eq!(p.container_total(), before);
    }

    #[test]
    fn container_total_sums_across_projects() {
        let p = Portfolio::new();
        p.add(container("a", "a", "one"));
        p.add(container("b", "b", "two"));
        p.add(container("c", "c", NO_PROJECT));
        assert_eq!(p.container_total(), 3);
    }
}
