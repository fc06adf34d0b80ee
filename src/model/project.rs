use std::sync::RwLock;

use super::container::Container;

/// Result of [`Project::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// No container with the same name existed; it was appended.
    Added,
    /// A container with that name already existed; the add was a no-op and
    /// the pre-existing entry wins.
    AlreadyPresent,
}

/// Marker error returned when a lookup or removal by id/name finds nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotPresent;

/// A collection of [`Container`]s sharing a composer project name.
///
/// Order of `containers()` is insertion-agnostic: callers must not rely on
/// a stable iteration order across mutations.
#[derive(Default)]
pub struct Project {
    containers: RwLock<Vec<Container>>,
}

impl Project {
    pub fn new() -> Self {
        Self {
            containers: RwLock::new(Vec::new()),
        }
    }

    /// Current snapshot of containers in this project.
    pub fn containers(&self) -> Vec<Container> {
        self.containers.read().unwrap().clone()
    }

    /// Names of the containers, in the same order as [`Self::containers`].
    pub fn container_names(&self) -> Vec<String> {
        self.containers
            .read()
            .unwrap()
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.read().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.containers.read().unwrap().len()
    }

    /// Returns the container matching `id_or_name` exactly on either field.
    pub fn find(&self, id_or_name: &str) -> Result<Container, NotPresent> {
        self.containers
            .read()
            .unwrap()
            .iter()
            .find(|c| c.matches(id_or_name))
            .cloned()
            .ok_or(NotPresent)
    }

    /// Inserts `container` unless a container with the same name already
    /// exists, in which case the pre-existing entry wins and this is a
    /// no-op.
    pub fn add(&self, container: Container) -> AddOutcome {
        let mut containers = self.containers.write().unwrap();
        if containers.iter().any(|c| c.name() == container.name()) {
            return AddOutcome::AlreadyPresent;
        }
        containers.push(container);
        AddOutcome::Added
    }

    /// Removes and returns the first container matching `id_or_name` on
    /// either field. Does not preserve order (swap-with-last).
    pub fn remove(&self, id_or_name: &str) -> Result<Container, NotPresent> {
        let mut containers = self.containers.write().unwrap();
        let index = containers
            .iter()
            .position(|c| c.matches(id_or_name))
            .ok_or(NotPresent)?;
        Ok(containers.swap_remove(index))
    }

    /// Sets the pause state of the matching container, replacing it with a
    /// fresh immutable instance if the state actually changes.
    pub fn set_paused(&self, id_or_name: &str, paused: bool) -> Result<Container, NotPresent> {
        let mut containers = self.containers.write().unwrap();
        let index = containers
            .iter()
            .position(|c| c.matches(id_or_name))
            .ok_or(NotPresent)?;

        if containers[index].paused() == paused {
            return Ok(containers[index].clone());
        }

        let replacement = containers[index].with_paused(paused);
        containers[index] = replacement.clone();
        Ok(replacement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn container(id: &str, name: &str) -> Container {
        Container::new(id, name, HashMap::new(), 1, "", false)
    }

    #[test]
    fn add_is_idempotent_on_name_and_keeps_original() {
        let p = Project::new();
        assert_eq!(p.add(container("a", "ff")), AddOutcome::Added);
        assert_eq!(p.add(container("b", "ff")), AddOutcome::AlreadyPresent);
        assert_eq!(p.find("ff").unwrap().id(), "a");
    }

    #[test]
    fn remove_then_readd_round_trips() {
        let p = Project::new();
        p.add(container("a", "ff"));
        let removed = p.remove("a").unwrap();
        assert_eq!(removed.id(), "a");
        assert!(p.is_empty());
        p.add(removed);
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn remove_missing_reports_not_present() {
        let p = Project::new();
        assert_eq!(p.remove("missing"), Err(NotPresent));
    }

    #[test]
    fn set_paused_returns_same_value_when_unchanged() {
        let p = Project::new();
        p.add(container("a", "ff"));
        let before = p.find("ff").unwrap();
        let after = p.set_paused("ff", false).unwrap();
        assert!(!before.paused());
        assert!(!after.paused());
    }

    #[test]
    fn set_paused_replaces_instance_when_changed() {
        let p = Project::new();
        p.add(container("a", "ff"));
        let before = p.find("ff").unwrap();
        let after = p.set_paused("ff", true).unwrap();
        assert!(!before.paused());
        assert!(after.paused());
        assert_eq!(p.find("ff").unwrap().paused(), true);
    }

    #[test]
    fn find_matches_by_id_or_name() {
        let p = Project::new();
        p.add(container("abc", "ff"));
        assert_eq!(p.find("abc").unwrap().name(), "ff");
        assert_eq!(p.find("ff").unwrap().id(), "abc");
    }
}
