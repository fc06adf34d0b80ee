use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// An opaque, adapter-provided payload attached to a [`Container`] for
/// application-specific augmentation. The core never inspects it.
pub type Rucksack = Arc<dyn std::any::Any + Send + Sync>;

/// An immutable snapshot of one alive container (running or paused).
///
/// Any state change is represented by constructing a replacement; see
/// [`crate::model::Project::set_paused`].
#[derive(Clone)]
pub struct Container {
    id: String,
    name: String,
    labels: HashMap<String, String>,
    pid: u32,
    project: String,
    paused: bool,
    rucksack: Option<Rucksack>,
}

impl Container {
    /// Builds a container record.
    ///
    /// # Panics
    /// Panics if `id` is empty or `pid` is zero; adapters must filter out
    /// processless containers before reaching the core.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        labels: HashMap<String, String>,
        pid: u32,
        project: impl Into<String>,
        paused: bool,
    ) -> Self {
        let id = id.into();
        assert!(!id.is_empty(), "container id must not be empty");
        assert!(pid > 0, "container {id} has no process");

        Self {
            id,
            name: name.into(),
            labels,
            pid,
            project: project.into(),
            paused,
            rucksack: None,
        }
    }

    pub fn with_rucksack(mut self, rucksack: Rucksack) -> Self {
        self.rucksack = Some(rucksack);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn labels(&self) -> &HashMap<String, String> {
        &self.labels
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    pub fn rucksack(&self) -> Option<&Rucksack> {
        self.rucksack.as_ref()
    }

    /// Returns a clone of `self` with `paused` replaced.
    pub(crate) fn with_paused(&self, paused: bool) -> Self {
        Self {
            paused,
            ..self.clone()
        }
    }

    /// A field matches either the id or the name, exactly.
    pub(crate) fn matches(&self, id_or_name: &str) -> bool {
        self.id == id_or_name || self.name == id_or_name
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("project", &self.project)
            .field("pid", &self.pid)
            .field("paused", &self.paused)
            .finish()
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if self.id != self.name {
            write!(f, " ({})", self.id)?;
        }
        if !self.project.is_empty() {
            write!(f, " [{}]", self.project)?;
        }
        if self.paused {
            write!(f, " (paused)")?;
        }
        write!(f, " pid={}", self.pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(id: &str, name: &str) -> Container {
        Container::new(id, name, HashMap::new(), 42, "", false)
    }

    #[test]
    fn display_omits_id_when_equal_to_name() {
        let c = Container::new("ff", "ff", HashMap::new(), 666, "grumpy", false);
        assert_eq!(c.to_string(), "ff [grumpy] pid=666");
    }

    #[test]
    fn display_shows_distinct_id() {
        let c = container("abc123", "ff");
        assert_eq!(c.to_string(), "ff (abc123) pid=42");
    }

    #[test]
    fn with_paused_returns_new_instance_with_flag_flipped() {
        let c = container("a", "a");
        let paused = c.with_paused(true);
        assert!(!c.paused());
        assert!(paused.paused());
    }

    #[test]
    #[should_panic(expected = "must not be empty")]
    fn new_panics_on_empty_id() {
        Container::new("", "x", HashMap::new(), 1, "", false);
    }

    #[test]
    #[should_panic(expected = "has no process")]
    fn new_panics_on_zero_pid() {
        Container::new("a", "x", HashMap::new(), 0, "", false);
    }
}
