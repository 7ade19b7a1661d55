use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

mod collection;
mod error;

pub use collection::ContainerCollection;
pub use error::{Error, Result};

/// The maximum allowed length for a [`ContainerID`].
const CONTAINER_ID_MAX_LEN: usize = 255;

/// A validated runtime container identifier.
///
/// # Examples
///
/// ```
/// # use gadget_resolver::container::ContainerID;
/// let container_id = ContainerID::new("3f2c9a").unwrap();
/// assert_eq!(container_id.as_ref(), "3f2c9a");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerID(Arc<str>);

impl ContainerID {
    /// Creates a new `ContainerID` from the given raw id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidContainerID`] if the input is empty or its length exceeds
    /// [`CONTAINER_ID_MAX_LEN`].
    pub fn new(src: impl AsRef<str>) -> Result<Self> {
        let src = src.as_ref();
        if src.is_empty() || src.len() > CONTAINER_ID_MAX_LEN {
            return Err(Error::InvalidContainerID(src.to_owned()));
        }

        Ok(Self(src.into()))
    }
}

impl AsRef<str> for ContainerID {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ContainerID {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContainerID {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ContainerID> for String {
    fn from(value: ContainerID) -> Self {
        value.0.as_ref().to_owned()
    }
}

/// A snapshot of a running Kubernetes container and the kernel identifiers
/// needed to attach probes to it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDefinition {
    pub id: ContainerID,
    pub namespace: String,
    pub podname: String,
    pub name: String,
    /// Inode of the container's mount namespace. Never zero for a registered container.
    pub mntns: u64,
    pub pid: u32,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cgroup_path: Option<String>,
}

impl ContainerDefinition {
    pub fn new(
        id: ContainerID,
        namespace: impl Into<String>,
        podname: impl Into<String>,
        name: impl Into<String>,
        mntns: u64,
        pid: u32,
    ) -> Self {
        Self {
            id,
            namespace: namespace.into(),
            podname: podname.into(),
            name: name.into(),
            mntns,
            pid,
            labels: BTreeMap::default(),
            cgroup_path: None,
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Returns true if this container belongs to `namespace/pod`.
    pub fn is_in_pod(&self, namespace: &str, pod: &str) -> bool {
        self.namespace == namespace && self.podname == pod
    }
}

/// A filter over [`ContainerDefinition`]s.
///
/// Empty strings and an empty label map act as wildcards. A container matches
/// if every non-wildcard field equals the corresponding container field and
/// every selector label is present on the container with the same value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContainerSelector {
    pub namespace: String,
    pub podname: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

impl ContainerSelector {
    /// A selector matching every container.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn podname(mut self, podname: impl Into<String>) -> Self {
        self.podname = podname.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, container: &ContainerDefinition) -> bool {
        field_matches(&self.namespace, &container.namespace)
            && field_matches(&self.podname, &container.podname)
            && field_matches(&self.name, &container.name)
            && self
                .labels
                .iter()
                .all(|(k, v)| container.labels.get(k) == Some(v))
    }
}

fn field_matches(selector: &str, value: &str) -> bool {
    selector.is_empty() || selector == value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container() -> ContainerDefinition {
        ContainerDefinition::new(ContainerID::new("abc").unwrap(), "default", "p1", "c1", 1234, 99)
            .with_label("app", "web")
            .with_label("tier", "frontend")
    }

    #[test]
    fn test_container_id_validation() {
        assert!(ContainerID::new("abc").is_ok());
        assert!(matches!(
            ContainerID::new(""),
            Err(Error::InvalidContainerID(_))
        ));
        let too_long = "a".repeat(CONTAINER_ID_MAX_LEN + 1);
        assert!(ContainerID::new(too_long).is_err());
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        assert!(ContainerSelector::all().matches(&container()));
    }

    #[test]
    fn test_selector_fields() {
        let c = container();
        assert!(ContainerSelector::all().namespace("default").matches(&c));
        assert!(!ContainerSelector::all().namespace("kube-system").matches(&c));
        assert!(
            ContainerSelector::all()
                .namespace("default")
                .podname("p1")
                .name("c1")
                .matches(&c)
        );
        assert!(!ContainerSelector::all().podname("p1").name("c2").matches(&c));
    }

    #[test]
    fn test_selector_labels() {
        let c = container();
        assert!(ContainerSelector::all().label("app", "web").matches(&c));
        assert!(
            ContainerSelector::all()
                .label("app", "web")
                .label("tier", "frontend")
                .matches(&c)
        );
        assert!(!ContainerSelector::all().label("app", "db").matches(&c));
        assert!(!ContainerSelector::all().label("missing", "web").matches(&c));
    }

    #[test]
    fn test_container_definition_json() {
        let raw = r#"{
            "id": "abc",
            "namespace": "default",
            "podname": "p1",
            "name": "c1",
            "mntns": 1234,
            "pid": 99,
            "labels": {"app": "web"}
        }"#;
        let c: ContainerDefinition = serde_json::from_str(raw).unwrap();
        assert_eq!(c.id.as_ref(), "abc");
        assert_eq!(c.mntns, 1234);
        assert_eq!(c.labels.get("app").map(String::as_str), Some("web"));
        assert!(c.cgroup_path.is_none());

        let bad = r#"{"id": "", "namespace": "", "podname": "", "name": "", "mntns": 1, "pid": 1}"#;
        assert!(serde_json::from_str::<ContainerDefinition>(bad).is_err());
    }
}
