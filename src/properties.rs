//! [crate::properties] contains the basic building blocks of a project graph: artifacts, trace
//! links, their identifiers and the versions they belong to.
//!
//! Every record here round-trips through serde without reordering `attributes` or `parentIds`,
//! and a [`Score`] can never be constructed (or deserialized) outside of `[0, 1]`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    borrow::Borrow,
    cmp::Ordering,
    fmt::{Display, Formatter},
};
use uuid::Uuid;

use crate::error::TraceGraphError;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new<S: Into<String>>(id: S) -> Self {
                $name(id.into())
            }

            /// Mint a fresh, globally unique id.
            pub fn generate() -> Self {
                $name(Uuid::new_v4().hyphenated().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                $name(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                $name(id)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifies an [`Artifact`]. Immutable, and never reused within a version's history.
    ArtifactId
);
string_id!(
    /// Identifies a [`TraceLink`].
    TraceId
);
string_id!(ProjectId);
string_id!(VersionId);
string_id!(
    /// Identifies a [`crate::commit::Commit`].
    CommitId
);

/// Custom artifact fields. Insertion ordered, and compared in order: two maps holding the same
/// entries in a different order are NOT equal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(IndexMap<String, Value>);

impl Attributes {
    pub fn new() -> Self {
        Attributes(IndexMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Insert or overwrite a field. Overwriting keeps the field's original position.
    pub fn insert<K: Into<String>, V: Into<Value>>(&mut self, key: K, value: V) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Remove a field, preserving the order of the remaining ones.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.shift_remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for Attributes {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.0.iter().zip(other.0.iter()).all(|(l, r)| l == r)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Attributes(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A single traceable engineering item (requirement, design element, hazard, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: ArtifactId,
    /// Unique among the artifacts of a version.
    pub name: String,
    #[serde(rename = "type")]
    pub artifact_type: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub attributes: Attributes,
    /// Hierarchy edges. Ordered, distinct from trace links.
    #[serde(default)]
    pub parent_ids: Vec<ArtifactId>,
}

impl Artifact {
    pub fn new<I, N, T>(id: I, name: N, artifact_type: T) -> Self
    where
        I: Into<ArtifactId>,
        N: Into<String>,
        T: Into<String>,
    {
        Artifact {
            id: id.into(),
            name: name.into(),
            artifact_type: artifact_type.into(),
            body: String::new(),
            attributes: Attributes::new(),
            parent_ids: Vec::new(),
        }
    }

    pub fn with_body<B: Into<String>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_parents<I, P>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ArtifactId>,
    {
        self.parent_ids = parents.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_attribute<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.attributes.insert(key, value);
        self
    }

    /// True when the hierarchy-relevant part of the artifact differs.
    pub fn hierarchy_differs(&self, other: &Artifact) -> bool {
        self.id != other.id || self.parent_ids != other.parent_ids
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    #[default]
    Unreviewed,
    Approved,
    Declined,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceType {
    Generated,
    #[default]
    Manual,
}

/// Confidence of a generated trace link, always within `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Score(f64);

impl Score {
    pub const ONE: Score = Score(1.0);

    pub fn new(value: f64) -> Result<Score, TraceGraphError> {
        Score::try_from(value)
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Score {
    type Error = TraceGraphError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if (0.0..=1.0).contains(&value) {
            Ok(Score(value))
        } else {
            Err(TraceGraphError::Serialization(format!(
                "trace score {value} is outside of [0, 1]"
            )))
        }
    }
}

impl From<Score> for f64 {
    fn from(score: Score) -> f64 {
        score.0
    }
}

/// A directed relationship asserting that `source_id` is related to/derived from `target_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceLink {
    pub id: TraceId,
    pub source_id: ArtifactId,
    pub target_id: ArtifactId,
    #[serde(default)]
    pub approval_status: ApprovalStatus,
    #[serde(default)]
    pub trace_type: TraceType,
    /// Only meaningful for [`TraceType::Generated`] links.
    #[serde(default)]
    pub score: Score,
}

impl TraceLink {
    /// A user-authored link. Manual links are approved on creation.
    pub fn manual<I, S, T>(id: I, source_id: S, target_id: T) -> Self
    where
        I: Into<TraceId>,
        S: Into<ArtifactId>,
        T: Into<ArtifactId>,
    {
        TraceLink {
            id: id.into(),
            source_id: source_id.into(),
            target_id: target_id.into(),
            approval_status: ApprovalStatus::Approved,
            trace_type: TraceType::Manual,
            score: Score::ONE,
        }
    }

    pub fn generated<I, S, T>(id: I, source_id: S, target_id: T, score: Score) -> Self
    where
        I: Into<TraceId>,
        S: Into<ArtifactId>,
        T: Into<ArtifactId>,
    {
        TraceLink {
            id: id.into(),
            source_id: source_id.into(),
            target_id: target_id.into(),
            approval_status: ApprovalStatus::Unreviewed,
            trace_type: TraceType::Generated,
            score,
        }
    }

    pub fn endpoints(&self) -> (&ArtifactId, &ArtifactId) {
        (&self.source_id, &self.target_id)
    }
}

/// Either kind of entity the graph holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Entity {
    Artifact(Artifact),
    TraceLink(TraceLink),
}

impl Entity {
    pub fn id(&self) -> EntityId {
        match self {
            Entity::Artifact(artifact) => EntityId::Artifact(artifact.id.clone()),
            Entity::TraceLink(trace) => EntityId::TraceLink(trace.id.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityId {
    Artifact(ArtifactId),
    TraceLink(TraceId),
}

impl EntityId {
    pub fn as_str(&self) -> &str {
        match self {
            EntityId::Artifact(id) => id.as_str(),
            EntityId::TraceLink(id) => id.as_str(),
        }
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityId::Artifact(id) => write!(f, "artifact:{id}"),
            EntityId::TraceLink(id) => write!(f, "trace:{id}"),
        }
    }
}

/// A point-in-time graph owned by a project. Versions are ordered by `major.minor.revision`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectVersion {
    pub project_id: ProjectId,
    pub version_id: VersionId,
    pub major: u32,
    pub minor: u32,
    pub revision: u32,
}

impl ProjectVersion {
    pub fn new<P: Into<ProjectId>, V: Into<VersionId>>(
        project_id: P,
        version_id: V,
        major: u32,
        minor: u32,
        revision: u32,
    ) -> Self {
        ProjectVersion {
            project_id: project_id.into(),
            version_id: version_id.into(),
            major,
            minor,
            revision,
        }
    }
}

impl Ord for ProjectVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.revision)
            .cmp(&(other.major, other.minor, other.revision))
            .then_with(|| self.project_id.cmp(&other.project_id))
            .then_with(|| self.version_id.cmp(&other.version_id))
    }
}

impl PartialOrd for ProjectVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for ProjectVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.revision)
    }
}

/// The wholesale content of a version: what `loadVersion` returns and what an authoritative
/// snapshot carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSnapshot {
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub trace_links: Vec<TraceLink>,
}

impl GraphSnapshot {
    pub fn new(artifacts: Vec<Artifact>, trace_links: Vec<TraceLink>) -> Self {
        GraphSnapshot {
            artifacts,
            trace_links,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty() && self.trace_links.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_order_is_significant() {
        let lhs: Attributes = [("a", 1), ("b", 2)].into_iter().collect();
        let rhs: Attributes = [("b", 2), ("a", 1)].into_iter().collect();
        assert_ne!(lhs, rhs);
        assert_eq!(lhs, lhs.clone());
    }

    #[test]
    fn artifact_json_preserves_field_order() {
        let artifact = Artifact::new("2", "D1", "design")
            .with_parents(["9", "1", "5"])
            .with_attribute("zeta", "z")
            .with_attribute("alpha", 3);
        let json = serde_json::to_string(&artifact).unwrap();
        assert!(json.contains(r#""parentIds":["9","1","5"]"#), "{json}");
        assert!(json.find("zeta").unwrap() < json.find("alpha").unwrap());
        let back: Artifact = serde_json::from_str(&json).unwrap();
        assert_eq!(back, artifact);
    }

    #[test]
    fn score_rejects_out_of_range() {
        assert!(Score::new(0.42).is_ok());
        assert!(Score::new(1.5).is_err());
        assert!(Score::new(-0.1).is_err());
        assert!(Score::new(f64::NAN).is_err());
        let json = r#"{"id":"t","sourceId":"a","targetId":"b","traceType":"GENERATED","score":1.2}"#;
        assert!(serde_json::from_str::<TraceLink>(json).is_err());
    }

    #[test]
    fn versions_order_by_sequence() {
        let v1 = ProjectVersion::new("p", "x", 1, 2, 0);
        let v2 = ProjectVersion::new("p", "a", 1, 10, 0);
        assert!(v1 < v2);
        assert_eq!(v2.to_string(), "1.10.0");
    }
}
