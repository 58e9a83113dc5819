//! Workgroup data model
//!
//! Agents, the ordered workgroup, the case-insensitive response map and the
//! integrator's response format.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::limits;
use crate::types::error::{ValidationError, ValidationErrorKind};

/// Normalize an agent name for matching: trimmed and lowercased
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

// =============================================================================
// Agent / Workgroup
// =============================================================================

/// A named role with a fixed instruction prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    pub prompt: String,
}

impl Agent {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        normalize_name(&self.name) == normalize_name(name)
    }
}

/// Ordered list of agents; order is execution order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Workgroup(Vec<Agent>);

impl Workgroup {
    pub fn new(agents: Vec<Agent>) -> Self {
        Self(agents)
    }

    pub fn agents(&self) -> &[Agent] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Agent> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Find an agent by case-insensitive name
    pub fn find(&self, name: &str) -> Option<&Agent> {
        self.0.iter().find(|a| a.matches(name))
    }

    pub fn into_inner(self) -> Vec<Agent> {
        self.0
    }

    /// Check names and prompts against the data model limits
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.0.is_empty() {
            return Err(ValidationError::new(
                ValidationErrorKind::MissingField,
                "workgroup must contain at least one agent",
            )
            .with_field("workgroup"));
        }

        let mut seen = std::collections::HashSet::new();
        for (i, agent) in self.0.iter().enumerate() {
            let field = format!("workgroup[{}]", i);
            if agent.name.trim().is_empty() {
                return Err(ValidationError::new(
                    ValidationErrorKind::MissingField,
                    "agent name is empty",
                )
                .with_field(field));
            }
            if agent.name.chars().count() > limits::AGENT_NAME_MAX {
                return Err(ValidationError::new(
                    ValidationErrorKind::Range,
                    format!(
                        "agent name exceeds {} characters",
                        limits::AGENT_NAME_MAX
                    ),
                )
                .with_field(field));
            }
            if agent.prompt.chars().count() > limits::AGENT_PROMPT_MAX {
                return Err(ValidationError::new(
                    ValidationErrorKind::Range,
                    format!(
                        "prompt for '{}' exceeds {} characters",
                        agent.name,
                        limits::AGENT_PROMPT_MAX
                    ),
                )
                .with_field(field));
            }
            if !seen.insert(normalize_name(&agent.name)) {
                return Err(ValidationError::new(
                    ValidationErrorKind::Consistency,
                    format!("duplicate agent name '{}'", agent.name),
                )
                .with_field(field));
            }
        }
        Ok(())
    }
}

impl From<Vec<Agent>> for Workgroup {
    fn from(agents: Vec<Agent>) -> Self {
        Self(agents)
    }
}

impl<'a> IntoIterator for &'a Workgroup {
    type Item = &'a Agent;
    type IntoIter = std::slice::Iter<'a, Agent>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// =============================================================================
// Ordered string maps
// =============================================================================

fn serialize_pairs<S: Serializer>(
    pairs: &[(String, String)],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(pairs.len()))?;
    for (k, v) in pairs {
        map.serialize_entry(k, v)?;
    }
    map.end()
}

/// Visits a JSON object keeping source key order
struct PairsVisitor(&'static str);

impl<'de> Visitor<'de> for PairsVisitor {
    type Value = Vec<(String, String)>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut pairs = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((k, v)) = access.next_entry::<String, String>()? {
            pairs.push((k, v));
        }
        Ok(pairs)
    }

    fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
        Ok(Vec::new())
    }

    fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
        Ok(Vec::new())
    }
}

// =============================================================================
// WorkgroupResponseMap
// =============================================================================

/// Agent name to output, matched case-insensitively, in insertion order
///
/// Existing keys keep their casing on overwrite; new keys are written with
/// the casing supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkgroupResponseMap {
    entries: Vec<(String, String)>,
}

impl WorkgroupResponseMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        let needle = normalize_name(name);
        self.entries
            .iter()
            .position(|(k, _)| normalize_name(k) == needle)
    }

    /// Raw stored value for a name, regardless of content
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].1.as_str())
    }

    /// Stored value only if it is non-blank
    pub fn filled(&self, name: &str) -> Option<&str> {
        self.get(name).filter(|v| !v.trim().is_empty())
    }

    pub fn has_value(&self, name: &str) -> bool {
        self.filled(name).is_some()
    }

    /// Key under which a name is stored, with its original casing
    pub fn stored_key(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].0.as_str())
    }

    /// Insert or overwrite; an existing key keeps its casing
    pub fn insert(&mut self, name: impl Into<String>, output: impl Into<String>) {
        let name = name.into();
        let output = output.into();
        match self.position(&name) {
            Some(i) => self.entries[i].1 = output,
            None => self.entries.push((name, output)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for WorkgroupResponseMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl Serialize for WorkgroupResponseMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_pairs(&self.entries, serializer)
    }
}

impl<'de> Deserialize<'de> for WorkgroupResponseMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pairs = deserializer.deserialize_any(PairsVisitor("a map of agent name to output"))?;
        Ok(pairs.into_iter().collect())
    }
}

// =============================================================================
// ResponseFormat
// =============================================================================

/// Integrator output contract: key to human-readable description
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseFormat {
    fields: Vec<(String, String)>,
}

impl ResponseFormat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, key: impl Into<String>, description: impl Into<String>) -> Self {
        let key = key.into();
        let description = description.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = description,
            None => self.fields.push((key, description)),
        }
        self
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Pretty JSON rendering used inside prompts
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Check key count and lengths against the data model limits
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.fields.len() > limits::MAX_RESPONSE_KEYS {
            return Err(ValidationError::new(
                ValidationErrorKind::Range,
                format!("at most {} keys allowed", limits::MAX_RESPONSE_KEYS),
            )
            .with_field("responseformat"));
        }
        for (key, description) in &self.fields {
            if key.trim().is_empty() {
                return Err(ValidationError::new(
                    ValidationErrorKind::MissingField,
                    "response format key is empty",
                )
                .with_field("responseformat"));
            }
            if key.chars().count() > limits::RESPONSE_KEY_MAX {
                return Err(ValidationError::new(
                    ValidationErrorKind::Range,
                    format!("key exceeds {} characters", limits::RESPONSE_KEY_MAX),
                )
                .with_field(format!("responseformat.{}", key)));
            }
            if description.chars().count() > limits::RESPONSE_DESC_MAX {
                return Err(ValidationError::new(
                    ValidationErrorKind::Range,
                    format!(
                        "description exceeds {} characters",
                        limits::RESPONSE_DESC_MAX
                    ),
                )
                .with_field(format!("responseformat.{}", key)));
            }
        }
        Ok(())
    }

    /// Compare an object's top-level keys with this format's key set
    ///
    /// Returns a description of missing and extra keys on mismatch.
    pub fn check_keys(&self, object: &serde_json::Map<String, serde_json::Value>) -> Result<(), String> {
        let mut missing: Vec<&str> = self
            .keys()
            .filter(|k| !object.contains_key(*k))
            .collect();
        let mut extra: Vec<&str> = object
            .keys()
            .map(String::as_str)
            .filter(|k| !self.fields.iter().any(|(f, _)| f == k))
            .collect();

        if missing.is_empty() && extra.is_empty() {
            return Ok(());
        }
        missing.sort_unstable();
        extra.sort_unstable();
        Err(format!(
            "key set mismatch: missing [{}], extra [{}]",
            missing.join(", "),
            extra.join(", ")
        ))
    }
}

impl Serialize for ResponseFormat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_pairs(&self.fields, serializer)
    }
}

impl<'de> Deserialize<'de> for ResponseFormat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pairs =
            deserializer.deserialize_any(PairsVisitor("a map of key to description"))?;
        Ok(pairs
            .into_iter()
            .fold(Self::new(), |format, (k, v)| format.with_field(k, v)))
    }
}

// =============================================================================
// Persona
// =============================================================================

/// The published persona a workgroup is designed for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
}

impl Persona {
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            description: description.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("name", &self.name),
            ("category", &self.category),
            ("description", &self.description),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::new(
                    ValidationErrorKind::MissingField,
                    format!("persona {} is required", field),
                )
                .with_field(field));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Per-agent results
// =============================================================================

/// Where an agent's output came from in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputSource {
    Prefilled,
    Generated,
}

/// One agent's output in execution order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub name: String,
    pub output: String,
    pub source: OutputSource,
}

/// An output produced by a model call in this run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedOutput {
    pub name: String,
    pub output: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_map_case_insensitive_lookup() {
        let map: WorkgroupResponseMap = [("Writer", "draft")].into_iter().collect();
        assert_eq!(map.get("writer"), Some("draft"));
        assert_eq!(map.get("  WRITER "), Some("draft"));
        assert!(map.has_value("writer"));
    }

    #[test]
    fn test_response_map_preserves_existing_casing() {
        let mut map: WorkgroupResponseMap = [("Writer", "draft")].into_iter().collect();
        map.insert("writer", "final");
        map.insert("Editor", "notes");

        let keys: Vec<&str> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["Writer", "Editor"]);
        assert_eq!(map.get("WRITER"), Some("final"));
    }

    #[test]
    fn test_response_map_blank_values_are_absent() {
        let map: WorkgroupResponseMap = [("Writer", "   ")].into_iter().collect();
        assert_eq!(map.get("writer"), Some("   "));
        assert!(!map.has_value("writer"));
    }

    #[test]
    fn test_response_map_serde_keeps_order() {
        let json = r#"{"Zeta":"z","alpha":"a","Mid":"m"}"#;
        let map: WorkgroupResponseMap = serde_json::from_str(json).unwrap();
        assert_eq!(serde_json::to_string(&map).unwrap(), json);
    }

    #[test]
    fn test_response_map_accepts_null() {
        let map: WorkgroupResponseMap = serde_json::from_str("null").unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn test_workgroup_validate_rejects_duplicates() {
        let wg = Workgroup::new(vec![Agent::new("Writer", "a"), Agent::new("writer ", "b")]);
        let err = wg.validate().unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::Consistency);
    }

    #[test]
    fn test_workgroup_validate_limits() {
        assert!(Workgroup::default().validate().is_err());

        let long_name = "n".repeat(limits::AGENT_NAME_MAX + 1);
        let wg = Workgroup::new(vec![Agent::new(long_name, "p")]);
        assert_eq!(wg.validate().unwrap_err().kind, ValidationErrorKind::Range);

        let ok = Workgroup::new(vec![Agent::new("Researcher", "find facts")]);
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_workgroup_find_case_insensitive() {
        let wg = Workgroup::new(vec![Agent::new("Researcher", "a"), Agent::new("Writer", "b")]);
        assert_eq!(wg.find("writer").map(|a| a.name.as_str()), Some("Writer"));
        assert!(wg.find("critic").is_none());
    }

    #[test]
    fn test_response_format_check_keys() {
        let format = ResponseFormat::new()
            .with_field("title", "Short title")
            .with_field("body", "Main text");

        let exact = serde_json::json!({"title": "t", "body": "b"});
        assert!(format.check_keys(exact.as_object().unwrap()).is_ok());

        let wrong = serde_json::json!({"title": "t", "extra": 1});
        let msg = format.check_keys(wrong.as_object().unwrap()).unwrap_err();
        assert!(msg.contains("missing [body]"));
        assert!(msg.contains("extra [extra]"));
    }

    #[test]
    fn test_response_format_limits() {
        let mut format = ResponseFormat::new();
        for i in 0..=limits::MAX_RESPONSE_KEYS {
            format = format.with_field(format!("k{}", i), "d");
        }
        assert!(format.validate().is_err());

        let long_desc = ResponseFormat::new().with_field("k", "d".repeat(101));
        assert!(long_desc.validate().is_err());
    }

    #[test]
    fn test_output_source_serializes_lowercase() {
        let entry = AgentOutput {
            name: "Writer".into(),
            output: "x".into(),
            source: OutputSource::Prefilled,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["source"], "prefilled");
    }
}
