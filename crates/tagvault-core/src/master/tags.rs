//! Tags and tag normalization.

use crate::config::TagConfig;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::LazyLock;

static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// A (namespace, subtag) pair. An empty namespace is an unnamespaced tag.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    pub namespace: String,
    pub subtag: String,
}

/// Why a raw tag string could not be turned into a tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "problem", rename_all = "snake_case")]
pub enum TagProblem {
    Empty,
    TooLong { length: usize },
}

impl fmt::Display for TagProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagProblem::Empty => write!(f, "tag is empty after normalization"),
            TagProblem::TooLong { length } => write!(
                f,
                "tag is {} characters, the limit is {}",
                length,
                TagConfig::MAX_TAG_LENGTH
            ),
        }
    }
}

impl Tag {
    pub fn new(namespace: impl Into<String>, subtag: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            subtag: subtag.into(),
        }
    }

    pub fn unnamespaced(subtag: impl Into<String>) -> Self {
        Self::new("", subtag)
    }

    /// Split an already clean tag string. The first colon separates the
    /// namespace unless the string starts with one (":)" is a subtag).
    pub fn split(text: &str) -> Self {
        match text.split_once(':') {
            Some((namespace, subtag)) if !namespace.is_empty() => Self::new(namespace, subtag),
            _ => Self::unnamespaced(text),
        }
    }

    /// Normalize a raw tag and split it.
    pub fn parse(raw: &str) -> Result<Self, TagProblem> {
        clean_tag(raw).map(|text| Self::split(&text))
    }

    pub fn is_namespaced(&self) -> bool {
        !self.namespace.is_empty()
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.subtag)
        } else {
            write!(f, "{}:{}", self.namespace, self.subtag)
        }
    }
}

impl Serialize for Tag {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Tag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Tag::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Normalize a raw tag string.
///
/// Control characters are dropped, the text is lowercased, whitespace runs
/// collapse to one space and the namespace and subtag are each trimmed.
pub fn clean_tag(raw: &str) -> Result<String, TagProblem> {
    let printable: String = raw
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|c| !c.is_control())
        .collect();
    let lowered = printable.to_lowercase();
    let collapsed = WHITESPACE_RUN.replace_all(&lowered, " ");
    let text = collapsed.trim();

    let cleaned = match text.split_once(':') {
        Some((namespace, subtag)) if !namespace.trim().is_empty() => {
            let subtag = subtag.trim();
            if subtag.is_empty() {
                return Err(TagProblem::Empty);
            }
            format!("{}:{}", namespace.trim(), subtag)
        }
        _ => text.to_string(),
    };

    if cleaned.is_empty() {
        return Err(TagProblem::Empty);
    }

    let length = cleaned.chars().count();
    if length > TagConfig::MAX_TAG_LENGTH {
        return Err(TagProblem::TooLong { length });
    }

    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_tag_normalizes_case_and_whitespace() {
        assert_eq!(clean_tag("  Character :  Samus   Aran ").unwrap(), "character:samus aran");
        assert_eq!(clean_tag("blue\teyes").unwrap(), "blue eyes");
    }

    #[test]
    fn test_clean_tag_turns_tabs_and_newlines_into_spaces() {
        assert_eq!(clean_tag("series:\n metroid\r\nprime").unwrap(), "series:metroid prime");
        assert_eq!(clean_tag("red\u{0007}hair").unwrap(), "redhair");
    }

    #[test]
    fn test_clean_tag_keeps_leading_colon_subtag() {
        assert_eq!(clean_tag(":)").unwrap(), ":)");
        assert_eq!(Tag::split(":)"), Tag::unnamespaced(":)"));
    }

    #[test]
    fn test_clean_tag_rejects_empty() {
        assert_eq!(clean_tag("   "), Err(TagProblem::Empty));
        assert_eq!(clean_tag("character:   "), Err(TagProblem::Empty));
        assert_eq!(clean_tag("\u{0007}"), Err(TagProblem::Empty));
    }

    #[test]
    fn test_clean_tag_rejects_too_long() {
        let raw = "a".repeat(TagConfig::MAX_TAG_LENGTH + 1);
        assert!(matches!(clean_tag(&raw), Err(TagProblem::TooLong { .. })));
        let raw = "a".repeat(TagConfig::MAX_TAG_LENGTH);
        assert!(clean_tag(&raw).is_ok());
    }

    #[test]
    fn test_tag_display_and_split() {
        let tag = Tag::parse("series:metroid").unwrap();
        assert_eq!(tag.namespace, "series");
        assert_eq!(tag.subtag, "metroid");
        assert_eq!(tag.to_string(), "series:metroid");
        assert_eq!(Tag::split("a:b:c"), Tag::new("a", "b:c"));
    }
}
