//! Artifact identity
//!
//! An artifact is addressed by a short name plus the directory it lives in.
//! The normalized form (case-folded joined path) is the sole identity key:
//! two tags with the same normalized form denote the same artifact.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Identity of a single file tracked by the build.
///
/// Immutable once constructed. Equality, ordering and hashing all go through
/// [`ArtifactTag::normalized`], so `Parse.o` and `parse.o` in the same
/// location are the same artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactTag {
    name: String,
    location: String,
}

impl ArtifactTag {
    /// Create a tag from a file name and the directory it lives in.
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
        }
    }

    /// The short file name portion of the tag.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The directory portion of the tag.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// The real on-disk path of the artifact: `location` joined with `name`.
    pub fn real_path(&self) -> PathBuf {
        Path::new(&self.location).join(&self.name)
    }

    /// The normalized identity key: the joined path, case-folded.
    ///
    /// This is the map key under which the graph stores the artifact and the
    /// input to rule hashing.
    pub fn normalized(&self) -> String {
        self.real_path().to_string_lossy().to_lowercase()
    }
}

impl fmt::Display for ArtifactTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.real_path().display())
    }
}

impl PartialEq for ArtifactTag {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Eq for ArtifactTag {}

impl Hash for ArtifactTag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

impl PartialOrd for ArtifactTag {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ArtifactTag {
    fn cmp(&self, other: &Self) -> Ordering {
        self.normalized().cmp(&other.normalized())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_joins_location_and_name() {
        let tag = ArtifactTag::new("parse.o", "build/out");
        assert_eq!(tag.normalized(), "build/out/parse.o");
        assert_eq!(tag.real_path(), PathBuf::from("build/out/parse.o"));
    }

    #[test]
    fn test_normalized_is_case_folded() {
        let upper = ArtifactTag::new("Parse.O", "Build");
        let lower = ArtifactTag::new("parse.o", "build");
        assert_eq!(upper, lower);
        assert_eq!(upper.normalized(), lower.normalized());
    }

    #[test]
    fn test_empty_location_keeps_bare_name() {
        let tag = ArtifactTag::new("main.c", "");
        assert_eq!(tag.normalized(), "main.c");
    }

    #[test]
    fn test_ordering_follows_normalized_form() {
        let mut tags = vec![
            ArtifactTag::new("b.txt", "src"),
            ArtifactTag::new("A.txt", "src"),
            ArtifactTag::new("c.txt", "other"),
        ];
        tags.sort();
        let keys: Vec<String> = tags.iter().map(ArtifactTag::normalized).collect();
        assert_eq!(keys, vec!["other/c.txt", "src/a.txt", "src/b.txt"]);
    }
}
