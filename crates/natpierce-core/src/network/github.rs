//! GitHub release descriptors.

use crate::{NatpierceError, Result};
use serde::{Deserialize, Serialize};

/// The subset of a GitHub release the version cache needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GitHubRelease {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub prerelease: bool,
}

/// Extract the tag of a "latest release" descriptor.
pub fn latest_tag(repo: &str, descriptor: serde_json::Value) -> Result<String> {
    let release: GitHubRelease =
        serde_json::from_value(descriptor).map_err(|_| NatpierceError::ReleaseNotFound {
            repo: repo.to_string(),
        })?;
    let tag = release.tag_name.trim();
    if tag.is_empty() {
        return Err(NatpierceError::ReleaseNotFound {
            repo: repo.to_string(),
        });
    }
    Ok(tag.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_latest_tag() {
        let descriptor = json!({"tag_name": "v0.2.1", "name": "0.2.1", "assets": []});
        assert_eq!(latest_tag("natpierce/decky-natpierce", descriptor).unwrap(), "v0.2.1");
    }

    #[test]
    fn test_missing_tag_is_release_not_found() {
        let err = latest_tag("a/b", json!({"message": "Not Found"})).unwrap_err();
        assert!(matches!(err, NatpierceError::ReleaseNotFound { repo } if repo == "a/b"));
    }
}
