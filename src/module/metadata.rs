use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

const METADATA_FILES: &[&str] = &["terrareg.json", ".terrareg.json", "terrareg.yaml", "terrareg.yml"];

/// Optional metadata shipped at the module root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ModuleMetadata {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub repo_clone_url: Option<String>,
    #[serde(default)]
    pub repo_browse_url: Option<String>,
}

/// Reads the first metadata file found under `root`.
pub fn read_metadata(root: &Path) -> Result<ModuleMetadata> {
    for name in METADATA_FILES {
        let path = root.join(name);
        if !path.is_file() {
            continue;
        }
        let content = fs::read_to_string(&path)?;
        let parsed = if name.ends_with(".json") {
            serde_json::from_str(&content).map_err(|e| invalid(name, e))?
        } else {
            serde_yaml::from_str(&content).map_err(|e| invalid(name, e))?
        };
        return Ok(parsed);
    }
    Ok(ModuleMetadata::default())
}

fn invalid(name: &str, e: impl std::fmt::Display) -> Error {
    Error::bad_request(format!("Invalid {name}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reads_json_metadata() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("terrareg.json"),
            r#"{"description": "Widget module", "owner": "platform"}"#,
        )
        .unwrap();

        let metadata = read_metadata(temp.path()).unwrap();
        assert_eq!(metadata.description.as_deref(), Some("Widget module"));
        assert_eq!(metadata.owner.as_deref(), Some("platform"));
    }

    #[test]
    fn test_reads_yaml_metadata() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("terrareg.yml"),
            "description: From yaml\nrepo_clone_url: https://git.example.com/x.git\n",
        )
        .unwrap();

        let metadata = read_metadata(temp.path()).unwrap();
        assert_eq!(metadata.description.as_deref(), Some("From yaml"));
        assert_eq!(
            metadata.repo_clone_url.as_deref(),
            Some("https://git.example.com/x.git")
        );
    }

    #[test]
    fn test_missing_metadata_is_default() {
        let temp = TempDir::new().unwrap();
        assert_eq!(read_metadata(temp.path()).unwrap(), ModuleMetadata::default());
    }

    #[test]
    fn test_invalid_metadata_is_bad_request() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("terrareg.json"), "{not json").unwrap();
        assert!(matches!(read_metadata(temp.path()), Err(Error::BadRequest(_))));
    }
}
