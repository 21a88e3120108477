//! Semantic-info document produced by the front end that compiled the target.
//!
//! ```json
//! { "source_file": "/work/main.cpp", "constructors": [{ "className": "Point", "line": 12 }] }
//! ```
//!
//! Only `source_file` influences tracing (it names the primary user source
//! for the user-code filter). `constructors` is parsed for shape and kept for
//! callers; unknown fields are ignored.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::domain::SetupError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SemanticInfo {
    #[serde(default)]
    pub source_file: Option<PathBuf>,
    #[serde(default)]
    pub constructors: Vec<ConstructorHint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstructorHint {
    pub class_name: String,
    pub line: u32,
}

impl SemanticInfo {
    /// Read and validate a semantic-info file.
    ///
    /// # Errors
    /// Returns an error if the file is unreadable or not in the expected shape
    pub fn load(path: &Path) -> Result<Self, SetupError> {
        let content = std::fs::read_to_string(path)
            .map_err(|error| SetupError::SemanticInfoUnreadable { path: path.to_path_buf(), error })?;
        serde_json::from_str(&content)
            .map_err(|error| SetupError::SemanticInfoMalformed { path: path.to_path_buf(), error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_full_document() {
        let file = write_temp(
            r#"{"source_file": "/work/main.cpp",
                "constructors": [{"className": "Point", "line": 12}],
                "extra": true}"#,
        );
        let info = SemanticInfo::load(file.path()).unwrap();
        assert_eq!(info.source_file, Some(PathBuf::from("/work/main.cpp")));
        assert_eq!(info.constructors, [ConstructorHint { class_name: "Point".to_string(), line: 12 }]);
    }

    #[test]
    fn test_empty_object_is_valid() {
        let file = write_temp("{}");
        assert_eq!(SemanticInfo::load(file.path()).unwrap(), SemanticInfo::default());
    }

    #[test]
    fn test_malformed_document() {
        let file = write_temp(r#"{"source_file": 42}"#);
        let err = SemanticInfo::load(file.path()).unwrap_err();
        assert!(matches!(err, SetupError::SemanticInfoMalformed { .. }));

        let file = write_temp("[1, 2]");
        assert!(SemanticInfo::load(file.path()).is_err());
    }

    #[test]
    fn test_unreadable_document() {
        let err = SemanticInfo::load(Path::new("/nonexistent/info.json")).unwrap_err();
        assert!(matches!(err, SetupError::SemanticInfoUnreadable { .. }));
        assert!(err.to_string().contains("/nonexistent/info.json"));
    }
}
