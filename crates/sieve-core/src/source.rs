//! Transformation and library source records.

use serde::{Deserialize, Serialize};

/// Transformation record as served by the source service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformationCode {
    pub version_id: String,
    pub code: String,
    #[serde(default)]
    pub library_version_ids: Vec<String>,
}

/// Shared library record as served by the source service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryCode {
    pub version_id: String,
    pub code: String,
}

/// Everything needed to build a sandbox for one version.
///
/// Immutable: editing a transformation produces a new version id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformationVersion {
    pub id: String,
    pub source_code: String,
    pub library_code: Option<String>,
}

impl TransformationVersion {
    pub fn new(id: impl Into<String>, source_code: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_code: source_code.into(),
            library_code: None,
        }
    }

    pub fn with_library(mut self, library_code: impl Into<String>) -> Self {
        self.library_code = Some(library_code.into());
        self
    }

    /// Join a transformation with its libraries, in declared order.
    /// The version is keyed by `id`, the id it was requested under.
    pub fn assemble(
        id: impl Into<String>,
        transformation: TransformationCode,
        libraries: &[LibraryCode],
    ) -> Self {
        let library_code = if libraries.is_empty() {
            None
        } else {
            Some(
                libraries
                    .iter()
                    .map(|lib| lib.code.as_str())
                    .collect::<Vec<_>>()
                    .join("\n;\n"),
            )
        };

        Self {
            id: id.into(),
            source_code: transformation.code,
            library_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_service_payload() {
        let raw = r#"{
            "versionId": "tv-1",
            "code": "function transform(e) { return e }",
            "libraryVersionIds": ["lib-1", "lib-2"],
            "name": "ignored"
        }"#;
        let code: TransformationCode = serde_json::from_str(raw).unwrap();
        assert_eq!(code.version_id, "tv-1");
        assert_eq!(code.library_version_ids, vec!["lib-1", "lib-2"]);
    }

    #[test]
    fn assemble_keeps_library_order() {
        let transformation = TransformationCode {
            version_id: "tv-1".into(),
            code: "function transform(e) { return e }".into(),
            library_version_ids: vec!["a".into(), "b".into()],
        };
        let libraries = vec![
            LibraryCode { version_id: "a".into(), code: "var A = 1".into() },
            LibraryCode { version_id: "b".into(), code: "var B = A + 1".into() },
        ];
        let version = TransformationVersion::assemble("tv-1", transformation, &libraries);
        let library = version.library_code.unwrap();
        assert!(library.find("var A").unwrap() < library.find("var B").unwrap());
    }

    #[test]
    fn assemble_without_libraries() {
        let transformation = TransformationCode {
            version_id: "tv-2".into(),
            code: "x".into(),
            library_version_ids: vec![],
        };
        assert!(TransformationVersion::assemble("tv-2", transformation, &[]).library_code.is_none());
    }

    #[test]
    fn assemble_uses_requested_id() {
        let transformation = TransformationCode {
            version_id: "stale".into(),
            code: "x".into(),
            library_version_ids: vec![],
        };
        assert_eq!(TransformationVersion::assemble("tv-3", transformation, &[]).id, "tv-3");
    }
}
