//! Reading the `OpenAPI` document from disk.

use crate::error::{OpenApiToolsError, Result};
use openapiv3::OpenAPI;
use std::path::Path;

/// Load and parse a YAML or JSON `OpenAPI` document.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a valid `OpenAPI` 3 document.
pub fn load_spec_file(path: &Path) -> Result<OpenAPI> {
    tracing::info!(path = %path.display(), "loading OpenAPI spec");
    let content =
        std::fs::read_to_string(path).map_err(|e| OpenApiToolsError::OpenApiSpecReadFile {
            path: path.display().to_string(),
            source: e,
        })?;
    parse_spec(&content, &path.display().to_string())
}

/// Parse document text. `location` only labels errors.
///
/// # Errors
///
/// Returns an error if the text is not a valid `OpenAPI` 3 document.
pub fn parse_spec(content: &str, location: &str) -> Result<OpenAPI> {
    // JSON is a valid subset of YAML, so serde_yaml alone is enough
    let spec: OpenAPI =
        serde_yaml::from_str(content).map_err(|e| OpenApiToolsError::OpenApiSpecParse {
            location: location.to_string(),
            source: e,
        })?;
    if !spec.openapi.starts_with("3.") {
        return Err(OpenApiToolsError::OpenApi(format!(
            "Unsupported OpenAPI version '{}' in {location}",
            spec.openapi
        )));
    }
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn loads_json_and_yaml_files() {
        let mut json = tempfile::NamedTempFile::new().expect("temp");
        write!(
            json,
            r#"{{"openapi":"3.0.3","info":{{"title":"J","version":"1"}},"paths":{{}}}}"#
        )
        .expect("write");
        assert_eq!(load_spec_file(json.path()).expect("json").info.title, "J");

        let mut yaml = tempfile::NamedTempFile::new().expect("temp");
        writeln!(yaml, "openapi: 3.0.0\ninfo: {{ title: Y, version: '1' }}\npaths: {{}}")
            .expect("write");
        assert_eq!(load_spec_file(yaml.path()).expect("yaml").info.title, "Y");
    }

    #[test]
    fn reports_missing_files_and_bad_documents() {
        let err = load_spec_file(Path::new("/definitely/not/here.yaml")).expect_err("missing");
        assert!(matches!(err, OpenApiToolsError::OpenApiSpecReadFile { .. }));

        let err = parse_spec("openapi: [", "inline").expect_err("bad yaml");
        assert!(matches!(err, OpenApiToolsError::OpenApiSpecParse { .. }));

        let err = parse_spec(
            "openapi: '2.0'\ninfo: { title: t, version: '1' }\npaths: {}",
            "inline",
        )
        .expect_err("swagger 2");
        assert!(err.to_string().contains("Unsupported OpenAPI version"));
    }
}
