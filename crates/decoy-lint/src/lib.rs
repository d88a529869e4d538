//! Imposter file linter for Decoy.
//!
//! Runs the same dry-run validation the server applies when an imposter is
//! created, so broken stubs are caught before the server starts. Files may be
//! JSON or YAML and hold either a single imposter or an `imposters` list.
//!
//! # Example
//!
//! ```no_run
//! use decoy_lint::{lint_path, LintOptions};
//! use std::path::Path;
//!
//! let result = lint_path(Path::new("./imposters"), &LintOptions::default());
//! if result.has_errors() {
//!     eprintln!("Found {} errors", result.errors);
//! }
//! ```

mod types;

use decoy::config::ImposterConfig;
use decoy::dry_run::{self, DryRunOptions};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub use types::{LintIssue, LintOptions, LintResult, Severity};

/// Failure to turn a file into imposter configurations.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid JSON/YAML: {0}")]
    Syntax(#[from] serde_yaml::Error),
    #[error("Invalid imposter at {location}: {message}")]
    Imposter { location: String, message: String },
}

/// Load every imposter defined in a file, with its location inside the file.
pub fn load_imposters(path: &Path) -> Result<Vec<(String, ImposterConfig)>, LoadError> {
    let content = std::fs::read_to_string(path)?;
    let value: Value = serde_yaml::from_str(&content)?;

    let entries: Vec<(String, Value)> = match value.get("imposters") {
        Some(Value::Array(list)) => list
            .iter()
            .enumerate()
            .map(|(i, imposter)| (format!("imposters[{i}]"), imposter.clone()))
            .collect(),
        Some(_) => {
            return Err(LoadError::Imposter {
                location: "imposters".to_string(),
                message: "expected a list".to_string(),
            })
        }
        None => vec![("imposter".to_string(), value)],
    };

    entries
        .into_iter()
        .map(|(location, value)| match serde_json::from_value(value) {
            Ok(config) => Ok((location, config)),
            Err(e) => Err(LoadError::Imposter {
                location,
                message: e.to_string(),
            }),
        })
        .collect()
}

/// Lint a single imposter file.
pub fn lint_file(path: &Path, options: &LintOptions) -> LintResult {
    let mut result = LintResult::new();
    result.files_checked = 1;

    let imposters = match load_imposters(path) {
        Ok(imposters) => imposters,
        Err(e) => {
            result.add_issue(LintIssue::error("E001", e.to_string(), path.to_path_buf()));
            return result;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            result.add_issue(LintIssue::error(
                "E003",
                format!("Failed to start validation runtime: {e}"),
                path.to_path_buf(),
            ));
            return result;
        }
    };

    let mut seen_ports: HashMap<u16, String> = HashMap::new();
    for (location, imposter) in &imposters {
        check_imposter(path, location, imposter, &runtime, options, &mut result);

        if let Some(port) = imposter.port {
            if let Some(first) = seen_ports.get(&port) {
                result.add_issue(
                    LintIssue::error(
                        "E002",
                        format!("Port {port} is already used by {first}"),
                        path.to_path_buf(),
                    )
                    .with_location(location.clone()),
                );
            } else {
                seen_ports.insert(port, location.clone());
            }
        }
    }

    result
}

fn check_imposter(
    path: &Path,
    location: &str,
    imposter: &ImposterConfig,
    runtime: &tokio::runtime::Runtime,
    options: &LintOptions,
    result: &mut LintResult,
) {
    if !imposter.protocol.is_supported() {
        result.add_issue(
            LintIssue::error(
                "invalid operation",
                format!("the {} protocol is not supported", imposter.protocol),
                path.to_path_buf(),
            )
            .with_location(location),
        );
        return;
    }

    if imposter.stubs.is_empty() {
        result.add_issue(
            LintIssue::warning(
                "W001",
                "imposter has no stubs and will only send the default response",
                path.to_path_buf(),
            )
            .with_location(location),
        );
    }
    if imposter.port.is_none() {
        result.add_issue(
            LintIssue::warning(
                "W002",
                "no port given, one will be assigned at startup",
                path.to_path_buf(),
            )
            .with_location(location),
        );
    }

    let dry_run_options = DryRunOptions {
        protocol: imposter.protocol,
        mode: imposter.mode,
        allow_injection: options.allow_injection,
        default_response: imposter.default_response.clone(),
    };
    let errors = runtime.block_on(dry_run::validate(&imposter.stubs, &dry_run_options));
    for detail in errors {
        result.add_issue(
            LintIssue::error(detail.code, detail.message, path.to_path_buf())
                .with_location(location),
        );
    }
}

/// Imposter files under a path: the file itself, or the `.json`, `.yaml` and
/// `.yml` files directly inside a directory.
pub fn collect_files(path: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    if path.is_file() {
        files.push(path.to_path_buf());
    } else if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            let entry_path = entry.path();
            let is_config = entry_path
                .extension()
                .is_some_and(|ext| ext == "json" || ext == "yaml" || ext == "yml");
            if entry_path.is_file() && is_config {
                files.push(entry_path);
            }
        }
    }

    files.sort();
    files
}

/// Lint a file or every imposter file in a directory, including port
/// conflicts between files.
pub fn lint_path(path: &Path, options: &LintOptions) -> LintResult {
    let mut result = LintResult::new();
    let files = collect_files(path);

    let mut port_map: HashMap<u16, Vec<PathBuf>> = HashMap::new();
    for file in &files {
        if let Ok(imposters) = load_imposters(file) {
            for (_, imposter) in imposters {
                if let Some(port) = imposter.port {
                    let owners = port_map.entry(port).or_default();
                    if !owners.contains(file) {
                        owners.push(file.clone());
                    }
                }
            }
        }
        result.merge(lint_file(file, options));
    }

    let mut conflicts: Vec<_> = port_map.into_iter().filter(|(_, f)| f.len() > 1).collect();
    conflicts.sort_by_key(|(port, _)| *port);
    for (port, owners) in conflicts {
        let names: Vec<String> = owners
            .iter()
            .map(|f| f.file_name().unwrap_or_default().to_string_lossy().to_string())
            .collect();
        result.add_issue(
            LintIssue::error(
                "E002",
                format!("Port {port} is used by {} files: {}", owners.len(), names.join(", ")),
                owners[0].clone(),
            )
            .with_location("port"),
        );
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_valid_file_has_no_errors() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "ok.json",
            r#"{"protocol": "http", "port": 4545, "stubs": [
                {"predicates": [{"equals": {"path": "/"}}], "responses": [{"is": {"body": "hi"}}]}
            ]}"#,
        );

        let result = lint_file(&path, &LintOptions::default());
        assert_eq!(result.files_checked, 1);
        assert!(!result.has_errors(), "{:?}", result.issues);
        assert_eq!(result.warnings, 0);
    }

    #[test]
    fn test_syntax_error() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "broken.json", r#"{"protocol": "http", "stubs": ["#);

        let result = lint_file(&path, &LintOptions::default());
        assert_eq!(result.with_code("E001").count(), 1);
    }

    #[test]
    fn test_engine_errors_are_reported() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "inject.yaml",
            r#"
imposters:
  - protocol: tcp
    port: 3000
    stubs:
      - responses:
          - inject: "function (config) { return {data: 'x'}; }"
"#,
        );

        let result = lint_file(&path, &LintOptions::default());
        let issue = result.with_code("invalid injection").next().unwrap();
        assert_eq!(issue.location.as_deref(), Some("imposters[0]"));

        let allowed = lint_file(
            &path,
            &LintOptions {
                allow_injection: true,
            },
        );
        assert_eq!(allowed.with_code("invalid injection").count(), 0);
    }

    #[test]
    fn test_warnings() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "empty.json", r#"{"protocol": "tcp"}"#);

        let result = lint_file(&path, &LintOptions::default());
        assert!(!result.has_errors());
        assert_eq!(result.with_code("W001").count(), 1);
        assert_eq!(result.with_code("W002").count(), 1);
    }

    #[test]
    fn test_unsupported_protocol() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "tls.json", r#"{"protocol": "https", "port": 443}"#);

        let result = lint_file(&path, &LintOptions::default());
        assert_eq!(result.with_code("invalid operation").count(), 1);
    }

    #[test]
    fn test_duplicate_ports_within_file() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "dupes.json",
            r#"{"imposters": [
                {"protocol": "tcp", "port": 3000, "stubs": [{"responses": [{"is": {"data": "a"}}]}]},
                {"protocol": "tcp", "port": 3000, "stubs": [{"responses": [{"is": {"data": "b"}}]}]}
            ]}"#,
        );

        let result = lint_file(&path, &LintOptions::default());
        let issue = result.with_code("E002").next().unwrap();
        assert_eq!(issue.location.as_deref(), Some("imposters[1]"));
    }

    #[test]
    fn test_duplicate_ports_across_files() {
        let dir = TempDir::new().unwrap();
        let stub = r#"{"protocol": "http", "port": 5000, "stubs": [{"responses": [{"is": {}}]}]}"#;
        write(&dir, "a.json", stub);
        write(&dir, "b.yml", stub);
        write(&dir, "notes.txt", "not an imposter");

        let result = lint_path(dir.path(), &LintOptions::default());
        assert_eq!(result.files_checked, 2);
        let conflict = result.with_code("E002").next().unwrap();
        assert!(conflict.message.contains("a.json, b.yml"));
    }
}
