use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The server would refuse to create the imposter.
    Error,
    /// Loads, but probably not what was meant.
    Warning,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
        }
    }
}

/// One finding in an imposter file.
#[derive(Debug, Clone, Serialize)]
pub struct LintIssue {
    pub severity: Severity,
    /// Engine error code (`bad data`, `invalid injection`, ...) or a linter
    /// code such as `E001`.
    pub code: String,
    pub message: String,
    pub file: PathBuf,
    /// Imposter the issue belongs to, e.g. `imposters[2]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl LintIssue {
    fn new(severity: Severity, code: impl Into<String>, message: impl Into<String>, file: PathBuf) -> Self {
        Self {
            severity,
            code: code.into(),
            message: message.into(),
            file,
            location: None,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>, file: PathBuf) -> Self {
        Self::new(Severity::Error, code, message, file)
    }

    pub fn warning(code: impl Into<String>, message: impl Into<String>, file: PathBuf) -> Self {
        Self::new(Severity::Warning, code, message, file)
    }

    pub fn with_location(self, location: impl Into<String>) -> Self {
        Self {
            location: Some(location.into()),
            ..self
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct LintResult {
    pub files_checked: usize,
    pub errors: usize,
    pub warnings: usize,
    pub issues: Vec<LintIssue>,
}

impl LintResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_issue(&mut self, issue: LintIssue) {
        *self.counter(issue.severity) += 1;
        self.issues.push(issue);
    }

    fn counter(&mut self, severity: Severity) -> &mut usize {
        match severity {
            Severity::Error => &mut self.errors,
            Severity::Warning => &mut self.warnings,
        }
    }

    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    /// Fold the findings for another file into this result.
    pub fn merge(&mut self, other: LintResult) {
        self.files_checked += other.files_checked;
        for issue in other.issues {
            self.add_issue(issue);
        }
    }

    /// Drop warnings, keeping only what would stop the server.
    pub fn retain_errors(&mut self) {
        self.issues.retain(|issue| issue.severity == Severity::Error);
        self.warnings = 0;
    }

    pub fn with_code<'a>(&'a self, code: &'a str) -> impl Iterator<Item = &'a LintIssue> + 'a {
        self.issues.iter().filter(move |issue| issue.code == code)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LintOptions {
    /// Validate as if the server ran with `--allow-injection`.
    pub allow_injection: bool,
}
