//! Vendor-neutral validation facade.
//!
//! The runtime validates values at trust boundaries (flow input/output, tag
//! writes) through the [`Schema`] trait. Three adapters are provided:
//!
//! - [`Accept`] — accepts every value (the default for untyped boundaries).
//! - [`Refine`] — closure-backed, for ad-hoc predicates.
//! - [`Valid`] — backed by `garde` for types deriving `garde::Validate`.

use crate::error::{CoreError, ErrorCode, Stage};
use std::sync::Arc;

/// A single validation finding, with the offending field path when known.
#[derive(Debug, Clone)]
pub struct SchemaIssue {
    pub path: String,
    pub message: String,
}

/// Collection of validation findings produced by a failed [`Schema::validate`].
#[derive(Debug, Clone, Default)]
pub struct SchemaIssues {
    pub issues: Vec<SchemaIssue>,
}

impl SchemaIssues {
    pub fn single(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            issues: vec![SchemaIssue {
                path: path.into(),
                message: message.into(),
            }],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Convert into a `SCHEMA_VALIDATION_FAILED` error for the given stage.
    pub fn into_error(self, stage: Stage) -> CoreError {
        let summary = self
            .issues
            .iter()
            .map(|i| {
                if i.path.is_empty() {
                    i.message.clone()
                } else {
                    format!("{}: {}", i.path, i.message)
                }
            })
            .collect::<Vec<_>>()
            .join("; ");
        let paths: Vec<serde_json::Value> = self
            .issues
            .iter()
            .map(|i| serde_json::json!({ "path": i.path, "message": i.message }))
            .collect();
        CoreError::new(
            ErrorCode::SchemaValidationFailed,
            stage,
            format!("schema validation failed: {summary}"),
        )
        .with_extra(serde_json::Value::Array(paths))
    }
}

/// Opaque validation descriptor with a uniform entry point.
pub trait Schema<T>: Send + Sync + 'static {
    fn validate(&self, value: &T) -> Result<(), SchemaIssues>;
}

/// Shared schema handle as stored on tags and flow definitions.
pub type SchemaRef<T> = Arc<dyn Schema<T>>;

/// Accepts every value.
pub struct Accept;

impl<T: 'static> Schema<T> for Accept {
    fn validate(&self, _value: &T) -> Result<(), SchemaIssues> {
        Ok(())
    }
}

/// Closure-backed schema for ad-hoc predicates.
///
/// # Example
///
/// ```ignore
/// let positive = Refine::new(|n: &i64| {
///     (*n > 0).then_some(()).ok_or_else(|| "must be positive".to_string())
/// });
/// ```
pub struct Refine<T> {
    check: Box<dyn Fn(&T) -> Result<(), String> + Send + Sync>,
}

impl<T: 'static> Refine<T> {
    pub fn new<F>(check: F) -> Self
    where
        F: Fn(&T) -> Result<(), String> + Send + Sync + 'static,
    {
        Self {
            check: Box::new(check),
        }
    }
}

impl<T: Send + Sync + 'static> Schema<T> for Refine<T> {
    fn validate(&self, value: &T) -> Result<(), SchemaIssues> {
        (self.check)(value).map_err(|message| SchemaIssues::single("", message))
    }
}

/// `garde`-backed schema for types deriving [`garde::Validate`].
pub struct Valid;

impl<T> Schema<T> for Valid
where
    T: garde::Validate + Send + Sync + 'static,
    T::Context: Default,
{
    fn validate(&self, value: &T) -> Result<(), SchemaIssues> {
        value.validate().map_err(|report| {
            let issues = report
                .iter()
                .map(|(path, error)| {
                    let path = path.to_string();
                    SchemaIssue {
                        path: if path.is_empty() { "value".into() } else { path },
                        message: error.message().to_string(),
                    }
                })
                .collect();
            SchemaIssues { issues }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_passes_everything() {
        assert!(Accept.validate(&42i64).is_ok());
        assert!(Accept.validate(&"anything".to_string()).is_ok());
    }

    #[test]
    fn refine_rejects_with_message() {
        let positive = Refine::new(|n: &i64| {
            if *n > 0 {
                Ok(())
            } else {
                Err("must be positive".to_string())
            }
        });
        assert!(positive.validate(&1).is_ok());
        let issues = positive.validate(&-5).unwrap_err();
        assert_eq!(issues.issues[0].message, "must be positive");
    }

    #[test]
    fn issues_into_error_carries_code_and_paths() {
        let issues = SchemaIssues::single("n", "not a number");
        let err = issues.into_error(Stage::FlowInput);
        assert_eq!(err.code(), ErrorCode::SchemaValidationFailed);
        assert!(err.message().contains("n: not a number"));
        assert!(err.context().extra.is_some());
    }

    #[derive(garde::Validate)]
    struct SignUp {
        #[garde(length(min = 3))]
        username: String,
        #[garde(range(min = 1, max = 150))]
        age: u32,
    }

    #[test]
    fn garde_backed_schema_reports_field_paths() {
        let bad = SignUp {
            username: "ab".into(),
            age: 200,
        };
        let issues = Valid.validate(&bad).unwrap_err();
        assert_eq!(issues.issues.len(), 2);
        let paths: Vec<&str> = issues.issues.iter().map(|i| i.path.as_str()).collect();
        assert!(paths.contains(&"username"));
        assert!(paths.contains(&"age"));
    }
}
