//! Two-stage request validation
//!
//! Stage 1 runs the declarative field rules from the `validator` derive
//! (required, length, range, email, regex, ...). Stage 2 walks the decoded
//! structure depth-first and invokes each node's [`CustomValidate`] rule
//! after recursing into its children. Errors carry a dot-separated field
//! path built from JSON names, with `name[i]` for sequence elements and
//! `name[key]` for map values.
//!
//! Rust has no runtime reflection, so the structural walk is derived
//! explicitly: each aggregate type lists its fields once through
//! [`validate_fields!`](crate::validate_fields), which generates the
//! [`ValidateDeep`] impl.
//!
//! # Example
//!
//! ```rust,ignore
//! #[derive(Deserialize, Validate)]
//! struct SignupRequest {
//!     #[validate(length(min = 3))]
//!     username: String,
//!     password: String,
//! }
//!
//! impl CustomValidate for SignupRequest {
//!     fn validate(&self) -> Result<(), RuleError> {
//!         if self.username == "admin" && self.password.len() < 12 {
//!             return Err(FieldError::new(
//!                 "password",
//!                 "admin password must be at least 12 characters",
//!             )
//!             .into());
//!         }
//!         Ok(())
//!     }
//! }
//!
//! validate_fields!(SignupRequest { username => "username", password => "password" } with rules);
//!
//! async fn signup(ValidatedJson(req): ValidatedJson<SignupRequest>) -> ... {}
//! ```

use axum::body::Bytes;
use axum::extract::{FromRequest, Request};
use serde::de::DeserializeOwned;
use validator::ValidationErrorsKind;

use crate::error::Error;
use crate::responses::RequestError;

mod walk;

pub use walk::ValidateDeep;

/// Sentinel field for decoding failures
const BODY_FIELD: &str = "body";
/// Sentinel field for query type-conversion failures
const QUERY_FIELD: &str = "-";
/// Sentinel field for root-level user errors that name no field
const CUSTOM_FIELD: &str = "custom";

/// Dot-separated position inside the decoded structure
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldPath(String);

impl FieldPath {
    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Path of a named child (JSON field name)
    pub fn child(&self, name: &str) -> Self {
        if self.0.is_empty() {
            Self(name.to_string())
        } else {
            Self(format!("{}.{}", self.0, name))
        }
    }

    /// Path of a sequence element (`parent[i]`)
    pub fn indexed(&self, index: usize) -> Self {
        Self(format!("{}[{}]", self.0, index))
    }

    /// Path of a map value (`parent[key]`)
    pub fn keyed(&self, key: &str) -> Self {
        Self(format!("{}[{}]", self.0, key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User rule error naming a specific field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Error returned by a [`CustomValidate`] rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    /// Names a specific field of the failing node
    Field(FieldError),
    /// Names no field; reported against the node itself
    Custom(String),
}

impl RuleError {
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }

    /// Resolve this rule error into a wire-level [`RequestError`] at `path`
    pub(crate) fn into_request_error(self, path: &FieldPath) -> RequestError {
        match self {
            RuleError::Field(fe) => {
                let field = if path.is_root() {
                    fe.field
                } else {
                    format!("{}.{}", path, fe.field)
                };
                RequestError::new(field, fe.message)
            }
            RuleError::Custom(message) => {
                // Root errors get the "custom" sentinel; a top-level
                // aggregate reports its own name; deeper nodes append
                // ".custom" to their path.
                let field = if path.is_root() {
                    CUSTOM_FIELD.to_string()
                } else if !path.as_str().contains('.') {
                    path.as_str().to_string()
                } else {
                    format!("{}.{}", path, CUSTOM_FIELD)
                };
                RequestError::new(field, message)
            }
        }
    }
}

impl From<FieldError> for RuleError {
    fn from(fe: FieldError) -> Self {
        RuleError::Field(fe)
    }
}

impl From<String> for RuleError {
    fn from(message: String) -> Self {
        RuleError::Custom(message)
    }
}

impl From<&str> for RuleError {
    fn from(message: &str) -> Self {
        RuleError::Custom(message.to_string())
    }
}

/// Per-type user validation rule, invoked by the walker after recursing into
/// the node's children
pub trait CustomValidate {
    fn validate(&self) -> std::result::Result<(), RuleError>;
}

/// Invoke a node's [`CustomValidate`] rule and record the outcome at `path`.
///
/// Called by the [`validate_fields!`](crate::validate_fields) expansion;
/// rarely used directly.
pub fn apply_rules<T: CustomValidate>(
    node: &T,
    path: &FieldPath,
    errors: &mut Vec<RequestError>,
) {
    if let Err(rule_error) = node.validate() {
        errors.push(rule_error.into_request_error(path));
    }
}

/// Stage 1: declarative binding rules from the `validator` derive
pub fn binding_errors<T: validator::Validate>(value: &T) -> Vec<RequestError> {
    match value.validate() {
        Ok(()) => Vec::new(),
        Err(errors) => {
            let mut out = Vec::new();
            flatten_binding_errors(&errors, &FieldPath::root(), &mut out);
            out
        }
    }
}

fn flatten_binding_errors(
    errors: &validator::ValidationErrors,
    path: &FieldPath,
    out: &mut Vec<RequestError>,
) {
    for (field, kind) in errors.errors() {
        let field_path = path.child(field);
        match kind {
            ValidationErrorsKind::Field(failures) => {
                for failure in failures {
                    let message = failure
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("validation failed on '{}'", failure.code));
                    out.push(RequestError::new(field_path.as_str(), message));
                }
            }
            ValidationErrorsKind::Struct(nested) => {
                flatten_binding_errors(nested, &field_path, out);
            }
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    flatten_binding_errors(nested, &field_path.indexed(*index), out);
                }
            }
        }
    }
}

/// Run both validation stages; stage 2 only runs once binding passes
pub fn validate_request<T>(value: &T) -> std::result::Result<(), Error>
where
    T: validator::Validate + ValidateDeep,
{
    let mut errors = binding_errors(value);

    if errors.is_empty() {
        value.walk(&FieldPath::root(), &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(errors))
    }
}

/// JSON body extractor running both validation stages.
///
/// Malformed JSON yields a single error with `field = "body"`; any rule
/// failure aborts the chain with HTTP 400 and the error envelope.
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + validator::Validate + ValidateDeep,
{
    type Rejection = Error;

    async fn from_request(request: Request, state: &S) -> std::result::Result<Self, Error> {
        let bytes = Bytes::from_request(request, state)
            .await
            .map_err(|e| Error::Validation(vec![RequestError::new(BODY_FIELD, e.to_string())]))?;

        let value: T = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Validation(vec![RequestError::new(BODY_FIELD, e.to_string())]))?;

        validate_request(&value)?;
        Ok(ValidatedJson(value))
    }
}

/// Query-string extractor running both validation stages.
///
/// Type-conversion failures yield a single error with `field = "-"`.
pub struct ValidatedQuery<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned + validator::Validate + ValidateDeep,
{
    type Rejection = Error;

    async fn from_request(request: Request, _state: &S) -> std::result::Result<Self, Error> {
        let query = request.uri().query().unwrap_or("");

        let value: T = serde_urlencoded::from_str(query)
            .map_err(|e| Error::Validation(vec![RequestError::new(QUERY_FIELD, e.to_string())]))?;

        validate_request(&value)?;
        Ok(ValidatedQuery(value))
    }
}
