use thiserror::Error;

/// Errors raised while declaring schemas, constructing entities, or reading
/// and writing attributes.
///
/// Accessor failures keep the failing attribute path and chain the original
/// error, so a failure deep inside nested models reads like:
///
/// ```text
/// Set of attribute Order[lines] failed
/// Set of attribute Line[qty] failed
/// Assertion failed
/// ```
#[derive(Error, Debug)]
pub enum ModelError {
    /// Schema or listener declaration that cannot be honored.
    #[error("{0}")]
    Configuration(String),

    #[error("Required attribute {path} cannot be undefined")]
    RequiredAttribute { path: String },

    /// Assertion stage rejected the written value.
    #[error("{0}")]
    Validation(String),

    #[error("Attribute {path} is constant and cannot be set")]
    ReadOnlyAttribute { path: String },

    #[error("Get of attribute {path} failed\n{source}")]
    Get {
        path: String,
        #[source]
        source: Box<ModelError>,
    },

    #[error("Set of attribute {path} failed\n{source}")]
    Set {
        path: String,
        #[source]
        source: Box<ModelError>,
    },

    /// List slot that cannot be addressed or allocated.
    #[error("List index {0} is out of range")]
    IndexOutOfRange(usize),

    /// Free-form failure raised by a user supplied read or write stage.
    #[error("{0}")]
    Rule(String),

    #[error("Settings error: {0}")]
    Settings(String),
}

impl ModelError {
    pub fn rule(message: impl Into<String>) -> Self {
        ModelError::Rule(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ModelError::Validation(message.into())
    }

    /// The innermost error, skipping every accessor wrapper.
    pub fn root(&self) -> &ModelError {
        match self {
            ModelError::Get { source, .. } | ModelError::Set { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_errors_chain_messages() {
        let err = ModelError::Set {
            path: "Order[lines]".into(),
            source: Box::new(ModelError::Set {
                path: "Line[qty]".into(),
                source: Box::new(ModelError::validation("Assertion failed")),
            }),
        };
        assert_eq!(
            err.to_string(),
            "Set of attribute Order[lines] failed\nSet of attribute Line[qty] failed\nAssertion failed"
        );
        assert!(matches!(err.root(), ModelError::Validation(msg) if msg == "Assertion failed"));
    }

    #[test]
    fn source_is_exposed() {
        use std::error::Error as _;
        let err = ModelError::Get {
            path: "A[foo]".into(),
            source: Box::new(ModelError::rule("boom")),
        };
        assert_eq!(err.source().map(|s| s.to_string()), Some("boom".to_string()));
    }

    #[test]
    fn required_attribute_names_path() {
        let err = ModelError::RequiredAttribute {
            path: "ModelA[foo]".into(),
        };
        assert_eq!(
            err.to_string(),
            "Required attribute ModelA[foo] cannot be undefined"
        );
    }
}
