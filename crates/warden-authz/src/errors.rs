use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthzError {
    #[error("rule has no fields")]
    EmptyRule,
    #[error("rule has {0} fields, at most 6 are supported")]
    TooManyFields(usize),
    #[error("unknown policy section for ptype: {0}")]
    UnknownSection(String),
    #[error("field window out of range: field_index={field_index} len={len}")]
    InvalidFieldWindow { field_index: usize, len: usize },
    #[error("ptype {0} is not defined by the model")]
    UnsupportedPtype(String),
    #[error("{ptype} rules have {expected} fields, got {actual}")]
    RuleShape {
        ptype: String,
        expected: usize,
        actual: usize,
    },
    #[error("invalid policy snapshot: {0}")]
    InvalidSnapshot(String),
}

pub type AuthzResult<T> = Result<T, AuthzError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_variants() {
        let errors = vec![
            AuthzError::EmptyRule,
            AuthzError::TooManyFields(7),
            AuthzError::UnknownSection("x".to_string()),
            AuthzError::InvalidFieldWindow {
                field_index: 6,
                len: 1,
            },
            AuthzError::UnsupportedPtype("p2".to_string()),
            AuthzError::RuleShape {
                ptype: "p".to_string(),
                expected: 3,
                actual: 4,
            },
            AuthzError::InvalidSnapshot("eof".to_string()),
        ];

        for error in errors {
            let rendered = error.to_string();
            assert!(!rendered.is_empty());
        }
    }
}
