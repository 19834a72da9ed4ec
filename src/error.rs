//! Error types for SGF parsing, property interpretation and tree editing.

use thiserror::Error;

/// Result type alias using [`SgfError`].
pub type Result<T> = std::result::Result<T, SgfError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SgfError {
    /// Malformed tokens or game-tree structure.
    #[error("grammar error: {0}")]
    Grammar(String),

    /// Bad property list shape (no values, too many values, unknown identifier).
    #[error("property error: {0}")]
    Property(String),

    /// The requested property identifier is not present on the node.
    #[error("missing property: {0}")]
    MissingProperty(String),

    /// A raw value failed its type's decoding rule, or a typed value could not be encoded.
    #[error("invalid value: {0}")]
    Value(String),

    /// Illegal tree operation.
    #[error("structural error: {0}")]
    Structural(String),

    /// Unknown or unsupported charset.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Failure while parsing one game of a collection.
    #[error("error parsing game {index}: {source}")]
    Game {
        index: usize,
        #[source]
        source: Box<SgfError>,
    },

    #[error("failed to build thread pool: {0}")]
    ThreadPool(String),
}

impl SgfError {
    pub fn grammar(msg: impl Into<String>) -> Self {
        SgfError::Grammar(msg.into())
    }

    pub fn property(msg: impl Into<String>) -> Self {
        SgfError::Property(msg.into())
    }

    pub fn missing(identifier: impl Into<String>) -> Self {
        SgfError::MissingProperty(identifier.into())
    }

    pub fn value(msg: impl Into<String>) -> Self {
        SgfError::Value(msg.into())
    }

    pub fn structural(msg: impl Into<String>) -> Self {
        SgfError::Structural(msg.into())
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        SgfError::Encoding(msg.into())
    }

    /// Wrap an error with the index of the game it occurred in.
    pub fn in_game(self, index: usize) -> Self {
        SgfError::Game {
            index,
            source: Box::new(self),
        }
    }

    pub fn is_missing_property(&self) -> bool {
        matches!(self, SgfError::MissingProperty(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_error_message() {
        let err = SgfError::grammar("empty sequence").in_game(2);
        assert_eq!(
            err.to_string(),
            "error parsing game 2: grammar error: empty sequence"
        );
    }

    #[test]
    fn test_missing_property_predicate() {
        assert!(SgfError::missing("KM").is_missing_property());
        assert!(!SgfError::value("KM").is_missing_property());
    }
}
