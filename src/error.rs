use thiserror::Error;

/// Errors produced by the vocabulary tree engine.
///
/// Every public operation either completes in full or returns one of
/// these, leaving the tree in its previous consistent state.
#[derive(Error, Debug)]
pub enum VocabError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("operation invoked out of lifecycle: {0}")]
    StateViolation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BowResult<T> = Result<T, VocabError>;

/// Crate-wide result alias (same alias under both names so code grounded
/// on either the teacher's declared-but-unused `BowResult` or a more
/// generic `Result` reads naturally).
pub type Result<T> = BowResult<T>;
