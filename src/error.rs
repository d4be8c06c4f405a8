//! Error type shared by the pedigree, the classifier and the identification engine.
use crate::pedigree::NodeId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A pedigree invariant does not hold (one parent, self-parenting, cyclic ancestry ...).
    #[error("pedigree structure violated: {message}")]
    Structure { message: String },

    #[error("generation is not the requested size. Expected {expected}, got {actual}")]
    GenerationSize { expected: usize, actual: usize },

    /// Some men were left without an eligible (non-sibling) woman.
    #[error("could not pair {unpaired} individuals with a non-sibling partner")]
    PairingExhausted { unpaired: usize },

    #[error("population has no generation")]
    EmptyPopulation,

    #[error("node {0} is not in the population")]
    UnknownNode(NodeId),

    #[error("node {0} has no genome")]
    MissingGenome(NodeId),

    /// Parallel arrays passed to a batched call disagree in length.
    #[error("batch arrays differ in length: {lengths} lengths, {queries} queries, {labeled} labeled")]
    BatchLength {
        lengths: usize,
        queries: usize,
        labeled: usize,
    },

    /// No member had enough usable comparisons against the labeled nodes.
    #[error("no member has at least {minimum} usable labeled comparisons")]
    InsufficientEvidence { minimum: usize },

    /// The population blob could not be encoded, or is malformed.
    #[error("population blob: {0}")]
    Codec(#[from] bincode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn structure(message: impl Into<String>) -> Self {
        Self::Structure {
            message: message.into(),
        }
    }
}
