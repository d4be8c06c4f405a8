//! Simulate genomes down a pedigree and identify the owner of a genome
//! from the total IBD length it shares with labeled members of the pedigree.
pub mod classifier;
pub mod deanonymize;
pub mod diagnostics;
pub mod error;
pub mod genome;
pub mod kinship;
pub mod pedigree;
pub mod population;
pub use classifier::{ClassifierParams, LengthClassifier};
pub use deanonymize::{BayesDeanonymize, Identification};
pub use error::{Error, Result};
pub use genome::{Genome, GenomeGenerator};
pub use pedigree::{NodeId, Sex};
pub use population::Population;
