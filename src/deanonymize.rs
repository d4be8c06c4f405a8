//! Guess who a genome belongs to.
//!
//! Every member holding a genome is scored by the log-likelihood of the observed
//! shared lengths with the labeled nodes under the classifier. The best member
//! is expanded to its full-sibling group, as full siblings can not be told
//! apart by shared lengths alone.
use crate::classifier::LengthClassifier;
use crate::diagnostics::{DiagnosticSink, IdentifyRecord, NullSink};
use crate::error::{Error, Result};
use crate::genome::{shared_segment_length, Genome};
use crate::pedigree::NodeId;
use crate::population::Population;
use log::debug;
use rayon::prelude::*;
use std::collections::BTreeSet;

/// Members compared with fewer labeled nodes (with a fitted distribution) are not ranked.
pub const MINIMUM_LABELED_NODES: usize = 5;
const TOP_CANDIDATES: usize = 8;

/// Result of an identification.
#[derive(Debug, Clone)]
pub struct Identification {
    /// The best member and its full siblings.
    pub sibling_group: BTreeSet<NodeId>,
    pub best: NodeId,
    /// Log-probability of the best member minus that of the best member outside its group.
    pub log_ratio: f64,
    /// Share of the posterior mass (uniform prior over ranked members) held by the group.
    pub posterior: f64,
    /// Top ranked members with their log-probabilities, best first.
    pub candidates: Vec<(NodeId, f64)>,
}

// Where a member's probabilities sit in the batched arrays.
#[derive(Debug, Clone, Copy)]
struct ProbabilityRange {
    start: usize,
    stop: usize,
    cryptic_start: usize,
    cryptic_stop: usize,
}

pub struct BayesDeanonymize<'a> {
    population: &'a Population,
    classifier: &'a LengthClassifier,
    sink: Box<dyn DiagnosticSink + 'a>,
}

impl<'a> BayesDeanonymize<'a> {
    pub fn new(population: &'a Population, classifier: &'a LengthClassifier) -> Self {
        Self {
            population,
            classifier,
            sink: Box::new(NullSink),
        }
    }
    pub fn with_sink<S: DiagnosticSink + 'a>(mut self, sink: S) -> Self {
        self.sink = Box::new(sink);
        self
    }
    pub fn population(&self) -> &Population {
        self.population
    }
    /// Identify the owner of `genome`, up to full siblings.
    /// `actual` is only forwarded to the diagnostic record.
    pub fn identify(
        &self,
        genome: &Genome,
        ibd_threshold: u64,
        actual: Option<NodeId>,
    ) -> Result<Identification> {
        let population = self.population;
        let classifier = self.classifier;
        let shared_list = classifier
            .labeled_nodes()
            .par_iter()
            .map(|&labeled| match population.genome(labeled) {
                Some(labeled_genome) => Ok((
                    labeled,
                    shared_segment_length(genome, labeled_genome, ibd_threshold),
                )),
                None => Err(Error::MissingGenome(labeled)),
            })
            .collect::<Result<Vec<_>>>()?;
        let mut batch_node_id = vec![];
        let mut batch_labeled_node_id = vec![];
        let mut batch_lengths = vec![];
        let mut batch_cryptic_lengths = vec![];
        let mut node_data = vec![];
        for node in population.members().filter(|&id| population.genome(id).is_some()) {
            let start = batch_node_id.len();
            let cryptic_start = batch_cryptic_lengths.len();
            for &(labeled, shared) in shared_list.iter() {
                if classifier.has_distribution(node, labeled) {
                    batch_node_id.push(node);
                    batch_labeled_node_id.push(labeled);
                    batch_lengths.push(shared);
                } else {
                    batch_cryptic_lengths.push(shared);
                }
            }
            let range = ProbabilityRange {
                start,
                stop: batch_node_id.len(),
                cryptic_start,
                cryptic_stop: batch_cryptic_lengths.len(),
            };
            node_data.push((node, range));
        }
        let calc_prob = classifier.get_batch_probability(
            &batch_lengths,
            &batch_node_id,
            &batch_labeled_node_id,
        )?;
        let cryptic_prob = classifier.get_batch_background(&batch_cryptic_lengths);
        let node_probabilities: Vec<(NodeId, f64, bool)> = node_data
            .par_iter()
            .map(|&(node, range)| {
                let calc = &calc_prob[range.start..range.stop];
                let cryptic = &cryptic_prob[range.cryptic_start..range.cryptic_stop];
                let log_prob = calc.iter().chain(cryptic.iter()).map(|p| p.ln()).sum::<f64>();
                let usable = range.stop - range.start >= MINIMUM_LABELED_NODES;
                (node, log_prob, usable)
            })
            .collect();
        self.sink.record(&IdentifyRecord {
            actual,
            log_probabilities: node_probabilities.iter().map(|&(n, lp, _)| (n, lp)).collect(),
        });
        let mut ranked: Vec<(NodeId, f64)> = node_probabilities
            .into_iter()
            .filter(|&(_, _, usable)| usable)
            .map(|(n, lp, _)| (n, lp))
            .collect();
        // Stable, so ties keep the member order.
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        let &(best, top_log_prob) = ranked.first().ok_or(Error::InsufficientEvidence {
            minimum: MINIMUM_LABELED_NODES,
        })?;
        let sibling_group = population.sibling_group(best);
        let log_ratio = match ranked.iter().find(|(n, _)| !sibling_group.contains(n)) {
            Some(&(_, next_log_prob)) => top_log_prob - next_log_prob,
            None => f64::INFINITY,
        };
        let all: Vec<_> = ranked.iter().map(|x| x.1).collect();
        let group: Vec<_> = ranked
            .iter()
            .filter(|(n, _)| sibling_group.contains(n))
            .map(|x| x.1)
            .collect();
        let posterior = (logsumexp(&group) - logsumexp(&all)).exp();
        debug!(
            "Identified {} ({} siblings) among {} ranked, log ratio {:.2}",
            best,
            sibling_group.len(),
            ranked.len(),
            log_ratio
        );
        ranked.truncate(TOP_CANDIDATES);
        Ok(Identification {
            sibling_group,
            best,
            log_ratio,
            posterior,
            candidates: ranked,
        })
    }
}

fn logsumexp(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return f64::NEG_INFINITY;
    }
    let max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    max + xs.iter().map(|x| (x - max).exp()).sum::<f64>().ln()
}
