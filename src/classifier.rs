//! Distributions of the total IBD length between members of a population and
//! labeled (known identity) members, estimated by simulating genomes down the pedigree.
use crate::error::{Error, Result};
use crate::genome::{shared_segment_length, Genome, GenomeGenerator};
use crate::pedigree::NodeId;
use crate::population::Population;
use log::{debug, info, warn};
use rand::SeedableRng;
use rand_xoshiro::Xoroshiro128PlusPlus;
use rayon::prelude::*;
use statrs::distribution::{Continuous, Gamma};
use statrs::function::gamma::digamma;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Returned instead of any zero or non-finite probability, so logs stay finite.
pub const MINIMUM_PROBABILITY: f64 = 1e-100;
/// Probability that two unrelated individuals share nothing.
pub const CRYPTIC_ZERO_PROBABILITY: f64 = 0.999;
/// Density of a positive shared length between unrelated individuals.
pub const CRYPTIC_DENSITY: f64 = 1e-15;
// Pseudo count for the probability of sharing nothing.
const PSEUDO_COUNT: f64 = 1.;
const MAX_SHAPE: f64 = 1e5;

#[derive(Debug, Clone)]
pub struct ClassifierParams {
    /// Number of simulated pedigrees per founder set.
    pub trials: usize,
    /// Members of this many trailing generations get distributions.
    pub recent_generations: usize,
    /// Shared segments shorter than this are ignored.
    pub minimum_segment_length: u64,
    pub seed: u64,
    pub cryptic_zero_probability: f64,
    pub cryptic_density: f64,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        Self {
            trials: 1000,
            recent_generations: 3,
            minimum_segment_length: 0,
            seed: 24,
            cryptic_zero_probability: CRYPTIC_ZERO_PROBABILITY,
            cryptic_density: CRYPTIC_DENSITY,
        }
    }
}

/// A point mass at zero plus a gamma distribution for positive lengths.
#[derive(Debug, Clone)]
pub struct LengthDistribution {
    zero_probability: f64,
    gamma: Option<Gamma>,
    samples: usize,
}

impl LengthDistribution {
    /// Fit to observed total lengths. The gamma is the maximum likelihood fit to
    /// the positive lengths.
    pub fn fit(lengths: &[u64]) -> Self {
        let positive: Vec<f64> = lengths
            .iter()
            .filter(|&&x| x > 0)
            .map(|&x| x as f64)
            .collect();
        let zeros = (lengths.len() - positive.len()) as f64;
        let zero_probability = (zeros + PSEUDO_COUNT) / (lengths.len() as f64 + 2. * PSEUDO_COUNT);
        let gamma = fit_gamma(&positive).and_then(|(shape, rate)| match Gamma::new(shape, rate) {
            Ok(gamma) => Some(gamma),
            Err(why) => {
                warn!("Degenerate fit ({}, {}) on {} lengths:{:?}", shape, rate, positive.len(), why);
                None
            }
        });
        Self {
            zero_probability,
            gamma,
            samples: lengths.len(),
        }
    }
    /// Probability of sharing nothing, or density of sharing `length` bp.
    /// May be zero.
    pub fn density(&self, length: u64) -> f64 {
        if length == 0 {
            return self.zero_probability;
        }
        match &self.gamma {
            Some(gamma) => (1. - self.zero_probability) * gamma.pdf(length as f64),
            None => 0.,
        }
    }
    pub fn zero_probability(&self) -> f64 {
        self.zero_probability
    }
    /// `(shape, rate)` of the gamma part.
    pub fn gamma_parameters(&self) -> Option<(f64, f64)> {
        self.gamma.as_ref().map(|g| (g.shape(), g.rate()))
    }
    pub fn samples(&self) -> usize {
        self.samples
    }
}

/// Maximum likelihood `(shape, rate)` of a gamma distribution.
/// The shape solves ln(k) - digamma(k) = ln(mean) - mean(ln x), which is monotone in k.
pub fn fit_gamma(xs: &[f64]) -> Option<(f64, f64)> {
    match xs.len() {
        0 => return None,
        // A lone observation: exponential with that mean.
        1 => return Some((1., 1. / xs[0])),
        _ => {}
    }
    let n = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / n;
    let mean_log = xs.iter().map(|x| x.ln()).sum::<f64>() / n;
    let s = mean.ln() - mean_log;
    if !(s > 1. / MAX_SHAPE) {
        // (Nearly) constant observations.
        return Some((MAX_SHAPE, MAX_SHAPE / mean));
    }
    let f = |k: f64| k.ln() - digamma(k) - s;
    let guess = (3. - s + ((s - 3.).powi(2) + 24. * s).sqrt()) / (12. * s);
    let (mut lo, mut hi) = (guess / 2., guess * 2.);
    while f(lo) < 0. {
        lo /= 2.;
    }
    while f(hi) > 0. && hi < MAX_SHAPE {
        hi *= 2.;
    }
    for _ in 0..100 {
        let mid = (lo * hi).sqrt();
        if f(mid) > 0. {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi / lo < 1. + 1e-12 {
            break;
        }
    }
    let shape = ((lo * hi).sqrt()).min(MAX_SHAPE);
    Some((shape, shape / mean))
}

/// Members descending from the same set of founders, and the labeled nodes related to them.
#[derive(Debug, Clone)]
struct FounderClass {
    founders: Vec<NodeId>,
    members: Vec<NodeId>,
    related: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct LengthClassifier {
    labeled: Vec<NodeId>,
    distributions: HashMap<(NodeId, NodeId), LengthDistribution>,
    params: ClassifierParams,
}

impl LengthClassifier {
    /// Simulate the pedigree `params.trials` times for every founder class of the
    /// recent generations and fit one distribution per (member, related labeled node).
    /// The population's own genomes are not touched.
    pub fn new(
        population: &Population,
        labeled: &[NodeId],
        generator: &GenomeGenerator,
        params: ClassifierParams,
    ) -> Result<Self> {
        if let Some(&id) = labeled.iter().find(|id| population.get(**id).is_none()) {
            return Err(Error::UnknownNode(id));
        }
        let classes = founder_classes(population, labeled, params.recent_generations);
        info!(
            "{} founder classes, {} labeled nodes, {} trials each",
            classes.len(),
            labeled.len(),
            params.trials
        );
        let distributions: HashMap<_, _> = classes
            .par_iter()
            .enumerate()
            .flat_map(|(i, class)| {
                let seed = params
                    .seed
                    .wrapping_add((i as u64).wrapping_mul(params.trials as u64));
                fit_class(population, generator, class, &params, seed)
            })
            .collect();
        info!("Fitted {} distributions", distributions.len());
        Ok(Self {
            labeled: labeled.to_vec(),
            distributions,
            params,
        })
    }
    pub fn labeled_nodes(&self) -> &[NodeId] {
        &self.labeled
    }
    pub fn params(&self) -> &ClassifierParams {
        &self.params
    }
    pub fn distribution_count(&self) -> usize {
        self.distributions.len()
    }
    pub fn distribution(&self, query: NodeId, labeled: NodeId) -> Option<&LengthDistribution> {
        self.distributions.get(&(query, labeled))
    }
    pub fn has_distribution(&self, query: NodeId, labeled: NodeId) -> bool {
        self.distributions.contains_key(&(query, labeled))
    }
    /// Number of labeled nodes with a fitted distribution against `query`.
    pub fn usable_references(&self, query: NodeId) -> usize {
        self.labeled
            .iter()
            .filter(|&&l| self.has_distribution(query, l))
            .count()
    }
    /// Probability (density) that `query` and `labeled` share `shared_length` bp.
    /// Pairs never simulated together get the background probability.
    /// Always finite and at least [`MINIMUM_PROBABILITY`].
    pub fn get_probability(&self, shared_length: u64, query: NodeId, labeled: NodeId) -> f64 {
        match self.distributions.get(&(query, labeled)) {
            Some(distribution) => sanitize(distribution.density(shared_length)),
            None => self.background_probability(shared_length),
        }
    }
    /// Probability of `shared_length` between unrelated individuals.
    pub fn background_probability(&self, shared_length: u64) -> f64 {
        let p = match shared_length {
            0 => self.params.cryptic_zero_probability,
            _ => self.params.cryptic_density,
        };
        sanitize(p)
    }
    /// `get_probability` on parallel arrays: the i-th output belongs to
    /// `(lengths[i], queries[i], labeled[i])`.
    pub fn get_batch_probability(
        &self,
        lengths: &[u64],
        queries: &[NodeId],
        labeled: &[NodeId],
    ) -> Result<Vec<f64>> {
        if lengths.len() != queries.len() || lengths.len() != labeled.len() {
            return Err(Error::BatchLength {
                lengths: lengths.len(),
                queries: queries.len(),
                labeled: labeled.len(),
            });
        }
        Ok(lengths
            .par_iter()
            .zip(queries.par_iter())
            .zip(labeled.par_iter())
            .map(|((&len, &q), &l)| self.get_probability(len, q, l))
            .collect())
    }
    pub fn get_batch_background(&self, lengths: &[u64]) -> Vec<f64> {
        lengths
            .iter()
            .map(|&len| self.background_probability(len))
            .collect()
    }
}

fn sanitize(p: f64) -> f64 {
    if p.is_finite() && p > MINIMUM_PROBABILITY {
        p
    } else {
        MINIMUM_PROBABILITY
    }
}

// Group the recent members by founder set and attach the labeled nodes sharing a founder.
fn founder_classes(
    population: &Population,
    labeled: &[NodeId],
    recent_generations: usize,
) -> Vec<FounderClass> {
    let generations = population.generations();
    let first = generations.len().saturating_sub(recent_generations);
    let mut classes: BTreeMap<Vec<NodeId>, Vec<NodeId>> = BTreeMap::new();
    for generation in generations[first..].iter() {
        for &id in generation.members() {
            let founders: Vec<_> = population.founders(id).into_iter().collect();
            classes.entry(founders).or_default().push(id);
        }
    }
    let labeled_founders: Vec<(NodeId, BTreeSet<NodeId>)> = labeled
        .iter()
        .map(|&l| (l, population.founders(l)))
        .collect();
    classes
        .into_iter()
        .map(|(founders, members)| {
            let related = labeled_founders
                .iter()
                .filter(|(_, fs)| founders.iter().any(|f| fs.contains(f)))
                .map(|&(l, _)| l)
                .collect();
            FounderClass {
                founders,
                members,
                related,
            }
        })
        .collect()
}

fn fit_class(
    population: &Population,
    generator: &GenomeGenerator,
    class: &FounderClass,
    params: &ClassifierParams,
    seed: u64,
) -> Vec<((NodeId, NodeId), LengthDistribution)> {
    if class.related.is_empty() {
        return vec![];
    }
    // Ids grow with generations, so parents always precede children.
    let needed: Vec<NodeId> = population
        .ancestry(class.members.iter().chain(class.related.iter()).copied())
        .into_iter()
        .collect();
    let pairs: Vec<(NodeId, NodeId)> = class
        .members
        .iter()
        .flat_map(|&m| class.related.iter().map(move |&l| (m, l)))
        .collect();
    debug!(
        "Class of {} founders: {} members, {} related, {} nodes simulated",
        class.founders.len(),
        class.members.len(),
        class.related.len(),
        needed.len()
    );
    let trials: Vec<Vec<u64>> = (0..params.trials)
        .into_par_iter()
        .map(|t| {
            let mut rng: Xoroshiro128PlusPlus = SeedableRng::seed_from_u64(seed.wrapping_add(t as u64));
            let genomes = simulate(population, generator, &needed, &mut rng);
            pairs
                .iter()
                .map(|(m, l)| {
                    shared_segment_length(&genomes[m], &genomes[l], params.minimum_segment_length)
                })
                .collect()
        })
        .collect();
    pairs
        .iter()
        .enumerate()
        .map(|(i, &pair)| {
            let lengths: Vec<u64> = trials.iter().map(|trial| trial[i]).collect();
            (pair, LengthDistribution::fit(&lengths))
        })
        .collect()
}

// One trial: fresh founder genomes dropped down to every node in `needed`.
fn simulate(
    population: &Population,
    generator: &GenomeGenerator,
    needed: &[NodeId],
    rng: &mut Xoroshiro128PlusPlus,
) -> HashMap<NodeId, Genome> {
    let mut genomes: HashMap<NodeId, Genome> = HashMap::with_capacity(needed.len());
    for &id in needed {
        let genome = match population.node(id).parents() {
            None => generator.generate_genome(rng),
            Some((mother, father)) => generator.mate(&genomes[&mother], &genomes[&father], rng),
        };
        genomes.insert(id, genome);
    }
    genomes
}
