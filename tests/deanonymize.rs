#![cfg(test)]
// Grow pedigrees, simulate genomes down them and identify members from shared lengths.
use ibd_deanon::classifier::{LengthClassifier, CRYPTIC_DENSITY, CRYPTIC_ZERO_PROBABILITY};
use ibd_deanon::classifier::MINIMUM_PROBABILITY;
use ibd_deanon::deanonymize::MINIMUM_LABELED_NODES;
use ibd_deanon::diagnostics::MemorySink;
use ibd_deanon::genome::ChromosomeSpec;
use ibd_deanon::{BayesDeanonymize, ClassifierParams, Error, GenomeGenerator};
use ibd_deanon::{NodeId, Population, Sex};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoroshiro128PlusPlus;

fn small_genome() -> GenomeGenerator {
    GenomeGenerator::new(vec![
        ChromosomeSpec {
            length: 120_000_000,
            centimorgans: 150.,
        },
        ChromosomeSpec {
            length: 80_000_000,
            centimorgans: 100.,
        },
    ])
}

// Eight founders in four couples, one son and one daughter per couple.
// Couples A, B (founders 0-3) cross-marry, and so do C, D (founders 4-7).
fn two_clans() -> Population {
    use Sex::*;
    let sexes: Vec<_> = (0..8).map(|i| if i % 2 == 0 { Male } else { Female }).collect();
    let mut population = Population::from_sexes(&sexes);
    let couple = |mother: usize, father: usize| Some((NodeId(mother), NodeId(father)));
    // 8, 9: A.  10, 11: B.  12, 13: C.  14, 15: D.
    let first: Vec<_> = [(1, 0), (3, 2), (5, 4), (7, 6)]
        .iter()
        .flat_map(|&(m, f)| vec![(Male, couple(m, f)), (Female, couple(m, f))])
        .collect();
    population.push_generation(first).unwrap();
    // 16, 17: A x B.  18, 19: C x D.  20, 21: B x A.  22, 23: D x C.
    let second: Vec<_> = [(11, 8), (15, 12), (9, 10), (13, 14)]
        .iter()
        .flat_map(|&(m, f)| vec![(Male, couple(m, f)), (Female, couple(m, f))])
        .collect();
    population.push_generation(second).unwrap();
    population
}

#[test]
fn unrelated_pairs_fall_back_to_background() {
    use Sex::*;
    let mut population = two_clans();
    // 24, 25: double first cousins of clan C/D marry.
    population
        .push_generation(vec![
            (Male, Some((NodeId(23), NodeId(18)))),
            (Female, Some((NodeId(23), NodeId(18)))),
        ])
        .unwrap();
    let labeled = vec![NodeId(0), NodeId(16), NodeId(17), NodeId(20), NodeId(21)];
    let params = ClassifierParams {
        trials: 50,
        seed: 3,
        ..ClassifierParams::default()
    };
    let classifier =
        LengthClassifier::new(&population, &labeled, &small_genome(), params).unwrap();
    let (query, label) = (NodeId(18), NodeId(16));
    assert!(!classifier.has_distribution(query, label));
    for &length in &[0, 1, 5_000_000, 100_000_000] {
        let p = classifier.get_probability(length, query, label);
        assert_eq!(p, classifier.background_probability(length));
    }
    // Three generations apart: a founder of clan A/B against the youngest of clan C/D.
    let (young, founder) = (NodeId(24), NodeId(0));
    assert_eq!(population.node(young).generation(), 3);
    assert_eq!(population.node(founder).generation(), 0);
    assert!(!classifier.has_distribution(young, founder));
    for &length in &[0, 3_000_000, 100_000_000] {
        let p = classifier.get_probability(length, young, founder);
        assert_eq!(p, classifier.background_probability(length));
    }
    // A grandchild of the founder is simulated against it.
    assert!(classifier.has_distribution(NodeId(16), founder));
    assert_eq!(classifier.background_probability(0), CRYPTIC_ZERO_PROBABILITY);
    assert_eq!(classifier.background_probability(12), CRYPTIC_DENSITY);
    // Siblings and double first cousins descend from the same founders.
    assert!(classifier.has_distribution(NodeId(17), label));
    assert!(classifier.has_distribution(NodeId(20), label));
    let sibling = classifier.distribution(NodeId(17), label).unwrap();
    assert_eq!(sibling.samples(), 50);
    assert!(sibling.gamma_parameters().is_some());
    for &length in &[0, 1, 50_000_000, 150_000_000] {
        let p = classifier.get_probability(length, NodeId(17), label);
        assert!(p.is_finite() && p >= MINIMUM_PROBABILITY);
    }
    // The clans never meet.
    for &q in &[18, 19, 22, 23, 24, 25] {
        assert_eq!(classifier.usable_references(NodeId(q)), 0);
    }
}

#[test]
fn batch_agrees_with_scalar() {
    let population = two_clans();
    let labeled = vec![NodeId(16), NodeId(20)];
    let params = ClassifierParams {
        trials: 20,
        ..ClassifierParams::default()
    };
    let classifier =
        LengthClassifier::new(&population, &labeled, &small_genome(), params).unwrap();
    let lengths = vec![0, 30_000_000, 7, 0, 90_000_000];
    let queries = vec![NodeId(17), NodeId(21), NodeId(18), NodeId(8), NodeId(16)];
    let targets = vec![NodeId(16), NodeId(16), NodeId(20), NodeId(20), NodeId(20)];
    let batch = classifier
        .get_batch_probability(&lengths, &queries, &targets)
        .unwrap();
    for i in 0..lengths.len() {
        let scalar = classifier.get_probability(lengths[i], queries[i], targets[i]);
        assert_eq!(batch[i], scalar);
    }
    let result = classifier.get_batch_probability(&lengths, &queries[..2], &targets);
    assert!(matches!(
        result,
        Err(Error::BatchLength {
            lengths: 5,
            queries: 2,
            labeled: 5
        })
    ));
    let background = classifier.get_batch_background(&lengths);
    assert_eq!(background[0], CRYPTIC_ZERO_PROBABILITY);
    assert_eq!(background[1], CRYPTIC_DENSITY);
    let empty = classifier.get_batch_probability(&[], &[], &[]).unwrap();
    assert!(empty.is_empty());
}

#[test]
fn classifier_leaves_genomes_alone() {
    let mut population = two_clans();
    let generator = small_genome();
    let mut rng: Xoroshiro128PlusPlus = SeedableRng::seed_from_u64(12);
    population.generate_genomes(&generator, &mut rng);
    let before: Vec<_> = population.members().map(|id| population.genome(id).cloned()).collect();
    let params = ClassifierParams {
        trials: 10,
        ..ClassifierParams::default()
    };
    let labeled = vec![NodeId(16)];
    LengthClassifier::new(&population, &labeled, &generator, params).unwrap();
    let after: Vec<_> = population.members().map(|id| population.genome(id).cloned()).collect();
    assert_eq!(before, after);
    let unknown = vec![NodeId(100)];
    let params = ClassifierParams::default();
    let result = LengthClassifier::new(&population, &unknown, &generator, params);
    assert!(matches!(result, Err(Error::UnknownNode(NodeId(100)))));
}

#[test]
fn too_few_references() {
    let mut population = two_clans();
    let generator = small_genome();
    let mut rng: Xoroshiro128PlusPlus = SeedableRng::seed_from_u64(7);
    population.generate_genomes(&generator, &mut rng);
    let labeled = vec![NodeId(16), NodeId(17), NodeId(20), NodeId(21)];
    assert!(labeled.len() < MINIMUM_LABELED_NODES);
    let params = ClassifierParams {
        trials: 20,
        ..ClassifierParams::default()
    };
    let classifier = LengthClassifier::new(&population, &labeled, &generator, params).unwrap();
    let sink = MemorySink::default();
    {
        let engine = BayesDeanonymize::new(&population, &classifier).with_sink(&sink);
        let query = population.genome(NodeId(22)).unwrap();
        let result = engine.identify(query, 0, Some(NodeId(22)));
        assert!(matches!(result, Err(Error::InsufficientEvidence { .. })));
    }
    // Scores are still reported.
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].log_probabilities.len(), population.size());
    // A labeled node without a genome can not be compared.
    population.set_genome(NodeId(17), None).unwrap();
    let engine = BayesDeanonymize::new(&population, &classifier);
    let query = population.genome(NodeId(22)).unwrap();
    let result = engine.identify(query, 0, None);
    assert!(matches!(result, Err(Error::MissingGenome(NodeId(17)))));
}

#[test]
fn identify_recent_members() {
    let mut rng: Xoroshiro128PlusPlus = SeedableRng::seed_from_u64(2021);
    let mut population = Population::with_founders(100, &mut rng);
    for _ in 1..4 {
        population.new_generation(None, &mut rng).unwrap();
    }
    assert!(population.generations().iter().all(|g| g.size() == 100));
    let generator = GenomeGenerator::human();
    population.generate_genomes(&generator, &mut rng);
    let last: Vec<NodeId> = population.generations()[3].members().to_vec();
    let labeled: Vec<NodeId> = last.choose_multiple(&mut rng, 20).copied().collect();
    let threshold = 5_000_000;
    let params = ClassifierParams {
        trials: 200,
        minimum_segment_length: threshold,
        seed: 11,
        ..ClassifierParams::default()
    };
    let classifier = LengthClassifier::new(&population, &labeled, &generator, params).unwrap();
    eprintln!("{} distributions", classifier.distribution_count());
    let queries: Vec<NodeId> = last
        .iter()
        .copied()
        .filter(|id| !labeled.contains(id))
        .filter(|&id| classifier.usable_references(id) >= MINIMUM_LABELED_NODES)
        .collect();
    assert!(!queries.is_empty());
    let sink = MemorySink::default();
    let engine = BayesDeanonymize::new(&population, &classifier).with_sink(&sink);
    for &actual in queries.iter() {
        let genome = population.genome(actual).unwrap();
        let identified = engine.identify(genome, threshold, Some(actual)).unwrap();
        eprintln!(
            "{}\t{}\t{}\t{:.2}\t{:.3}",
            actual,
            classifier.usable_references(actual),
            identified.best,
            identified.log_ratio,
            identified.posterior
        );
        // The group is closed under full siblings and holds the owner.
        let group = &identified.sibling_group;
        assert!(group.contains(&actual), "{} not in {:?}", actual, group);
        assert!(group.contains(&identified.best));
        assert_eq!(group, &population.sibling_group(identified.best));
        assert!(identified.log_ratio >= 0.);
        assert!(0. < identified.posterior && identified.posterior <= 1.);
        assert_eq!(identified.candidates[0].0, identified.best);
        assert!(identified
            .candidates
            .windows(2)
            .all(|w| w[0].1 >= w[1].1));
        assert!(identified.candidates.iter().all(|c| c.1.is_finite()));
    }
    let records = sink.records();
    assert_eq!(records.len(), queries.len());
    for (record, actual) in records.iter().zip(queries.iter()) {
        assert_eq!(record.actual, Some(*actual));
        assert!(record.log_probabilities.values().all(|lp| lp.is_finite()));
        assert!(record.log_probabilities.contains_key(actual));
    }
}
