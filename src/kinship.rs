//! Kinship coefficients over a pedigree.
//!
//! The coefficients follow the usual recursion:
//! phi(x, x) = 1/2 (1 + phi(m(x), f(x))), phi(x, y) = 1/2 (phi(m(x), y) + phi(f(x), y))
//! where x is the younger of the two, and phi = 0 between distinct founders.
//! A single sweep over all unordered pairs in generation order guarantees
//! that the right hand sides are in the table before they are needed.
use crate::pedigree::NodeId;
use crate::population::Population;
use log::debug;
use std::collections::HashMap;

/// Number of generations kept behind the sweep position.
pub const KEEP_GENERATIONS: usize = 3;

#[derive(Debug, Clone, Default)]
pub struct KinshipTable {
    coefficients: HashMap<(NodeId, NodeId), f64>,
    // Every pair with a member in generation <= this one has been dropped.
    evicted_through: Option<usize>,
}

fn key(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl KinshipTable {
    /// Kinship of `a` and `b`, or `None` if the pair was evicted (or is unknown).
    pub fn get(&self, a: NodeId, b: NodeId) -> Option<f64> {
        self.coefficients.get(&key(a, b)).copied()
    }
    pub fn len(&self) -> usize {
        self.coefficients.len()
    }
    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }
    /// The last generation whose entries were evicted.
    pub fn evicted_through(&self) -> Option<usize> {
        self.evicted_through
    }
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, NodeId, f64)> + '_ {
        self.coefficients.iter().map(|(&(a, b), &phi)| (a, b, phi))
    }
    fn insert(&mut self, a: NodeId, b: NodeId, phi: f64) {
        self.coefficients.insert(key(a, b), phi);
    }
    fn lookup(&self, a: NodeId, b: NodeId) -> f64 {
        match self.get(a, b) {
            Some(phi) => phi,
            None => panic!("kinship of {} and {} was evicted before use", a, b),
        }
    }
    /// Compute the coefficients of every pair of members, keeping only the
    /// last `only_keep` + 1 generations around the sweep.
    pub fn calculate(population: &Population, only_keep: usize) -> Self {
        let members: Vec<_> = population.members().collect();
        // The latest generation holding a child of each generation.
        let mut last_child_generation: Vec<usize> = (0..population.num_generations()).collect();
        for node in population.nodes() {
            if let Some((mother, _)) = node.parents() {
                let parent_generation = population.node(mother).generation();
                let slot = &mut last_child_generation[parent_generation];
                *slot = (*slot).max(node.generation());
            }
            if let Some((_, father)) = node.parents() {
                let parent_generation = population.node(father).generation();
                let slot = &mut last_child_generation[parent_generation];
                *slot = (*slot).max(node.generation());
            }
        }
        let mut table = Self::default();
        for (x, &person_2) in members.iter().enumerate() {
            let generation = population.node(person_2).generation();
            table.evict_upto(population, generation, only_keep, &last_child_generation);
            // person_1 is never older than person_2, so expand person_1.
            for &person_1 in members[x..].iter() {
                let node = population.node(person_1);
                let phi = match (person_1 == person_2, node.parents()) {
                    (true, None) => 0.5,
                    (true, Some((mother, father))) => 0.5 + 0.5 * table.lookup(mother, father),
                    (false, None) => 0.,
                    (false, Some((mother, father))) => {
                        0.5 * (table.lookup(mother, person_2) + table.lookup(father, person_2))
                    }
                };
                table.insert(person_1, person_2, phi);
            }
        }
        debug!(
            "Kinship: {} pairs kept, evicted through {:?}",
            table.len(),
            table.evicted_through
        );
        table
    }
    // Drop generations that are more than `only_keep` behind `current` and
    // whose children have all been swept.
    fn evict_upto(
        &mut self,
        population: &Population,
        current: usize,
        only_keep: usize,
        last_child_generation: &[usize],
    ) {
        loop {
            let next = self.evicted_through.map(|g| g + 1).unwrap_or(0);
            if next + only_keep >= current || last_child_generation[next] >= current {
                break;
            }
            let generations = population.generations();
            let removed: Vec<_> = generations[next..]
                .iter()
                .flat_map(|g| g.members().iter().copied())
                .collect();
            for &p_1 in generations[next].members() {
                for &p_2 in removed.iter() {
                    self.coefficients.remove(&key(p_1, p_2));
                }
            }
            self.evicted_through = Some(next);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pedigree::Sex;
    use rand::SeedableRng;
    use rand_xoshiro::Xoroshiro128PlusPlus;
    // Two founder couples, each with a son and a daughter;
    // the children cross-marry and each couple has two children (first cousins across couples).
    fn cousins() -> Population {
        use Sex::*;
        let mut population = Population::from_sexes(&[Male, Female, Male, Female]);
        let (a, b, c, d) = (NodeId(0), NodeId(1), NodeId(2), NodeId(3));
        population
            .push_generation(vec![
                (Male, Some((b, a))),
                (Female, Some((b, a))),
                (Male, Some((d, c))),
                (Female, Some((d, c))),
            ])
            .unwrap();
        let (s1, d1, s2, d2) = (NodeId(4), NodeId(5), NodeId(6), NodeId(7));
        population
            .push_generation(vec![
                (Male, Some((d2, s1))),
                (Female, Some((d2, s1))),
                (Male, Some((d1, s2))),
                (Female, Some((d1, s2))),
            ])
            .unwrap();
        population
    }
    #[test]
    fn known_coefficients() {
        let population = cousins();
        let kinship = population.kinship();
        assert_eq!(kinship.get(NodeId(0), NodeId(0)), Some(0.5));
        assert_eq!(kinship.get(NodeId(0), NodeId(1)), Some(0.));
        // Parent and child.
        assert_eq!(kinship.get(NodeId(0), NodeId(4)), Some(0.25));
        // Full siblings.
        assert_eq!(kinship.get(NodeId(4), NodeId(5)), Some(0.25));
        assert_eq!(kinship.get(NodeId(8), NodeId(9)), Some(0.25));
        // Aunt and nephew.
        assert_eq!(kinship.get(NodeId(5), NodeId(8)), Some(0.125));
        // Double first cousins.
        assert_eq!(kinship.get(NodeId(8), NodeId(10)), Some(0.125));
        assert_eq!(kinship.get(NodeId(8), NodeId(8)), Some(0.5));
    }
    #[test]
    fn first_cousins() {
        use Sex::*;
        let mut population = Population::from_sexes(&[Male, Female, Male, Female, Male, Female]);
        population
            .push_generation(vec![
                (Male, Some((NodeId(1), NodeId(0)))),
                (Female, Some((NodeId(1), NodeId(0)))),
            ])
            .unwrap();
        // Each sibling marries a founder.
        population
            .push_generation(vec![
                (Male, Some((NodeId(3), NodeId(6)))),
                (Female, Some((NodeId(7), NodeId(4)))),
            ])
            .unwrap();
        let kinship = population.kinship();
        assert_eq!(kinship.get(NodeId(8), NodeId(9)), Some(0.0625));
        assert_eq!(kinship.get(NodeId(6), NodeId(9)), Some(0.125));
        assert_eq!(kinship.get(NodeId(3), NodeId(9)), Some(0.));
        assert_eq!(kinship.get(NodeId(9), NodeId(9)), Some(0.5));
    }
    #[test]
    fn inbred_self_kinship() {
        use Sex::*;
        let mut population = cousins();
        // Double first cousins marry.
        population
            .push_generation(vec![(Female, Some((NodeId(11), NodeId(8))))])
            .unwrap();
        let kinship = population.kinship();
        let parents = kinship.get(NodeId(11), NodeId(8)).unwrap();
        assert_eq!(parents, 0.125);
        assert_eq!(kinship.get(NodeId(12), NodeId(12)), Some(0.5 + 0.5 * parents));
    }
    #[test]
    fn symmetric_and_bounded() {
        let mut rng: Xoroshiro128PlusPlus = SeedableRng::seed_from_u64(31);
        let mut population = Population::with_founders(12, &mut rng);
        for _ in 0..3 {
            population.new_generation(None, &mut rng).unwrap();
        }
        let kinship = population.kinship();
        let members: Vec<_> = population.members().collect();
        for &a in members.iter() {
            for &b in members.iter() {
                let phi = kinship.get(a, b).unwrap();
                assert_eq!(Some(phi), kinship.get(b, a));
                assert!((0. ..=1.).contains(&phi));
            }
            let node = population.node(a);
            let expected = match node.parents() {
                None => 0.5,
                Some((m, f)) => 0.5 + 0.5 * kinship.get(m, f).unwrap(),
            };
            assert_eq!(kinship.get(a, a), Some(expected));
        }
    }
    #[test]
    fn old_generations_are_evicted() {
        let mut rng: Xoroshiro128PlusPlus = SeedableRng::seed_from_u64(2);
        let mut population = Population::with_founders(10, &mut rng);
        for _ in 0..5 {
            population.new_generation(None, &mut rng).unwrap();
        }
        let kinship = KinshipTable::calculate(&population, 2);
        assert_eq!(kinship.evicted_through(), Some(2));
        let first = population.generations()[0].members()[0];
        let last = population.generations()[5].members()[0];
        assert_eq!(kinship.get(first, first), None);
        assert_eq!(kinship.get(first, last), None);
        let kept = population.generations()[3].members()[0];
        assert!(kinship.get(kept, last).is_some());
        assert!(kinship.get(last, last).is_some());
        // Nothing evicted when everything fits in the window.
        let full = KinshipTable::calculate(&population, 10);
        assert_eq!(full.evicted_through(), None);
        assert_eq!(full.len(), 60 * 61 / 2);
        for (a, b, phi) in kinship.iter() {
            assert_eq!(full.get(a, b), Some(phi));
        }
    }
}
