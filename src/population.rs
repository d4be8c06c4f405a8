//! A population is a pedigree grown generation by generation.
use crate::error::{Error, Result};
use crate::genome::{Genome, GenomeGenerator};
use crate::kinship::{KinshipTable, KEEP_GENERATIONS};
use crate::pedigree::{balanced_sexes, Generation, Node, NodeId, Sex};
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::sync::OnceLock;

// A random pairing may strand a man among his sisters even though
// another order would pair everyone.
const MAX_PAIRING_ATTEMPTS: usize = 16;

/// Parents of a node to be added, `(mother, father)`. `None` for a founder.
pub type Parents = Option<(NodeId, NodeId)>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Population {
    nodes: Vec<Node>,
    generations: Vec<Generation>,
    #[serde(skip)]
    kinship: OnceLock<KinshipTable>,
}

impl Population {
    /// A population made of one founder generation with as many men as women.
    pub fn with_founders<R: Rng>(size: usize, rng: &mut R) -> Self {
        Self::from_sexes(&balanced_sexes(size, rng))
    }
    pub fn from_sexes(sexes: &[Sex]) -> Self {
        let mut population = Self::default();
        let nodes: Vec<_> = sexes.iter().map(|&sex| (sex, None)).collect();
        // Founders can not violate any parental invariant.
        if let Err(why) = population.push_generation(nodes) {
            unreachable!("{}", why);
        }
        population
    }
    /// Append a cohort given the sex and parents of every member.
    /// Parents must already be in the population, in an earlier generation,
    /// and be a woman and a man respectively.
    pub fn push_generation(&mut self, members: Vec<(Sex, Parents)>) -> Result<&Generation> {
        let generation = self.generations.len();
        for (_, parents) in members.iter() {
            if let Some((mother, father)) = *parents {
                let (m, f) = (self.get(mother), self.get(father));
                let (m, f) = match (m, f) {
                    (Some(m), Some(f)) => (m, f),
                    (None, _) => return Err(Error::UnknownNode(mother)),
                    (_, None) => return Err(Error::UnknownNode(father)),
                };
                if m.sex() != Sex::Female || f.sex() != Sex::Male {
                    let msg = format!("mother {} and father {} have wrong sexes", mother, father);
                    return Err(Error::structure(msg));
                }
            }
        }
        let mut ids = Vec::with_capacity(members.len());
        for (sex, parents) in members {
            let id = NodeId(self.nodes.len());
            let node = match parents {
                Some((mother, father)) => {
                    self.nodes[mother.index()].add_child(id);
                    self.nodes[father.index()].add_child(id);
                    Node::child(id, sex, generation, mother, father)
                }
                None => Node::founder(id, sex, generation),
            };
            self.nodes.push(node);
            ids.push(id);
        }
        self.generations.push(Generation::new(ids, &self.nodes));
        self.kinship = OnceLock::new();
        Ok(&self.generations[generation])
    }
    /// Breed the next generation from the last one.
    ///
    /// Men and women are paired at random, never with a partner of the same mother.
    /// The `size` children (default: size of the last generation) are spread as evenly
    /// as possible over the pairs; the first `size % pairs` pairs get one more child.
    pub fn new_generation<R: Rng>(&mut self, size: Option<usize>, rng: &mut R) -> Result<()> {
        let previous = self.generations.last().ok_or(Error::EmptyPopulation)?;
        let size = size.unwrap_or_else(|| previous.size());
        let pairs = self.pair_up(previous, rng)?;
        let min_children = size / pairs.len();
        let extra_child = size % pairs.len();
        let parents: Vec<_> = pairs
            .iter()
            .enumerate()
            .flat_map(|(i, &(man, woman))| {
                let num = min_children + (i < extra_child) as usize;
                std::iter::repeat((woman, man)).take(num)
            })
            .collect();
        if parents.len() != size {
            return Err(Error::GenerationSize {
                expected: size,
                actual: parents.len(),
            });
        }
        let members: Vec<_> = balanced_sexes(size, rng)
            .into_iter()
            .zip(parents)
            .map(|(sex, parents)| (sex, Some(parents)))
            .collect();
        let size = self.push_generation(members)?.size();
        debug!(
            "Generation {}: {} pairs, {} members",
            self.generations.len() - 1,
            pairs.len(),
            size
        );
        Ok(())
    }
    fn pair_up<R: Rng>(&self, previous: &Generation, rng: &mut R) -> Result<Vec<(NodeId, NodeId)>> {
        let mut men = previous.men().to_vec();
        let mut women = previous.women().to_vec();
        if men.is_empty() || women.is_empty() {
            let unpaired = previous.size();
            return Err(Error::PairingExhausted { unpaired });
        }
        if men.len() > women.len() {
            let unpaired = men.len() - women.len();
            return Err(Error::PairingExhausted { unpaired });
        }
        let mut unpaired = 0;
        for attempt in 0..MAX_PAIRING_ATTEMPTS {
            men.shuffle(rng);
            women.shuffle(rng);
            match self.try_pairing(&men, women.clone()) {
                Ok(pairs) => return Ok(pairs),
                Err(num) => {
                    debug!("Pairing attempt {} left {} men alone", attempt, num);
                    unpaired = num;
                }
            }
        }
        Err(Error::PairingExhausted { unpaired })
    }
    // Greedy: each man takes the last remaining woman who is not his sister.
    fn try_pairing(
        &self,
        men: &[NodeId],
        mut women: Vec<NodeId>,
    ) -> std::result::Result<Vec<(NodeId, NodeId)>, usize> {
        let mut pairs = Vec::with_capacity(men.len());
        let mut unpaired = 0;
        for &man in men {
            let mother = self.node(man).mother();
            let partner = women
                .iter()
                .rposition(|&w| mother.is_none() || self.node(w).mother() != mother);
            match partner {
                Some(i) => pairs.push((man, women.remove(i))),
                None => unpaired += 1,
            }
        }
        match unpaired {
            0 => Ok(pairs),
            _ => Err(unpaired),
        }
    }
    /// Give a genome to every member lacking one. Founders get fresh genomes,
    /// everyone else is bred from the parents' genomes. Nodes which already
    /// hold a genome are left alone, but the walk goes on through them.
    pub fn generate_genomes<R: Rng>(&mut self, generator: &GenomeGenerator, rng: &mut R) {
        let mut queue: VecDeque<NodeId> = self
            .members()
            .filter(|&id| self.node(id).is_founder())
            .collect();
        // A node is entered at most once per parent.
        let mut visited = vec![false; self.nodes.len()];
        let mut generated = 0;
        while let Some(id) = queue.pop_front() {
            if visited[id.index()] {
                continue;
            }
            if self.node(id).genome.is_none() {
                let genome = match self.node(id).parents() {
                    None => generator.generate_genome(rng),
                    Some((mother, father)) => {
                        match (&self.node(mother).genome, &self.node(father).genome) {
                            (Some(m), Some(f)) => generator.mate(m, f, rng),
                            // The other parent has not been reached yet; it will enqueue this node again.
                            _ if !visited[mother.index()] || !visited[father.index()] => continue,
                            // A parent was cleaned and is out of reach.
                            _ => {
                                visited[id.index()] = true;
                                continue;
                            }
                        }
                    }
                };
                self.nodes[id.index()].genome = Some(genome);
                generated += 1;
            }
            visited[id.index()] = true;
            queue.extend(self.node(id).children().iter().copied());
        }
        debug!("Generated {} genomes", generated);
    }
    /// The largest founder haplotype label carried by any genome.
    pub fn max_founder_label(&self) -> Option<u64> {
        self.nodes
            .iter()
            .filter_map(|n| n.genome().and_then(|g| g.max_founder_label()))
            .max()
    }
    /// Drop the genomes of the first `generations` generations
    /// (default: all but the last one).
    pub fn clean_genomes(&mut self, generations: Option<usize>) {
        let generations = generations
            .unwrap_or_else(|| self.num_generations().saturating_sub(1))
            .min(self.num_generations());
        for generation in self.generations[..generations].iter() {
            for id in generation.members() {
                self.nodes[id.index()].genome = None;
            }
        }
    }
    /// Overwrite the genome of a node.
    pub fn set_genome(&mut self, id: NodeId, genome: Option<Genome>) -> Result<()> {
        match self.nodes.get_mut(id.index()) {
            Some(node) => {
                node.genome = genome;
                Ok(())
            }
            None => Err(Error::UnknownNode(id)),
        }
    }
    pub fn generations(&self) -> &[Generation] {
        &self.generations
    }
    pub fn num_generations(&self) -> usize {
        self.generations.len()
    }
    /// All members, oldest generation first.
    pub fn members(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.generations
            .iter()
            .flat_map(|generation| generation.members().iter().copied())
    }
    pub fn size(&self) -> usize {
        self.nodes.len()
    }
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }
    /// Panics if `id` does not come from this population.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }
    pub fn genome(&self, id: NodeId) -> Option<&Genome> {
        self.get(id).and_then(|n| n.genome())
    }
    pub fn set_label(&mut self, id: NodeId, label: impl Into<String>) -> Result<()> {
        match self.nodes.get_mut(id.index()) {
            Some(node) => {
                node.set_label(label.into());
                Ok(())
            }
            None => Err(Error::UnknownNode(id)),
        }
    }
    pub fn by_label(&self, label: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|n| n.label() == Some(label))
            .map(|n| n.id())
    }
    /// The lazily computed kinship table. Appending a generation invalidates it.
    pub fn kinship(&self) -> &KinshipTable {
        self.kinship
            .get_or_init(|| KinshipTable::calculate(self, KEEP_GENERATIONS))
    }
    /// Founder ancestors of `id` (itself if it is a founder).
    pub fn founders(&self, id: NodeId) -> BTreeSet<NodeId> {
        let mut founders = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            match self.node(id).parents() {
                Some((mother, father)) => stack.extend([mother, father]),
                None => {
                    founders.insert(id);
                }
            }
        }
        founders
    }
    /// `ids` together with all of their ancestors.
    pub fn ancestry<I: IntoIterator<Item = NodeId>>(&self, ids: I) -> BTreeSet<NodeId> {
        let mut ancestry = BTreeSet::new();
        let mut stack: Vec<_> = ids.into_iter().collect();
        while let Some(id) = stack.pop() {
            if ancestry.insert(id) {
                if let Some((mother, father)) = self.node(id).parents() {
                    stack.extend([mother, father]);
                }
            }
        }
        ancestry
    }
    /// `id` and every node sharing both of its parents.
    pub fn sibling_group(&self, id: NodeId) -> BTreeSet<NodeId> {
        match self.node(id).parents() {
            None => std::iter::once(id).collect(),
            Some((mother, father)) => {
                let fathers_children: BTreeSet<_> =
                    self.node(father).children().iter().copied().collect();
                self.node(mother)
                    .children()
                    .iter()
                    .copied()
                    .filter(|c| fathers_children.contains(c))
                    .collect()
            }
        }
    }
    /// Check every structural invariant of the pedigree.
    pub fn validate(&self) -> Result<()> {
        let mut seen = vec![false; self.nodes.len()];
        for (g, generation) in self.generations.iter().enumerate() {
            for &id in generation.members() {
                let node = self.get(id).ok_or(Error::UnknownNode(id))?;
                if node.generation() != g || std::mem::replace(&mut seen[id.index()], true) {
                    let msg = format!("node {} is misplaced in generation {}", id, g);
                    return Err(Error::structure(msg));
                }
            }
            let rebuilt = Generation::new(generation.members().to_vec(), &self.nodes);
            if rebuilt.men() != generation.men() || rebuilt.women() != generation.women() {
                let msg = format!("generation {} disagrees with its members' sexes", g);
                return Err(Error::structure(msg));
            }
        }
        if let Some(i) = seen.iter().position(|&s| !s) {
            let msg = format!("node {} belongs to no generation", i);
            return Err(Error::structure(msg));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if node.id().index() != i {
                return Err(Error::structure(format!("node {} stored at {}", node.id(), i)));
            }
            match (node.mother(), node.father()) {
                (None, None) => {}
                (Some(mother), Some(father)) => self.validate_parents(node, mother, father)?,
                _ => {
                    let msg = format!("node {} has exactly one parent", node.id());
                    return Err(Error::structure(msg));
                }
            }
            for &child in node.children() {
                let child = self.get(child).ok_or(Error::UnknownNode(child))?;
                if child.mother() != Some(node.id()) && child.father() != Some(node.id()) {
                    let msg = format!("{} lists {} as a child", node.id(), child.id());
                    return Err(Error::structure(msg));
                }
            }
        }
        Ok(())
    }
    fn validate_parents(&self, node: &Node, mother: NodeId, father: NodeId) -> Result<()> {
        if mother == node.id() || father == node.id() || mother == father {
            let msg = format!("node {} is its own parent", node.id());
            return Err(Error::structure(msg));
        }
        for parent in [mother, father] {
            let parent = self.get(parent).ok_or(Error::UnknownNode(parent))?;
            // Parents strictly older than children rules out cyclic ancestry.
            if parent.generation() >= node.generation() {
                let msg = format!("{} is not older than its child {}", parent.id(), node.id());
                return Err(Error::structure(msg));
            }
            let listed = parent.children().iter().filter(|&&c| c == node.id()).count();
            if listed != 1 {
                let msg = format!("{} lists child {} {} times", parent.id(), node.id(), listed);
                return Err(Error::structure(msg));
            }
        }
        Ok(())
    }
    /// Serialize pedigree and genomes into an opaque blob.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }
    /// Inverse of [`Population::to_bytes`]. Malformed input is rejected as a whole.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let population: Self = bincode::deserialize(bytes)?;
        population.validate()?;
        info!(
            "Loaded {} individuals in {} generations",
            population.size(),
            population.num_generations()
        );
        Ok(population)
    }
    pub fn write_to<W: std::io::Write>(&self, wtr: W) -> Result<()> {
        Ok(bincode::serialize_into(wtr, self)?)
    }
    pub fn read_from<R: std::io::Read>(rdr: R) -> Result<Self> {
        let population: Self = bincode::deserialize_from(rdr)?;
        population.validate()?;
        Ok(population)
    }
}
