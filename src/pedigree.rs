//! Individuals and cohorts of a pedigree.
//! Nodes live in a flat arena owned by [`crate::population::Population`];
//! every relation (mother, father, children) is an index into that arena.
use crate::genome::Genome;
use serde::{Deserialize, Serialize};

/// Index of a node in the population arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sex {
    Male,
    Female,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    id: NodeId,
    label: Option<String>,
    sex: Sex,
    generation: usize,
    mother: Option<NodeId>,
    father: Option<NodeId>,
    children: Vec<NodeId>,
    pub(crate) genome: Option<Genome>,
}

impl Node {
    pub(crate) fn founder(id: NodeId, sex: Sex, generation: usize) -> Self {
        Self {
            id,
            label: None,
            sex,
            generation,
            mother: None,
            father: None,
            children: vec![],
            genome: None,
        }
    }
    pub(crate) fn child(
        id: NodeId,
        sex: Sex,
        generation: usize,
        mother: NodeId,
        father: NodeId,
    ) -> Self {
        Self {
            mother: Some(mother),
            father: Some(father),
            ..Self::founder(id, sex, generation)
        }
    }
    pub fn id(&self) -> NodeId {
        self.id
    }
    /// External identity, e.g. the record id of a crawled individual.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
    pub(crate) fn set_label(&mut self, label: String) {
        self.label = Some(label);
    }
    pub fn sex(&self) -> Sex {
        self.sex
    }
    pub fn generation(&self) -> usize {
        self.generation
    }
    pub fn mother(&self) -> Option<NodeId> {
        self.mother
    }
    pub fn father(&self) -> Option<NodeId> {
        self.father
    }
    /// Both parents, or `None` for a founder.
    pub fn parents(&self) -> Option<(NodeId, NodeId)> {
        match (self.mother, self.father) {
            (Some(m), Some(f)) => Some((m, f)),
            _ => None,
        }
    }
    pub fn is_founder(&self) -> bool {
        self.mother.is_none()
    }
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
    pub(crate) fn add_child(&mut self, child: NodeId) {
        self.children.push(child);
    }
    pub fn genome(&self) -> Option<&Genome> {
        self.genome.as_ref()
    }
}

/// One cohort. The member order is the order nodes were created in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    members: Vec<NodeId>,
    men: Vec<NodeId>,
    women: Vec<NodeId>,
}

impl Generation {
    pub(crate) fn new(members: Vec<NodeId>, nodes: &[Node]) -> Self {
        let (men, women): (Vec<NodeId>, Vec<NodeId>) = members
            .iter()
            .partition(|id| nodes[id.index()].sex() == Sex::Male);
        Self {
            members,
            men,
            women,
        }
    }
    pub fn members(&self) -> &[NodeId] {
        &self.members
    }
    pub fn men(&self) -> &[NodeId] {
        &self.men
    }
    pub fn women(&self) -> &[NodeId] {
        &self.women
    }
    pub fn size(&self) -> usize {
        self.members.len()
    }
}

/// `size / 2` men and the rest women, in random order.
pub(crate) fn balanced_sexes<R: rand::Rng>(size: usize, rng: &mut R) -> Vec<Sex> {
    use rand::seq::SliceRandom;
    let mut sexes: Vec<_> = (0..size)
        .map(|i| if i < size / 2 { Sex::Male } else { Sex::Female })
        .collect();
    sexes.shuffle(rng);
    sexes
}
