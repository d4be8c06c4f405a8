//! Synthetic diploid genomes.
//! A haplotype is a tiling of the chromosome by segments, each one tagged by the founder
//! haplotype it was copied from. Two genomes are IBD wherever they carry the same tag,
//! so shared segments can be read off directly without any sequence.
use rand::Rng;
use rand_distr::Poisson;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Physical and genetic length of a chromosome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChromosomeSpec {
    pub length: u64,
    pub centimorgans: f64,
}

// GRCh37 autosome lengths and sex-averaged genetic map lengths.
const HUMAN_AUTOSOMES: [(u64, f64); 22] = [
    (249_250_621, 278.1),
    (243_199_373, 263.4),
    (198_022_430, 224.6),
    (191_154_276, 213.4),
    (180_915_260, 209.9),
    (171_115_067, 196.1),
    (159_138_663, 192.3),
    (146_364_022, 169.3),
    (141_213_431, 168.2),
    (135_534_747, 178.6),
    (135_006_516, 158.8),
    (133_851_895, 172.3),
    (115_169_878, 127.8),
    (107_349_540, 116.9),
    (102_531_392, 131.1),
    (90_354_753, 134.8),
    (81_195_210, 129.9),
    (78_077_248, 120.5),
    (59_128_983, 109.4),
    (63_025_520, 98.1),
    (48_129_895, 62.8),
    (51_304_566, 74.1),
];

/// A run of a haplotype, `[start, end)`, inherited from the founder haplotype `founder`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub start: u64,
    pub end: u64,
    pub founder: u64,
}

impl Segment {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Haplotype {
    segments: Vec<Segment>,
}

impl Haplotype {
    fn founder(length: u64, founder: u64) -> Self {
        Self {
            segments: vec![Segment {
                start: 0,
                end: length,
                founder,
            }],
        }
    }
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
    /// Append the part of this haplotype lying in `[start, end)` to `out`,
    /// merging with the last segment of `out` when they continue each other.
    fn copy_range(&self, start: u64, end: u64, out: &mut Vec<Segment>) {
        let first = self.segments.partition_point(|s| s.end <= start);
        for seg in self.segments[first..].iter() {
            if end <= seg.start {
                break;
            }
            let piece = Segment {
                start: seg.start.max(start),
                end: seg.end.min(end),
                founder: seg.founder,
            };
            match out.last_mut() {
                Some(last) if last.founder == piece.founder && last.end == piece.start => {
                    last.end = piece.end
                }
                _ => out.push(piece),
            }
        }
    }
}

/// Two haplotypes for every chromosome of the generator that made it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genome {
    chromosomes: Vec<[Haplotype; 2]>,
}

impl Genome {
    pub fn chromosomes(&self) -> &[[Haplotype; 2]] {
        &self.chromosomes
    }
    pub fn num_chromosomes(&self) -> usize {
        self.chromosomes.len()
    }
    /// The largest founder label carried by any segment.
    pub fn max_founder_label(&self) -> Option<u64> {
        self.chromosomes
            .iter()
            .flatten()
            .flat_map(|hap| hap.segments().iter().map(|s| s.founder))
            .max()
    }
}

/// Creates founder genomes and recombines parental genomes.
///
/// The number of crossovers per meiosis is Poisson with mean equal to the genetic
/// length in Morgans, and crossover positions are uniform along the physical
/// length (no interference).
#[derive(Debug)]
pub struct GenomeGenerator {
    chromosomes: Vec<ChromosomeSpec>,
    crossovers: Vec<Option<Poisson<f64>>>,
    // Next founder haplotype label.
    next_label: AtomicU64,
}

impl Clone for GenomeGenerator {
    fn clone(&self) -> Self {
        Self {
            chromosomes: self.chromosomes.clone(),
            crossovers: self.crossovers.clone(),
            next_label: AtomicU64::new(self.next_label.load(Ordering::Relaxed)),
        }
    }
}

impl Default for GenomeGenerator {
    fn default() -> Self {
        Self::human()
    }
}

impl GenomeGenerator {
    pub fn new(chromosomes: Vec<ChromosomeSpec>) -> Self {
        let crossovers = chromosomes
            .iter()
            .map(|c| Poisson::new(c.centimorgans / 100.).ok())
            .collect();
        Self {
            chromosomes,
            crossovers,
            next_label: AtomicU64::new(0),
        }
    }
    /// Start labeling founder haplotypes at `first`, e.g. past every label
    /// already carried by a loaded population.
    pub fn with_first_label(self, first: u64) -> Self {
        self.next_label.store(first, Ordering::Relaxed);
        self
    }
    /// The 22 human autosomes.
    pub fn human() -> Self {
        let chromosomes = HUMAN_AUTOSOMES
            .iter()
            .map(|&(length, centimorgans)| ChromosomeSpec {
                length,
                centimorgans,
            })
            .collect();
        Self::new(chromosomes)
    }
    pub fn chromosomes(&self) -> &[ChromosomeSpec] {
        &self.chromosomes
    }
    /// Total physical length of one haplotype.
    pub fn genome_length(&self) -> u64 {
        self.chromosomes.iter().map(|c| c.length).sum()
    }
    /// A founder genome. Each haplotype gets a label never handed out before
    /// by this generator, so it shares nothing with any other founder.
    /// Labels only need to be distinct, so the random state is not consumed.
    pub fn generate_genome<R: Rng>(&self, _rng: &mut R) -> Genome {
        let chromosomes = self
            .chromosomes
            .iter()
            .map(|c| {
                [
                    Haplotype::founder(c.length, self.fresh_label()),
                    Haplotype::founder(c.length, self.fresh_label()),
                ]
            })
            .collect();
        Genome { chromosomes }
    }
    fn fresh_label(&self) -> u64 {
        self.next_label.fetch_add(1, Ordering::Relaxed)
    }
    /// A child of `mother` and `father`. Parents are left untouched.
    pub fn mate<R: Rng>(&self, mother: &Genome, father: &Genome, rng: &mut R) -> Genome {
        assert_eq!(mother.num_chromosomes(), self.chromosomes.len());
        assert_eq!(father.num_chromosomes(), self.chromosomes.len());
        let chromosomes = (0..self.chromosomes.len())
            .map(|i| {
                let from_mother = self.gamete(i, &mother.chromosomes[i], rng);
                let from_father = self.gamete(i, &father.chromosomes[i], rng);
                [from_mother, from_father]
            })
            .collect();
        Genome { chromosomes }
    }
    fn gamete<R: Rng>(&self, chr: usize, pair: &[Haplotype; 2], rng: &mut R) -> Haplotype {
        let length = self.chromosomes[chr].length;
        let count = match &self.crossovers[chr] {
            Some(poisson) if length > 1 => {
                let draw: f64 = rng.sample(poisson);
                draw as usize
            }
            _ => 0,
        };
        let mut breakpoints: Vec<u64> = (0..count).map(|_| rng.gen_range(1..length)).collect();
        breakpoints.sort_unstable();
        breakpoints.dedup();
        breakpoints.push(length);
        let mut current = rng.gen_range(0..2);
        let mut start = 0;
        let mut segments = Vec::with_capacity(breakpoints.len());
        for bp in breakpoints {
            pair[current].copy_range(start, bp, &mut segments);
            start = bp;
            current = 1 - current;
        }
        Haplotype { segments }
    }
}

/// Lengths of the maximal regions of each chromosome where some haplotype of `a`
/// and some haplotype of `b` descend from the same founder haplotype.
pub fn shared_segment_lengths(a: &Genome, b: &Genome) -> Vec<Vec<u64>> {
    a.chromosomes
        .iter()
        .zip(b.chromosomes.iter())
        .map(|(xs, ys)| {
            let mut shared = vec![];
            for x in xs.iter() {
                for y in ys.iter() {
                    identical_runs(x, y, &mut shared);
                }
            }
            merged_lengths(shared)
        })
        .collect()
}

/// Total length of shared segments at least `minimum` long.
pub fn shared_segment_length(a: &Genome, b: &Genome, minimum: u64) -> u64 {
    shared_segment_lengths(a, b)
        .iter()
        .flatten()
        .filter(|&&len| len >= minimum)
        .sum()
}

// Both haplotypes are sorted tilings, so a two-pointer sweep visits every overlap once.
fn identical_runs(x: &Haplotype, y: &Haplotype, out: &mut Vec<(u64, u64)>) {
    let (xs, ys) = (x.segments(), y.segments());
    let (mut i, mut j) = (0, 0);
    while i < xs.len() && j < ys.len() {
        let start = xs[i].start.max(ys[j].start);
        let end = xs[i].end.min(ys[j].end);
        if start < end && xs[i].founder == ys[j].founder {
            out.push((start, end));
        }
        if xs[i].end <= ys[j].end {
            i += 1;
        } else {
            j += 1;
        }
    }
}

fn merged_lengths(mut intervals: Vec<(u64, u64)>) -> Vec<u64> {
    intervals.sort_unstable();
    let mut lengths = vec![];
    let mut current: Option<(u64, u64)> = None;
    for (start, end) in intervals {
        current = match current {
            Some((s, e)) if start <= e => Some((s, e.max(end))),
            Some((s, e)) => {
                lengths.push(e - s);
                Some((start, end))
            }
            None => Some((start, end)),
        };
    }
    if let Some((s, e)) = current {
        lengths.push(e - s);
    }
    lengths
}
