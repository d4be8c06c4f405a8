use clap::{App, Arg, ArgMatches, SubCommand};
use ibd_deanon::diagnostics::{DiagnosticSink, JsonLinesSink, NullSink};
use ibd_deanon::{BayesDeanonymize, ClassifierParams, GenomeGenerator, LengthClassifier};
use ibd_deanon::{NodeId, Population};
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoroshiro128PlusPlus;
use rayon::prelude::*;
use std::io::{BufReader, BufWriter};

fn verbose() -> Arg<'static, 'static> {
    Arg::with_name("verbose")
        .short("v")
        .multiple(true)
        .help("Debug mode")
}

fn seed() -> Arg<'static, 'static> {
    Arg::with_name("seed")
        .long("seed")
        .value_name("SEED")
        .takes_value(true)
        .default_value("24")
        .help("Seed for a pseudo random number generator.")
}

fn subcommand_simulate() -> App<'static, 'static> {
    SubCommand::with_name("simulate")
        .version("0.1")
        .author("Bansho Masutani")
        .about("Grow a random pedigree, simulate genomes and write the population.")
        .arg(verbose())
        .arg(seed())
        .arg(
            Arg::with_name("founders")
                .long("founders")
                .short("f")
                .value_name("FOUNDERS")
                .takes_value(true)
                .default_value("100")
                .help("Number of founders"),
        )
        .arg(
            Arg::with_name("generations")
                .long("generations")
                .short("g")
                .value_name("GENERATIONS")
                .takes_value(true)
                .default_value("4")
                .help("Number of generations, founders included."),
        )
        .arg(
            Arg::with_name("size")
                .long("size")
                .value_name("SIZE")
                .takes_value(true)
                .help("Size of each new generation. Default: the number of founders."),
        )
        .arg(
            Arg::with_name("output")
                .long("output")
                .short("o")
                .value_name("OUTPUT")
                .takes_value(true)
                .required(true)
                .help("Output file of the population."),
        )
}

fn subcommand_evaluate() -> App<'static, 'static> {
    SubCommand::with_name("evaluate")
        .version("0.1")
        .author("Bansho Masutani")
        .about("Fit a classifier on a population and measure identification accuracy.")
        .arg(verbose())
        .arg(seed())
        .arg(
            Arg::with_name("input")
                .long("input")
                .short("i")
                .value_name("INPUT")
                .takes_value(true)
                .required(true)
                .help("Population file written by `simulate`."),
        )
        .arg(
            Arg::with_name("threads")
                .long("threads")
                .value_name("THREADS")
                .takes_value(true)
                .default_value("1")
                .help("Number of threads"),
        )
        .arg(
            Arg::with_name("labeled")
                .long("labeled")
                .short("l")
                .value_name("LABELED")
                .takes_value(true)
                .default_value("20")
                .help("Number of labeled nodes drawn from the last generation."),
        )
        .arg(
            Arg::with_name("tests")
                .long("tests")
                .short("t")
                .value_name("TESTS")
                .takes_value(true)
                .default_value("50")
                .help("Number of identifications."),
        )
        .arg(
            Arg::with_name("trials")
                .long("trials")
                .value_name("TRIALS")
                .takes_value(true)
                .default_value("1000")
                .help("Number of simulations per founder set."),
        )
        .arg(
            Arg::with_name("threshold")
                .long("threshold")
                .value_name("BP")
                .takes_value(true)
                .default_value("5000000")
                .help("Minimum length of a shared segment."),
        )
        .arg(
            Arg::with_name("log")
                .long("log")
                .value_name("LOG")
                .takes_value(true)
                .help("Write one JSON record per identification to this file."),
        )
}

fn main() -> ibd_deanon::Result<()> {
    let matches = App::new("deanon")
        .version("0.1")
        .author("Bansho Masutani")
        .about("Genome identification from IBD with labeled relatives")
        .setting(clap::AppSettings::ArgRequiredElseHelp)
        .subcommand(subcommand_simulate())
        .subcommand(subcommand_evaluate())
        .get_matches();
    if let Some(sub_m) = matches.subcommand().1 {
        let level = match sub_m.occurrences_of("verbose") {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
        if let Some(threads) = sub_m.value_of("threads") {
            match threads.parse::<usize>() {
                Ok(res) => {
                    if let Err(why) = rayon::ThreadPoolBuilder::new()
                        .num_threads(res)
                        .build_global()
                    {
                        debug!("Could not set the thread pool:{:?}", why);
                    }
                }
                Err(why) => panic!("{:?}--mulformed threads number", why),
            }
        }
    }
    match matches.subcommand() {
        ("simulate", Some(sub_m)) => simulate(sub_m),
        ("evaluate", Some(sub_m)) => evaluate(sub_m),
        _ => unreachable!(),
    }
}

fn simulate(sub_m: &ArgMatches) -> ibd_deanon::Result<()> {
    let seed = sub_m.value_of("seed").map(parse_to_usize).unwrap() as u64;
    let founders = sub_m.value_of("founders").map(parse_to_usize).unwrap();
    let generations = sub_m.value_of("generations").map(parse_to_usize).unwrap();
    let size = sub_m.value_of("size").map(parse_to_usize);
    let output = sub_m.value_of("output").unwrap();
    let mut rng: Xoroshiro128PlusPlus = SeedableRng::seed_from_u64(seed);
    let mut population = Population::with_founders(founders, &mut rng);
    for _ in 1..generations {
        population.new_generation(size, &mut rng)?;
    }
    population.generate_genomes(&GenomeGenerator::human(), &mut rng);
    let wtr = std::fs::File::create(output).map(BufWriter::new)?;
    population.write_to(wtr)?;
    info!(
        "Wrote {} individuals in {} generations to {}",
        population.size(),
        population.num_generations(),
        output
    );
    Ok(())
}

fn evaluate(sub_m: &ArgMatches) -> ibd_deanon::Result<()> {
    let seed = sub_m.value_of("seed").map(parse_to_usize).unwrap() as u64;
    let num_labeled = sub_m.value_of("labeled").map(parse_to_usize).unwrap();
    let tests = sub_m.value_of("tests").map(parse_to_usize).unwrap();
    let trials = sub_m.value_of("trials").map(parse_to_usize).unwrap();
    let threshold = sub_m.value_of("threshold").map(parse_to_usize).unwrap() as u64;
    let rdr = std::fs::File::open(sub_m.value_of("input").unwrap()).map(BufReader::new)?;
    let mut population = Population::read_from(rdr)?;
    let mut rng: Xoroshiro128PlusPlus = SeedableRng::seed_from_u64(seed);
    let first_label = population.max_founder_label().map_or(0, |label| label + 1);
    let generator = GenomeGenerator::human().with_first_label(first_label);
    population.generate_genomes(&generator, &mut rng);
    let last_generation: Vec<NodeId> = match population.generations().last() {
        Some(generation) => generation.members().to_vec(),
        None => return Err(ibd_deanon::Error::EmptyPopulation),
    };
    let labeled: Vec<_> = last_generation
        .choose_multiple(&mut rng, num_labeled)
        .copied()
        .collect();
    let params = ClassifierParams {
        trials,
        minimum_segment_length: threshold,
        seed: rng.gen(),
        ..ClassifierParams::default()
    };
    let classifier = LengthClassifier::new(&population, &labeled, &generator, params)?;
    let sink: Box<dyn DiagnosticSink> = match sub_m.value_of("log") {
        Some(path) => Box::new(JsonLinesSink::create(path, 1024)?),
        None => Box::new(NullSink),
    };
    let engine = BayesDeanonymize::new(&population, &classifier).with_sink(sink);
    let seed = rng.gen::<u64>();
    let results: Vec<_> = (0..tests)
        .into_par_iter()
        .map(|i| {
            let mut rng = trial_rng(seed, i);
            let actual = *last_generation.choose(&mut rng).unwrap();
            let genome = engine.population().genome(actual).unwrap();
            let result = engine.identify(genome, threshold, Some(actual));
            (actual, result)
        })
        .collect();
    let kinship = population.kinship();
    let (mut correct, mut incorrect, mut failed) = (0, 0, 0);
    let mut missed_kinship = vec![];
    for (actual, result) in results {
        match result {
            Ok(identified) if identified.sibling_group.contains(&actual) => correct += 1,
            Ok(identified) => {
                incorrect += 1;
                if let Some(phi) = kinship.get(actual, identified.best) {
                    missed_kinship.push(phi);
                }
                debug!("Missed\t{}\t{}\t{:.2}", actual, identified.best, identified.log_ratio);
            }
            Err(why) => {
                failed += 1;
                debug!("Failed\t{}\t{}", actual, why);
            }
        }
    }
    println!("Tested\t{}", tests);
    println!("Correct\t{}", correct);
    println!("Incorrect\t{}", incorrect);
    println!("Unidentified\t{}", failed);
    println!("Accuracy\t{:.4}", correct as f64 / tests.max(1) as f64);
    if !missed_kinship.is_empty() {
        let mean = missed_kinship.iter().sum::<f64>() / missed_kinship.len() as f64;
        println!("MeanKinshipOfMisses\t{:.5}", mean);
    }
    Ok(())
}

// The i-th test draws from its own stream; any seed is allowed.
fn trial_rng(seed: u64, i: usize) -> Xoroshiro128PlusPlus {
    SeedableRng::seed_from_u64(seed.wrapping_add(i as u64))
}

fn parse_to_usize(input: &str) -> usize {
    match input.parse::<usize>() {
        Ok(res) => res,
        Err(why) => panic!(
            "Couldn't parse {}. Please input a valid value(Integer):{:?}",
            input, why
        ),
    }
}
