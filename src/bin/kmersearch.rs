use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use kmersearch::cli::io::read_rows;
use kmersearch::cli::opts::{AnalyzeArgs, KmerArgs, ScoreArgs};
use kmersearch::search::analyze::{
    analyze_dataset, cleanup_spill_dirs, undo_analyze, CancelToken,
};
use kmersearch::search::cache::SearchContext;
use kmersearch::search::catalog::Catalog;
use kmersearch::search::codec::{decode, encode, Alphabet, PackedSeq};
use kmersearch::search::dataset::MemoryDataset;
use kmersearch::search::kmer::{extract_query_keys, extract_row_keys, KeyBuilder};
use kmersearch::search::score::{filter_keys, plan_query, KmerLookup, MemIndex};
use std::path::PathBuf;
use std::time::Instant;

/// Approximate scored substring search over DNA corpora via a k-mer
/// signature index.
#[derive(Parser)]
#[command(
    name = "kmersearch",
    about = "Approximate substring search over DNA sequence corpora",
    long_about = "Approximate substring search over DNA sequence corpora.

EXAMPLES:
    // Analyze a corpus and persist its high-frequency k-mer set
    $ kmersearch analyze -i seqs.txt --catalog corpus.db -k 8 --max-rate 0.4

    // Rank corpus rows against a query sequence
    $ kmersearch query -i seqs.txt --catalog corpus.db -k 8 --max-rate 0.4 <QUERY>
    ",
    version = "0.1.0"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pack a sequence and print the packed bytes as hex
    Encode {
        /// Sequence to pack
        sequence: String,

        /// Treat the sequence as the 16-letter IUPAC alphabet [flag]
        #[clap(long)]
        iupac: bool,
    },

    /// Unpack hex-encoded packed bytes back to a sequence
    Decode {
        /// Packed bytes as hex
        hex: String,

        /// Sequence length in bases [integer]
        length: usize,

        /// Treat the bytes as the 16-letter IUPAC alphabet [flag]
        #[clap(long)]
        iupac: bool,
    },

    /// Build and persist the high-frequency k-mer set of a corpus
    Analyze {
        /// Sequence file: one row per line, or FASTA [path]
        #[clap(short = 'i', long, required = true, help_heading = "Core")]
        input: PathBuf,

        /// Catalog database to persist into [path]
        #[clap(long, required = true, help_heading = "Core")]
        catalog: PathBuf,

        /// Dataset identity recorded in the catalog [integer]
        #[clap(long, default_value = "1", help_heading = "Core")]
        dataset_id: u64,

        /// Column name recorded in the catalog [string]
        #[clap(short = 'c', long, default_value = "seq", help_heading = "Core")]
        column: String,

        /// Rows per parallel work block [integer]
        #[clap(long, default_value = "1024", help_heading = "Analysis")]
        block_rows: usize,

        /// Directory for spill stores; defaults to the system temp root [path]
        #[clap(long, help_heading = "Analysis")]
        temp_dir: Option<PathBuf>,

        #[clap(flatten)]
        kmer: KmerArgs,

        #[clap(flatten)]
        analyze: AnalyzeArgs,
    },

    /// Rank corpus rows against a query sequence
    Query {
        /// Query sequence (64 bases minimum)
        query: String,

        /// Sequence file: one row per line, or FASTA [path]
        #[clap(short = 'i', long, required = true, help_heading = "Core")]
        input: PathBuf,

        /// Catalog with a persisted analysis; omit to run unfiltered [path]
        #[clap(long, help_heading = "Core")]
        catalog: Option<PathBuf>,

        /// Dataset identity used at analysis time [integer]
        #[clap(long, default_value = "1", help_heading = "Core")]
        dataset_id: u64,

        /// Column name used at analysis time [string]
        #[clap(short = 'c', long, default_value = "seq", help_heading = "Core")]
        column: String,

        /// Maximum number of rows to print [integer]
        #[clap(short = 'n', long, default_value = "10", help_heading = "Scoring")]
        limit: usize,

        #[clap(flatten)]
        kmer: KmerArgs,

        #[clap(flatten)]
        analyze: AnalyzeArgs,

        #[clap(flatten)]
        score: ScoreArgs,
    },

    /// Remove the persisted analysis of a (dataset, column)
    Undo {
        /// Catalog database [path]
        #[clap(long, required = true)]
        catalog: PathBuf,

        /// Dataset identity [integer]
        #[clap(long, default_value = "1")]
        dataset_id: u64,

        /// Column name [string]
        #[clap(short = 'c', long, default_value = "seq")]
        column: String,
    },

    /// Remove stale spill directories left by crashed analyses
    Cleanup {
        /// Directory to sweep; defaults to the system temp root [path]
        #[clap(long)]
        temp_dir: Option<PathBuf>,
    },
}

fn main() {
    // Catch and handle errors
    // Ensures spill directories have time to unwind first
    if let Err(e) = run() {
        eprintln!("{:?}", e);
        std::process::exit(1);
    }
    std::process::exit(0);
}

fn run() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();

    match cli.command {
        Command::Encode { sequence, iupac } => {
            let alphabet = if iupac { Alphabet::Dna4 } else { Alphabet::Dna2 };
            let packed = encode(alphabet, sequence.as_bytes()).context("packing sequence")?;
            println!("{}", to_hex(&packed.bytes));
        }
        Command::Decode {
            hex,
            length,
            iupac,
        } => {
            let alphabet = if iupac { Alphabet::Dna4 } else { Alphabet::Dna2 };
            let bytes = from_hex(&hex)?;
            if bytes.len() < alphabet.packed_len(length) {
                bail!(
                    "{} packed bytes cannot hold {} bases",
                    bytes.len(),
                    length
                );
            }
            let seq = PackedSeq {
                alphabet,
                len: length,
                bytes,
            };
            println!("{}", decode(&seq));
        }
        Command::Analyze {
            input,
            catalog,
            dataset_id,
            column,
            block_rows,
            temp_dir,
            kmer,
            analyze,
        } => {
            let params = kmer.params()?;
            let analyze_params = analyze.params(params)?;
            println!("Start: Loading sequences");
            let rows = read_rows(&input)?;
            let dataset =
                MemoryDataset::from_ascii(dataset_id, &column, kmer.alphabet(), &rows, block_rows)
                    .context("packing corpus rows")?;
            let mut cat = Catalog::open(&catalog).context("opening catalog")?;
            let temp_root = temp_dir.unwrap_or_else(std::env::temp_dir);

            println!("Start: Analyzing k-mer frequencies");
            let summary = analyze_dataset(
                &dataset,
                &analyze_params,
                &mut cat,
                &temp_root,
                &CancelToken::new(),
            )?;
            println!(
                "Analyzed {} rows ({} k-mers, {} distinct per row): threshold {}, {} high-frequency k-mers, {} batches",
                summary.total_rows,
                summary.counters.kmers,
                summary.counters.distinct_kmers,
                summary.threshold,
                summary.highfreq.len(),
                summary.counters.batches
            );
        }
        Command::Query {
            query,
            input,
            catalog,
            dataset_id,
            column,
            limit,
            kmer,
            analyze,
            score,
        } => {
            let params = kmer.params()?;
            let alphabet = kmer.alphabet();
            let score_params = score.params();

            println!("Start: Loading sequences");
            let rows = read_rows(&input)?;
            if rows.is_empty() {
                bail!("sequence file {:?} holds no rows", input);
            }

            let mut ctx = SearchContext::default();
            if let Some(path) = &catalog {
                let cat = Catalog::open(path).context("opening catalog")?;
                let loaded = ctx.ensure_highfreq(
                    &cat,
                    dataset_id,
                    &column,
                    &params,
                    analyze.max_rate,
                    analyze.max_nrow,
                    0,
                )?;
                if loaded {
                    println!(
                        "Loaded high-frequency cache: {} k-mers",
                        ctx.highfreq().map(|c| c.len()).unwrap_or(0)
                    );
                }
            }

            println!("Start: Building index");
            let mut index = MemIndex::new(params.key_width());
            let mut builder = KeyBuilder::new(&params);
            for (row_id, row) in rows.iter().enumerate() {
                let seq = encode(alphabet, row.as_bytes())
                    .context(format!("packing row {}", row_id))?;
                let keys = extract_row_keys(&seq, &params, &mut builder);
                let keys = match ctx.highfreq() {
                    Some(cache) => filter_keys(&keys, &params, cache),
                    None => keys,
                };
                index.add_row(row_id as u64, &keys, &params)?;
            }

            println!("Start: Scoring");
            let query_keys = match ctx.patterns().get(&query, params.k()) {
                Some(cached) => cached,
                None => {
                    let keys = extract_query_keys(query.as_bytes(), alphabet, &params)?;
                    ctx.patterns().put(&query, params.k(), keys)
                }
            };
            let plan = {
                let (cache, memo) = ctx.scoring_parts();
                let cache = cache.map(|c| c as &dyn KmerLookup);
                plan_query(&query_keys, &params, &score_params, cache, memo)
            };
            let hits = index.search(&plan.filtered_keys, plan.threshold, &params)?;

            println!(
                "{} query keys ({} high-frequency), score threshold {}",
                query_keys.len(),
                plan.highfreq_hits,
                plan.threshold
            );
            for (rank, (row_id, score)) in hits.iter().take(limit).enumerate() {
                println!("{:>4}. row {:<8} score {}", rank + 1, row_id, score);
            }
            if hits.is_empty() {
                println!("No rows reached the threshold");
            }
        }
        Command::Undo {
            catalog,
            dataset_id,
            column,
        } => {
            let mut cat = Catalog::open(&catalog).context("opening catalog")?;
            if undo_analyze(&mut cat, dataset_id, &column)? {
                println!("Removed analysis for dataset {} column '{}'", dataset_id, column);
            } else {
                println!("Nothing persisted for dataset {} column '{}'", dataset_id, column);
            }
        }
        Command::Cleanup { temp_dir } => {
            let temp_root = temp_dir.unwrap_or_else(std::env::temp_dir);
            let removed = cleanup_spill_dirs(&temp_root)?;
            println!("Removed {} stale spill directories", removed);
        }
    }

    let elapsed = start_time.elapsed();
    println!("Elapsed time: {:.2?}", elapsed);
    Ok(())
}

/* ---------- hex helpers -------------------------------------------- */

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn from_hex(s: &str) -> Result<Vec<u8>> {
    let s = s.trim();
    if s.len() % 2 != 0 {
        bail!("hex input has odd length {}", s.len());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).context("parsing hex byte"))
        .collect()
}
