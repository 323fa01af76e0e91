use crate::search::analyze::{AnalyzeParams, BATCH_ROWS_DEFAULT};
use crate::search::codec::Alphabet;
use crate::search::error::Result;
use crate::search::kmer::KmerParams;
use crate::search::score::ScoreParams;
use clap::{value_parser, Args};

#[derive(Debug, Args)]
pub struct KmerArgs {
    /// K-mer size [integer]
    #[clap(short = 'k', long, default_value = "8", value_parser = value_parser!(u8).range(4..=32), help_heading = "Core")]
    pub kmer_size: u8,

    /// Occurrence ordinal bit width [integer]
    #[clap(long, default_value = "8", value_parser = value_parser!(u8).range(1..=16), help_heading = "Core")]
    pub occurrence_bits: u8,

    /// Treat sequences as the 16-letter IUPAC alphabet [flag]
    #[clap(long, help_heading = "Core")]
    pub iupac: bool,
}

impl KmerArgs {
    pub fn params(&self) -> Result<KmerParams> {
        KmerParams::new(self.kmer_size, self.occurrence_bits)
    }

    pub fn alphabet(&self) -> Alphabet {
        if self.iupac {
            Alphabet::Dna4
        } else {
            Alphabet::Dna2
        }
    }
}

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    /// Fraction of rows a k-mer must exceed to count as high-frequency [float]
    #[clap(long, default_value = "0.1", help_heading = "Analysis")]
    pub max_rate: f64,

    /// Absolute cap on the row threshold; 0 disables the cap [integer]
    #[clap(long, default_value = "0", help_heading = "Analysis")]
    pub max_nrow: u64,

    /// Rows aggregated in memory between spill commits [integer]
    #[clap(long, default_value_t = BATCH_ROWS_DEFAULT, help_heading = "Analysis")]
    pub batch_rows: u64,

    /// Number of scan workers; 0 uses all cores [integer]
    #[clap(short = 't', long, default_value = "0", help_heading = "Analysis")]
    pub n_threads: usize,
}

impl AnalyzeArgs {
    pub fn params(&self, kmer: KmerParams) -> Result<AnalyzeParams> {
        let mut params = AnalyzeParams::new(kmer, self.max_rate, self.max_nrow)?;
        params.batch_rows = self.batch_rows;
        params.workers = self.n_threads;
        Ok(params)
    }
}

#[derive(Debug, Args)]
pub struct ScoreArgs {
    /// Absolute score floor [integer]
    #[clap(long, default_value = "1", help_heading = "Scoring")]
    pub min_score: u64,

    /// Score threshold as a fraction of the query's key count [float]
    #[clap(long, default_value = "0.5", help_heading = "Scoring")]
    pub min_score_rate: f64,
}

impl ScoreArgs {
    pub fn params(&self) -> ScoreParams {
        ScoreParams {
            min_score: self.min_score,
            min_score_rate: self.min_score_rate,
        }
    }
}
