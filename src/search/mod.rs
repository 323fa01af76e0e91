pub mod analyze;
pub mod cache;
pub mod catalog;
pub mod codec;
pub mod dataset;
pub mod error;
pub mod kmer;
pub mod score;
pub mod shared;
pub mod spill;
