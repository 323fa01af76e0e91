use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Read sequence rows from a text file.
///
/// Two layouts are accepted:
/// * plain – one sequence per line; blank lines and `#` comments are
///   skipped
/// * FASTA – `>` headers start a new record, sequence lines in between
///   are concatenated
pub fn read_rows(path: &Path) -> Result<Vec<String>> {
    let f = File::open(path).context(format!("opening sequence file {:?}", path))?;
    let reader = BufReader::new(f);

    let mut rows: Vec<String> = Vec::new();
    let mut fasta = false;
    for line in reader.lines() {
        let line = line.context("reading sequence file")?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with('>') {
            fasta = true;
            rows.push(String::new());
            continue;
        }
        if fasta {
            match rows.last_mut() {
                Some(cur) => cur.push_str(line),
                None => bail!("sequence data before the first FASTA header"),
            }
        } else {
            rows.push(line.to_string());
        }
    }
    rows.retain(|r| !r.is_empty());
    Ok(rows)
}
