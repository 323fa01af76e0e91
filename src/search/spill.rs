use crate::search::error::Result;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

/// One worker's on-disk aggregation store: a self-contained SQLite file
/// with the single table `kmer_rows(kmer PRIMARY KEY, nrow)`.
///
/// K-mers are stored through an `as i64` cast; patterns above
/// `i64::MAX` land as negatives and cast back losslessly.
pub struct SpillStore {
    conn: Connection,
    path: PathBuf,
}

impl SpillStore {
    /// Create (or reopen) the store at `path`. Durability pragmas are
    /// off: a spill file that dies with its job is rebuilt, never
    /// recovered.
    pub fn create(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = MEMORY;
             PRAGMA synchronous = OFF;
             CREATE TABLE IF NOT EXISTS kmer_rows (
                 kmer INTEGER PRIMARY KEY,
                 nrow INTEGER NOT NULL
             );",
        )?;
        Ok(SpillStore {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush one batch in a single transaction, adding each batch row
    /// count onto the stored count.
    pub fn upsert_batch<I>(&mut self, batch: I) -> Result<()>
    where
        I: IntoIterator<Item = (u64, u64)>,
    {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO kmer_rows (kmer, nrow) VALUES (?1, ?2)
                 ON CONFLICT(kmer) DO UPDATE SET nrow = nrow + excluded.nrow",
            )?;
            for (kmer, nrow) in batch {
                stmt.execute(params![kmer as i64, nrow as i64])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Absorb every `(kmer, nrow)` of the store at `source` by
    /// UPSERT-sum, then unlink the source file. The source is only read.
    pub fn merge_from(&mut self, source: &Path) -> Result<()> {
        let source_str = source.to_string_lossy().into_owned();
        self.conn
            .execute("ATTACH DATABASE ?1 AS src", params![source_str])?;
        // WHERE true disambiguates the upsert clause from a join
        let merged = self.conn.execute_batch(
            "BEGIN;
             INSERT INTO kmer_rows (kmer, nrow)
                 SELECT kmer, nrow FROM src.kmer_rows WHERE true
                 ON CONFLICT(kmer) DO UPDATE SET nrow = nrow + excluded.nrow;
             COMMIT;",
        );
        self.conn.execute_batch("DETACH DATABASE src")?;
        merged?;
        std::fs::remove_file(source)?;
        Ok(())
    }

    /// `(kmer, nrow)` pairs with `nrow` strictly above `threshold`,
    /// ascending by k-mer.
    pub fn rows_over(&self, threshold: u64) -> Result<Vec<(u64, u64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT kmer, nrow FROM kmer_rows WHERE nrow > ?1 ORDER BY kmer")?;
        let rows = stmt.query_map(params![threshold as i64], |r| {
            Ok((r.get::<_, i64>(0)? as u64, r.get::<_, i64>(1)? as u64))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    /// Every stored pair, ascending by k-mer.
    pub fn entries(&self) -> Result<Vec<(u64, u64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT kmer, nrow FROM kmer_rows ORDER BY kmer")?;
        let rows = stmt.query_map([], |r| {
            Ok((r.get::<_, i64>(0)? as u64, r.get::<_, i64>(1)? as u64))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    /// Close the connection, surfacing any pending failure.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| e.into())
    }
}
