use crate::search::error::Result;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Metadata row describing one persisted high-frequency set; the
/// durable half of the cache key.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisMeta {
    pub dataset_id: u64,
    pub column: String,
    pub k: u8,
    pub occ_bits: u8,
    pub max_rate: f64,
    pub max_nrow: u64,
    /// Unix seconds at analysis completion.
    pub analyzed_at: i64,
}

/// The host catalog: persisted high-frequency sets and their metadata,
/// one embedded SQLite database.
pub struct Catalog {
    conn: Connection,
}

impl Catalog {
    pub fn open(path: &Path) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS highfreq_meta (
                 dataset_id  INTEGER NOT NULL,
                 column_name TEXT    NOT NULL,
                 k           INTEGER NOT NULL,
                 occ_bits    INTEGER NOT NULL,
                 max_rate    REAL    NOT NULL,
                 max_nrow    INTEGER NOT NULL,
                 analyzed_at INTEGER NOT NULL,
                 PRIMARY KEY (dataset_id, column_name, k)
             );
             CREATE TABLE IF NOT EXISTS highfreq_kmer (
                 dataset_id  INTEGER NOT NULL,
                 column_name TEXT    NOT NULL,
                 kmer        INTEGER NOT NULL,
                 nrow        INTEGER NOT NULL,
                 PRIMARY KEY (dataset_id, column_name, kmer)
             );",
        )?;
        Ok(Catalog { conn })
    }

    /// Atomically replace the high-frequency set for `(dataset, column)`
    /// with `entries` and record the metadata row. A rebuild for any k
    /// supersedes the prior set whole.
    pub fn replace_highfreq(
        &mut self,
        meta: &AnalysisMeta,
        entries: &[(u64, u64)],
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM highfreq_meta WHERE dataset_id = ?1 AND column_name = ?2",
            params![meta.dataset_id as i64, meta.column],
        )?;
        tx.execute(
            "DELETE FROM highfreq_kmer WHERE dataset_id = ?1 AND column_name = ?2",
            params![meta.dataset_id as i64, meta.column],
        )?;
        tx.execute(
            "INSERT INTO highfreq_meta
                 (dataset_id, column_name, k, occ_bits, max_rate, max_nrow, analyzed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                meta.dataset_id as i64,
                meta.column,
                meta.k as i64,
                meta.occ_bits as i64,
                meta.max_rate,
                meta.max_nrow as i64,
                meta.analyzed_at,
            ],
        )?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO highfreq_kmer (dataset_id, column_name, kmer, nrow)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for &(kmer, nrow) in entries {
                stmt.execute(params![
                    meta.dataset_id as i64,
                    meta.column,
                    kmer as i64,
                    nrow as i64
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// The persisted metadata for `(dataset, column)`, if any.
    pub fn meta_for(&self, dataset_id: u64, column: &str) -> Result<Option<AnalysisMeta>> {
        self.conn
            .query_row(
                "SELECT k, occ_bits, max_rate, max_nrow, analyzed_at
                 FROM highfreq_meta
                 WHERE dataset_id = ?1 AND column_name = ?2",
                params![dataset_id as i64, column],
                |r| {
                    Ok(AnalysisMeta {
                        dataset_id,
                        column: column.to_string(),
                        k: r.get::<_, i64>(0)? as u8,
                        occ_bits: r.get::<_, i64>(1)? as u8,
                        max_rate: r.get(2)?,
                        max_nrow: r.get::<_, i64>(3)? as u64,
                        analyzed_at: r.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    /// One batch of persisted k-mers, ascending, for streaming cache
    /// loads.
    pub fn kmer_batch(
        &self,
        dataset_id: u64,
        column: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<u64>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT kmer FROM highfreq_kmer
             WHERE dataset_id = ?1 AND column_name = ?2
             ORDER BY kmer LIMIT ?3 OFFSET ?4",
        )?;
        let rows = stmt.query_map(
            params![dataset_id as i64, column, limit as i64, offset as i64],
            |r| Ok(r.get::<_, i64>(0)? as u64),
        )?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    /// Tear down the persisted set for `(dataset, column)`. Returns
    /// whether anything was removed.
    pub fn remove(&mut self, dataset_id: u64, column: &str) -> Result<bool> {
        let tx = self.conn.transaction()?;
        let metas = tx.execute(
            "DELETE FROM highfreq_meta WHERE dataset_id = ?1 AND column_name = ?2",
            params![dataset_id as i64, column],
        )?;
        tx.execute(
            "DELETE FROM highfreq_kmer WHERE dataset_id = ?1 AND column_name = ?2",
            params![dataset_id as i64, column],
        )?;
        tx.commit()?;
        Ok(metas > 0)
    }
}

/// Unix seconds now; the catalog's timestamp source.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
