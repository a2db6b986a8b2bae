// Path record storage
//
// Searches may run for hours and emit millions of records, so records are
// buffered and written out in fixed-size chunk files:
// - <dir>/paths_upto_<N>.txt holds records up to and including record N
// - numbering continues after chunks already in the directory, so several
//   searches can share one directory
// - one record per line, in emission order
// - the remainder is always flushed when the search ends, whatever the
//   reason it ended

pub mod chunks;

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use crate::paths::PathRecord;

pub use chunks::{
    chunk_path, collect_chunk_files, last_chunk_number, read_chunk, read_chunks, CHUNK_PREFIX,
};

/// Default number of records per chunk file
pub const DEFAULT_CHUNK_SIZE: usize = 5000;

/// Destination for emitted path records
///
/// The search engine writes every final record here and calls `flush`
/// exactly once when it stops.
pub trait RecordSink {
    /// Accept one record
    fn write(&mut self, record: PathRecord) -> Result<()>;

    /// Persist anything still buffered
    fn flush(&mut self) -> Result<()>;

    /// Number of records accepted so far
    fn records_written(&self) -> usize;
}

/// Sink that keeps every record in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub records: Vec<PathRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_records(self) -> Vec<PathRecord> {
        self.records
    }
}

impl RecordSink for MemorySink {
    fn write(&mut self, record: PathRecord) -> Result<()> {
        self.records.push(record);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn records_written(&self) -> usize {
        self.records.len()
    }
}

/// Buffered, chunked record store
#[derive(Debug)]
pub struct PathRecordStore {
    dir: PathBuf,
    chunk_size: usize,
    buffer: Vec<PathRecord>,
    // Record number of the last chunk already in `dir` when created
    offset: usize,
    accepted: usize,
    chunks: Vec<PathBuf>,
}

impl PathRecordStore {
    /// Create a store writing into `dir`, creating the directory if needed
    pub fn create(dir: impl Into<PathBuf>, chunk_size: usize) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create record directory {}", dir.display()))?;

        let offset = last_chunk_number(&dir)?;
        if offset > 0 {
            tracing::info!(
                dir = %dir.display(),
                after = offset,
                "appending to existing chunk files"
            );
        }

        let chunk_size = chunk_size.max(1);
        Ok(Self {
            dir,
            chunk_size,
            buffer: Vec::with_capacity(chunk_size),
            offset,
            accepted: 0,
            chunks: Vec::new(),
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Chunk files written so far, in order
    pub fn chunks(&self) -> &[PathBuf] {
        &self.chunks
    }

    /// Records currently held in memory
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn write_chunk(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let upto = self.offset + self.accepted;
        let path = chunk_path(&self.dir, upto);
        let file = File::create(&path)
            .with_context(|| format!("Failed to create chunk file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        for record in &self.buffer {
            writeln!(writer, "{}", record)
                .with_context(|| format!("Failed to write chunk file {}", path.display()))?;
        }
        writer
            .flush()
            .with_context(|| format!("Failed to flush chunk file {}", path.display()))?;

        tracing::info!(path = %path.display(), records = self.buffer.len(), "chunk written");
        self.buffer.clear();
        self.chunks.push(path);
        Ok(())
    }
}

impl RecordSink for PathRecordStore {
    fn write(&mut self, record: PathRecord) -> Result<()> {
        self.buffer.push(record);
        self.accepted += 1;
        if self.buffer.len() >= self.chunk_size {
            self.write_chunk()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.write_chunk()
    }

    fn records_written(&self) -> usize {
        self.accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rec(n: u64) -> PathRecord {
        PathRecord::new(vec![n], vec![Some(n as u32)], 0.5)
    }

    #[test]
    fn test_chunks_rotate_at_chunk_size() {
        let dir = TempDir::new().unwrap();
        let mut store = PathRecordStore::create(dir.path().join("logs"), 2).unwrap();

        for n in 0..5 {
            store.write(rec(n)).unwrap();
        }
        assert_eq!(store.chunks().len(), 2);
        assert_eq!(store.buffered(), 1);

        store.flush().unwrap();
        assert_eq!(store.chunks().len(), 3);
        assert_eq!(store.buffered(), 0);
        assert_eq!(store.records_written(), 5);

        let names: Vec<String> = store
            .chunks()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["paths_upto_2.txt", "paths_upto_4.txt", "paths_upto_5.txt"]
        );
    }

    #[test]
    fn test_flush_writes_remainder_once() {
        let dir = TempDir::new().unwrap();
        let mut store = PathRecordStore::create(dir.path(), DEFAULT_CHUNK_SIZE).unwrap();

        store.write(rec(1)).unwrap();
        store.write(rec(2)).unwrap();
        store.flush().unwrap();
        store.flush().unwrap();

        assert_eq!(store.chunks().len(), 1);
        let text = fs::read_to_string(&store.chunks()[0]).unwrap();
        assert_eq!(text, "1->(1->) : 0.5\n2->(2->) : 0.5\n");
    }

    #[test]
    fn test_second_store_continues_numbering() {
        let dir = TempDir::new().unwrap();

        let mut first = PathRecordStore::create(dir.path(), 2).unwrap();
        for n in 0..4 {
            first.write(rec(n)).unwrap();
        }
        first.flush().unwrap();

        let mut second = PathRecordStore::create(dir.path(), 2).unwrap();
        for n in 10..13 {
            second.write(rec(n)).unwrap();
        }
        second.flush().unwrap();
        assert_eq!(second.records_written(), 3);

        let files = collect_chunk_files(&[dir.path().to_path_buf()]).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "paths_upto_2.txt",
                "paths_upto_4.txt",
                "paths_upto_6.txt",
                "paths_upto_7.txt"
            ]
        );
        let total: usize = read_chunks(&files).unwrap().iter().map(Vec::len).sum();
        assert_eq!(total, 7);
    }

    #[test]
    fn test_empty_store_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut store = PathRecordStore::create(dir.path(), 10).unwrap();
        store.flush().unwrap();
        assert!(store.chunks().is_empty());
    }

    #[test]
    fn test_memory_sink() {
        let mut sink = MemorySink::new();
        sink.write(rec(1)).unwrap();
        sink.flush().unwrap();
        assert_eq!(sink.records_written(), 1);
        assert_eq!(sink.into_records(), vec![rec(1)]);
    }
}
