//! Reading chunk files back for post-hoc selection

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths::PathRecord;

/// File name prefix of chunk files
pub const CHUNK_PREFIX: &str = "paths_upto_";

/// Path of the chunk file ending at record `upto`
pub fn chunk_path(dir: &Path, upto: usize) -> PathBuf {
    dir.join(format!("{}{}.txt", CHUNK_PREFIX, upto))
}

fn chunk_number(path: &Path) -> Option<usize> {
    path.file_name()?
        .to_str()?
        .strip_prefix(CHUNK_PREFIX)?
        .strip_suffix(".txt")?
        .parse()
        .ok()
}

/// Chunk files in `dir` with their record numbers, in record order
fn list_chunks(dir: &Path) -> Result<Vec<(usize, PathBuf)>> {
    let mut chunks: Vec<(usize, PathBuf)> = fs::read_dir(dir)
        .with_context(|| format!("Failed to list directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter_map(|path| chunk_number(&path).map(|n| (n, path)))
        .collect();
    chunks.sort();
    Ok(chunks)
}

/// Highest record number among the chunk files in `dir` (0 if none)
pub fn last_chunk_number(dir: &Path) -> Result<usize> {
    Ok(list_chunks(dir)?.last().map_or(0, |(n, _)| *n))
}

/// Read all records of one chunk file, in file order
///
/// Lines that are not records are skipped.
pub fn read_chunk(path: &Path) -> Result<Vec<PathRecord>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read chunk file {}", path.display()))?;

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match PathRecord::parse(line) {
            Some(record) => records.push(record),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        tracing::debug!(path = %path.display(), skipped, "skipped non-record lines");
    }
    Ok(records)
}

/// Expand inputs into an ordered list of chunk files
///
/// Directories contribute their `paths_upto_*.txt` files ordered by record
/// number; plain files are taken as given.
pub fn collect_chunk_files(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for input in inputs {
        if input.is_dir() {
            files.extend(list_chunks(input)?.into_iter().map(|(_, path)| path));
        } else if input.is_file() {
            files.push(input.clone());
        } else {
            anyhow::bail!("Input not found: {}", input.display());
        }
    }

    Ok(files)
}

/// Read every record from a list of chunk files, grouped per file
pub fn read_chunks(files: &[PathBuf]) -> Result<Vec<Vec<PathRecord>>> {
    files.iter().map(|path| read_chunk(path)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_chunk_path() {
        let path = chunk_path(Path::new("logs"), 5000);
        assert_eq!(path, PathBuf::from("logs/paths_upto_5000.txt"));
        assert_eq!(chunk_number(&path), Some(5000));
        assert_eq!(chunk_number(Path::new("logs/rare_paths.txt")), None);
    }

    #[test]
    fn test_read_chunk_skips_noise() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("paths_upto_2.txt");
        fs::write(&path, "1->2->(10->12->) : 0.75\n\nnot a record\n1->3->(10->13->) : 0.25\n").unwrap();

        let records = read_chunk(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].nodes, vec![1, 3]);
    }

    #[test]
    fn test_collect_orders_by_record_number() {
        let dir = TempDir::new().unwrap();
        for n in [10000, 5000, 12] {
            fs::write(chunk_path(dir.path(), n), "").unwrap();
        }
        fs::write(dir.path().join("rare_paths.txt"), "").unwrap();

        let files = collect_chunk_files(&[dir.path().to_path_buf()]).unwrap();
        let numbers: Vec<usize> = files.iter().filter_map(|f| chunk_number(f)).collect();
        assert_eq!(numbers, vec![12, 5000, 10000]);
    }

    #[test]
    fn test_collect_missing_input_fails() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(collect_chunk_files(&[missing]).is_err());
    }
}
