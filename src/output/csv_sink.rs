//! Append-only CSV dataset
//!
//! The header comes from the first batch ever written. A later batch carrying
//! new fields widens it: the file is rewritten with the extra columns appended
//! and older rows padded, so no upstream field is lost. Missing fields are empty.

use crate::catalog::ProductRecord;
use crate::output::SinkError;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Destination of emitted product rows
pub trait Sink {
    /// Appends records durably; returns how many rows were written
    ///
    /// Data must be on disk when this returns, since the checkpoint saved right
    /// after it assumes so.
    fn append(&mut self, records: &[ProductRecord]) -> Result<usize, SinkError>;

    /// Ids of every product already in the dataset
    fn existing_ids(&self) -> Result<Vec<String>, SinkError>;
}

/// CSV file opened in append mode
#[derive(Debug)]
pub struct CsvSink {
    path: PathBuf,
    header: Option<Vec<String>>,
}

impl CsvSink {
    /// Opens (without creating) the dataset at `path`
    ///
    /// An existing non-empty file keeps its header.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        let header = read_header(&path)?;
        if let Some(header) = &header {
            tracing::debug!("Dataset {} has {} columns", path.display(), header.len());
        }
        Ok(Self { path, header })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> Option<&[String]> {
        self.header.as_deref()
    }
}

impl Sink for CsvSink {
    fn append(&mut self, records: &[ProductRecord]) -> Result<usize, SinkError> {
        if records.is_empty() {
            return Ok(0);
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let header = match self.header.take() {
            None => {
                let header = header_from(&[], records);
                write_header(&self.path, &header)?;
                tracing::info!(
                    "Created dataset {} with {} columns",
                    self.path.display(),
                    header.len()
                );
                header
            }
            Some(header) => {
                let widened = header_from(&header, records);
                if widened.len() > header.len() {
                    if let Err(e) = widen_file(&self.path, &widened) {
                        self.header = Some(header);
                        return Err(e);
                    }
                    tracing::info!(
                        "Dataset {} widened with new columns {:?}",
                        self.path.display(),
                        &widened[header.len()..]
                    );
                }
                widened
            }
        };
        self.header = Some(header);
        let header = self.header.as_deref().unwrap_or_default();

        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        for record in records {
            let row: Vec<&str> = header
                .iter()
                .map(|column| record.get(column).unwrap_or(""))
                .collect();
            writer.write_record(&row)?;
        }
        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| SinkError::Io(io::Error::new(e.error().kind(), e.error().to_string())))?;
        file.sync_all()?;

        Ok(records.len())
    }

    fn existing_ids(&self) -> Result<Vec<String>, SinkError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(BufReader::new(file));

        let Some(id_column) = reader.headers()?.iter().position(|h| h == "id") else {
            tracing::warn!("Dataset {} has no id column", self.path.display());
            return Ok(Vec::new());
        };

        let mut ids = Vec::new();
        for row in reader.records() {
            if let Some(id) = row?.get(id_column) {
                if !id.is_empty() {
                    ids.push(id.to_string());
                }
            }
        }
        Ok(ids)
    }
}

/// `existing` followed by the batch's unseen columns in first-seen order
fn header_from(existing: &[String], records: &[ProductRecord]) -> Vec<String> {
    let mut seen: HashSet<&str> = existing.iter().map(String::as_str).collect();
    let mut added = Vec::new();
    for column in records.iter().flat_map(ProductRecord::columns) {
        if seen.insert(column) {
            added.push(column.to_string());
        }
    }
    let mut header = existing.to_vec();
    header.extend(added);
    header
}

/// Creates (or truncates) the dataset with just a header row
fn write_header(path: &Path, header: &[String]) -> Result<(), SinkError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(header)?;
    writer.flush()?;
    Ok(())
}

/// Rewrites the dataset under a wider header, padding old rows with empty cells
///
/// The copy is built next to the dataset, synced, then renamed over it.
fn widen_file(path: &Path, header: &[String]) -> Result<(), SinkError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(BufReader::new(File::open(path)?));
        let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
        writer.write_record(header)?;
        for row in reader.records() {
            let row = row?;
            let padded = (0..header.len()).map(|i| row.get(i).unwrap_or(""));
            writer.write_record(padded)?;
        }
        writer.flush()?;
    }
    tmp.as_file_mut().sync_all()?;
    tmp.persist(path).map_err(|e| SinkError::Io(e.error))?;
    Ok(())
}

fn read_header(path: &Path) -> Result<Option<Vec<String>>, SinkError> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => {}
        Ok(_) => return Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(BufReader::new(File::open(path)?));
    let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    Ok(Some(header))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(id: &str, fields: &[(&str, &str)]) -> ProductRecord {
        let mut all = vec![("id".to_string(), id.to_string())];
        all.extend(fields.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        ProductRecord {
            id: id.to_string(),
            fields: all,
        }
    }

    #[test]
    fn test_header_written_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("products.csv");
        let mut sink = CsvSink::open(&path).unwrap();

        sink.append(&[record("1", &[("name", "Apple")])]).unwrap();
        sink.append(&[record("2", &[("name", "Pear")])]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "id,name\n1,Apple\n2,Pear\n");
    }

    #[test]
    fn test_header_covers_first_batch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("products.csv");
        let mut sink = CsvSink::open(&path).unwrap();

        sink.append(&[
            record("1", &[("name", "Apple")]),
            record("2", &[("brand", "Acme"), ("name", "Pear")]),
        ])
        .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "id,name,brand\n1,Apple,\n2,Pear,Acme\n");
    }

    #[test]
    fn test_new_fields_widen_the_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("products.csv");
        let mut sink = CsvSink::open(&path).unwrap();
        sink.append(&[record("1", &[])]).unwrap();

        // Reopen as a new run would
        let mut sink = CsvSink::open(&path).unwrap();
        assert_eq!(sink.header().unwrap(), &["id"]);
        sink.append(&[record("2", &[("price", "9.99")])]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "id,price\n1,\n2,9.99\n");
        assert_eq!(sink.header().unwrap(), &["id", "price"]);
        assert_eq!(sink.existing_ids().unwrap(), vec!["1", "2"]);
    }

    #[test]
    fn test_missing_fields_stay_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("products.csv");
        let mut sink = CsvSink::open(&path).unwrap();
        sink.append(&[record("1", &[("name", "Apple"), ("price", "1.2")])])
            .unwrap();
        sink.append(&[record("2", &[("name", "Pear"), ("promo", "yes")])])
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "id,name,price,promo\n1,Apple,1.2,\n2,Pear,,yes\n"
        );
    }

    #[test]
    fn test_existing_ids() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("products.csv");
        let sink = CsvSink::open(&path).unwrap();
        assert!(sink.existing_ids().unwrap().is_empty());

        fs::write(&path, "name,id\n\"Apple, red\",10\nPear,11\n").unwrap();
        let sink = CsvSink::open(&path).unwrap();
        assert_eq!(sink.existing_ids().unwrap(), vec!["10", "11"]);
    }

    #[test]
    fn test_empty_batch_creates_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("products.csv");
        let mut sink = CsvSink::open(&path).unwrap();
        assert_eq!(sink.append(&[]).unwrap(), 0);
        assert!(!path.exists());
    }
}
