//! Report Loader Module
//!
//! This module reads DMARC report documents from plain XML files, GZIP files and ZIP
//! archives. It enforces the limits from [`Config`]: input file size, decompressed
//! size (checked against the bytes actually produced, not just archive headers), entry
//! count, compression ratio, entry name length and path traversal in entry names.
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use zip::ZipArchive;
use flate2::read::GzDecoder;
use crate::config::Config;
use crate::error::{DmarcError, Result};
use crate::models::Feedback;
use crate::xml_parser::parse_feedback;

/// Reads every report document stored at `file_path`.
///
/// The file type is chosen by extension: `.xml`, `.gz` or `.zip`.
pub fn extract_reports<P: AsRef<Path>>(file_path: P, config: &Config) -> Result<Vec<Vec<u8>>> {
    let path = file_path.as_ref();
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();
    if file_size > config.max_file_size as u64 {
        return Err(DmarcError::FileTooLarge(format!(
            "File size {} bytes exceeds limit of {} bytes",
            file_size, config.max_file_size
        )));
    }
    let ext = path
        .extension()
        .map(|x| x.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    log::debug!("Reading {} as .{} source", path.display(), ext);
    match ext.as_str() {
        "zip" => extract_zip(file, config),
        "gz" => {
            let contents = read_limited(GzDecoder::new(BufReader::new(file)), config.max_decompressed_size)?;
            Ok(vec![contents])
        }
        "xml" => {
            let contents = read_limited(BufReader::new(file), config.max_file_size)?;
            Ok(vec![contents])
        }
        _ => Err(DmarcError::UnsupportedFile(format!(
            "Unsupported file extension: {:?}",
            ext
        ))),
    }
}

/// Reads and parses every report at `file_path`.
///
/// A document that fails to parse is logged and skipped so one malformed report does
/// not hide the others. If no document parses, the last parse error is returned.
pub fn load_feedback<P: AsRef<Path>>(file_path: P, config: &Config) -> Result<Vec<Feedback>> {
    let path = file_path.as_ref();
    let documents = extract_reports(path, config)?;
    let total = documents.len();
    let mut reports = Vec::with_capacity(total);
    let mut last_error = None;
    for (index, document) in documents.iter().enumerate() {
        match parse_feedback(document) {
            Ok(feedback) => reports.push(feedback),
            Err(e) => {
                log::warn!(
                    "Skipping report {}/{} in {}: {}",
                    index + 1,
                    total,
                    path.display(),
                    e
                );
                last_error = Some(e);
            }
        }
    }
    match last_error {
        Some(e) if reports.is_empty() => Err(e),
        _ => Ok(reports),
    }
}

fn extract_zip(file: File, config: &Config) -> Result<Vec<Vec<u8>>> {
    let mut archive = ZipArchive::new(BufReader::new(file))?;
    if archive.len() > config.max_files_in_zip {
        return Err(DmarcError::Format(format!(
            "Too many files in archive: {}",
            archive.len()
        )));
    }
    let mut extracted = Vec::new();
    let mut budget = config.max_decompressed_size;
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        if name.contains("..") || name.starts_with('/') || name.starts_with('\\') {
            return Err(DmarcError::Format(format!(
                "Path traversal attempt detected: {}",
                name
            )));
        }
        if name.len() > config.max_filename_length {
            return Err(DmarcError::Format("Filename too long".to_string()));
        }
        if entry.is_dir() {
            continue;
        }
        let compressed_size = entry.compressed_size();
        let uncompressed_size = entry.size();
        if compressed_size > 0 {
            let compression_ratio = uncompressed_size as f64 / compressed_size as f64;
            if compression_ratio > config.max_compression_ratio {
                return Err(DmarcError::Format(format!(
                    "Suspicious compression ratio: {:.2}",
                    compression_ratio
                )));
            }
        }
        if uncompressed_size > budget as u64 {
            return Err(DmarcError::FileTooLarge(
                "Total decompressed size too large".to_string(),
            ));
        }
        let contents = read_limited(entry, budget)?;
        budget -= contents.len();
        extracted.push(contents);
    }
    Ok(extracted)
}

/// Reads at most `limit` bytes, failing if the source holds more.
fn read_limited<R: Read>(source: R, limit: usize) -> Result<Vec<u8>> {
    let mut contents = Vec::new();
    source.take(limit as u64 + 1).read_to_end(&mut contents)?;
    if contents.len() > limit {
        return Err(DmarcError::FileTooLarge(format!(
            "Decompressed size exceeds limit of {} bytes",
            limit
        )));
    }
    Ok(contents)
}
