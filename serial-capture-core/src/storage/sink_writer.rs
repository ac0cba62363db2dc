use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::models::error::CaptureError;
use crate::processing::line_framer::CapturedLine;
use crate::storage::naming::SinkPaths;

/// Header row of the vars sink.
pub const VARS_HEADER: &str = "ts_utc,line";

/// Append-only line writer for one sink file.
///
/// Every line is flushed before `write_line` returns so that a crash or a
/// forced stop never loses a line that was already received.
#[derive(Debug)]
pub struct SinkWriter {
    file_path: PathBuf,
    file: Option<File>,
    total_bytes_written: u64,
    lines_written: u64,
}

impl SinkWriter {
    pub fn new(file_path: PathBuf) -> Self {
        Self {
            file_path,
            file: None,
            total_bytes_written: 0,
            lines_written: 0,
        }
    }

    /// Create the parent directory if needed and open the file for append.
    pub fn open(&mut self) -> Result<(), CaptureError> {
        if self.file.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    CaptureError::StorageError(format!(
                        "failed to create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
            .map_err(|e| {
                CaptureError::StorageError(format!(
                    "failed to open {}: {}",
                    self.file_path.display(),
                    e
                ))
            })?;

        self.file = Some(file);
        Ok(())
    }

    /// Append `line` plus a newline and flush.
    pub fn write_line(&mut self, line: &str) -> Result<(), CaptureError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| CaptureError::StorageError("file is not open for writing".into()))?;

        let mut record = String::with_capacity(line.len() + 1);
        record.push_str(line);
        record.push('\n');

        file.write_all(record.as_bytes())
            .map_err(|e| CaptureError::StorageError(format!("write failed: {}", e)))?;
        file.flush()
            .map_err(|e| CaptureError::StorageError(format!("flush failed: {}", e)))?;

        self.total_bytes_written += record.len() as u64;
        self.lines_written += 1;
        Ok(())
    }

    /// Sync and release the file handle. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<(), CaptureError> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        file.sync_all()
            .map_err(|e| CaptureError::StorageError(format!("sync failed: {}", e)))
    }

    /// Whether the file on disk has no content yet.
    pub fn is_empty_file(&self) -> Result<bool, CaptureError> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| CaptureError::StorageError("file is not open".into()))?;
        let metadata = file.metadata().map_err(|e| {
            CaptureError::StorageError(format!("failed to stat {}: {}", self.file_path.display(), e))
        })?;
        Ok(metadata.len() == 0)
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Bytes appended through this writer (not counting earlier content).
    pub fn bytes_written(&self) -> u64 {
        self.total_bytes_written
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }
}

/// The text and vars sinks of a session, opened and closed together.
#[derive(Debug)]
pub struct CaptureSinks {
    text: SinkWriter,
    vars: SinkWriter,
}

impl CaptureSinks {
    /// Open both sinks, writing the vars header if that file is new.
    ///
    /// If anything fails, whatever was already opened is closed again.
    pub fn open(paths: &SinkPaths) -> Result<Self, CaptureError> {
        let mut text = SinkWriter::new(paths.text.clone());
        let mut vars = SinkWriter::new(paths.vars.clone());

        text.open()?;
        let opened = vars.open().and_then(|_| {
            if vars.is_empty_file()? {
                vars.write_line(VARS_HEADER)?;
            }
            Ok(())
        });
        if let Err(e) = opened {
            let _ = vars.close();
            let _ = text.close();
            return Err(e);
        }

        Ok(Self { text, vars })
    }

    /// Append one captured line to the text sink, then the vars sink.
    ///
    /// A failed text write leaves both sinks untouched. A failed vars write
    /// after a good text write is reported as such, since the line is then
    /// only in the text sink.
    pub fn write(&mut self, line: &CapturedLine) -> Result<(), CaptureError> {
        self.text
            .write_line(&line.text_line())
            .map_err(|e| CaptureError::StorageError(format!("line dropped: {}", e)))?;
        self.vars.write_line(&line.vars_row()).map_err(|e| {
            CaptureError::StorageError(format!(
                "line kept in {} but missing from {}: {}",
                self.text.file_path().display(),
                self.vars.file_path().display(),
                e
            ))
        })
    }

    /// Close both sinks, attempting the second even if the first fails.
    pub fn close(&mut self) -> Result<(), CaptureError> {
        let text = self.text.close();
        let vars = self.vars.close();
        text.and(vars)
    }
}

/// Compute SHA-256 hex digest of a file.
pub fn sha256_file(path: &Path) -> Result<String, CaptureError> {
    let data = fs::read(path).map_err(|e| {
        CaptureError::StorageError(format!("failed to read file for checksum: {}", e))
    })?;
    let digest = Sha256::digest(&data);
    Ok(hex_encode(&digest))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
