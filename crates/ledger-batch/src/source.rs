//! Lazy reader over a delimited input file
//!
//! A [`RecordSource`] yields one [`RawRecord`] per data line, skipping the
//! header. Record lengths are not checked here; arity belongs to the mapper.

use std::path::{Path, PathBuf};

use csv_async::{AsyncReader, AsyncReaderBuilder, ByteRecord, ErrorKind};
use tokio::fs::File;

use crate::error::{PipelineError, RecordError};

/// One data line, fields in file order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// 1-based physical line number in the file
    pub line: u64,
    /// 1-based ordinal among data records (the header is not counted)
    pub index: u64,
    pub fields: Vec<String>,
}

impl RawRecord {
    pub fn is_first(&self) -> bool {
        self.index == 1
    }
}

/// Outcome of reading one record: undecodable lines surface as a record error
pub type SourceRead = Result<RawRecord, RecordError>;

pub struct RecordSource {
    path: PathBuf,
    reader: AsyncReader<File>,
    buffer: ByteRecord,
    index: u64,
}

impl RecordSource {
    /// Open `path` for a fresh pass from the first data line.
    pub async fn open(path: impl AsRef<Path>, delimiter: u8) -> Result<Self, PipelineError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .await
            .map_err(|e| PipelineError::SourceUnavailable {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        let reader = AsyncReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .create_reader(file);

        Ok(Self {
            path,
            reader,
            buffer: ByteRecord::new(),
            index: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next record, or `None` at end of file.
    ///
    /// An I/O failure mid-file makes the source unavailable; a line that is
    /// not valid UTF-8 becomes a malformed record and reading continues.
    pub async fn next(&mut self) -> Result<Option<SourceRead>, PipelineError> {
        let more = match self.reader.read_byte_record(&mut self.buffer).await {
            Ok(more) => more,
            Err(err) => {
                if let ErrorKind::Io(io) = err.kind() {
                    return Err(PipelineError::SourceUnavailable {
                        path: self.path.display().to_string(),
                        reason: io.to_string(),
                    });
                }
                self.index += 1;
                let line = err.position().map(|p| p.line()).unwrap_or(0);
                return Ok(Some(Err(RecordError::MalformedRecord {
                    line,
                    reason: err.to_string(),
                })));
            },
        };

        if !more {
            return Ok(None);
        }

        self.index += 1;
        let line = self.buffer.position().map(|p| p.line()).unwrap_or(self.index + 1);

        let mut fields = Vec::with_capacity(self.buffer.len());
        for (column, raw) in self.buffer.iter().enumerate() {
            match std::str::from_utf8(raw) {
                Ok(value) => fields.push(value.to_string()),
                Err(e) => {
                    return Ok(Some(Err(RecordError::MalformedRecord {
                        line,
                        reason: format!("column {} is not valid UTF-8: {e}", column + 1),
                    })));
                },
            }
        }

        Ok(Some(Ok(RawRecord {
            line,
            index: self.index,
            fields,
        })))
    }
}
