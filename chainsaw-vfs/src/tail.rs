use crate::error::VfsError;
use crate::fs::{FileObject, VfsManager};
use crate::uri::VfsUri;
use chainsaw_framework::{ConnectionConfig, Credentials, LineSource, PollBatch, SourceError};
use std::sync::Arc;

/// read position within the tailed file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    /// bytes consumed so far; always at a line boundary while tailing
    pub file_pointer: u64,
    /// size observed by the last successful poll
    pub last_known_size: u64,
}

/// Tails a file resolved through the [`VfsManager`], delivering complete lines.
///
/// Growth is read as a byte range from the cursor to the current end. A size
/// below the last known size means the file rotated: the cursor resets and the
/// next poll re-reads from the start.
pub struct TailingSource {
    name: String,
    uri: VfsUri,
    credentials: Option<Credentials>,
    vfs: Arc<VfsManager>,
    tailing: bool,
    file: Option<Box<dyn FileObject>>,
    cursor: Cursor,
}

impl TailingSource {
    pub fn new(
        name: impl Into<String>,
        config: &ConnectionConfig,
        vfs: Arc<VfsManager>,
    ) -> Result<Self, VfsError> {
        let uri = VfsUri::parse(&config.uri)?;
        Ok(Self {
            name: name.into(),
            credentials: config.credentials.clone(),
            uri,
            vfs,
            tailing: config.tailing,
            file: None,
            cursor: Cursor::default(),
        })
    }

    pub fn uri(&self) -> &VfsUri {
        &self.uri
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// a single pass has read everything; a tail may still get the rest of its last record
    fn batch(&self, lines: Vec<String>) -> PollBatch {
        if self.tailing {
            PollBatch::new(lines)
        } else {
            PollBatch::end_of_data(lines)
        }
    }

    fn split_lines(&self, bytes: &[u8]) -> (Vec<String>, usize) {
        // while tailing, a trailing partial line stays unconsumed until its newline arrives
        let consumed = if self.tailing {
            bytes
                .iter()
                .rposition(|b| *b == b'\n')
                .map_or(0, |last_newline| last_newline + 1)
        } else {
            bytes.len()
        };

        let mut pieces: Vec<&[u8]> = bytes[..consumed].split(|b| *b == b'\n').collect();
        // the piece after a final newline is empty
        if pieces.last().is_some_and(|piece| piece.is_empty()) {
            pieces.pop();
        }

        let lines = pieces
            .into_iter()
            .map(|line| {
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                String::from_utf8_lossy(line).into_owned()
            })
            .collect();
        (lines, consumed)
    }
}

impl LineSource for TailingSource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn open(&mut self) -> Result<(), SourceError> {
        if self.file.is_some() {
            return Ok(());
        }
        let file = self.vfs.open(&self.uri, self.credentials.as_ref())?;
        log::info!(
            "TailingSource: opened {} at offset {}",
            self.uri.redacted(),
            self.cursor.file_pointer
        );
        self.file = Some(file);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut file) = self.file.take() {
            file.close();
            log::debug!("TailingSource: closed {}", self.uri.redacted());
        }
    }

    fn poll_lines(&mut self) -> Result<PollBatch, SourceError> {
        let file = self.file.as_mut().ok_or(SourceError::StreamClosed)?;
        let size = file.size().map_err(SourceError::from_poll_io)?;

        if size < self.cursor.last_known_size || size < self.cursor.file_pointer {
            log::info!(
                "TailingSource: {} shrank from {} to {} bytes, re-reading from start",
                self.uri.redacted(),
                self.cursor.last_known_size,
                size
            );
            self.cursor = Cursor::default();
            return Ok(self.batch(Vec::new()));
        }

        if size == self.cursor.file_pointer {
            self.cursor.last_known_size = size;
            return Ok(self.batch(Vec::new()));
        }

        let bytes = file
            .read_range(self.cursor.file_pointer, size)
            .map_err(SourceError::from_poll_io)?;
        let (lines, consumed) = self.split_lines(&bytes);

        self.cursor.file_pointer += consumed as u64;
        self.cursor.last_known_size = size;
        log::debug!(
            "TailingSource: read {} lines from {}, cursor at {}",
            lines.len(),
            self.uri.redacted(),
            self.cursor.file_pointer
        );
        Ok(self.batch(lines))
    }
}

impl Drop for TailingSource {
    fn drop(&mut self) {
        self.close();
    }
}
