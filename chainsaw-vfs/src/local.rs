use crate::error::VfsError;
use crate::fs::{FileObject, FileSystem};
use crate::uri::VfsUri;
use chainsaw_framework::Credentials;
use memmap2::MmapOptions;
use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
};

/// local files, read through short-lived memory maps
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn scheme(&self) -> &'static str {
        "file"
    }

    fn open(
        &self,
        uri: &VfsUri,
        _credentials: Option<&Credentials>,
    ) -> Result<Box<dyn FileObject>, VfsError> {
        let path = uri.local_path();
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(Box::new(LocalFile { path })),
            Ok(_) => Err(VfsError::Open {
                uri: uri.redacted(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
            }),
            Err(source) => Err(VfsError::Open {
                uri: uri.redacted(),
                source,
            }),
        }
    }
}

/// A local file addressed by path.
///
/// Every read reopens the path, so a file that was deleted and recreated is
/// picked up, and a deleted file reports `NotFound`.
pub struct LocalFile {
    path: PathBuf,
}

impl LocalFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileObject for LocalFile {
    fn size(&mut self) -> io::Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    fn read_range(&mut self, start: u64, end: u64) -> io::Result<Vec<u8>> {
        let file = File::open(&self.path)?;
        // never map past the current end; the file may have shrunk since size()
        let end = end.min(file.metadata()?.len());
        if start >= end {
            return Ok(Vec::new());
        }

        let mmap = unsafe { MmapOptions::new().len(end as usize).map(&file)? };
        let start = (start as usize).min(mmap.len());
        let end = (end as usize).min(mmap.len());
        Ok(mmap[start..end].to_vec())
    }
}
