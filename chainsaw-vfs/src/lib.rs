// chainsaw-vfs - virtual file systems and file tailing for chainsaw
//
// This crate provides the TailingSource line source plus the pluggable file
// systems it reads through: local files (memory-mapped ranged reads) and, with
// the `sftp` feature, remote files over SFTP.

mod error;
mod fs;
mod local;
#[cfg(feature = "sftp")]
mod sftp;
mod tail;
mod uri;

pub use error::VfsError;
pub use fs::{FileObject, FileSystem, VfsManager};
pub use local::{LocalFile, LocalFileSystem};
#[cfg(feature = "sftp")]
pub use sftp::{SftpFile, SftpFileSystem};
pub use tail::{Cursor, TailingSource};
pub use uri::{VfsUri, redact};
