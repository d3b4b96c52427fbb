//! File system abstraction: resolve a URI to a sized, range-readable object.

use crate::error::VfsError;
use crate::local::LocalFileSystem;
use crate::uri::VfsUri;
use chainsaw_framework::Credentials;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;

/// an opened file that can report its size and read byte ranges
pub trait FileObject: Send {
    /// current size in bytes
    fn size(&mut self) -> io::Result<u64>;

    /// read bytes `start..end`; may return fewer if the file shrank meanwhile
    fn read_range(&mut self, start: u64, end: u64) -> io::Result<Vec<u8>>;

    /// release the underlying handle; idempotent
    fn close(&mut self) {}
}

/// a transport for one URI scheme
pub trait FileSystem: Send + Sync {
    fn scheme(&self) -> &'static str;

    /// whether opening needs a username and secret
    fn requires_credentials(&self) -> bool {
        false
    }

    fn open(
        &self,
        uri: &VfsUri,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn FileObject>, VfsError>;
}

/// registry of file systems keyed by URI scheme
pub struct VfsManager {
    file_systems: HashMap<&'static str, Arc<dyn FileSystem>>,
}

impl VfsManager {
    /// an empty registry
    pub fn new() -> Self {
        Self {
            file_systems: HashMap::new(),
        }
    }

    /// `file`, plus `sftp` when built with the `sftp` feature
    pub fn with_defaults() -> Self {
        let mut manager = Self::new();
        manager.register(Arc::new(LocalFileSystem));
        #[cfg(feature = "sftp")]
        manager.register(Arc::new(crate::sftp::SftpFileSystem::new()));
        manager
    }

    pub fn register(&mut self, file_system: Arc<dyn FileSystem>) {
        log::debug!("VfsManager: registered scheme '{}'", file_system.scheme());
        self.file_systems.insert(file_system.scheme(), file_system);
    }

    pub fn schemes(&self) -> Vec<&'static str> {
        let mut schemes: Vec<_> = self.file_systems.keys().copied().collect();
        schemes.sort_unstable();
        schemes
    }

    pub fn resolve(&self, uri: &VfsUri) -> Result<Arc<dyn FileSystem>, VfsError> {
        self.file_systems
            .get(uri.scheme())
            .cloned()
            .ok_or_else(|| VfsError::UnsupportedScheme(uri.scheme().to_string()))
    }

    /// whether `uri` names a scheme that needs credentials; unparsable URIs do not
    pub fn requires_credentials(&self, uri: &str) -> bool {
        VfsUri::parse(uri)
            .ok()
            .and_then(|uri| self.resolve(&uri).ok())
            .is_some_and(|fs| fs.requires_credentials())
    }

    pub fn open(
        &self,
        uri: &VfsUri,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn FileObject>, VfsError> {
        let file_system = self.resolve(uri)?;
        let credentials = credentials.or(uri.embedded_credentials());
        if file_system.requires_credentials() && credentials.is_none() && uri.user().is_none() {
            return Err(VfsError::MissingCredentials(uri.redacted()));
        }
        file_system.open(uri, credentials)
    }
}

impl Default for VfsManager {
    fn default() -> Self {
        Self::with_defaults()
    }
}
