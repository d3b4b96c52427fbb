//! Remote files over SFTP.

use crate::error::VfsError;
use crate::fs::{FileObject, FileSystem};
use crate::uri::VfsUri;
use chainsaw_framework::Credentials;
use ssh2::{Session, Sftp};
use std::{
    io::{self, Read, Seek, SeekFrom},
    net::TcpStream,
    path::PathBuf,
    time::Duration,
};

const DEFAULT_PORT: u16 = 22;
const SESSION_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SftpFileSystem {
    timeout: Duration,
}

impl SftpFileSystem {
    pub fn new() -> Self {
        Self {
            timeout: SESSION_TIMEOUT,
        }
    }

    fn connect(&self, uri: &VfsUri, credentials: Option<&Credentials>) -> Result<Session, VfsError> {
        let host = uri
            .host()
            .ok_or_else(|| VfsError::InvalidUri(uri.redacted()))?;
        let port = uri.port().unwrap_or(DEFAULT_PORT);
        let open_error = |source: io::Error| VfsError::Open {
            uri: uri.redacted(),
            source,
        };
        let auth_error = |e: ssh2::Error| VfsError::Auth {
            uri: uri.redacted(),
            reason: e.to_string(),
        };

        let tcp = TcpStream::connect((host, port)).map_err(open_error)?;
        let mut session = Session::new().map_err(|e| open_error(e.into()))?;
        session.set_timeout(self.timeout.as_millis() as u32);
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| open_error(e.into()))?;

        match credentials {
            Some(creds) => session
                .userauth_password(&creds.username, creds.secret())
                .map_err(auth_error)?,
            None => {
                let user = uri
                    .user()
                    .ok_or_else(|| VfsError::MissingCredentials(uri.redacted()))?;
                session.userauth_agent(user).map_err(auth_error)?;
            }
        }

        if !session.authenticated() {
            return Err(VfsError::Auth {
                uri: uri.redacted(),
                reason: "server rejected the credentials".to_string(),
            });
        }
        Ok(session)
    }
}

impl Default for SftpFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for SftpFileSystem {
    fn scheme(&self) -> &'static str {
        "sftp"
    }

    fn requires_credentials(&self) -> bool {
        true
    }

    fn open(
        &self,
        uri: &VfsUri,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn FileObject>, VfsError> {
        let session = self.connect(uri, credentials)?;
        let sftp = session.sftp().map_err(|e| VfsError::Open {
            uri: uri.redacted(),
            source: e.into(),
        })?;
        let path = PathBuf::from(uri.path());
        sftp.stat(&path).map_err(|e| VfsError::Open {
            uri: uri.redacted(),
            source: e.into(),
        })?;

        log::debug!("SftpFileSystem: opened {}", uri.redacted());
        Ok(Box::new(SftpFile {
            session: Some(session),
            sftp: Some(sftp),
            path,
        }))
    }
}

/// a remote file on an authenticated SFTP session
pub struct SftpFile {
    session: Option<Session>,
    sftp: Option<Sftp>,
    path: PathBuf,
}

impl SftpFile {
    fn sftp(&self) -> io::Result<&Sftp> {
        self.sftp
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "sftp session closed"))
    }
}

impl FileObject for SftpFile {
    fn size(&mut self) -> io::Result<u64> {
        let stat = self.sftp()?.stat(&self.path)?;
        Ok(stat.size.unwrap_or(0))
    }

    fn read_range(&mut self, start: u64, end: u64) -> io::Result<Vec<u8>> {
        if start >= end {
            return Ok(Vec::new());
        }
        let mut file = self.sftp()?.open(&self.path)?;
        file.seek(SeekFrom::Start(start))?;
        let mut bytes = Vec::with_capacity((end - start) as usize);
        file.take(end - start).read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn close(&mut self) {
        self.sftp = None;
        if let Some(session) = self.session.take()
            && let Err(e) = session.disconnect(None, "closing", None)
        {
            log::debug!("SftpFile: disconnect failed: {}", e);
        }
    }
}
