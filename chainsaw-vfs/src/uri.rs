use crate::error::VfsError;
use chainsaw_framework::Credentials;
use std::fmt;
use std::path::PathBuf;

/// a parsed `scheme://[user[:password]@]host[:port]/path` or a bare local path
#[derive(Debug, Clone, PartialEq)]
pub struct VfsUri {
    scheme: String,
    user: Option<String>,
    /// username and password embedded in the URI
    embedded: Option<Credentials>,
    host: Option<String>,
    port: Option<u16>,
    path: String,
}

impl VfsUri {
    pub fn parse(text: &str) -> Result<Self, VfsError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(VfsError::InvalidUri(text.to_string()));
        }

        let Some((scheme, rest)) = text.split_once("://") else {
            return Ok(Self::local(text));
        };
        let scheme = scheme.to_ascii_lowercase();
        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c)) {
            return Err(VfsError::InvalidUri(redact(text)));
        }

        if scheme == "file" {
            // file:///var/log/app.log and file://localhost/var/log/app.log
            let path = rest.strip_prefix("localhost").unwrap_or(rest);
            if path.is_empty() {
                return Err(VfsError::InvalidUri(text.to_string()));
            }
            return Ok(Self {
                scheme,
                ..Self::local(path)
            });
        }

        let (authority, path) = match rest.find('/') {
            Some(slash) => (&rest[..slash], &rest[slash..]),
            None => (rest, "/"),
        };
        let (userinfo, hostport) = match authority.rfind('@') {
            Some(at) => (Some(&authority[..at]), &authority[at + 1..]),
            None => (None, authority),
        };
        let (host, port) = match hostport.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| VfsError::InvalidUri(redact(text)))?;
                (host, Some(port))
            }
            None => (hostport, None),
        };
        if host.is_empty() {
            return Err(VfsError::InvalidUri(redact(text)));
        }

        let (user, embedded) = match userinfo {
            Some(info) => match info.split_once(':') {
                Some((user, password)) => (
                    Some(user.to_string()),
                    Some(Credentials::new(user, password)),
                ),
                None => (Some(info.to_string()), None),
            },
            None => (None, None),
        };

        Ok(Self {
            scheme,
            user: user.filter(|u| !u.is_empty()),
            embedded,
            host: Some(host.to_string()),
            port,
            path: path.to_string(),
        })
    }

    fn local(path: &str) -> Self {
        Self {
            scheme: "file".to_string(),
            user: None,
            embedded: None,
            host: None,
            port: None,
            path: path.to_string(),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn local_path(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }

    /// credentials given inline as `user:password@`
    pub fn embedded_credentials(&self) -> Option<&Credentials> {
        self.embedded.as_ref()
    }

    /// the URI without any password; safe to log and to use as a cache key
    pub fn redacted(&self) -> String {
        match &self.host {
            None => format!("{}://{}", self.scheme, self.path),
            Some(host) => {
                let mut out = format!("{}://", self.scheme);
                if let Some(user) = &self.user {
                    out.push_str(user);
                    out.push('@');
                }
                out.push_str(host);
                if let Some(port) = self.port {
                    out.push_str(&format!(":{}", port));
                }
                out.push_str(&self.path);
                out
            }
        }
    }
}

impl fmt::Display for VfsUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// strip a password from an unparsed URI for error messages
pub fn redact(text: &str) -> String {
    let Some((scheme, rest)) = text.split_once("://") else {
        return text.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let authority = &rest[..authority_end];
    match authority.rfind('@') {
        Some(at) => {
            let user = authority[..at].split(':').next().unwrap_or_default();
            format!("{}://{}@{}", scheme, user, &rest[at + 1..])
        }
        None => text.to_string(),
    }
}
