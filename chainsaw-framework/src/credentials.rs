use secrecy::{ExposeSecret, SecretString};
use std::fmt;

/// username and secret used to authenticate against a remote file system
pub struct Credentials {
    pub username: String,
    secret: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: SecretString::from(secret.into()),
        }
    }

    pub fn secret(&self) -> &str {
        self.secret.expose_secret()
    }
}

impl Clone for Credentials {
    fn clone(&self) -> Self {
        Self::new(self.username.clone(), self.secret().to_owned())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl PartialEq for Credentials {
    fn eq(&self, other: &Self) -> bool {
        self.username == other.username && self.secret() == other.secret()
    }
}
