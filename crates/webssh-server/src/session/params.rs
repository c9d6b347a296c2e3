//! Already-resolved connection parameters handed in by the API layer.

use webssh_core::{TermSize, WebSshError, WebSshResult};

/// Secret material used to authenticate. Exactly one kind is ever present.
#[derive(Clone)]
pub enum AuthSecret {
    Password(String),
    PrivateKey {
        /// PEM/OpenSSH-encoded private key contents.
        pem: String,
        passphrase: Option<String>,
    },
}

impl std::fmt::Debug for AuthSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthSecret::Password(_) => f.write_str("Password(<redacted>)"),
            AuthSecret::PrivateKey { passphrase, .. } => f
                .debug_struct("PrivateKey")
                .field("pem", &"<redacted>")
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

impl AuthSecret {
    /// Short label for logs.
    pub fn method(&self) -> &'static str {
        match self {
            AuthSecret::Password(_) => "password",
            AuthSecret::PrivateKey { .. } => "publickey",
        }
    }
}

/// Everything needed to open one remote shell.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: AuthSecret,
    /// Friendly name used for logging and the transcript directory.
    pub display_name: String,
    /// Initial pseudo-terminal size.
    pub size: TermSize,
}

impl ConnectParams {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>, auth: AuthSecret) -> Self {
        let host = host.into();
        Self {
            display_name: host.clone(),
            host,
            port,
            username: username.into(),
            auth,
            size: TermSize::default(),
        }
    }

    /// Build parameters from the loose shape the API layer stores.
    ///
    /// Exactly one of `password` / `private_key` must be set. A zero port
    /// means 22; a missing display name falls back to the host.
    pub fn from_parts(
        host: &str,
        port: u16,
        username: &str,
        password: Option<String>,
        private_key: Option<String>,
        passphrase: Option<String>,
        display_name: Option<String>,
    ) -> WebSshResult<Self> {
        if host.trim().is_empty() {
            return Err(WebSshError::InvalidParams("host is required".into()));
        }
        if username.trim().is_empty() {
            return Err(WebSshError::InvalidParams("username is required".into()));
        }

        let auth = match (password, private_key) {
            (Some(password), None) => AuthSecret::Password(password),
            (None, Some(pem)) => AuthSecret::PrivateKey { pem, passphrase },
            (Some(_), Some(_)) => {
                return Err(WebSshError::InvalidParams(
                    "exactly one of password or private key may be set".into(),
                ))
            }
            (None, None) => {
                return Err(WebSshError::InvalidParams(
                    "a password or private key is required".into(),
                ))
            }
        };

        let port = if port == 0 { 22 } else { port };
        let mut params = Self::new(host, port, username, auth);
        if let Some(name) = display_name.filter(|n| !n.trim().is_empty()) {
            params.display_name = name;
        }
        Ok(params)
    }

    pub fn with_size(mut self, size: TermSize) -> Self {
        self.size = size;
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// `user@host:port`, for logs.
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}
