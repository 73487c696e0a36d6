//! Identity provider connection parameters and where to find them
//!
//! Parameters are looked up through an ordered list of [`ConfigProvider`]s;
//! the first provider that has a configuration wins. Each provider may
//! report absence, in which case the next one is consulted.

use std::{
    fmt, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{
    AuthError, ClientId, ClientIdRef, ClientSecret, ClientSecretRef, RealmName, RealmNameRef,
};

/// File name of the per-user configuration cache
pub const CONFIG_FILE_NAME: &str = "keycloak_config.yaml";

/// Prefix of the environment variables read by [`EnvConfigProvider`]
pub const ENV_PREFIX: &str = "TOKEN_FETCH_";

/// Connection parameters as found in a file, the environment or a prompt
///
/// Nothing about the values has been checked yet; see
/// [`validate()`][Self::validate()].
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawIdentityConfig {
    /// The identity provider's base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    /// The client registered with the identity provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// The realm the client belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realm_name: Option<String>,
    /// The client secret, for confidential clients
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

impl fmt::Debug for RawIdentityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawIdentityConfig")
            .field("server_url", &self.server_url)
            .field("client_id", &self.client_id)
            .field("realm_name", &self.realm_name)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "***CLIENT SECRET***"),
            )
            .finish()
    }
}

impl RawIdentityConfig {
    /// Checks that every required key is present and well-formed
    pub fn validate(self) -> Result<IdentityConfig, AuthError> {
        let server_url = required(self.server_url, "SERVER_URL")?;
        let server_url = Url::parse(&server_url).map_err(|err| {
            AuthError::ConfigInvalid(format!("SERVER_URL `{}` is not a URL: {}", server_url, err))
        })?;

        if !matches!(server_url.scheme(), "http" | "https") {
            return Err(AuthError::ConfigInvalid(format!(
                "SERVER_URL `{}` must use http or https",
                server_url
            )));
        }

        let client_id = required(self.client_id, "CLIENT_ID")?;
        let realm_name = required(self.realm_name, "REALM_NAME")?;

        if realm_name.contains('/') {
            return Err(AuthError::ConfigInvalid(format!(
                "REALM_NAME `{}` must not contain `/`",
                realm_name
            )));
        }

        let client_secret = self
            .client_secret
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .map(ClientSecret::new);

        Ok(IdentityConfig {
            server_url,
            client_id: ClientId::new(client_id),
            realm_name: RealmName::new(realm_name),
            client_secret,
        })
    }
}

fn required(value: Option<String>, key: &'static str) -> Result<String, AuthError> {
    match value.map(|v| v.trim().to_owned()) {
        Some(v) if !v.is_empty() => Ok(v),
        Some(_) => Err(AuthError::ConfigInvalid(format!("key `{}` is blank", key))),
        None => Err(AuthError::ConfigInvalid(format!("key `{}` is missing", key))),
    }
}

/// Validated connection parameters for an identity provider
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityConfig {
    server_url: Url,
    client_id: ClientId,
    realm_name: RealmName,
    client_secret: Option<ClientSecret>,
}

impl IdentityConfig {
    /// Gets the identity provider's base URL
    #[inline]
    pub fn server_url(&self) -> &Url {
        &self.server_url
    }

    /// Gets the client ID
    #[inline]
    pub fn client_id(&self) -> &ClientIdRef {
        &self.client_id
    }

    /// Gets the realm name
    #[inline]
    pub fn realm_name(&self) -> &RealmNameRef {
        &self.realm_name
    }

    /// Gets the client secret, if one is configured
    #[inline]
    pub fn client_secret(&self) -> Option<&ClientSecretRef> {
        self.client_secret.as_deref()
    }
}

impl TryFrom<RawIdentityConfig> for IdentityConfig {
    type Error = AuthError;

    #[inline]
    fn try_from(raw: RawIdentityConfig) -> Result<Self, Self::Error> {
        raw.validate()
    }
}

impl From<&IdentityConfig> for RawIdentityConfig {
    fn from(config: &IdentityConfig) -> Self {
        Self {
            server_url: Some(config.server_url.to_string()),
            client_id: Some(config.client_id.as_str().to_owned()),
            realm_name: Some(config.realm_name.as_str().to_owned()),
            client_secret: config
                .client_secret
                .as_ref()
                .map(|s| s.as_str().to_owned()),
        }
    }
}

/// An error while looking up connection parameters
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration file could not be read or written
    #[error("unable to access configuration file `{}`", path.display())]
    Io {
        /// The file involved
        path: PathBuf,
        /// The underlying error
        #[source]
        source: io::Error,
    },
    /// A configuration file is not valid YAML of the expected shape
    #[error("unable to parse configuration file `{}`", path.display())]
    Parse {
        /// The file involved
        path: PathBuf,
        /// The underlying error
        #[source]
        source: serde_yaml::Error,
    },
    /// A configuration could not be rendered as YAML
    #[error("unable to serialize configuration for `{}`", path.display())]
    Serialize {
        /// The file it was meant for
        path: PathBuf,
        /// The underlying error
        #[source]
        source: serde_yaml::Error,
    },
    /// A configuration was found, but its values are unusable
    #[error("configuration from {provider} is invalid")]
    Invalid {
        /// The provider the configuration came from
        provider: String,
        /// The validation failure
        #[source]
        source: AuthError,
    },
    /// Interactive input failed
    #[error("unable to prompt for configuration")]
    Prompt(#[source] io::Error),
    /// No provider had a configuration
    #[error("no identity provider configuration found (tried: {})", tried.join(", "))]
    NotFound {
        /// Descriptions of the providers consulted
        tried: Vec<String>,
    },
}

/// A source of connection parameters
pub trait ConfigProvider: fmt::Debug {
    /// A short description of where this provider looks, for diagnostics
    fn describe(&self) -> String;

    /// Looks up connection parameters
    ///
    /// Returns `Ok(None)` if this provider has nothing to offer.
    fn load(&mut self) -> Result<Option<RawIdentityConfig>, ConfigError>;
}

/// Reads connection parameters from a YAML file
///
/// A missing or empty file counts as absent.
#[derive(Clone, Debug)]
pub struct FileConfigProvider {
    path: PathBuf,
}

impl FileConfigProvider {
    /// Constructs a provider for the file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Constructs a provider for the per-user cache file, if a home
    /// directory can be determined
    pub fn home_cache() -> Option<Self> {
        default_cache_path().map(Self::new)
    }

    /// Gets the file this provider reads
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigProvider for FileConfigProvider {
    fn describe(&self) -> String {
        format!("file `{}`", self.path.display())
    }

    fn load(&mut self) -> Result<Option<RawIdentityConfig>, ConfigError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "configuration file not found");
                return Ok(None);
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if contents.trim().is_empty() {
            tracing::debug!(path = %self.path.display(), "configuration file is empty");
            return Ok(None);
        }

        serde_yaml::from_str(&contents)
            .map(Some)
            .map_err(|source| ConfigError::Parse {
                path: self.path.clone(),
                source,
            })
    }
}

/// Reads connection parameters from `TOKEN_FETCH_*` environment variables
///
/// The provider reports absence unless `SERVER_URL`, `CLIENT_ID` and
/// `REALM_NAME` are all set.
pub struct EnvConfigProvider {
    lookup: Box<dyn Fn(&str) -> Option<String> + Send + Sync>,
}

impl fmt::Debug for EnvConfigProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvConfigProvider").finish_non_exhaustive()
    }
}

impl EnvConfigProvider {
    /// Constructs a provider over the process environment
    pub fn new() -> Self {
        Self::with_lookup(|key| std::env::var(key).ok())
    }

    /// Constructs a provider that reads variables through `lookup`
    pub fn with_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            lookup: Box::new(lookup),
        }
    }

    fn var(&self, key: &str) -> Option<String> {
        (self.lookup)(&format!("{}{}", ENV_PREFIX, key))
    }
}

impl Default for EnvConfigProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigProvider for EnvConfigProvider {
    fn describe(&self) -> String {
        format!("environment `{}*`", ENV_PREFIX)
    }

    fn load(&mut self) -> Result<Option<RawIdentityConfig>, ConfigError> {
        let raw = RawIdentityConfig {
            server_url: self.var("SERVER_URL"),
            client_id: self.var("CLIENT_ID"),
            realm_name: self.var("REALM_NAME"),
            client_secret: self.var("CLIENT_SECRET"),
        };

        if raw.server_url.is_none() || raw.client_id.is_none() || raw.realm_name.is_none() {
            return Ok(None);
        }

        Ok(Some(raw))
    }
}

/// Tries a list of providers in order
#[derive(Debug, Default)]
pub struct ConfigResolver {
    providers: Vec<Box<dyn ConfigProvider + Send>>,
}

/// A resolved configuration and the provider it came from
#[derive(Clone, Debug)]
pub struct Resolved {
    /// The validated configuration
    pub config: IdentityConfig,
    /// The provider that supplied it
    pub provider: String,
}

impl ConfigResolver {
    /// Constructs a resolver with no providers
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a provider, to be consulted after those already added
    pub fn with_provider(mut self, provider: impl ConfigProvider + Send + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// Returns the first configuration any provider has
    ///
    /// A provider error or an invalid configuration stops the search; a
    /// malformed file should be fixed rather than silently skipped.
    pub fn resolve(&mut self) -> Result<Resolved, ConfigError> {
        let mut tried = Vec::with_capacity(self.providers.len());

        for provider in &mut self.providers {
            let name = provider.describe();
            match provider.load()? {
                Some(raw) => {
                    let config = raw.validate().map_err(|source| ConfigError::Invalid {
                        provider: name.clone(),
                        source,
                    })?;

                    tracing::info!(
                        provider = %name,
                        server_url = %config.server_url(),
                        realm = %config.realm_name(),
                        client_id = %config.client_id(),
                        "resolved identity provider configuration"
                    );

                    return Ok(Resolved {
                        config,
                        provider: name,
                    });
                }
                None => {
                    tracing::debug!(provider = %name, "no configuration, trying next provider");
                    tried.push(name);
                }
            }
        }

        Err(ConfigError::NotFound { tried })
    }
}

/// The per-user cache file location, `~/.config/token-fetch/keycloak_config.yaml`
pub fn default_cache_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| {
        home.join(".config")
            .join("token-fetch")
            .join(CONFIG_FILE_NAME)
    })
}

/// Writes a configuration as YAML to `path`
///
/// Parent directories are created as needed. On Unix the file is readable
/// and writable by its owner only, since it may hold a client secret.
pub fn persist(config: &IdentityConfig, path: &Path) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_owned(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let contents =
        serde_yaml::to_string(&RawIdentityConfig::from(config)).map_err(|source| {
            ConfigError::Serialize {
                path: path.to_owned(),
                source,
            }
        })?;

    let mut opts = std::fs::OpenOptions::new();
    opts.create(true).truncate(true).write(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }

    let mut file = opts.open(path).map_err(io_err)?;

    // The mode above only applies to newly created files.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .map_err(io_err)?;
    }

    io::Write::write_all(&mut file, contents.as_bytes()).map_err(io_err)?;

    tracing::info!(path = %path.display(), "saved identity provider configuration");

    Ok(())
}
