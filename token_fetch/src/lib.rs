//! Background renewal of access tokens issued by an OpenID Connect identity
//! provider
//!
//! A [`Refresher`] performs a single password exchange against the identity
//! provider and then keeps the resulting token pair alive by exchanging the
//! refresh token for a new pair every half of the refresh token's lifetime.
//! Consumers read the current access token at any time without waiting on
//! the network; a renewal in flight never blocks a read.
//!
//! Failures are not papered over. If the initial exchange or a renewal fails,
//! the refresher enters a failed state and stops handing out tokens, so that
//! nothing keeps using a token that will never be renewed.
//!
//! # General Flow
//!
//! Resolve the connection parameters, build a client for the identity
//! provider, then initialize a refresher with the user's credentials.
//!
//! ```no_run
//! use token_fetch::{
//!     config::{ConfigResolver, EnvConfigProvider, FileConfigProvider},
//!     keycloak::KeycloakClient,
//!     Credentials, Refresher,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let resolved = ConfigResolver::new()
//!     .with_provider(FileConfigProvider::new("keycloak_config.yaml"))
//!     .with_provider(EnvConfigProvider::new())
//!     .resolve()?;
//!
//! let client = KeycloakClient::new(reqwest::Client::new(), &resolved.config)?;
//!
//! let mut refresher = Refresher::new(client);
//! refresher
//!     .initialize(&Credentials::new("jdoe", "hunter2"))
//!     .await?;
//!
//! let handle = refresher.handle();
//! tracing::info!(
//!     token = format_args!("{:#?}", handle.get_access_token()?),
//!     "first access token"
//! );
//!
//! // ...
//!
//! refresher.shutdown().await;
//! # Ok(()) }
//! ```
//!
//! # Features
//!
//! The following features are supported by this crate, all of which are enabled by default:
//!
//! * `keycloak`: Provides an [`IdentityClient`] for a Keycloak realm's token endpoint,
//!   built on [reqwest].

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod backoff;
mod braids;
pub mod clock;
pub mod config;
mod identity;
mod refresher;
mod tokens;

pub use braids::*;
#[cfg(feature = "keycloak")]
#[cfg_attr(docsrs, doc(cfg(feature = "keycloak")))]
pub use identity::keycloak;
pub use identity::{AuthError, Credentials, IdentityClient};
pub use refresher::{Refresher, RefresherState, TokenHandle, TokenUnavailable};
pub use tokens::{InvalidTokenPair, TokenPair, TokenState, TokenStatus};
