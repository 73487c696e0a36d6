//! The identity provider seam
//!
//! The [`Refresher`][crate::Refresher] only needs two round-trips from the
//! identity provider: an initial password exchange and a refresh-token
//! exchange. Both are expressed by [`IdentityClient`], which the
//! [`keycloak`] module implements over HTTP.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::{Password, RefreshTokenRef, TokenPair, Username};

#[cfg(feature = "keycloak")]
#[cfg_attr(docsrs, doc(cfg(feature = "keycloak")))]
pub mod keycloak;

/// Credentials for the password grant
#[derive(Clone, Debug)]
pub struct Credentials {
    /// The user to authenticate as
    pub username: Username,
    /// The user's password
    pub password: Password,
}

impl Credentials {
    /// Bundles a username and password
    pub fn new(username: impl Into<Username>, password: impl Into<Password>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// An error reported by the identity provider or while reaching it
///
/// Only [`Unreachable`][AuthError::Unreachable] and
/// [`ServerError`][AuthError::ServerError] are worth retrying; the rest need
/// someone to fix the credentials or configuration.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The identity provider rejected the credentials or refresh token
    #[error("authentication rejected by identity provider ({status}): {message}")]
    InvalidCredentials {
        /// The HTTP status returned
        status: u16,
        /// The provider's explanation
        message: String,
    },
    /// The connection parameters are missing or malformed
    #[error("invalid identity provider configuration: {0}")]
    ConfigInvalid(String),
    /// The identity provider could not be reached
    #[error("identity provider unreachable: {0}")]
    Unreachable(String),
    /// The identity provider failed to handle the request
    #[error("identity provider error ({status}): {message}")]
    ServerError {
        /// The HTTP status returned
        status: u16,
        /// The provider's explanation
        message: String,
    },
    /// The identity provider answered with something that is not a usable
    /// token pair
    #[error("invalid token response from identity provider: {0}")]
    InvalidResponse(String),
}

impl AuthError {
    /// Whether retrying the same request later could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::ServerError { .. })
    }
}

/// A client for the identity provider's token endpoint
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Exchanges a username and password for a new token pair
    async fn exchange(&self, credentials: &Credentials) -> Result<TokenPair, AuthError>;

    /// Exchanges a refresh token for a new token pair
    async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<TokenPair, AuthError>;
}

#[async_trait]
impl<T: IdentityClient + ?Sized> IdentityClient for Arc<T> {
    async fn exchange(&self, credentials: &Credentials) -> Result<TokenPair, AuthError> {
        (**self).exchange(credentials).await
    }

    async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<TokenPair, AuthError> {
        (**self).refresh(refresh_token).await
    }
}

#[async_trait]
impl<T: IdentityClient + ?Sized> IdentityClient for Box<T> {
    async fn exchange(&self, credentials: &Credentials) -> Result<TokenPair, AuthError> {
        (**self).exchange(credentials).await
    }

    async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<TokenPair, AuthError> {
        (**self).refresh(refresh_token).await
    }
}
