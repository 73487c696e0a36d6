use thiserror::Error;

use crate::{
    clock::{DurationSecs, UnixTime},
    AccessToken, AccessTokenRef, RefreshToken, RefreshTokenRef,
};

/// A token pair with a zero lifetime was offered
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum InvalidTokenPair {
    /// The access token would already be expired
    #[error("access token lifetime must be positive")]
    AccessTokenLifetime,
    /// The refresh token would already be expired
    #[error("refresh token lifetime must be positive")]
    RefreshTokenLifetime,
}

/// The result of an exchange or refresh against the identity provider
///
/// Both lifetimes are guaranteed to be positive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenPair {
    access_token: AccessToken,
    access_token_ttl: DurationSecs,
    refresh_token: RefreshToken,
    refresh_token_ttl: DurationSecs,
}

impl TokenPair {
    /// Constructs a new token pair, rejecting zero lifetimes
    pub fn new(
        access_token: AccessToken,
        access_token_ttl: DurationSecs,
        refresh_token: RefreshToken,
        refresh_token_ttl: DurationSecs,
    ) -> Result<Self, InvalidTokenPair> {
        if access_token_ttl.is_zero() {
            return Err(InvalidTokenPair::AccessTokenLifetime);
        }

        if refresh_token_ttl.is_zero() {
            return Err(InvalidTokenPair::RefreshTokenLifetime);
        }

        Ok(Self {
            access_token,
            access_token_ttl,
            refresh_token,
            refresh_token_ttl,
        })
    }

    /// Gets the access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Gets the access token's lifetime from issuance
    #[inline]
    pub fn access_token_ttl(&self) -> DurationSecs {
        self.access_token_ttl
    }

    /// Gets the refresh token
    #[inline]
    pub fn refresh_token(&self) -> &RefreshTokenRef {
        &self.refresh_token
    }

    /// Gets the refresh token's lifetime from issuance
    #[inline]
    pub fn refresh_token_ttl(&self) -> DurationSecs {
        self.refresh_token_ttl
    }

    /// Stamps the pair with the time it was received
    pub(crate) fn into_state(self, issued: UnixTime) -> TokenState {
        TokenState {
            refresh_interval: self.refresh_token_ttl.half(),
            access_token: self.access_token,
            access_token_ttl: self.access_token_ttl,
            refresh_token: self.refresh_token,
            refresh_token_ttl: self.refresh_token_ttl,
            issued,
        }
    }
}

/// An access token's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token is in the first half of its lifetime
    Fresh,
    /// The token is valid, but past the middle of its lifetime
    Stale,
    /// The token is no longer valid
    Expired,
}

/// The token snapshot most recently obtained from the identity provider
///
/// Snapshots are immutable; renewal publishes a new one in its entirety.
#[derive(Clone, Debug)]
pub struct TokenState {
    access_token: AccessToken,
    access_token_ttl: DurationSecs,
    refresh_token: RefreshToken,
    refresh_token_ttl: DurationSecs,
    refresh_interval: DurationSecs,
    issued: UnixTime,
}

impl TokenState {
    /// Gets the current access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Gets the access token lifetime reported with this snapshot
    ///
    /// This is the value from the identity provider's payload; it is not
    /// decremented as time passes.
    #[inline]
    pub fn access_token_ttl(&self) -> DurationSecs {
        self.access_token_ttl
    }

    /// Gets the refresh token used for the next renewal
    #[inline]
    pub fn refresh_token(&self) -> &RefreshTokenRef {
        &self.refresh_token
    }

    /// Gets the refresh token lifetime reported with this snapshot
    #[inline]
    pub fn refresh_token_ttl(&self) -> DurationSecs {
        self.refresh_token_ttl
    }

    /// Gets the delay before the next renewal, half the refresh token lifetime
    #[inline]
    pub fn refresh_interval(&self) -> DurationSecs {
        self.refresh_interval
    }

    /// Gets the time this snapshot was received
    #[inline]
    pub fn issued(&self) -> UnixTime {
        self.issued
    }

    /// Gets the time the access token will expire
    #[inline]
    pub fn access_expiry(&self) -> UnixTime {
        self.issued + self.access_token_ttl
    }

    /// Gets the time the refresh token will expire
    #[inline]
    pub fn refresh_expiry(&self) -> UnixTime {
        self.issued + self.refresh_token_ttl
    }

    /// Gets the time the next renewal is due
    #[inline]
    pub fn next_refresh(&self) -> UnixTime {
        self.issued + self.refresh_interval
    }

    /// Gets the access token's lifetime status as of the provided time
    pub fn access_token_status_at(&self, time: UnixTime) -> TokenStatus {
        if time < self.issued + self.access_token_ttl.half() {
            TokenStatus::Fresh
        } else if time < self.access_expiry() {
            TokenStatus::Stale
        } else {
            TokenStatus::Expired
        }
    }

    /// Gets how much longer the access token would be valid as of the
    /// provided time
    #[inline]
    pub fn access_token_remaining_at(&self, time: UnixTime) -> DurationSecs {
        self.access_expiry() - time
    }
}
