//! DTOs for the Keycloak OpenID Connect token endpoint

use serde::{Deserialize, Serialize, Serializer};

use crate::{
    clock::DurationSecs, AccessTokenRef, ClientIdRef, ClientSecretRef, PasswordRef,
    RefreshTokenRef, UsernameRef,
};

/// Resource owner password credentials grant
#[derive(Debug)]
pub(super) struct PasswordGrant<'a> {
    pub client_id: &'a ClientIdRef,
    pub client_secret: Option<&'a ClientSecretRef>,
    pub username: &'a UsernameRef,
    pub password: &'a PasswordRef,
}

impl Serialize for PasswordGrant<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut ser = serializer.serialize_struct("PasswordGrant", 5)?;
        ser.serialize_field("grant_type", "password")?;
        ser.serialize_field("client_id", self.client_id)?;
        if let Some(secret) = self.client_secret {
            ser.serialize_field("client_secret", secret)?;
        } else {
            ser.skip_field("client_secret")?;
        }
        ser.serialize_field("username", self.username)?;
        ser.serialize_field("password", self.password)?;
        ser.end()
    }
}

/// Refresh token grant
#[derive(Debug)]
pub(super) struct RefreshTokenGrant<'a> {
    pub client_id: &'a ClientIdRef,
    pub client_secret: Option<&'a ClientSecretRef>,
    pub refresh_token: &'a RefreshTokenRef,
}

impl Serialize for RefreshTokenGrant<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut ser = serializer.serialize_struct("RefreshTokenGrant", 4)?;
        ser.serialize_field("grant_type", "refresh_token")?;
        ser.serialize_field("client_id", self.client_id)?;
        if let Some(secret) = self.client_secret {
            ser.serialize_field("client_secret", secret)?;
        } else {
            ser.skip_field("client_secret")?;
        }
        ser.serialize_field("refresh_token", self.refresh_token)?;
        ser.end()
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct TokenResponse<'a> {
    #[serde(borrow)]
    pub access_token: &'a AccessTokenRef,
    pub expires_in: DurationSecs,
    #[serde(borrow)]
    pub refresh_token: &'a RefreshTokenRef,
    pub refresh_expires_in: DurationSecs,
}

/// An OAuth2 error body, as described in RFC 6749 §5.2
#[derive(Debug, Deserialize)]
pub(super) struct ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl ErrorResponse {
    pub fn message(&self) -> String {
        match &self.error_description {
            Some(description) => format!("{}: {}", self.error, description),
            None => self.error.clone(),
        }
    }
}
