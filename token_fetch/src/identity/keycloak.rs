//! An identity client backed by a Keycloak realm's OpenID Connect endpoint

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Serialize;

use super::{AuthError, Credentials, IdentityClient};
use crate::{
    config::IdentityConfig, ClientId, ClientSecret, RealmName, RefreshTokenRef, TokenPair,
};

pub mod dto;

/// Talks to `{server}/realms/{realm}/protocol/openid-connect/token`
#[derive(Debug, Clone)]
pub struct KeycloakClient {
    client: reqwest::Client,
    token_url: Url,
    client_id: ClientId,
    client_secret: Option<ClientSecret>,
    realm: RealmName,
}

impl KeycloakClient {
    /// Constructs a client for the realm described by `config`
    ///
    /// Fails with [`AuthError::ConfigInvalid`] if the token endpoint cannot
    /// be derived from the server URL and realm.
    pub fn new(client: reqwest::Client, config: &IdentityConfig) -> Result<Self, AuthError> {
        let token_url = token_endpoint(config.server_url(), config.realm_name())?;

        Ok(Self {
            client,
            token_url,
            client_id: config.client_id().to_owned(),
            client_secret: config.client_secret().map(ToOwned::to_owned),
            realm: config.realm_name().to_owned(),
        })
    }

    /// Gets the token endpoint requests are sent to
    #[inline]
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    #[tracing::instrument(
        err,
        skip(self, payload),
        fields(
            token_url = %self.token_url,
            realm = %self.realm,
            client_id = %self.client_id,
        ),
    )]
    async fn request_token<P: Serialize>(
        &self,
        grant_type: &'static str,
        payload: &P,
    ) -> Result<TokenPair, AuthError> {
        tracing::trace!("requesting token from identity provider");

        let resp = self
            .client
            .post(self.token_url.clone())
            .form(payload)
            .send()
            .await
            .map_err(|err| AuthError::Unreachable(err.to_string()))?;

        let status = resp.status();
        tracing::debug!(
            response.status = status.as_u16(),
            "received token response from identity provider"
        );

        let body = resp
            .bytes()
            .await
            .map_err(|err| AuthError::Unreachable(err.to_string()))?;

        if !status.is_success() {
            return Err(error_from_response(status, &body));
        }

        let resp: dto::TokenResponse = serde_json::from_slice(&body)
            .map_err(|err| AuthError::InvalidResponse(err.to_string()))?;

        let pair = TokenPair::new(
            resp.access_token.to_owned(),
            resp.expires_in,
            resp.refresh_token.to_owned(),
            resp.refresh_expires_in,
        )
        .map_err(|err| AuthError::InvalidResponse(err.to_string()))?;

        tracing::info!(
            access_token_ttl = pair.access_token_ttl().0,
            refresh_token_ttl = pair.refresh_token_ttl().0,
            "received new tokens"
        );

        Ok(pair)
    }
}

#[async_trait]
impl IdentityClient for KeycloakClient {
    async fn exchange(&self, credentials: &Credentials) -> Result<TokenPair, AuthError> {
        let grant = dto::PasswordGrant {
            client_id: &self.client_id,
            client_secret: self.client_secret.as_deref(),
            username: &credentials.username,
            password: &credentials.password,
        };

        self.request_token("password", &grant).await
    }

    async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<TokenPair, AuthError> {
        let grant = dto::RefreshTokenGrant {
            client_id: &self.client_id,
            client_secret: self.client_secret.as_deref(),
            refresh_token,
        };

        self.request_token("refresh_token", &grant).await
    }
}

fn token_endpoint(server_url: &Url, realm: &crate::RealmNameRef) -> Result<Url, AuthError> {
    if server_url.cannot_be_a_base() {
        return Err(AuthError::ConfigInvalid(format!(
            "server URL `{}` cannot be used as a base URL",
            server_url
        )));
    }

    let mut url = server_url.clone();
    url.path_segments_mut()
        .map_err(|()| {
            AuthError::ConfigInvalid(format!("server URL `{}` has no path", server_url))
        })?
        .pop_if_empty()
        .extend([
            "realms",
            realm.as_str(),
            "protocol",
            "openid-connect",
            "token",
        ]);

    Ok(url)
}

fn error_from_response(status: StatusCode, body: &[u8]) -> AuthError {
    let message = serde_json::from_slice::<dto::ErrorResponse>(body)
        .map(|e| e.message())
        .unwrap_or_else(|_| String::from_utf8_lossy(body).trim().to_owned());

    let message = if message.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("no response body")
            .to_owned()
    } else {
        message
    };

    if status == StatusCode::NOT_FOUND {
        AuthError::ConfigInvalid(format!("token endpoint not found: {}", message))
    } else if status.is_client_error() {
        AuthError::InvalidCredentials {
            status: status.as_u16(),
            message,
        }
    } else {
        AuthError::ServerError {
            status: status.as_u16(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{
        matchers::{body_string_contains, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{clock::DurationSecs, config::RawIdentityConfig};

    fn config_for(server_url: &str) -> IdentityConfig {
        RawIdentityConfig {
            server_url: Some(server_url.to_owned()),
            client_id: Some("nexus-cli".to_owned()),
            realm_name: Some("BBP".to_owned()),
            client_secret: None,
        }
        .validate()
        .unwrap()
    }

    fn client_for(server_url: &str) -> KeycloakClient {
        KeycloakClient::new(reqwest::Client::new(), &config_for(server_url)).unwrap()
    }

    fn token_body(access: &str, refresh: &str) -> serde_json::Value {
        serde_json::json!({
            "access_token": access,
            "expires_in": 3600,
            "refresh_token": refresh,
            "refresh_expires_in": 28800,
            "token_type": "Bearer",
        })
    }

    #[test]
    fn token_endpoint_appends_realm_path() {
        let url = token_endpoint(
            &Url::parse("https://auth.example.org/auth/").unwrap(),
            crate::RealmNameRef::from_static("BBP"),
        )
        .unwrap();

        assert_eq!(
            url.as_str(),
            "https://auth.example.org/auth/realms/BBP/protocol/openid-connect/token"
        );

        let url = token_endpoint(
            &Url::parse("https://auth.example.org").unwrap(),
            crate::RealmNameRef::from_static("BBP"),
        )
        .unwrap();

        assert_eq!(
            url.as_str(),
            "https://auth.example.org/realms/BBP/protocol/openid-connect/token"
        );
    }

    #[test]
    fn cannot_be_a_base_url_is_rejected() {
        let err = token_endpoint(
            &Url::parse("mailto:admin@example.org").unwrap(),
            crate::RealmNameRef::from_static("BBP"),
        )
        .unwrap_err();

        assert!(matches!(err, AuthError::ConfigInvalid(_)));
    }

    #[test]
    fn statuses_map_onto_the_error_taxonomy() {
        let body = br#"{"error":"invalid_grant","error_description":"Invalid user credentials"}"#;

        assert_eq!(
            error_from_response(StatusCode::UNAUTHORIZED, body),
            AuthError::InvalidCredentials {
                status: 401,
                message: "invalid_grant: Invalid user credentials".to_owned(),
            }
        );
        assert!(matches!(
            error_from_response(StatusCode::NOT_FOUND, br#"{"error":"Realm does not exist"}"#),
            AuthError::ConfigInvalid(_)
        ));
        assert_eq!(
            error_from_response(StatusCode::BAD_GATEWAY, b""),
            AuthError::ServerError {
                status: 502,
                message: "Bad Gateway".to_owned(),
            }
        );
    }

    #[tokio::test]
    async fn exchange_posts_a_password_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/realms/BBP/protocol/openid-connect/token"))
            .and(body_string_contains("grant_type=password"))
            .and(body_string_contains("username=jdoe"))
            .and(body_string_contains("client_id=nexus-cli"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("A1", "R1")))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        let pair = client
            .exchange(&Credentials::new("jdoe", "hunter2"))
            .await
            .unwrap();

        assert_eq!(pair.access_token().as_str(), "A1");
        assert_eq!(pair.refresh_token().as_str(), "R1");
        assert_eq!(pair.access_token_ttl(), DurationSecs(3600));
        assert_eq!(pair.refresh_token_ttl(), DurationSecs(28800));
    }

    #[tokio::test]
    async fn refresh_posts_a_refresh_token_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/realms/BBP/protocol/openid-connect/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=R1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("A2", "R2")))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        let pair = client
            .refresh(RefreshTokenRef::from_static("R1"))
            .await
            .unwrap();

        assert_eq!(pair.access_token().as_str(), "A2");
        assert_eq!(pair.refresh_token().as_str(), "R2");
    }

    #[tokio::test]
    async fn rejected_password_is_invalid_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Invalid user credentials",
            })))
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        let err = client
            .exchange(&Credentials::new("jdoe", "wrong"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AuthError::InvalidCredentials { status: 401, .. }
        ));
    }

    #[tokio::test]
    async fn zero_refresh_lifetime_is_an_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "A1",
                "expires_in": 300,
                "refresh_token": "R1",
                "refresh_expires_in": 0,
            })))
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        let err = client
            .exchange(&Credentials::new("jdoe", "hunter2"))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let uri = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let client = client_for(&uri);
        let err = client
            .refresh(RefreshTokenRef::from_static("R1"))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::Unreachable(_)));
    }
}
