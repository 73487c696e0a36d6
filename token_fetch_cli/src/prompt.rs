//! Interactive fallbacks for values nobody supplied

use std::{
    io::{self, IsTerminal},
    path::PathBuf,
};

use dialoguer::{Input, Password};
use token_fetch::config::{self, ConfigError, ConfigProvider, RawIdentityConfig};

fn prompt_error(err: dialoguer::Error) -> io::Error {
    io::Error::other(err)
}

/// Asks for the user name on the terminal
pub fn username() -> io::Result<String> {
    Input::new()
        .with_prompt("Username")
        .interact_text()
        .map_err(prompt_error)
}

/// Asks for the password on the terminal without echoing it
pub fn password() -> io::Result<String> {
    Password::new()
        .with_prompt("Password")
        .interact()
        .map_err(prompt_error)
}

/// Asks for connection parameters on the terminal
///
/// Answers that validate are saved to the cache file, so the next run finds
/// them without asking. Reports absence when stdin is not a terminal.
#[derive(Debug)]
pub struct PromptConfigProvider {
    cache_path: Option<PathBuf>,
}

impl PromptConfigProvider {
    pub fn new(cache_path: Option<PathBuf>) -> Self {
        Self { cache_path }
    }

    fn ask(&self) -> io::Result<RawIdentityConfig> {
        let server_url: String = Input::new()
            .with_prompt("Keycloak server URL")
            .interact_text()
            .map_err(prompt_error)?;
        let client_id: String = Input::new()
            .with_prompt("Client ID")
            .interact_text()
            .map_err(prompt_error)?;
        let realm_name: String = Input::new()
            .with_prompt("Realm name")
            .interact_text()
            .map_err(prompt_error)?;
        let client_secret: String = Password::new()
            .with_prompt("Client secret (leave empty for a public client)")
            .allow_empty_password(true)
            .interact()
            .map_err(prompt_error)?;

        Ok(RawIdentityConfig {
            server_url: Some(server_url),
            client_id: Some(client_id),
            realm_name: Some(realm_name),
            client_secret: Some(client_secret).filter(|s| !s.trim().is_empty()),
        })
    }
}

impl ConfigProvider for PromptConfigProvider {
    fn describe(&self) -> String {
        "interactive prompt".to_owned()
    }

    fn load(&mut self) -> Result<Option<RawIdentityConfig>, ConfigError> {
        if !io::stdin().is_terminal() {
            tracing::debug!("stdin is not a terminal, not prompting for configuration");
            return Ok(None);
        }

        let raw = self.ask().map_err(ConfigError::Prompt)?;

        if let Some(path) = &self.cache_path {
            if let Ok(config) = raw.clone().validate() {
                if let Err(err) = config::persist(&config, path) {
                    tracing::warn!(
                        error = (&err as &dyn std::error::Error),
                        "unable to save configuration for next time"
                    );
                }
            }
        }

        Ok(Some(raw))
    }
}
