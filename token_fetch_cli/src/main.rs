use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{self, WrapErr};
use token_fetch::{
    backoff::ErrorBackoffConfig,
    clock::DurationSecs,
    config::{self, ConfigResolver, EnvConfigProvider, FileConfigProvider},
    keycloak::KeycloakClient,
    Credentials, Refresher, TokenHandle, TokenUnavailable,
};
use tokio::time::{self, MissedTickBehavior};
use tracing_subscriber::EnvFilter;

mod cli;
mod duration;
mod prompt;
mod sink;

use cli::Opts;
use prompt::PromptConfigProvider;
use sink::Sink;

#[derive(Debug)]
enum Exit {
    TimedOut,
    Interrupted,
    Failed(TokenUnavailable),
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let opts = Opts::parse();

    let resolved = resolver(&opts)?
        .resolve()
        .wrap_err("unable to determine the identity provider to use")?;
    let client = KeycloakClient::new(reqwest::Client::new(), &resolved.config)?;

    let username = match opts.username.clone() {
        Some(username) => username,
        None => prompt::username()?,
    };
    let password = match opts.password.clone() {
        Some(password) => password,
        None => prompt::password()?,
    };
    let credentials = Credentials::new(username, password);

    let backoff = ErrorBackoffConfig::with_retries(opts.renewal_retries);
    tracing::info!(
        username = %credentials.username,
        renewal_retries = backoff.max_retries(),
        "starting token refresher"
    );

    let mut refresher = Refresher::new(client).with_backoff(backoff);
    refresher
        .initialize(&credentials)
        .await
        .wrap_err("unable to obtain an access token")?;
    drop(credentials);

    let handle = refresher.handle();
    let period = effective_period(opts.refresh_period, handle.get_access_token_ttl()?);

    if let Some(timeout) = opts.timeout {
        if timeout < period {
            tracing::warn!(
                timeout_secs = timeout.as_secs_f64(),
                period_secs = period.as_secs_f64(),
                "timeout is shorter than the refresh period, the token will only be written once"
            );
        }
    }

    let mut sink = match opts.output_path()? {
        Some(path) => {
            tracing::info!(path = %path.display(), "writing access token to file");
            Sink::File(path)
        }
        None => Sink::Console,
    };

    let exit = present(&handle, &mut sink, period, opts.timeout).await;
    refresher.shutdown().await;

    conclude(exit?, &mut sink).await
}

/// Turns the reason presentation stopped into the process outcome
///
/// A failure removes the presented token, so nothing keeps using a token
/// that will never be renewed.
async fn conclude(exit: Exit, sink: &mut Sink) -> color_eyre::Result<()> {
    match exit {
        Exit::TimedOut => {
            tracing::info!("timeout reached, stopping");
            Ok(())
        }
        Exit::Interrupted => {
            tracing::info!("interrupted, stopping");
            Ok(())
        }
        Exit::Failed(reason) => {
            if let Err(err) = sink.retract().await {
                tracing::warn!(
                    error = (&err as &dyn std::error::Error),
                    "unable to remove stale access token"
                );
            }

            Err(eyre::Report::new(reason).wrap_err("the access token can no longer be renewed"))
        }
    }
}

/// Looks in an explicit file, then the environment, then the per-user
/// cache, and finally asks
fn resolver(opts: &Opts) -> color_eyre::Result<ConfigResolver> {
    let mut resolver = ConfigResolver::new();

    if let Some(path) = &opts.keycloak_config {
        if !path.is_file() {
            eyre::bail!("configuration file `{}` does not exist", path.display());
        }
        resolver = resolver.with_provider(FileConfigProvider::new(path.clone()));
    }

    resolver = resolver.with_provider(EnvConfigProvider::new());

    if let Some(cache) = FileConfigProvider::home_cache() {
        resolver = resolver.with_provider(cache);
    }

    Ok(resolver.with_provider(PromptConfigProvider::new(config::default_cache_path())))
}

/// Caps the refresh period at half the access token's lifetime
fn effective_period(requested: Duration, access_token_ttl: DurationSecs) -> Duration {
    let limit = Duration::from(access_token_ttl.half());

    if !limit.is_zero() && requested > limit {
        tracing::warn!(
            requested_secs = requested.as_secs_f64(),
            limit_secs = limit.as_secs(),
            "refresh period exceeds half of the access token lifetime, using the limit instead"
        );
        limit
    } else {
        requested
    }
}

/// Presents the current token every `period` until told to stop
async fn present(
    handle: &TokenHandle,
    sink: &mut Sink,
    period: Duration,
    timeout: Option<Duration>,
) -> color_eyre::Result<Exit> {
    let deadline = async {
        match timeout {
            Some(timeout) => time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };
    let interrupt = tokio::signal::ctrl_c();
    let failure = handle.wait_for_failure();
    tokio::pin!(deadline, interrupt, failure);

    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            reason = &mut failure => return Ok(Exit::Failed(reason)),
            result = &mut interrupt => {
                result.wrap_err("unable to listen for interrupts")?;
                return Ok(Exit::Interrupted);
            }
            _ = &mut deadline => return Ok(Exit::TimedOut),
            _ = ticker.tick() => {
                let token = match handle.get_access_token() {
                    Ok(token) => token,
                    Err(reason) => return Ok(Exit::Failed(reason)),
                };
                sink.write(&token).await.wrap_err("unable to present the access token")?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, path::Path, sync::Mutex};

    use async_trait::async_trait;
    use token_fetch::{
        AccessToken, AuthError, IdentityClient, RefreshToken, RefreshTokenRef, TokenPair,
    };

    use super::*;

    #[derive(Debug)]
    struct ScriptedIdentity {
        refreshes: Mutex<VecDeque<Result<TokenPair, AuthError>>>,
    }

    #[async_trait]
    impl IdentityClient for ScriptedIdentity {
        async fn exchange(&self, _credentials: &Credentials) -> Result<TokenPair, AuthError> {
            pair("A1", "R1")
        }

        async fn refresh(&self, _refresh_token: &RefreshTokenRef) -> Result<TokenPair, AuthError> {
            self.refreshes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AuthError::Unreachable("no scripted refresh".into())))
        }
    }

    fn pair(access: &'static str, refresh: &'static str) -> Result<TokenPair, AuthError> {
        Ok(TokenPair::new(
            AccessToken::from_static(access),
            DurationSecs(3600),
            RefreshToken::from_static(refresh),
            DurationSecs(28800),
        )
        .unwrap())
    }

    async fn started(
        refreshes: Vec<Result<TokenPair, AuthError>>,
    ) -> Refresher<ScriptedIdentity> {
        let mut refresher = Refresher::new(ScriptedIdentity {
            refreshes: Mutex::new(refreshes.into()),
        });
        refresher
            .initialize(&Credentials::new("jdoe", "hunter2"))
            .await
            .unwrap();
        refresher
    }

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn failed_renewal_stops_presenting_and_removes_the_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Token");
        let mut sink = Sink::File(path.clone());
        let refresher = started(vec![
            pair("A2", "R2"),
            Err(AuthError::Unreachable("connection refused".into())),
        ])
        .await;
        let handle = refresher.handle();
        let start = time::Instant::now();

        let exit = present(&handle, &mut sink, Duration::from_secs(60), None)
            .await
            .unwrap();

        assert!(matches!(
            exit,
            Exit::Failed(TokenUnavailable::Failed(AuthError::Unreachable(_)))
        ));
        assert!(start.elapsed() < Duration::from_secs(28800 + 60));
        assert_eq!(read(&path), "A2");

        assert!(conclude(exit, &mut sink).await.is_err());
        assert!(!path.exists());

        refresher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn presentation_ends_at_the_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Token");
        let mut sink = Sink::File(path.clone());
        let refresher = started(vec![pair("A2", "R2")]).await;
        let handle = refresher.handle();
        let start = time::Instant::now();

        let exit = present(
            &handle,
            &mut sink,
            Duration::from_secs(15),
            Some(Duration::from_secs(100)),
        )
        .await
        .unwrap();

        assert!(matches!(exit, Exit::TimedOut));
        assert!(start.elapsed() >= Duration::from_secs(100));
        assert!(start.elapsed() < Duration::from_secs(105));
        assert_eq!(read(&path), "A1");

        conclude(exit, &mut sink).await.unwrap();
        assert_eq!(read(&path), "A1");

        refresher.shutdown().await;
    }

    #[test]
    fn period_within_half_the_lifetime_is_kept() {
        assert_eq!(
            effective_period(Duration::from_secs(15), DurationSecs(300)),
            Duration::from_secs(15)
        );
    }

    #[test]
    fn period_is_capped_at_half_the_lifetime() {
        assert_eq!(
            effective_period(Duration::from_secs(3600), DurationSecs(300)),
            Duration::from_secs(150)
        );
    }

    #[test]
    fn tiny_lifetime_does_not_cap_to_zero() {
        assert_eq!(
            effective_period(Duration::from_secs(15), DurationSecs(1)),
            Duration::from_secs(15)
        );
    }
}
