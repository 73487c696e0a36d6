use std::{error, fmt, sync::Arc, time::Duration};

use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    backoff::{ErrorBackoffConfig, ErrorBackoffHandler, WithBackoff},
    clock::{Clock, DurationSecs, System},
    AccessToken, AuthError, Credentials, IdentityClient, TokenState,
};

/// Renewal never fires more often than this, whatever the refresh token's
/// lifetime
const MIN_RENEWAL_DELAY: Duration = Duration::from_secs(1);

/// Where a [`Refresher`] is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefresherState {
    /// No token has been obtained yet
    Uninitialized,
    /// A token is available and the next renewal is scheduled
    Ready,
    /// A token is available and a renewal is in flight
    Refreshing,
    /// Obtaining or renewing the token failed; no token will be handed out
    Failed,
    /// The refresher was shut down
    Stopped,
}

/// The reason no access token can be handed out
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TokenUnavailable {
    /// The refresher has not obtained its first token
    #[error("no token has been obtained yet")]
    NotInitialized,
    /// Obtaining or renewing the token failed
    #[error("token renewal failed")]
    Failed(#[source] AuthError),
    /// The refresher is no longer renewing tokens
    #[error("token renewal has stopped")]
    Stopped,
}

#[derive(Clone, Debug)]
enum Phase {
    Uninitialized,
    Ready(Arc<TokenState>),
    Refreshing(Arc<TokenState>),
    Failed(AuthError),
    Stopped,
}

impl Phase {
    fn state(&self) -> RefresherState {
        match self {
            Self::Uninitialized => RefresherState::Uninitialized,
            Self::Ready(_) => RefresherState::Ready,
            Self::Refreshing(_) => RefresherState::Refreshing,
            Self::Failed(_) => RefresherState::Failed,
            Self::Stopped => RefresherState::Stopped,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Stopped)
    }

    fn token(&self) -> Result<Arc<TokenState>, TokenUnavailable> {
        match self {
            Self::Ready(token) | Self::Refreshing(token) => Ok(Arc::clone(token)),
            Self::Uninitialized => Err(TokenUnavailable::NotInitialized),
            Self::Failed(error) => Err(TokenUnavailable::Failed(error.clone())),
            Self::Stopped => Err(TokenUnavailable::Stopped),
        }
    }
}

/// A cheap, cloneable view of the token published by a [`Refresher`]
///
/// Reads never wait on the identity provider: they return whatever the
/// last successful exchange or renewal produced.
#[derive(Clone, Debug)]
pub struct TokenHandle {
    rx: watch::Receiver<Phase>,
}

impl TokenHandle {
    /// Gets the refresher's lifecycle state
    pub fn state(&self) -> RefresherState {
        let state = self.rx.borrow().state();
        match state {
            RefresherState::Ready | RefresherState::Refreshing if self.is_orphaned() => {
                RefresherState::Stopped
            }
            state => state,
        }
    }

    /// Gets the current token snapshot
    ///
    /// Fails once the refresher has failed or stopped, rather than handing
    /// out a token that will never be renewed.
    pub fn token(&self) -> Result<Arc<TokenState>, TokenUnavailable> {
        let token = self.rx.borrow().token()?;
        if self.is_orphaned() {
            return Err(TokenUnavailable::Stopped);
        }
        Ok(token)
    }

    /// Gets the current access token
    ///
    /// The token is returned as last published; it is not checked against
    /// its expiry time.
    pub fn get_access_token(&self) -> Result<AccessToken, TokenUnavailable> {
        Ok(self.token()?.access_token().to_owned())
    }

    /// Gets the access token lifetime reported with the current token
    pub fn get_access_token_ttl(&self) -> Result<DurationSecs, TokenUnavailable> {
        Ok(self.token()?.access_token_ttl())
    }

    /// Gets the delay between renewals for the current token
    pub fn refresh_interval(&self) -> Result<DurationSecs, TokenUnavailable> {
        Ok(self.token()?.refresh_interval())
    }

    /// Waits until the refresher publishes a change
    ///
    /// Returns an error once nothing more will ever be published.
    pub async fn changed(&mut self) -> Result<(), TokenUnavailable> {
        self.rx
            .changed()
            .await
            .map_err(|_| TokenUnavailable::Stopped)
    }

    /// Waits until the refresher can no longer hand out tokens and returns
    /// the reason
    pub async fn wait_for_failure(&self) -> TokenUnavailable {
        let mut rx = self.rx.clone();
        loop {
            match self.token() {
                Err(TokenUnavailable::NotInitialized) | Ok(_) => {}
                Err(reason) => return reason,
            }

            if rx.changed().await.is_err() {
                return match self.token() {
                    Err(TokenUnavailable::NotInitialized) | Ok(_) => TokenUnavailable::Stopped,
                    Err(reason) => reason,
                };
            }
        }
    }

    /// The renewal task went away without publishing a terminal phase
    fn is_orphaned(&self) -> bool {
        self.rx.has_changed().is_err() && !self.rx.borrow().is_terminal()
    }
}

struct Startup<I, C> {
    client: I,
    clock: C,
    tx: watch::Sender<Phase>,
}

/// Fetches a token pair once, then keeps it renewed in the background
///
/// The refresh token is exchanged for a new pair every half of its
/// lifetime. A failure the configured backoff does not retry is final: the
/// refresher enters [`RefresherState::Failed`] and stops handing out tokens.
///
/// ```no_run
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// use token_fetch::{
///     config::{ConfigResolver, FileConfigProvider},
///     keycloak::KeycloakClient,
///     Credentials, Refresher,
/// };
///
/// let resolved = ConfigResolver::new()
///     .with_provider(FileConfigProvider::new("keycloak_config.yaml"))
///     .resolve()?;
/// let client = KeycloakClient::new(reqwest::Client::new(), &resolved.config)?;
///
/// let mut refresher = Refresher::new(client);
/// refresher
///     .initialize(&Credentials::new("jdoe", "hunter2"))
///     .await?;
///
/// let token = refresher.get_access_token()?;
/// # Ok(()) }
/// ```
pub struct Refresher<I, C = System> {
    startup: Option<Startup<I, C>>,
    handle: TokenHandle,
    backoff: ErrorBackoffConfig,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<I, C> fmt::Debug for Refresher<I, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Refresher")
            .field("state", &self.handle.state())
            .field("backoff", &self.backoff)
            .field("running", &self.task.is_some())
            .finish()
    }
}

impl<I> Refresher<I, System> {
    /// Constructs an uninitialized refresher using the system clock
    pub fn new(client: I) -> Self {
        let (tx, rx) = watch::channel(Phase::Uninitialized);

        Self {
            startup: Some(Startup {
                client,
                clock: System,
                tx,
            }),
            handle: TokenHandle { rx },
            backoff: ErrorBackoffConfig::default(),
            shutdown: CancellationToken::new(),
            task: None,
        }
    }
}

impl<I, C> Refresher<I, C> {
    /// Sets how renewal failures are retried
    ///
    /// The default is to never retry.
    pub fn with_backoff(mut self, backoff: ErrorBackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets a custom clock used to timestamp tokens
    ///
    /// Useful for testing purposes. Has no effect once initialized.
    pub fn with_clock<D>(self, clock: D) -> Refresher<I, D> {
        Refresher {
            startup: self.startup.map(|s| Startup {
                client: s.client,
                clock,
                tx: s.tx,
            }),
            handle: self.handle,
            backoff: self.backoff,
            shutdown: self.shutdown,
            task: self.task,
        }
    }

    /// Gets a cloneable handle for reading the token
    ///
    /// The handle starts out having seen the current phase.
    pub fn handle(&self) -> TokenHandle {
        let mut rx = self.handle.rx.clone();
        drop(rx.borrow_and_update());
        TokenHandle { rx }
    }

    /// Gets the refresher's lifecycle state
    pub fn state(&self) -> RefresherState {
        self.handle.state()
    }

    /// Gets the current token snapshot
    pub fn token(&self) -> Result<Arc<TokenState>, TokenUnavailable> {
        self.handle.token()
    }

    /// Gets the current access token
    pub fn get_access_token(&self) -> Result<AccessToken, TokenUnavailable> {
        self.handle.get_access_token()
    }

    /// Gets the access token lifetime reported with the current token
    pub fn get_access_token_ttl(&self) -> Result<DurationSecs, TokenUnavailable> {
        self.handle.get_access_token_ttl()
    }

    /// Gets the delay between renewals for the current token
    pub fn refresh_interval(&self) -> Result<DurationSecs, TokenUnavailable> {
        self.handle.refresh_interval()
    }

    /// Stops background renewal and waits for it to wind down
    ///
    /// Handles observe [`RefresherState::Stopped`] afterwards, unless the
    /// refresher had already failed.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();

        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                if err.is_panic() {
                    tracing::error!("token renewal panicked");
                }
            }
        } else if let Some(startup) = self.startup.take() {
            startup.tx.send_replace(Phase::Stopped);
        }

        tracing::info!("token refresher shut down");
    }
}

impl<I, C> Refresher<I, C>
where
    I: IdentityClient + 'static,
    C: Clock + Send + 'static,
{
    /// Performs the initial credential exchange and starts background renewal
    ///
    /// The exchange is not retried: bad credentials or configuration will not
    /// fix themselves. On failure the refresher enters
    /// [`RefresherState::Failed`] and no renewal is started.
    ///
    /// Calling this again after it has succeeded does nothing; after it has
    /// failed, the original error is returned.
    #[tracing::instrument(skip_all, fields(username = %credentials.username))]
    pub async fn initialize(&mut self, credentials: &Credentials) -> Result<(), AuthError> {
        let Some(startup) = self.startup.take() else {
            let phase = self.handle.rx.borrow().clone();
            return match phase {
                Phase::Failed(error) => Err(error),
                _ => Ok(()),
            };
        };

        tracing::debug!("exchanging credentials for initial tokens");

        let pair = match startup.client.exchange(credentials).await {
            Ok(pair) => pair,
            Err(error) => {
                tracing::error!(
                    error = (&error as &dyn error::Error),
                    "initial token exchange failed"
                );
                startup.tx.send_replace(Phase::Failed(error.clone()));
                return Err(error);
            }
        };

        let token = Arc::new(pair.into_state(startup.clock.now()));

        tracing::info!(
            access_token_ttl = token.access_token_ttl().0,
            refresh_token_ttl = token.refresh_token_ttl().0,
            refresh_interval = token.refresh_interval().0,
            "obtained initial tokens"
        );

        startup.tx.send_replace(Phase::Ready(Arc::clone(&token)));

        self.task = Some(tokio::spawn(renew_forever(
            startup.client,
            startup.clock,
            startup.tx,
            token,
            self.backoff.clone(),
            self.shutdown.clone(),
        )));

        Ok(())
    }
}

async fn renew_forever<I, C>(
    client: I,
    clock: C,
    tx: watch::Sender<Phase>,
    mut current: Arc<TokenState>,
    backoff_config: ErrorBackoffConfig,
    shutdown: CancellationToken,
) where
    I: IdentityClient,
    C: Clock,
{
    let mut backoff_handler = ErrorBackoffHandler::new(backoff_config);
    let mut delay = Duration::from(current.refresh_interval()).max(MIN_RENEWAL_DELAY);

    loop {
        tracing::debug!(delay_secs = delay.as_secs(), "waiting until renewal is due");

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                tracing::info!("token renewal cancelled");
                tx.send_replace(Phase::Stopped);
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        if tx.send(Phase::Refreshing(Arc::clone(&current))).is_err() {
            tracing::info!("no one is listening for token renewals anymore, halting renewals");
            return;
        }

        tracing::debug!("renewing tokens");

        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                tracing::info!("token renewal cancelled while in flight");
                tx.send_replace(Phase::Stopped);
                return;
            }
            result = client.refresh(current.refresh_token()) => result,
        };

        match result.with_backoff(&mut backoff_handler) {
            Ok(pair) => {
                let token = Arc::new(pair.into_state(clock.now()));

                tracing::info!(
                    access_token_ttl = token.access_token_ttl().0,
                    refresh_interval = token.refresh_interval().0,
                    next_refresh = token.next_refresh().0,
                    "renewed tokens"
                );

                if tx.send(Phase::Ready(Arc::clone(&token))).is_err() {
                    tracing::info!(
                        "no one is listening for token renewals anymore, halting renewals"
                    );
                    return;
                }

                delay = Duration::from(token.refresh_interval()).max(MIN_RENEWAL_DELAY);
                current = token;
            }
            Err((error, Some(retry))) if error.is_transient() => {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    delay_ms = retry.as_millis() as u64,
                    "error renewing tokens, will retry"
                );
                delay = retry;
            }
            Err((error, _)) => {
                tracing::error!(
                    error = (&error as &dyn error::Error),
                    "error renewing tokens, giving up"
                );
                tx.send_replace(Phase::Failed(error));
                return;
            }
        }
    }
}
