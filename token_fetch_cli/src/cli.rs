use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use color_eyre::eyre::eyre;

use crate::duration::parse_duration;

/// Fetches an access token from a Keycloak realm and keeps it fresh
///
/// The token is written to a file (or the console) every refresh period
/// until the timeout elapses or the process is interrupted.
#[derive(Debug, Parser)]
#[command(name = "token-fetch", version, about)]
pub struct Opts {
    /// The user to authenticate as
    #[arg(short, long, env = "USER")]
    pub username: Option<String>,

    /// The user's password; prompted for if not given
    #[arg(long, env = "TOKEN_FETCH_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// File the access token is written to [default: $HOME/Token]
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Print the access token to the console instead of writing it to a file
    #[arg(long, conflicts_with = "output")]
    pub console: bool,

    /// How often the token is written out, as `{number}{unit}` with a unit of
    /// seconds, minutes, hours or days
    #[arg(
        short,
        long,
        value_name = "DURATION",
        default_value = "15",
        value_parser = parse_duration
    )]
    pub refresh_period: Duration,

    /// Stop after this long, in the same format as the refresh period
    #[arg(short, long, value_name = "DURATION", value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// YAML file with the SERVER_URL, CLIENT_ID and REALM_NAME of the
    /// identity provider
    #[arg(long, env = "TOKEN_FETCH_KEYCLOAK_CONFIG", value_name = "FILE")]
    pub keycloak_config: Option<PathBuf>,

    /// How many times a failed renewal is retried before giving up
    #[arg(long, value_name = "COUNT", default_value_t = 0)]
    pub renewal_retries: u32,
}

impl Opts {
    /// The file the token goes to, or `None` when printing to the console
    pub fn output_path(&self) -> color_eyre::Result<Option<PathBuf>> {
        output_path(self.console, self.output.as_deref(), dirs::home_dir())
    }
}

fn output_path(
    console: bool,
    output: Option<&Path>,
    home: Option<PathBuf>,
) -> color_eyre::Result<Option<PathBuf>> {
    if console {
        return Ok(None);
    }

    match (output, home) {
        (Some(output), _) => Ok(Some(output.to_owned())),
        (None, Some(home)) => Ok(Some(home.join("Token"))),
        (None, None) => Err(eyre!(
            "unable to determine the home directory for the default output file; \
             pass --output or --console"
        )),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_is_well_formed() {
        Opts::command().debug_assert();
    }

    #[test]
    fn refresh_period_defaults_to_fifteen_seconds() {
        let opts = Opts::try_parse_from(["token-fetch"]).unwrap();

        assert_eq!(opts.refresh_period, Duration::from_secs(15));
        assert_eq!(opts.timeout, None);
        assert_eq!(opts.renewal_retries, 0);
    }

    #[test]
    fn durations_accept_units() {
        let opts =
            Opts::try_parse_from(["token-fetch", "-r", "0.5h", "--timeout", "2 days"]).unwrap();

        assert_eq!(opts.refresh_period, Duration::from_secs(1800));
        assert_eq!(opts.timeout, Some(Duration::from_secs(172_800)));
    }

    #[test]
    fn bad_durations_are_rejected() {
        assert!(Opts::try_parse_from(["token-fetch", "-r", "3weeks"]).is_err());
        assert!(Opts::try_parse_from(["token-fetch", "-t", "0"]).is_err());
    }

    #[test]
    fn console_and_output_conflict() {
        assert!(Opts::try_parse_from(["token-fetch", "--console", "-o", "token.txt"]).is_err());
    }

    #[test]
    fn explicit_output_is_used() {
        let opts = Opts::try_parse_from(["token-fetch", "-o", "token.txt"]).unwrap();
        assert_eq!(
            opts.output_path().unwrap(),
            Some(PathBuf::from("token.txt"))
        );

        let opts = Opts::try_parse_from(["token-fetch", "--console"]).unwrap();
        assert_eq!(opts.output_path().unwrap(), None);
    }

    #[test]
    fn default_output_lives_in_home() {
        assert_eq!(
            output_path(false, None, Some(PathBuf::from("/home/jdoe"))).unwrap(),
            Some(PathBuf::from("/home/jdoe/Token"))
        );
    }

    #[test]
    fn missing_home_without_output_is_an_error() {
        assert!(output_path(false, None, None).is_err());
        assert_eq!(output_path(true, None, None).unwrap(), None);
        assert_eq!(
            output_path(false, Some(Path::new("token.txt")), None).unwrap(),
            Some(PathBuf::from("token.txt"))
        );
    }
}
