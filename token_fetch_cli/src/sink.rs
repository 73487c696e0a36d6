//! Where the access token is presented

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};

use tokio::{fs, io::AsyncWriteExt};
use token_fetch::AccessTokenRef;

/// A destination for the current access token
#[derive(Debug)]
pub enum Sink {
    /// Overwrites a file with the token on every write
    File(PathBuf),
    /// Clears the terminal and prints the token
    Console,
}

impl Sink {
    /// Presents `token`, replacing whatever was presented before
    pub async fn write(&mut self, token: &AccessTokenRef) -> io::Result<()> {
        match self {
            Self::File(path) => write_file(path, token).await,
            Self::Console => {
                let mut stdout = io::stdout().lock();
                writeln!(stdout, "\x1B[2J\x1B[1;1H{}", token.as_str())?;
                stdout.flush()
            }
        }
    }

    /// Removes a previously presented token
    pub async fn retract(&mut self) -> io::Result<()> {
        match self {
            Self::File(path) => match fs::remove_file(path.as_path()).await {
                Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
                _ => Ok(()),
            },
            Self::Console => Ok(()),
        }
    }
}

/// Writes the token to `path`, readable and writable by its owner only
async fn write_file(path: &Path, token: &AccessTokenRef) -> io::Result<()> {
    let mut opts = fs::OpenOptions::new();
    opts.create(true).truncate(true).write(true);

    #[cfg(unix)]
    opts.mode(0o600);

    let mut file = opts.open(path).await?;

    // The mode above only applies to newly created files.
    #[cfg(unix)]
    file.set_permissions(std::fs::Permissions::from_mode(0o600))
        .await?;

    file.write_all(token.as_str().as_bytes()).await?;
    file.flush().await?;

    tracing::debug!(path = %path.display(), "wrote access token");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_holds_only_the_latest_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Token");
        let mut sink = Sink::File(path.clone());

        sink.write(AccessTokenRef::from_static("a-much-longer-first-token"))
            .await
            .unwrap();
        sink.write(AccessTokenRef::from_static("A2")).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "A2");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_is_private_to_its_owner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Token");
        let mut sink = Sink::File(path.clone());

        sink.write(AccessTokenRef::from_static("A1")).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn existing_loose_file_is_tightened() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Token");
        std::fs::write(&path, "old").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        let mut sink = Sink::File(path.clone());

        sink.write(AccessTokenRef::from_static("A1")).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "A1");
    }

    #[tokio::test]
    async fn retract_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Token");
        let mut sink = Sink::File(path.clone());

        sink.write(AccessTokenRef::from_static("A1")).await.unwrap();
        sink.retract().await.unwrap();
        assert!(!path.exists());

        sink.retract().await.unwrap();
    }
}
