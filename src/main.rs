use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;
use fuse_backend_rs::api::server::Server;
use fuse_backend_rs::transport::FuseSession;
use tracing_subscriber::EnvFilter;

use gitrofs::fs::GitRoFs;
use gitrofs::repo::Repository;

#[derive(Debug, Parser)]
#[command(
    name = "gitrofs",
    version,
    about = "Mounts a local Git repository and exposes its commits and blobs as folders and files"
)]
struct Cli {
    /// Path to the Git repository (.git dir or bare repo).
    repo: PathBuf,

    /// Mount point for the FUSE filesystem.
    mountpoint: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let repo = Repository::open(&cli.repo)?;
    let fs = GitRoFs::new(repo);

    tracing::info!(
        "gitrofs starting (repo: {}, mountpoint: {})",
        cli.repo.display(),
        cli.mountpoint.display()
    );

    let mut session = FuseSession::new(&cli.mountpoint, "gitrofs", "", true)
        .map_err(|err| anyhow!("failed to create FUSE session: {err}"))?;
    session
        .mount()
        .map_err(|err| anyhow!("failed to mount {}: {err}", cli.mountpoint.display()))?;

    let mut channel = session
        .new_channel()
        .map_err(|err| anyhow!("failed to open FUSE channel: {err}"))?;
    let server = Server::new(fs);

    loop {
        match channel.get_request() {
            Ok(Some((reader, writer))) => {
                if let Err(err) = server.handle_message(reader, writer.into(), None, None) {
                    match err {
                        // the session is gone; stop serving
                        fuse_backend_rs::Error::EncodeMessage(_) => break,
                        other => {
                            tracing::warn!("failed to handle FUSE request: {other}");
                            continue;
                        }
                    }
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::warn!("failed to read FUSE request: {err}");
                break;
            }
        }
    }

    session
        .umount()
        .map_err(|err| anyhow!("failed to unmount {}: {err}", cli.mountpoint.display()))?;

    tracing::info!("gitrofs stopped");
    Ok(())
}
