use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "vigil", about = "Vigil continuous identity verification CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session_bus: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll the single face in an image as a user's baseline
    Enroll {
        user: String,
        image: PathBuf,
    },
    /// Print a user's baseline embedding
    Baseline {
        user: String,
    },
    /// Delete a user's enrollment
    Forget {
        user: String,
    },
    /// Submit one frame to a verification session
    Submit {
        user: String,
        image: PathBuf,
        /// Session id (a new UUID when omitted)
        #[arg(short, long)]
        session: Option<String>,
        /// Frame timestamp (current Unix time in milliseconds when omitted)
        #[arg(short, long)]
        timestamp: Option<i64>,
    },
    /// Show presence statistics for a session
    #[command(name = "result")]
    Report {
        session: String,
    },
    /// End a session and discard its samples
    End {
        session: String,
    },
    /// Find the enrolled users closest to the face in an image
    Search {
        image: PathBuf,
        #[arg(short, long, default_value_t = 5)]
        n: u32,
    },
    /// Distance between a user's baseline and an image
    Distance {
        user: String,
        image: PathBuf,
    },
    /// Compare a sequence of frames (files, or one directory) against a user
    Video {
        user: String,
        #[arg(required = true)]
        frames: Vec<PathBuf>,
    },
    /// Show daemon status
    Status,
}

// `#[zbus::proxy]` generates `VigilProxy` (async) and `VigilProxyBlocking`.
#[zbus::proxy(
    interface = "org.freedesktop.Vigil1",
    default_service = "org.freedesktop.Vigil1",
    default_path = "/org/freedesktop/Vigil1"
)]
trait Vigil {
    async fn submit_frame(&self, session_id: &str, user_id: &str, timestamp: i64, image: &[u8]) -> zbus::Result<bool>;
    async fn get_session_result(&self, session_id: &str) -> zbus::Result<String>;
    async fn delete_session(&self, session_id: &str) -> zbus::Result<()>;
    async fn enroll(&self, user_id: &str, image: &[u8]) -> zbus::Result<()>;
    async fn get_baseline(&self, user_id: &str) -> zbus::Result<Vec<f64>>;
    async fn delete_enrollment(&self, user_id: &str) -> zbus::Result<()>;
    async fn search_by_image(&self, image: &[u8], n: u32) -> zbus::Result<String>;
    async fn image_distance(&self, user_id: &str, image: &[u8]) -> zbus::Result<f64>;
    async fn video_distance(&self, user_id: &str, frames: Vec<Vec<u8>>) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.session_bus {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("cannot connect to D-Bus")?;
    let proxy = VigilProxy::new(&conn)
        .await
        .context("vigild is not reachable")?;

    match cli.command {
        Commands::Enroll { user, image } => {
            proxy.enroll(&user, &read_image(&image)?).await?;
            println!("Enrolled {user}");
        }
        Commands::Baseline { user } => {
            let values = proxy.get_baseline(&user).await?;
            println!("{}", serde_json::to_string(&values)?);
        }
        Commands::Forget { user } => {
            proxy.delete_enrollment(&user).await?;
            println!("Removed enrollment for {user}");
        }
        Commands::Submit {
            user,
            image,
            session,
            timestamp,
        } => {
            let session = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let timestamp = timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
            let recorded = proxy
                .submit_frame(&session, &user, timestamp, &read_image(&image)?)
                .await?;
            println!(
                "{}",
                serde_json::json!({
                    "session_id": session,
                    "timestamp": timestamp,
                    "recorded": recorded,
                })
            );
        }
        Commands::Report { session } => {
            print_json(&proxy.get_session_result(&session).await?)?;
        }
        Commands::End { session } => {
            proxy.delete_session(&session).await?;
            println!("Ended session {session}");
        }
        Commands::Search { image, n } => {
            print_json(&proxy.search_by_image(&read_image(&image)?, n).await?)?;
        }
        Commands::Distance { user, image } => {
            let distance = proxy.image_distance(&user, &read_image(&image)?).await?;
            println!("{distance:.6}");
        }
        Commands::Video { user, frames } => {
            let paths = frame_paths(&frames)?;
            tracing::debug!(frames = paths.len(), "reading video frames");
            let frames = paths.iter().map(|p| read_image(p)).collect::<Result<Vec<_>>>()?;
            print_json(&proxy.video_distance(&user, frames).await?)?;
        }
        Commands::Status => {
            print_json(&proxy.status().await?)?;
        }
    }

    Ok(())
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))
}

/// A single directory expands to its files sorted by name; anything else is
/// taken as an explicit list of frames in order.
fn frame_paths(args: &[PathBuf]) -> Result<Vec<PathBuf>> {
    match args {
        [dir] if dir.is_dir() => {
            let mut paths = std::fs::read_dir(dir)
                .with_context(|| format!("cannot list {}", dir.display()))?
                .map(|entry| entry.map(|e| e.path()))
                .collect::<std::io::Result<Vec<_>>>()?;
            paths.retain(|p| p.is_file());
            paths.sort();
            if paths.is_empty() {
                bail!("no frames in {}", dir.display());
            }
            Ok(paths)
        }
        _ => Ok(args.to_vec()),
    }
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_submit_defaults() {
        let cli = Cli::parse_from(["vigil", "--session-bus", "submit", "alice", "frame.png"]);
        assert!(cli.session_bus);
        match cli.command {
            Commands::Submit { session, timestamp, .. } => {
                assert!(session.is_none());
                assert!(timestamp.is_none());
            }
            _ => panic!("expected submit"),
        }
    }

    #[test]
    fn test_frame_dir_sorted_by_name() {
        let dir = std::env::temp_dir().join(format!("vigil-cli-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        for name in ["frame_003.png", "frame_001.png", "frame_002.png"] {
            std::fs::write(dir.join(name), b"x").unwrap();
        }

        let paths = frame_paths(std::slice::from_ref(&dir)).unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["frame_001.png", "frame_002.png", "frame_003.png"]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_explicit_frames_keep_order() {
        let args = vec![PathBuf::from("b.png"), PathBuf::from("a.png")];
        assert_eq!(frame_paths(&args).unwrap(), args);
    }
}
