use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use filebox_core::{AuthClient, FileKind, ListQuery, Preview, SortBy, SortOrder};
use filebox_sync::config::SyncConfig;
use filebox_sync::logging;
use filebox_sync::session::{Session, SyncSession};
use filebox_sync::sync::engine::{SyncEngine, SyncMode};
use filebox_sync::sync::remote::RemoteDirectory;
use filebox_sync::sync::watch::run_watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "filebox-sync", version, about = "Sync a local folder with a Filebox server")]
struct Cli {
    /// Overrides FILEBOX_API_URL.
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// Overrides FILEBOX_LOG.
    #[arg(long, global = true)]
    log: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Reconcile the sync folder with the server.
    Sync {
        /// upload_only, download_only or bidirectional.
        #[arg(long)]
        mode: Option<String>,
        #[arg(long)]
        folder: Option<PathBuf>,
        /// Repeat the pass until interrupted.
        #[arg(long)]
        watch: bool,
        /// Seconds between watch passes.
        #[arg(long)]
        interval: Option<u64>,
        /// Print the result report as JSON.
        #[arg(long)]
        json: bool,
    },
    List {
        #[arg(long, value_enum, default_value_t = KindArg::All)]
        kind: KindArg,
        #[arg(long, value_enum, default_value_t = SortArg::CreatedAt)]
        sort_by: SortArg,
        #[arg(long, value_enum, default_value_t = OrderArg::Desc)]
        order: OrderArg,
    },
    Upload {
        path: PathBuf,
    },
    Download {
        id: i64,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    Delete {
        id: i64,
    },
    Preview {
        id: i64,
        /// Where to write image previews.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print an access token for FILEBOX_TOKEN.
    Login {
        username: String,
        #[arg(long, env = "FILEBOX_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Register {
        username: String,
        #[arg(long, env = "FILEBOX_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    All,
    Py,
    Jpg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortArg {
    CreatedAt,
    UpdatedAt,
    Uploader,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OrderArg {
    Asc,
    Desc,
}

impl From<KindArg> for FileKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::All => FileKind::All,
            KindArg::Py => FileKind::Py,
            KindArg::Jpg => FileKind::Jpg,
        }
    }
}

impl From<SortArg> for SortBy {
    fn from(value: SortArg) -> Self {
        match value {
            SortArg::CreatedAt => SortBy::CreatedAt,
            SortArg::UpdatedAt => SortBy::UpdatedAt,
            SortArg::Uploader => SortBy::Uploader,
        }
    }
}

impl From<OrderArg> for SortOrder {
    fn from(value: OrderArg) -> Self {
        match value {
            OrderArg::Asc => SortOrder::Asc,
            OrderArg::Desc => SortOrder::Desc,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let mut config = SyncConfig::from_env()?;
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url;
    }
    if let Some(level) = cli.log {
        config.log_level = level;
    }
    logging::init(&config.log_level);

    match cli.command {
        Command::Login { username, password } => {
            let session = Session::login(&config.api_url, &username, &password).await?;
            println!("{}", session.token);
        }
        Command::Register { username, password } => {
            AuthClient::new(&config.api_url)?
                .register(&username, &password)
                .await
                .context("registration failed")?;
            println!("registered {username}");
        }
        Command::Sync {
            mode,
            folder,
            watch,
            interval,
            json,
        } => {
            let mode = match mode {
                Some(value) => value.parse::<SyncMode>()?,
                None => config.mode,
            };
            let folder = folder.unwrap_or_else(|| config.sync_dir.clone());
            let interval = interval
                .filter(|secs| *secs > 0)
                .map(std::time::Duration::from_secs)
                .unwrap_or(config.watch_interval);
            let session = Session::resolve(&config).await?;
            let sync = SyncSession::new(SyncEngine::new(session.client()?, folder.clone()));
            tracing::info!(%mode, folder = %folder.display(), api_url = %session.api_url, "starting sync");

            if watch {
                let cancel = CancellationToken::new();
                let on_signal = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("interrupt received, stopping after current pass");
                        on_signal.cancel();
                    }
                });
                run_watch(&sync, mode, interval, cancel).await;
            } else {
                let result = sync.try_sync(mode).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                } else {
                    print!("{result}");
                }
            }
        }
        Command::List {
            kind,
            sort_by,
            order,
        } => {
            let client = Session::resolve(&config).await?.client()?;
            let files = client
                .list_files(&ListQuery {
                    kind: kind.into(),
                    sort_by: sort_by.into(),
                    order: order.into(),
                })
                .await?;
            for file in files {
                println!(
                    "{:>6}  {:<40}  {:<26}  {}",
                    file.id,
                    file.name,
                    file.updated_at.as_deref().unwrap_or("-"),
                    file.uploader.as_deref().unwrap_or("-")
                );
            }
        }
        Command::Upload { path } => {
            let client = Session::resolve(&config).await?.client()?;
            let created = client
                .upload_path(&path)
                .await
                .with_context(|| format!("failed to upload {}", path.display()))?;
            match created {
                Some(created) => println!("uploaded {} as #{}", created.name, created.id),
                None => println!("uploaded {}", path.display()),
            }
        }
        Command::Download { id, out } => {
            let remote = RemoteDirectory::new(Session::resolve(&config).await?.client()?);
            let listing = remote.client().list_files(&ListQuery::default()).await?;
            let descriptor = listing
                .into_iter()
                .find(|file| file.id == id)
                .with_context(|| format!("no file with id {id}"))?;
            let target = out.unwrap_or_else(|| PathBuf::from(&descriptor.name));
            remote
                .download_one(&descriptor, &target)
                .await
                .with_context(|| format!("failed to download #{id}"))?;
            println!("saved {}", target.display());
        }
        Command::Delete { id } => {
            let client = Session::resolve(&config).await?.client()?;
            client.delete_file(id).await?;
            println!("deleted #{id}");
        }
        Command::Preview { id, out } => {
            let client = Session::resolve(&config).await?.client()?;
            match client.preview_file(id).await? {
                Preview::Text { name, content } => {
                    eprintln!("--- {name}");
                    print!("{content}");
                }
                Preview::Image {
                    content_type,
                    bytes,
                } => match out {
                    Some(out) => {
                        tokio::fs::write(&out, &bytes)
                            .await
                            .with_context(|| format!("failed to write {}", out.display()))?;
                        println!("saved {content_type} preview to {}", out.display());
                    }
                    None => println!("{content_type}, {} bytes (use --out to save)", bytes.len()),
                },
            }
        }
    }
    Ok(())
}
