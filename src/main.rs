use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use sift::storage::DatabaseError;
use sift::util::build_client;
use sift::{Config, Credentials, Database, FeedItem, FeedStore, SessionManager};

/// Get the config directory path (~/.config/sift/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("sift"))
}

#[derive(Parser, Debug)]
#[command(name = "sift", about = "Session-aware client for Reddit-style listing feeds")]
struct Args {
    /// Config file (defaults to ~/.config/sift/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and persist the session
    Login(CredentialArgs),
    /// Create an account and log in
    Register(CredentialArgs),
    /// End the session (always clears the local copy)
    Logout,
    /// Exchange the refresh cookie for a new access token
    Refresh,
    /// Show the persisted user
    Whoami,
    /// Page through a topic's listing
    Feed {
        /// Topic to list (defaults to the configured default topic)
        #[arg(long)]
        topic: Option<String>,
        /// Number of pages to fetch
        #[arg(long, default_value_t = 1)]
        pages: u32,
        /// Print items as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a single item
    Show {
        id: String,
        #[arg(long)]
        topic: Option<String>,
    },
}

#[derive(ClapArgs, Debug)]
struct CredentialArgs {
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    name: Option<String>,
    /// Username or other identifier accepted by the identity service
    #[arg(long)]
    identifier: Option<String>,
    /// Password (falls back to the SIFT_PASSWORD environment variable)
    #[arg(long, env = "SIFT_PASSWORD", hide_env_values = true)]
    password: String,
}

impl From<CredentialArgs> for Credentials {
    fn from(args: CredentialArgs) -> Self {
        Credentials {
            name: args.name,
            email: args.email,
            identifier: args.identifier,
            password: args.password,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    // The session database holds a bearer token: user-only access
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) =
            std::fs::set_permissions(&config_dir, std::fs::Permissions::from_mode(0o700))
        {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = match &config.database_path {
        Some(path) => PathBuf::from(path),
        None => config_dir.join("session.db"),
    };
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of sift appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let client = build_client().context("Failed to build HTTP client")?;
    let session =
        SessionManager::new(client.clone(), db, &config).context("Invalid auth configuration")?;
    session.initialize().await;

    match args.command {
        Command::Login(creds) => {
            let user = session.login(&creds.into()).await?;
            println!("Logged in as {} <{}>", user.name, user.email);
        }
        Command::Register(creds) => {
            let user = session.register(&creds.into()).await?;
            println!("Registered and logged in as {} <{}>", user.name, user.email);
        }
        Command::Logout => {
            if let Err(e) = session.logout().await {
                eprintln!("Warning: {}", e);
            }
            println!("Logged out.");
        }
        Command::Refresh => {
            session.refresh_access_token().await?;
            println!("Access token refreshed.");
        }
        Command::Whoami => match session.user() {
            Some(user) if session.is_logged_in() => {
                println!("{} <{}> (id {})", user.name, user.email, user.id)
            }
            _ => println!("Not logged in."),
        },
        Command::Feed { topic, pages, json } => {
            require_login(&session)?;
            let feed = FeedStore::new(client, &config).context("Invalid feed configuration")?;
            let topic = topic.unwrap_or_else(|| config.default_topic.clone());

            for _ in 0..pages.max(1) {
                let added = feed.fetch_next_page(&topic).await?;
                tracing::debug!(added = added, cursor = ?feed.cursor(), "Fetched page");
                if feed.is_exhausted() {
                    break;
                }
            }

            let items = feed.items();
            if json {
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                for item in &items {
                    print_item_line(item);
                }
                if feed.is_exhausted() {
                    println!("-- end of listing --");
                }
            }
        }
        Command::Show { id, topic } => {
            require_login(&session)?;
            let mut config = config;
            if let Some(topic) = topic {
                config.default_topic = topic;
            }
            let feed = FeedStore::new(client, &config).context("Invalid feed configuration")?;
            let item = feed.fetch_item_by_id(&id).await?;
            print_item_detail(&item);
        }
    }

    Ok(())
}

/// Feed views are only reachable with a live session.
fn require_login(session: &SessionManager) -> Result<()> {
    if !session.is_logged_in() {
        anyhow::bail!("Not logged in. Run `sift login` first.");
    }
    Ok(())
}

fn print_item_line(item: &FeedItem) {
    println!(
        "{:>8}  {:>5}  {}  (u/{}, {} comments)",
        item.id, item.score, item.title, item.author, item.comment_count
    );
}

fn print_item_detail(item: &FeedItem) {
    println!("{}", item.title);
    println!("by u/{} in {}", item.author, item.topic);
    if let Some(created) = item.created_at_utc() {
        println!("posted {}", created.format("%Y-%m-%d %H:%M UTC"));
    }
    println!("{} points, {} comments", item.score, item.comment_count);
    println!("link: {}", item.link_url);
    if item.is_direct_image() {
        println!("(image)");
    }
    if item.has_thumbnail() {
        println!("thumbnail: {}", item.thumbnail_url);
    }
    if !item.body_text.is_empty() {
        println!();
        println!("{}", item.body_text);
    }
}
