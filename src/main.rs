use std::{
    fmt::Display,
    fs::{self, File},
    io::{self, BufReader},
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
    time::Duration,
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Parser, Subcommand};
use futures::future;
use log::debug;
use tokio::sync::Mutex;
use tokio::time;

use api::{ApiError, Post, SocmediaClient};
use config::{Config, SessionCache};
use feed::{FeedSynchronizer, RefreshTask, EMOJI_PALETTE};
use session::Session;

mod api;
mod config;
mod feed;
mod notify;
mod session;

#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Path to configuration file.
    #[arg(long, default_value = ".socfeed.yml")]
    config: PathBuf,

    /// Path to session cache file.
    #[arg(long, default_value = ".session.socfeed.json")]
    session_cache: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an account and start a session
    Register {
        username: String,
        email: String,
        password: String,
    },
    /// Start a session
    Login { email: String, password: String },
    /// End the current session
    Logout,
    /// Show the signed-in user
    Profile,
    /// Print the feed
    Feed {
        /// Local case-insensitive filter on post content and author
        #[arg(long)]
        search: Option<String>,
    },
    /// Publish a post
    Post {
        content: String,
        /// Attach a local image file, inlined as a data URL
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Comment on a post
    Comment { post_id: String, text: String },
    /// React to a post with an emoji; one active reaction per post
    React { post_id: String, emoji: String },
    /// Poll the feed and print activity until interrupted
    Watch {
        /// Refresh period in seconds
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let Args {
        config,
        session_cache,
        command,
    } = Args::parse();

    let cfg: Config = 'brk: {
        let file = match File::open(&config) {
            Ok(f) => BufReader::new(f),
            Err(e) if e.kind() == io::ErrorKind::NotFound => break 'brk Config::default(),
            Err(e) => {
                eprintln!("Failed to open config: {e}");
                return ExitCode::FAILURE;
            }
        };

        match serde_yaml::from_reader(file) {
            Ok(v) => v,
            Err(e) => {
                eprintln!("Failed to parse config: {e}");
                return ExitCode::FAILURE;
            }
        }
    };

    let mut cache: SessionCache = 'brk: {
        let file = match File::open(&session_cache) {
            Ok(f) => BufReader::new(f),
            Err(e) if e.kind() == io::ErrorKind::NotFound => break 'brk SessionCache::new(),
            Err(e) => {
                eprintln!("Failed to open session cache: {e}");
                return ExitCode::FAILURE;
            }
        };

        match serde_json::from_reader(file) {
            Ok(v) => v,
            Err(e) => {
                eprintln!("Warning: Failed to parse session cache: {e}");

                SessionCache::new()
            }
        }
    };

    let api = SocmediaClient::new(cfg.api_base.clone());
    let outcome = run(command, &cfg, api, &mut cache).await;

    if matches!(outcome, Err(ApiError::Unauthorized)) {
        cache.token = None;
    }
    if let Ok(data) = serde_json::to_string(&cache) {
        if let Err(e) = fs::write(&session_cache, data) {
            eprintln!("Failed to write session cache: {e}");
        }
    } else {
        eprintln!("Failed to serialize session cache");
    }

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            if matches!(e, ApiError::Unauthorized) {
                eprintln!("Sign in with `socfeed login <email> <password>`.");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(
    command: Command,
    cfg: &Config,
    api: SocmediaClient,
    cache: &mut SessionCache,
) -> Result<(), ApiError> {
    match command {
        Command::Register {
            username,
            email,
            password,
        } => {
            let session = Session::register(&api, &username, &email, &password).await?;
            cache.token = Some(session.token.clone());
            println!("Account created. Signed in as {}.", session.user.username);
            Ok(())
        }
        Command::Login { email, password } => {
            let session = Session::login(&api, &email, &password).await?;
            cache.token = Some(session.token.clone());
            println!("Signed in as {}.", session.user.username);
            Ok(())
        }
        Command::Logout => {
            cache.token = None;
            println!("Signed out.");
            Ok(())
        }
        Command::Profile => {
            let Some(token) = cache.token.clone() else {
                return Err(ApiError::Unauthorized);
            };
            match Session::restore(&api, &token).await? {
                Some(session) => {
                    println!("{} <{}>", session.user.username, session.user.email);
                    println!("id: {}", session.user.id);
                    if let Some(avatar) = session.user.avatar {
                        println!("avatar: {avatar}");
                    }
                    Ok(())
                }
                None => {
                    cache.token = None;
                    Err(ApiError::Unauthorized)
                }
            }
        }
        Command::Feed { search } => {
            let sync = open_feed(api, cache)
                .await?
                .ok_or(ApiError::Unauthorized)?;
            let posts = match &search {
                Some(term) => sync.search(term),
                None => sync.posts(),
            };
            if posts.is_empty() {
                match &search {
                    Some(term) => println!("No results for \"{term}\"."),
                    None => println!("The feed is empty."),
                }
            }
            for post in &posts {
                println!("{}", RenderedPost(post));
            }
            Ok(())
        }
        Command::Post { content, image } => {
            let image = match image {
                Some(path) => match data_url(&path) {
                    Ok(url) => Some(url),
                    Err(e) => {
                        eprintln!("Failed to read image {}: {e}", path.display());
                        return Err(ApiError::Validation("unreadable image file"));
                    }
                },
                None => None,
            };
            let mut sync = open_feed(api, cache)
                .await?
                .ok_or(ApiError::Unauthorized)?;
            let post = sync.create_post(&content, image).await?;
            println!("Published post {}.", post.id);
            Ok(())
        }
        Command::Comment { post_id, text } => {
            let mut sync = open_feed(api, cache)
                .await?
                .ok_or(ApiError::Unauthorized)?;
            sync.add_comment(&post_id, &text).await?;
            println!("Commented on post {post_id}.");
            Ok(())
        }
        Command::React { post_id, emoji } => {
            if !EMOJI_PALETTE.contains(&emoji.as_str()) {
                eprintln!("Supported reactions: {}", EMOJI_PALETTE.join(" "));
                return Err(ApiError::Validation("unsupported reaction emoji"));
            }
            let mut sync = open_feed(api, cache)
                .await?
                .ok_or(ApiError::Unauthorized)?;
            sync.set_reaction(&post_id, &emoji).await?;
            println!("Reacted to post {post_id} with {emoji}.");
            Ok(())
        }
        Command::Watch { interval } => {
            let sync = open_feed(api, cache)
                .await?
                .ok_or(ApiError::Unauthorized)?;
            let period = Duration::from_secs(interval.unwrap_or(cfg.refresh_secs).max(1));
            println!(
                "Watching the feed (refresh every {}s, Ctrl-C to stop).",
                period.as_secs()
            );

            let sync = Arc::new(Mutex::new(sync));
            let task = RefreshTask::spawn(Arc::clone(&sync), period);

            let mut drain = time::interval(Duration::from_secs(1));
            let expired = loop {
                tokio::select! {
                    _ = drain.tick() => {
                        let mut sync = sync.lock().await;
                        for n in sync.drain_notifications() {
                            println!("[{}] {}", n.created_at.format("%H:%M:%S"), n.content);
                        }
                        if sync.session().is_none() {
                            break true;
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break false,
                }
            };
            task.stop().await;

            if expired {
                cache.token = None;
                return Err(ApiError::Unauthorized);
            }
            println!("Stopped.");
            Ok(())
        }
    }
}

/// Validate the cached token and prime the mirror, both in one round trip
/// pair. A rejected token is dropped from the cache.
async fn open_feed(
    api: SocmediaClient,
    cache: &mut SessionCache,
) -> Result<Option<FeedSynchronizer>, ApiError> {
    let Some(token) = cache.token.clone() else {
        return Ok(None);
    };
    match future::try_join(api.profile(&token), api.posts(&token)).await {
        Ok((user, posts)) => {
            let mut sync = FeedSynchronizer::new(api, Some(Session { user, token }));
            sync.seed(posts);
            Ok(Some(sync))
        }
        Err(ApiError::Unauthorized) => {
            debug!("cached token rejected, discarding it");
            cache.token = None;
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn data_url(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    let mime = match path.extension().and_then(|v| v.to_str()) {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    };
    Ok(format!("data:{mime};base64,{}", STANDARD.encode(bytes)))
}

struct RenderedPost<'a>(&'a Post);

impl Display for RenderedPost<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let post = self.0;
        write!(f, "{} · {}", post.id, post.username)?;
        if let Some(at) = &post.created_at {
            write!(f, " · {}", at.format("%Y-%m-%d %H:%M"))?;
        }
        writeln!(f)?;
        writeln!(f, "  {}", post.content)?;
        if let Some(image) = &post.image {
            if image.starts_with("data:") {
                writeln!(f, "  [inline image]")?;
            } else {
                writeln!(f, "  [image: {image}]")?;
            }
        }
        let mut counts: Vec<String> = post
            .reactions
            .iter()
            .filter(|(_, users)| !users.is_empty())
            .map(|(emoji, users)| format!("{emoji} {}", users.len()))
            .collect();
        counts.sort();
        if post.likes > 0 || !counts.is_empty() {
            writeln!(f, "  {} like(s)  {}", post.likes, counts.join("  "))?;
        }
        for comment in &post.comments {
            writeln!(f, "  > {}: {}", comment.username, comment.content)?;
        }
        Ok(())
    }
}
