//! Skythread - read Bluesky threads and scan timelines from the terminal
#![allow(clippy::uninlined_format_args)]

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use skythread::api::{ApiContext, ReqwestTransport};
use skythread::models::{AnyPost, Post};
use skythread::services::{HashtagPager, LikeStats, PostingStats, QuotesPager, ThreadLoader, TimelineSearch};
use skythread::store::{EncryptedFileStore, SharedStore};
use skythread::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (RUST_LOG=debug for verbose output)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let command = parse_args()?;
    match command {
        Command::Help => {
            print_help();
            return Ok(());
        }
        Command::Version => {
            print_version();
            return Ok(());
        }
        _ => {}
    }

    let context = Arc::new(open_context()?);

    match command {
        Command::Login { identifier } => login(&context, &identifier).await,
        Command::Logout => {
            context.log_out()?;
            println!("✓ Logged out");
            Ok(())
        }
        Command::Thread { url } => show_thread(context, &url).await,
        Command::Hidden { url } => show_hidden_replies(context, &url).await,
        Command::Quotes { url } => show_quotes(context, &url).await,
        Command::Hashtag { tag } => show_hashtag(&context, &tag).await,
        Command::Lists => show_lists(&context).await,
        Command::Stats { days } => show_posting_stats(&context, days).await,
        Command::Likes { days } => show_like_stats(&context, days).await,
        Command::Search { days, query } => search_timeline(&context, days, &query).await,
        Command::Help | Command::Version => Ok(()),
    }
}

/// CLI commands
enum Command {
    Login { identifier: String },
    Logout,
    Thread { url: String },
    Hidden { url: String },
    Quotes { url: String },
    Hashtag { tag: String },
    Lists,
    Stats { days: f64 },
    Likes { days: f64 },
    Search { days: f64, query: String },
    Help,
    Version,
}

fn parse_args() -> Result<Command> {
    let args: Vec<String> = std::env::args().collect();

    let Some(name) = args.get(1) else {
        return Ok(Command::Help);
    };

    let arg = |i: usize, what: &str| -> Result<String> {
        args.get(i)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Missing {what}\nRun 'skythread --help' for usage"))
    };
    let days = |i: usize| -> Result<f64> {
        match args.get(i) {
            Some(s) => s
                .parse::<f64>()
                .ok()
                .filter(|d| d.is_finite() && *d > 0.0)
                .ok_or_else(|| anyhow::anyhow!("Invalid number of days: {s}")),
            None => Ok(7.0),
        }
    };

    match name.as_str() {
        "-h" | "--help" | "help" => Ok(Command::Help),
        "-v" | "--version" | "version" => Ok(Command::Version),
        "login" => Ok(Command::Login {
            identifier: arg(2, "handle or email")?,
        }),
        "logout" => Ok(Command::Logout),
        "thread" | "t" => Ok(Command::Thread { url: arg(2, "post URL")? }),
        "hidden" => Ok(Command::Hidden { url: arg(2, "post URL")? }),
        "quotes" | "q" => Ok(Command::Quotes { url: arg(2, "post URL")? }),
        "hashtag" | "tag" => Ok(Command::Hashtag { tag: arg(2, "hashtag")? }),
        "lists" => Ok(Command::Lists),
        "stats" => Ok(Command::Stats { days: days(2)? }),
        "likes" => Ok(Command::Likes { days: days(2)? }),
        "search" => {
            if args.len() < 4 {
                return Err(anyhow::anyhow!("Usage: skythread search <days> <query>"));
            }
            Ok(Command::Search {
                days: days(2)?,
                query: args[3..].join(" "),
            })
        }
        other => Err(anyhow::anyhow!(
            "Unknown command: {other}\nRun 'skythread --help' for usage"
        )),
    }
}

fn print_help() {
    let config_path = Config::default_path()
        .map_or_else(|_| "Unknown".to_string(), |p| p.display().to_string());

    println!(
        r#"🧵 Skythread - a Bluesky thread reader

USAGE:
    skythread [COMMAND]

COMMANDS:
    login <handle|email>           Log in with an app password
                                   (read from SKYTHREAD_PASSWORD or stdin)
    logout                         Forget the saved session
    thread <url>                   Print the reply tree of a post
    hidden <url>                   Also load replies the AppView hides
    quotes <url>                   List quotes of a post
    hashtag <tag>                  Latest posts with a hashtag
    lists                          Your curation lists
    stats [days]                   Who posts most in your home timeline
    likes [days]                   Whose posts you like and who likes yours
    search <days> <query>          Search your recent home timeline

    URLs look like https://bsky.app/profile/<handle>/post/<rkey>;
    at:// URIs work too. Days default to 7.

OPTIONS:
    -h, --help                     Show this help message
    -v, --version                  Show version information

ENVIRONMENT:
    RUST_LOG=debug                 Verbose logging to stderr

CONFIG:
    {}
"#,
        config_path
    );
}

fn print_version() {
    println!("{} {}", skythread::APP_NAME, skythread::VERSION);
}

fn open_context() -> Result<ApiContext> {
    let config = Config::load()?;
    let store: SharedStore = Arc::new(EncryptedFileStore::open()?);
    let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(config.http_timeout_secs))?);
    Ok(ApiContext::new(&config, store, transport)?)
}

async fn login(context: &ApiContext, identifier: &str) -> Result<()> {
    let password = match std::env::var("SKYTHREAD_PASSWORD") {
        Ok(password) => password,
        Err(_) => {
            println!("Enter your app password:");
            println!("(Create one at https://bsky.app/settings/app-passwords)");
            let mut password = String::new();
            std::io::stdin().read_line(&mut password)?;
            password.trim().to_string()
        }
    };

    println!("🦋 Logging in as {}...", identifier);
    let session = context.log_in(identifier, &password).await?;
    println!("✓ Logged in as {}", session.did);
    println!("✓ Session saved (PDS: {})", session.pds_endpoint);
    Ok(())
}

async fn show_thread(context: Arc<ApiContext>, url: &str) -> Result<()> {
    let root = ThreadLoader::new(context).load_thread_from_url(url).await?;
    print_thread(&root);
    Ok(())
}

async fn show_hidden_replies(context: Arc<ApiContext>, url: &str) -> Result<()> {
    let loader = ThreadLoader::new(context);
    let mut root = loader.load_thread_from_url(url).await?;
    let root_uri = root.uri().to_string();

    let AnyPost::Post(post) = &mut root else {
        return Err(anyhow::anyhow!("Thread root is not available: {}", root_uri));
    };

    let found = loader.load_hidden_replies(post).await?;
    let loaded = found.iter().flatten().count();
    println!("Found {} hidden replies ({} could not be loaded)\n", loaded, found.len() - loaded);
    print_thread(&root);
    Ok(())
}

async fn show_quotes(context: Arc<ApiContext>, url: &str) -> Result<()> {
    let pager = QuotesPager::new(context, url);
    let mut total = 0;
    while let Some(page) = pager.next_page().await? {
        for post in &page.posts {
            print_post(post, 0);
        }
        total += page.posts.len();
    }
    println!("\n{} quotes", total);
    Ok(())
}

async fn show_hashtag(context: &ApiContext, tag: &str) -> Result<()> {
    let pager = HashtagPager::new(context.api(), tag);
    if let Some(page) = pager.next_page().await? {
        for post in &page.posts {
            print_post(post, 0);
        }
    }
    Ok(())
}

async fn show_lists(context: &ApiContext) -> Result<()> {
    require_login(context)?;
    for list in context.account().load_user_lists().await? {
        let name = list.get("name").and_then(|v| v.as_str()).unwrap_or("(unnamed)");
        let uri = list.get("uri").and_then(|v| v.as_str()).unwrap_or_default();
        println!("📋 {}\n   {}", name, uri);
    }
    Ok(())
}

fn progress_bar(label: &'static str) -> impl Fn(f64) + Send + Sync + 'static {
    move |progress| {
        eprint!("\r{} {:>3.0}%", label, progress * 100.0);
        let _ = std::io::stderr().flush();
    }
}

async fn show_posting_stats(context: &ApiContext, days: f64) -> Result<()> {
    require_login(context)?;
    let stats = PostingStats::new(context.account(), context.public()).with_progress(progress_bar("Scanning"));

    let Some(result) = stats.scan_home_timeline(days).await? else {
        eprintln!("\nScan cancelled");
        return Ok(());
    };
    eprintln!();

    println!(
        "Home timeline, last {:.1} days (data reaches {:.1} days back)\n",
        result.days_back, result.fetched_days
    );
    println!("{:<32} {:>6} {:>8} {:>6}", "user", "own", "reposts", "all");
    println!("{}", "─".repeat(56));
    for row in &result.users {
        println!("{:<32} {:>6} {:>8} {:>6}", row.handle, row.own, row.reposts, row.all);
    }
    println!("{}", "─".repeat(56));
    println!(
        "{:<32} {:>6} {:>8} {:>6}",
        "total", result.sums.own, result.sums.reposts, result.sums.all
    );
    Ok(())
}

async fn show_like_stats(context: &ApiContext, days: f64) -> Result<()> {
    require_login(context)?;
    let stats = LikeStats::new(context.account(), context.public()).with_progress(progress_bar("Counting likes"));

    let Some(result) = stats.find_likes(days).await? else {
        eprintln!("\nScan cancelled");
        return Ok(());
    };
    eprintln!();

    println!("❤ You liked most:");
    for stat in &result.given_likes {
        println!("  {:>4}  {}", stat.count, stat.handle.as_deref().or(stat.did.as_deref()).unwrap_or("?"));
    }
    println!("\n❤ Liked you most:");
    for stat in &result.received_likes {
        println!("  {:>4}  {}", stat.count, stat.handle.as_deref().or(stat.did.as_deref()).unwrap_or("?"));
    }
    Ok(())
}

async fn search_timeline(context: &ApiContext, days: f64, query: &str) -> Result<()> {
    require_login(context)?;
    let search = TimelineSearch::new(context.account());

    if !search.fetch_timeline(days, progress_bar("Loading timeline")).await? {
        eprintln!("\nFetch stopped");
        return Ok(());
    }
    eprintln!();

    let found = search.search_posts(query);
    for post in &found {
        print_post(post, 0);
    }
    println!("\n{} of {} posts match \"{}\"", found.len(), search.len(), query);
    Ok(())
}

fn require_login(context: &ApiContext) -> Result<()> {
    context
        .session()
        .map(|_| ())
        .context("Not logged in. Run: skythread login <handle>")
}

/// Ancestors of the anchor top-down, then the anchor and its replies
fn print_thread(anchor: &AnyPost) {
    let ancestors = anchor.as_post().map(Post::ancestors).unwrap_or_default();
    for ancestor in &ancestors {
        print_node(ancestor, 0);
    }
    if !ancestors.is_empty() {
        println!("\n{}", "─".repeat(60));
    }

    print_tree(anchor, 0);
}

fn print_tree(node: &AnyPost, depth: usize) {
    print_node(node, depth);
    if let AnyPost::Post(post) = node {
        for reply in &post.replies {
            print_tree(reply, depth + 1);
        }
    }
}

fn print_node(node: &AnyPost, depth: usize) {
    match node {
        AnyPost::Post(post) => print_post(post, depth),
        AnyPost::Blocked(_) => println!("{}🚫 Blocked post ({})", indent(depth), node.uri()),
        AnyPost::Missing(_) => println!("{}∅ Deleted post ({})", indent(depth), node.uri()),
        AnyPost::Detached(_) => println!("{}✂ Removed quote ({})", indent(depth), node.uri()),
    }
}

fn print_post(post: &Post, depth: usize) {
    let pad = indent(depth);
    let time = post
        .effective_time()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();

    println!("\n{}@{} · {}", pad, post.author.handle, time);
    for line in post.text().lines() {
        println!("{}{}", pad, line);
    }
    println!(
        "{}♥ {}  🔁 {}  💬 {}",
        pad,
        post.like_count.unwrap_or(0),
        post.repost_count.unwrap_or(0),
        post.reply_count.unwrap_or(0)
    );
}

fn indent(depth: usize) -> String {
    "  ".repeat(depth)
}
