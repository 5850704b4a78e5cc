use anyhow::{bail, Context, Result};
use social_feed::models::{PostId, UserId};
use social_feed::session::FeedSession;
use social_feed::settings::settings;
use social_feed::store::{DataAccess, RestConfig, RestStore, SqliteStore};
use social_feed::utils::logs::{
    log_startup_config, print_comments, print_feed, print_notice, print_profile,
    print_profile_cards,
};
use std::env;
use std::process;
use tracing::subscriber::set_global_default;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn print_usage() {
    eprintln!("Usage: social-feed <command> [args]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  feed                     Show the newest posts");
    eprintln!("  post <text> [--image U]  Publish a post");
    eprintln!("  like <post>              Like or unlike a post");
    eprintln!("  comment <post> <text>    Comment on a post");
    eprintln!("  comments <post>          Show a post's comments");
    eprintln!("  delete <post>            Delete one of your posts");
    eprintln!("  profile [user]           Show a profile with its posts");
    eprintln!("  discover [query]         Find people to follow");
    eprintln!("  follow <username>        Follow or unfollow someone");
    eprintln!("  bio [text] [--name N]    Update your profile; omitted fields are kept");
    eprintln!("  register <username>      Create your profile (local store only)");
}

#[derive(Debug)]
enum Command {
    Feed,
    Post { text: String, image: Option<String> },
    Like(PostId),
    Comment { post: PostId, text: String },
    Comments(PostId),
    Delete(PostId),
    Profile(Option<UserId>),
    Discover(String),
    Follow(String),
    Bio {
        text: Option<String>,
        name: Option<String>,
    },
    Register(String),
}

/// Pulls `--flag value` out of `args`.
fn take_flag(args: &mut Vec<String>, flag: &str) -> Option<String> {
    let index = args.iter().position(|a| a == flag)?;
    args.remove(index);
    (index < args.len()).then(|| args.remove(index))
}

fn parse_command(mut args: Vec<String>) -> Result<Command> {
    if args.is_empty() {
        bail!("missing command");
    }
    let name = args.remove(0);
    let image = take_flag(&mut args, "--image");
    let display_name = take_flag(&mut args, "--name");
    let rest = args.join(" ");
    let first = || -> Result<String> {
        args.first()
            .cloned()
            .with_context(|| format!("`{name}` needs an argument"))
    };

    let command = match name.as_str() {
        "feed" => Command::Feed,
        "post" => Command::Post { text: rest, image },
        "like" => Command::Like(PostId(first()?)),
        "comment" => Command::Comment {
            post: PostId(first()?),
            text: args[1..].join(" "),
        },
        "comments" => Command::Comments(PostId(first()?)),
        "delete" => Command::Delete(PostId(first()?)),
        "profile" => Command::Profile(args.first().map(|u| UserId::from(u.as_str()))),
        "discover" => Command::Discover(rest),
        "follow" => Command::Follow(first()?),
        "bio" => Command::Bio {
            text: (!rest.is_empty()).then_some(rest),
            name: display_name,
        },
        "register" => Command::Register(first()?),
        other => bail!("unknown command `{other}`"),
    };
    Ok(command)
}

async fn run<S: DataAccess>(session: &FeedSession<S>, command: Command) -> Result<()> {
    match command {
        Command::Feed => {
            let feed = session.refresh().await?;
            print_feed(&feed);
        }
        Command::Post { text, image } => {
            session.create_post(&text, image.as_deref()).await?;
            print_feed(&session.feed());
        }
        Command::Like(post) => {
            session.refresh().await?;
            session.toggle_like(&post).await?;
        }
        Command::Comment { post, text } => {
            session.create_comment(&post, &text).await?;
            print_comments(&post, &session.comments_for(&post).await?);
        }
        Command::Comments(post) => {
            print_comments(&post, &session.comments_for(&post).await?);
        }
        Command::Delete(post) => {
            session.refresh().await?;
            session.delete_post(&post).await?;
        }
        Command::Profile(user) => {
            let user = user.unwrap_or_else(|| session.viewer().clone());
            let (profile, stats, posts) = tokio::try_join!(
                session.profile(&user),
                session.follow_stats(&user),
                session.profile_feed(&user),
            )?;
            print_profile(&profile, stats);
            print_feed(&posts);
        }
        Command::Discover(query) => {
            print_profile_cards(&session.discover(&query).await?);
        }
        Command::Follow(username) => {
            let card = session
                .discover(&username)
                .await?
                .into_iter()
                .find(|c| c.profile.username.eq_ignore_ascii_case(&username))
                .with_context(|| format!("no user named @{username}"))?;
            session.toggle_follow(&card.profile).await?;
        }
        Command::Bio { text, name } => {
            let profile = session
                .edit_profile(name.as_deref(), text.as_deref())
                .await?;
            let stats = session.follow_stats(&profile.user_id).await?;
            print_profile(&profile, stats);
        }
        Command::Register(_) => bail!("`register` only works with the local store"),
    }
    Ok(())
}

async fn run_and_report<S: DataAccess>(session: &FeedSession<S>, command: Command) -> Result<()> {
    let result = run(session, command).await;
    for notice in session.drain_notices() {
        print_notice(&notice);
    }
    result
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("social_feed=info".parse()?))
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        );
    set_global_default(subscriber).context("failed to set tracing subscriber")?;

    let command = match parse_command(env::args().skip(1).collect()) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{e}");
            print_usage();
            process::exit(1);
        }
    };

    let s = settings();
    let viewer = UserId(env::var("VIEWER_ID").unwrap_or_else(|_| "local-user".to_string()));

    if let Ok(base_url) = env::var("REST_URL") {
        let api_key = env::var("REST_API_KEY").context("REST_API_KEY must be set with REST_URL")?;
        log_startup_config("rest", &base_url, &viewer.0);
        let store = RestStore::new(RestConfig {
            base_url,
            api_key,
            access_token: env::var("REST_ACCESS_TOKEN").ok(),
            schema_path: s.rest.schema_path.clone(),
        });
        let session = FeedSession::new(store, viewer, s);
        return run_and_report(&session, command).await;
    }

    let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| "social.db".to_string());
    log_startup_config("sqlite", &database_url, &viewer.0);
    let store = SqliteStore::open(&database_url, s.store.pool_size, s.store.busy_timeout_ms)?;

    if let Command::Register(username) = &command {
        let profile = store.register_profile(&viewer, username)?;
        print_profile(&profile, Default::default());
        return Ok(());
    }

    let session = FeedSession::new(store, viewer, s);
    run_and_report(&session, command).await
}
