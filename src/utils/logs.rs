use chrono::{DateTime, Utc};
use console::{measure_text_width, Style};

use crate::error::{FeedError, ToggleError};
use crate::models::{Comment, EnrichedPost, FollowStats, LikeState, PostId, Profile, ProfileCard};
use crate::session::{Notice, NoticeVariant};

pub const TREE_BRANCH: char = '\u{251C}';
pub const TREE_END: char = '\u{2514}';
pub const TREE_HORIZ: char = '\u{2500}';
pub const TREE_VERT: char = '\u{2502}';

const TREE_PREFIX_WIDTH: usize = 4;
const VALUE_COLUMN: usize = 18;
const PREVIEW_WIDTH: usize = 60;

fn tree_branch() -> String {
    dim()
        .apply_to(format!("{}{}{} ", TREE_BRANCH, TREE_HORIZ, TREE_HORIZ))
        .to_string()
}

fn tree_end() -> String {
    dim()
        .apply_to(format!("{}{}{} ", TREE_END, TREE_HORIZ, TREE_HORIZ))
        .to_string()
}

fn tree_indent() -> String {
    dim().apply_to(format!("{}   ", TREE_VERT)).to_string()
}

fn tree_blank() -> String {
    " ".repeat(TREE_PREFIX_WIDTH)
}

fn branch_for(index: usize, count: usize) -> String {
    if index + 1 == count {
        tree_end()
    } else {
        tree_branch()
    }
}

pub fn dim() -> Style {
    Style::new().dim()
}

fn blue() -> Style {
    Style::new().blue()
}

fn magenta() -> Style {
    Style::new().magenta()
}

fn cyan() -> Style {
    Style::new().cyan()
}

fn green() -> Style {
    Style::new().green()
}

fn red() -> Style {
    Style::new().red()
}

fn yellow() -> Style {
    Style::new().yellow()
}

fn bold() -> Style {
    Style::new().bold()
}

fn init_prefix() -> String {
    blue().apply_to("[INIT]").to_string()
}

fn feed_prefix() -> String {
    magenta().apply_to("[FEED]").to_string()
}

fn like_prefix() -> String {
    yellow().apply_to("[LIKE]").to_string()
}

pub fn pad_label(label: &str, depth: usize) -> String {
    let prefix_width = depth * TREE_PREFIX_WIDTH;
    let target_width = VALUE_COLUMN.saturating_sub(prefix_width);
    let current_width = measure_text_width(label);
    if current_width < target_width {
        format!("{}{}", label, " ".repeat(target_width - current_width))
    } else {
        format!("{} ", label)
    }
}

/// Single-line preview of free text, cut at `PREVIEW_WIDTH` characters.
pub fn preview(text: &str) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() > PREVIEW_WIDTH {
        format!("{}...", flat.chars().take(PREVIEW_WIDTH - 3).collect::<String>())
    } else {
        flat
    }
}

fn truncate_id(id: &str) -> String {
    if id.chars().count() > 13 {
        format!("{}...", id.chars().take(10).collect::<String>())
    } else {
        id.to_string()
    }
}

/// Coarse age of a timestamp relative to `now`, e.g. `5m`, `3h`, `2d`.
pub fn relative_time(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - at).num_seconds().max(0);
    match seconds {
        s if s < 60 => "now".to_string(),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86_400),
    }
}

pub fn log_startup_config(backend: &str, target: &str, viewer: &str) {
    println!(
        "{} opening {} store at {}...",
        init_prefix(),
        bold().apply_to(backend),
        cyan().apply_to(target),
    );
    println!(
        "{} signed in as {}.",
        init_prefix(),
        green().apply_to(truncate_id(viewer))
    );
}

pub fn log_feed_loaded(count: usize) {
    println!(
        "{} {} {} posts",
        feed_prefix(),
        cyan().apply_to("loaded"),
        bold().apply_to(count)
    );
}

pub fn log_feed_failed(error: &FeedError) {
    println!(
        "{} {} {}",
        feed_prefix(),
        red().apply_to(format!("load failed ({}):", error.kind())),
        dim().apply_to(error)
    );
}

pub fn log_aux_degraded(error: &FeedError) {
    println!(
        "{}counts unavailable, showing zero: {}",
        tree_branch(),
        yellow().apply_to(error)
    );
}

pub fn log_like_toggled(post: &PostId, state: LikeState) {
    let verb = if state.viewer_has_liked {
        green().apply_to("liked")
    } else {
        dim().apply_to("unliked")
    };
    println!(
        "{} {} {} ({} likes)",
        like_prefix(),
        verb,
        dim().apply_to(truncate_id(&post.0)),
        bold().apply_to(state.like_count)
    );
}

pub fn log_like_rolled_back(error: &ToggleError) {
    let restored = match error.restored {
        Some(state) => format!(" (restored to {} likes)", state.like_count),
        None => String::new(),
    };
    println!(
        "{} {} {}{}",
        like_prefix(),
        red().apply_to("rolled back"),
        dim().apply_to(truncate_id(&error.post_id.0)),
        dim().apply_to(restored)
    );
    println!("{}{}", tree_end(), red().apply_to(&error.reason));
}

pub fn log_mutation_failed(action: &str, error: &FeedError) {
    println!(
        "{} {} {}",
        red().apply_to(format!("[{}]", action.to_uppercase())),
        red().apply_to("failed:"),
        dim().apply_to(error)
    );
}

pub fn print_notice(notice: &Notice) {
    let title = match notice.variant {
        NoticeVariant::Default => green().apply_to(&notice.title),
        NoticeVariant::Destructive => red().apply_to(&notice.title),
    };
    println!("{} {}", bold().apply_to(title), dim().apply_to(&notice.description));
}

pub fn print_feed(posts: &[EnrichedPost]) {
    if posts.is_empty() {
        println!("{}", dim().apply_to("no posts yet"));
        return;
    }
    let now = Utc::now();
    for entry in posts {
        let post = &entry.post;
        let (label, initials) = match &post.author {
            Some(author) => (author.display_label().to_string(), author.initials()),
            None => ("unknown".to_string(), "?".to_string()),
        };
        let heart = if entry.viewer_has_liked {
            red().apply_to("\u{2665}")
        } else {
            dim().apply_to("\u{2661}")
        };

        println!(
            "{} {} {}",
            cyan().apply_to(format!("[{initials}]")),
            bold().apply_to(label),
            dim().apply_to(format!(
                "{} {}",
                relative_time(post.created_at, now),
                truncate_id(&post.id.0)
            ))
        );
        println!("{}{}", tree_branch(), preview(&post.content));
        if let Some(image) = &post.image_url {
            println!("{}{} {}", tree_branch(), pad_label("image", 1), dim().apply_to(image));
        }
        println!(
            "{}{} {}  {} {}",
            tree_end(),
            heart,
            bold().apply_to(entry.like_count),
            dim().apply_to("comments"),
            bold().apply_to(entry.comment_count)
        );
    }
}

pub fn print_comments(post: &PostId, comments: &[Comment]) {
    println!(
        "{} on {}",
        bold().apply_to(format!("{} comments", comments.len())),
        dim().apply_to(truncate_id(&post.0))
    );
    let now = Utc::now();
    for (i, comment) in comments.iter().enumerate() {
        let label = comment
            .author
            .as_ref()
            .map(|a| a.display_label().to_string())
            .unwrap_or_else(|| truncate_id(&comment.author_id.0));
        let continuation = if i + 1 == comments.len() {
            tree_blank()
        } else {
            tree_indent()
        };
        println!(
            "{}{} {}",
            branch_for(i, comments.len()),
            bold().apply_to(label),
            dim().apply_to(relative_time(comment.created_at, now))
        );
        println!("{}{}", continuation, preview(&comment.content));
    }
}

pub fn print_profile(profile: &Profile, stats: FollowStats) {
    let author = profile.author();
    println!(
        "{} {} {}",
        cyan().apply_to(format!("[{}]", profile.initials())),
        bold().apply_to(author.display_label()),
        dim().apply_to(format!("@{}", profile.username))
    );
    if let Some(bio) = &profile.bio {
        println!("{}{} {}", tree_branch(), pad_label("bio", 1), preview(bio));
    }
    println!(
        "{}{} {}",
        tree_branch(),
        pad_label("followers", 1),
        bold().apply_to(stats.followers)
    );
    println!(
        "{}{} {}",
        tree_end(),
        pad_label("following", 1),
        bold().apply_to(stats.following)
    );
}

pub fn print_profile_cards(cards: &[ProfileCard]) {
    if cards.is_empty() {
        println!("{}", dim().apply_to("no users found"));
        return;
    }
    for (i, card) in cards.iter().enumerate() {
        let author = card.profile.author();
        let status = if card.is_following {
            green().apply_to("following")
        } else {
            dim().apply_to("follow")
        };
        println!(
            "{}{} {} {}",
            branch_for(i, cards.len()),
            pad_label(author.display_label(), 1),
            dim().apply_to(format!("@{}", card.profile.username)),
            status
        );
    }
}
