use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::Display;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PostId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Author fields joined onto posts and comments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorProfile {
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl AuthorProfile {
    pub fn display_label(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.username,
        }
    }

    /// First letter of every display-name word, else the username's first
    /// letter, else `?`.
    pub fn initials(&self) -> String {
        initials(self.display_name.as_deref(), &self.username)
    }
}

pub(crate) fn initials(display_name: Option<&str>, username: &str) -> String {
    let from_name: String = display_name
        .unwrap_or_default()
        .split(' ')
        .filter_map(|word| word.chars().next())
        .collect::<String>()
        .to_uppercase();
    if !from_name.is_empty() {
        return from_name;
    }
    username
        .chars()
        .next()
        .map(|c| c.to_uppercase().collect())
        .unwrap_or_else(|| "?".to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub author_id: UserId,
    pub content: String,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub author: Option<AuthorProfile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPost {
    pub author_id: UserId,
    pub content: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub post_id: PostId,
    pub author_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub author: Option<AuthorProfile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewComment {
    pub post_id: PostId,
    pub author_id: UserId,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Like {
    pub post_id: PostId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Follow {
    pub follower_id: UserId,
    pub following_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub user_id: UserId,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    pub fn author(&self) -> AuthorProfile {
        AuthorProfile {
            username: self.username.clone(),
            display_name: self.display_name.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }

    pub fn initials(&self) -> String {
        initials(self.display_name.as_deref(), &self.username)
    }
}

/// Editable profile fields. `None` clears the column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub bio: Option<String>,
}

impl ProfileUpdate {
    /// Blank form fields become `None`, matching how the profile editor saves.
    pub fn from_form(display_name: &str, bio: &str) -> Self {
        let keep = |s: &str| {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        };
        Self {
            display_name: keep(display_name),
            bio: keep(bio),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum PostOrder {
    #[default]
    #[strum(serialize = "newest")]
    NewestFirst,
    #[strum(serialize = "oldest")]
    OldestFirst,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostQuery {
    pub author: Option<UserId>,
    pub limit: usize,
    pub order: PostOrder,
}

impl PostQuery {
    pub fn recent(limit: usize) -> Self {
        Self {
            author: None,
            limit,
            order: PostOrder::NewestFirst,
        }
    }

    pub fn by_author(author: UserId, limit: usize) -> Self {
        Self {
            author: Some(author),
            limit,
            order: PostOrder::NewestFirst,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LikeFilter {
    pub post: Option<PostId>,
    pub user: Option<UserId>,
}

impl LikeFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_user(user: &UserId) -> Self {
        Self {
            post: None,
            user: Some(user.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentFilter {
    pub post: Option<PostId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowFilter {
    Follower(UserId),
    Following(UserId),
}

/// Post plus the counters derived from the like and comment relations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedPost {
    pub post: Post,
    pub like_count: u64,
    pub comment_count: u64,
    pub viewer_has_liked: bool,
}

impl EnrichedPost {
    pub fn id(&self) -> &PostId {
        &self.post.id
    }

    pub fn like_state(&self) -> LikeState {
        LikeState {
            like_count: self.like_count,
            viewer_has_liked: self.viewer_has_liked,
        }
    }

    pub(crate) fn set_like_state(&mut self, state: LikeState) {
        self.like_count = state.like_count;
        self.viewer_has_liked = state.viewer_has_liked;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeState {
    pub like_count: u64,
    pub viewer_has_liked: bool,
}

impl LikeState {
    pub fn toggled(self) -> Self {
        if self.viewer_has_liked {
            Self {
                like_count: self.like_count.saturating_sub(1),
                viewer_has_liked: false,
            }
        } else {
            Self {
                like_count: self.like_count + 1,
                viewer_has_liked: true,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowStats {
    pub followers: u64,
    pub following: u64,
}

/// Discover entry: a profile and whether the viewer follows it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileCard {
    pub profile: Profile,
    pub is_following: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author(username: &str, display_name: Option<&str>) -> AuthorProfile {
        AuthorProfile {
            username: username.to_string(),
            display_name: display_name.map(String::from),
            avatar_url: None,
        }
    }

    #[test]
    fn test_initials_from_display_name() {
        assert_eq!(author("ada", Some("Ada Lovelace")).initials(), "AL");
        assert_eq!(author("ada", Some("ada")).initials(), "A");
    }

    #[test]
    fn test_initials_fallbacks() {
        assert_eq!(author("grace", None).initials(), "G");
        assert_eq!(author("grace", Some("")).initials(), "G");
        assert_eq!(author("", None).initials(), "?");
    }

    #[test]
    fn test_display_label() {
        assert_eq!(author("ada", Some("Ada")).display_label(), "Ada");
        assert_eq!(author("ada", None).display_label(), "ada");
    }

    #[test]
    fn test_like_state_toggle_is_self_inverse() {
        let state = LikeState {
            like_count: 2,
            viewer_has_liked: false,
        };
        let once = state.toggled();
        assert_eq!(
            once,
            LikeState {
                like_count: 3,
                viewer_has_liked: true
            }
        );
        assert_eq!(once.toggled(), state);
    }

    #[test]
    fn test_profile_update_from_form_clears_blank_fields() {
        let update = ProfileUpdate::from_form("  ", "hello there ");
        assert_eq!(update.display_name, None);
        assert_eq!(update.bio.as_deref(), Some("hello there"));
    }
}
