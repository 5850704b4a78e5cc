//! Read/write access to the hosted relations (posts, comments, likes, follows,
//! profiles). The session layer only talks to [`DataAccess`].

mod rest;
mod sqlite;

#[cfg(test)]
pub(crate) mod fake;

pub use rest::{RestConfig, RestStore};
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::models::{
    Comment, CommentFilter, Follow, FollowFilter, Like, LikeFilter, NewComment, NewPost, Post,
    PostId, PostQuery, Profile, ProfileUpdate, UserId,
};

/// Every call either returns its full result or fails. Writes are visible to
/// the caller's next read; nothing spans more than one relation atomically.
#[allow(async_fn_in_trait)]
pub trait DataAccess {
    async fn list_posts(&self, query: &PostQuery) -> Result<Vec<Post>>;

    async fn insert_post(&self, post: &NewPost) -> Result<PostId>;

    /// Fails with `NotFound` when the post is gone and `Authorization` when
    /// `actor` did not write it.
    async fn delete_post(&self, post: &PostId, actor: &UserId) -> Result<()>;

    async fn list_likes(&self, filter: &LikeFilter) -> Result<Vec<Like>>;

    async fn insert_like(&self, like: &Like) -> Result<()>;

    async fn delete_like(&self, like: &Like) -> Result<()>;

    /// Oldest first.
    async fn list_comments(&self, filter: &CommentFilter) -> Result<Vec<Comment>>;

    async fn insert_comment(&self, comment: &NewComment) -> Result<()>;

    async fn get_profile(&self, user: &UserId) -> Result<Profile>;

    async fn update_profile(&self, user: &UserId, update: &ProfileUpdate) -> Result<()>;

    /// Newest first, optionally leaving one user out.
    async fn list_profiles(&self, exclude: Option<&UserId>) -> Result<Vec<Profile>>;

    async fn list_follows(&self, filter: &FollowFilter) -> Result<Vec<Follow>>;

    async fn count_follows(&self, filter: &FollowFilter) -> Result<u64>;

    async fn insert_follow(&self, follow: &Follow) -> Result<()>;

    async fn delete_follow(&self, follow: &Follow) -> Result<()>;
}

/// Bounds a store call; running out of time counts as a connectivity failure.
pub(crate) async fn with_timeout<T>(
    timeout: std::time::Duration,
    call: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, call).await?
}
