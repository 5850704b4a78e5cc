use super::DataAccess;
use crate::db::{self, DbPool, NewCommentRow, NewPostRow, ProfileRow};
use crate::error::{FeedError, Result};
use crate::models::{
    Comment, CommentFilter, Follow, FollowFilter, Like, LikeFilter, NewComment, NewPost, Post,
    PostId, PostQuery, Profile, ProfileUpdate, UserId,
};
use chrono::Utc;
use diesel::{QueryResult, SqliteConnection};
use tracing::debug;
use uuid::Uuid;

/// Local SQLite store. Ownership and uniqueness rules live in the queries and
/// the schema, mirroring the row policies of the hosted backend.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Opens the pool and applies pending migrations.
    pub fn open(database_url: &str, pool_size: u32, busy_timeout_ms: u64) -> anyhow::Result<Self> {
        let pool = db::establish_pool(database_url, pool_size, busy_timeout_ms)?;
        let applied = {
            let mut conn = pool.get()?;
            db::run_migrations(&mut conn)?
        };
        debug!(applied, "sqlite migrations applied");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut SqliteConnection) -> QueryResult<T>) -> Result<T> {
        let mut conn = self.pool.get()?;
        Ok(f(&mut conn)?)
    }

    /// Creates the profile row that sign-up would create on the hosted backend.
    pub fn register_profile(&self, user: &UserId, username: &str) -> Result<Profile> {
        let username = username.trim();
        if username.is_empty() {
            return Err(FeedError::Validation("username is required".to_string()));
        }
        let row = ProfileRow {
            id: Uuid::new_v4().to_string(),
            user_id: user.0.clone(),
            username: username.to_string(),
            display_name: None,
            avatar_url: None,
            bio: None,
            created_at: Utc::now().timestamp_millis(),
        };
        self.with_conn(|conn| db::insert_profile(conn, &row))?;
        Ok(Profile::from(row))
    }
}

impl DataAccess for SqliteStore {
    async fn list_posts(&self, query: &PostQuery) -> Result<Vec<Post>> {
        self.with_conn(|conn| db::load_posts(conn, query))
    }

    async fn insert_post(&self, post: &NewPost) -> Result<PostId> {
        let row = NewPostRow {
            id: Uuid::new_v4().to_string(),
            user_id: post.author_id.0.clone(),
            content: post.content.clone(),
            image_url: post.image_url.clone(),
            created_at: Utc::now().timestamp_millis(),
        };
        self.with_conn(|conn| db::insert_post(conn, &row))?;
        debug!(post = %row.id, "post inserted");
        Ok(PostId(row.id))
    }

    async fn delete_post(&self, post: &PostId, actor: &UserId) -> Result<()> {
        let mut conn = self.pool.get()?;
        match db::get_post_author(&mut conn, &post.0)? {
            None => Err(FeedError::NotFound(format!("post {post}"))),
            Some(author) if author != actor.0 => Err(FeedError::Authorization(format!(
                "{actor} does not own post {post}"
            ))),
            Some(_) => {
                let deleted = db::delete_post(&mut conn, &post.0, &actor.0)?;
                if deleted == 0 {
                    return Err(FeedError::NotFound(format!("post {post}")));
                }
                Ok(())
            }
        }
    }

    async fn list_likes(&self, filter: &LikeFilter) -> Result<Vec<Like>> {
        self.with_conn(|conn| db::load_likes(conn, filter))
    }

    async fn insert_like(&self, like: &Like) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        self.with_conn(|conn| db::insert_like(conn, like, now))?;
        Ok(())
    }

    async fn delete_like(&self, like: &Like) -> Result<()> {
        self.with_conn(|conn| db::delete_like(conn, like))?;
        Ok(())
    }

    async fn list_comments(&self, filter: &CommentFilter) -> Result<Vec<Comment>> {
        self.with_conn(|conn| db::load_comments(conn, filter))
    }

    async fn insert_comment(&self, comment: &NewComment) -> Result<()> {
        let row = NewCommentRow {
            id: Uuid::new_v4().to_string(),
            post_id: comment.post_id.0.clone(),
            user_id: comment.author_id.0.clone(),
            content: comment.content.clone(),
            created_at: Utc::now().timestamp_millis(),
        };
        self.with_conn(|conn| db::insert_comment(conn, &row))?;
        Ok(())
    }

    async fn get_profile(&self, user: &UserId) -> Result<Profile> {
        self.with_conn(|conn| db::load_profile(conn, user))
            .map_err(|e| match e {
                FeedError::NotFound(_) => FeedError::NotFound(format!("profile for {user}")),
                other => other,
            })
    }

    async fn update_profile(&self, user: &UserId, update: &ProfileUpdate) -> Result<()> {
        let updated = self.with_conn(|conn| db::update_profile(conn, user, update))?;
        if updated == 0 {
            return Err(FeedError::NotFound(format!("profile for {user}")));
        }
        Ok(())
    }

    async fn list_profiles(&self, exclude: Option<&UserId>) -> Result<Vec<Profile>> {
        self.with_conn(|conn| db::load_profiles(conn, exclude))
    }

    async fn list_follows(&self, filter: &FollowFilter) -> Result<Vec<Follow>> {
        self.with_conn(|conn| db::load_follows(conn, filter))
    }

    async fn count_follows(&self, filter: &FollowFilter) -> Result<u64> {
        let count = self.with_conn(|conn| db::count_follows(conn, filter))?;
        Ok(count.max(0) as u64)
    }

    async fn insert_follow(&self, follow: &Follow) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        self.with_conn(|conn| db::insert_follow(conn, follow, now))?;
        Ok(())
    }

    async fn delete_follow(&self, follow: &Follow) -> Result<()> {
        self.with_conn(|conn| db::delete_follow(conn, follow))?;
        Ok(())
    }
}
