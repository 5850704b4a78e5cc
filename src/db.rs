use crate::models::{
    AuthorProfile, Comment, CommentFilter, Follow, FollowFilter, Like, LikeFilter, Post, PostId,
    PostOrder, PostQuery, Profile, ProfileUpdate, UserId,
};
use crate::schema::{comments, follows, likes, posts, profiles};
use chrono::{DateTime, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PoolError};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[derive(Debug, Clone, Copy)]
struct ConnectionOptions {
    busy_timeout_ms: u64,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        configure_connection(conn, self.busy_timeout_ms).map_err(diesel::r2d2::Error::QueryError)
    }
}

pub fn establish_pool(
    database_url: &str,
    max_size: u32,
    busy_timeout_ms: u64,
) -> Result<DbPool, PoolError> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    Pool::builder()
        .max_size(max_size)
        .connection_customizer(Box::new(ConnectionOptions { busy_timeout_ms }))
        .build(manager)
}

pub fn configure_connection(conn: &mut SqliteConnection, busy_timeout_ms: u64) -> QueryResult<()> {
    conn.batch_execute(&format!("PRAGMA busy_timeout = {busy_timeout_ms};"))?;
    conn.batch_execute("PRAGMA journal_mode = WAL;")?;
    conn.batch_execute("PRAGMA synchronous = NORMAL;")?;
    conn.batch_execute("PRAGMA foreign_keys = ON;")?;
    Ok(())
}

pub fn run_migrations(conn: &mut SqliteConnection) -> anyhow::Result<usize> {
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("migrations failed: {e}"))?;
    Ok(applied.len())
}

pub(crate) fn to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = posts)]
pub struct PostRow {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub image_url: Option<String>,
    pub created_at: i64,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = posts)]
pub struct NewPostRow {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub image_url: Option<String>,
    pub created_at: i64,
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = profiles)]
pub struct AuthorRow {
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = profiles)]
pub struct ProfileRow {
    pub id: String,
    pub user_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub created_at: i64,
}

#[derive(AsChangeset, Debug)]
#[diesel(table_name = profiles, treat_none_as_null = true)]
struct ProfileChanges<'a> {
    display_name: Option<&'a str>,
    bio: Option<&'a str>,
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = comments)]
pub struct CommentRow {
    pub id: String,
    pub post_id: String,
    pub user_id: String,
    pub content: String,
    pub created_at: i64,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = comments)]
pub struct NewCommentRow {
    pub id: String,
    pub post_id: String,
    pub user_id: String,
    pub content: String,
    pub created_at: i64,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = likes)]
pub struct LikeRow {
    pub post_id: String,
    pub user_id: String,
    pub created_at: i64,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = follows)]
pub struct FollowRow {
    pub follower_id: String,
    pub following_id: String,
    pub created_at: i64,
}

impl From<AuthorRow> for AuthorProfile {
    fn from(row: AuthorRow) -> Self {
        Self {
            username: row.username,
            display_name: row.display_name,
            avatar_url: row.avatar_url,
        }
    }
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Self {
            id: row.id,
            user_id: UserId(row.user_id),
            username: row.username,
            display_name: row.display_name,
            avatar_url: row.avatar_url,
            bio: row.bio,
            created_at: to_datetime(row.created_at),
        }
    }
}

impl From<LikeRow> for Like {
    fn from(row: LikeRow) -> Self {
        Self {
            post_id: PostId(row.post_id),
            user_id: UserId(row.user_id),
        }
    }
}

impl From<FollowRow> for Follow {
    fn from(row: FollowRow) -> Self {
        Self {
            follower_id: UserId(row.follower_id),
            following_id: UserId(row.following_id),
        }
    }
}

fn post_from_rows(row: PostRow, author: Option<AuthorRow>) -> Post {
    Post {
        id: PostId(row.id),
        author_id: UserId(row.user_id),
        content: row.content,
        image_url: row.image_url,
        created_at: to_datetime(row.created_at),
        author: author.map(AuthorProfile::from),
    }
}

fn comment_from_rows(row: CommentRow, author: Option<AuthorRow>) -> Comment {
    Comment {
        id: row.id,
        post_id: PostId(row.post_id),
        author_id: UserId(row.user_id),
        content: row.content,
        created_at: to_datetime(row.created_at),
        author: author.map(AuthorProfile::from),
    }
}

pub fn load_posts(conn: &mut SqliteConnection, query: &PostQuery) -> QueryResult<Vec<Post>> {
    let mut select = posts::table
        .left_join(profiles::table.on(profiles::user_id.eq(posts::user_id)))
        .select((PostRow::as_select(), Option::<AuthorRow>::as_select()))
        .into_boxed();

    if let Some(author) = &query.author {
        select = select.filter(posts::user_id.eq(author.0.clone()));
    }

    select = match query.order {
        PostOrder::NewestFirst => select.order((posts::created_at.desc(), posts::id.desc())),
        PostOrder::OldestFirst => select.order((posts::created_at.asc(), posts::id.asc())),
    };

    let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
    let rows: Vec<(PostRow, Option<AuthorRow>)> = select.limit(limit).load(conn)?;

    Ok(rows
        .into_iter()
        .map(|(post, author)| post_from_rows(post, author))
        .collect())
}

pub fn insert_post(conn: &mut SqliteConnection, new_post: &NewPostRow) -> QueryResult<usize> {
    diesel::insert_into(posts::table)
        .values(new_post)
        .execute(conn)
}

pub fn get_post_author(conn: &mut SqliteConnection, post_id: &str) -> QueryResult<Option<String>> {
    posts::table
        .filter(posts::id.eq(post_id))
        .select(posts::user_id)
        .first::<String>(conn)
        .optional()
}

/// Deletes only when `actor` wrote the post.
pub fn delete_post(conn: &mut SqliteConnection, post_id: &str, actor: &str) -> QueryResult<usize> {
    diesel::delete(
        posts::table
            .filter(posts::id.eq(post_id))
            .filter(posts::user_id.eq(actor)),
    )
    .execute(conn)
}

pub fn load_likes(conn: &mut SqliteConnection, filter: &LikeFilter) -> QueryResult<Vec<Like>> {
    let mut select = likes::table.select(LikeRow::as_select()).into_boxed();

    if let Some(post) = &filter.post {
        select = select.filter(likes::post_id.eq(post.0.clone()));
    }
    if let Some(user) = &filter.user {
        select = select.filter(likes::user_id.eq(user.0.clone()));
    }

    let rows: Vec<LikeRow> = select.load(conn)?;
    Ok(rows.into_iter().map(Like::from).collect())
}

pub fn insert_like(conn: &mut SqliteConnection, like: &Like, created_at: i64) -> QueryResult<usize> {
    let row = LikeRow {
        post_id: like.post_id.0.clone(),
        user_id: like.user_id.0.clone(),
        created_at,
    };
    diesel::insert_or_ignore_into(likes::table)
        .values(&row)
        .execute(conn)
}

pub fn delete_like(conn: &mut SqliteConnection, like: &Like) -> QueryResult<usize> {
    diesel::delete(
        likes::table
            .filter(likes::post_id.eq(like.post_id.0.as_str()))
            .filter(likes::user_id.eq(like.user_id.0.as_str())),
    )
    .execute(conn)
}

/// Comments with their authors, oldest first.
pub fn load_comments(
    conn: &mut SqliteConnection,
    filter: &CommentFilter,
) -> QueryResult<Vec<Comment>> {
    let mut select = comments::table
        .left_join(profiles::table.on(profiles::user_id.eq(comments::user_id)))
        .select((CommentRow::as_select(), Option::<AuthorRow>::as_select()))
        .into_boxed();

    if let Some(post) = &filter.post {
        select = select.filter(comments::post_id.eq(post.0.clone()));
    }

    let rows: Vec<(CommentRow, Option<AuthorRow>)> = select
        .order((comments::created_at.asc(), comments::id.asc()))
        .load(conn)?;

    Ok(rows
        .into_iter()
        .map(|(comment, author)| comment_from_rows(comment, author))
        .collect())
}

pub fn insert_comment(conn: &mut SqliteConnection, comment: &NewCommentRow) -> QueryResult<usize> {
    diesel::insert_into(comments::table)
        .values(comment)
        .execute(conn)
}

pub fn load_profile(conn: &mut SqliteConnection, user: &UserId) -> QueryResult<Profile> {
    profiles::table
        .filter(profiles::user_id.eq(user.0.as_str()))
        .select(ProfileRow::as_select())
        .first(conn)
        .map(Profile::from)
}

/// Every profile except `exclude`'s, newest first.
pub fn load_profiles(
    conn: &mut SqliteConnection,
    exclude: Option<&UserId>,
) -> QueryResult<Vec<Profile>> {
    let mut select = profiles::table.select(ProfileRow::as_select()).into_boxed();

    if let Some(user) = exclude {
        select = select.filter(profiles::user_id.ne(user.0.clone()));
    }

    let rows: Vec<ProfileRow> = select
        .order((profiles::created_at.desc(), profiles::id.desc()))
        .load(conn)?;
    Ok(rows.into_iter().map(Profile::from).collect())
}

pub fn insert_profile(conn: &mut SqliteConnection, profile: &ProfileRow) -> QueryResult<usize> {
    diesel::insert_into(profiles::table)
        .values(profile)
        .execute(conn)
}

pub fn update_profile(
    conn: &mut SqliteConnection,
    user: &UserId,
    update: &ProfileUpdate,
) -> QueryResult<usize> {
    let changes = ProfileChanges {
        display_name: update.display_name.as_deref(),
        bio: update.bio.as_deref(),
    };
    diesel::update(profiles::table.filter(profiles::user_id.eq(user.0.as_str())))
        .set(&changes)
        .execute(conn)
}

pub fn load_follows(conn: &mut SqliteConnection, filter: &FollowFilter) -> QueryResult<Vec<Follow>> {
    let select = follows::table.select(FollowRow::as_select());
    let rows: Vec<FollowRow> = match filter {
        FollowFilter::Follower(user) => select
            .filter(follows::follower_id.eq(user.0.as_str()))
            .load(conn)?,
        FollowFilter::Following(user) => select
            .filter(follows::following_id.eq(user.0.as_str()))
            .load(conn)?,
    };
    Ok(rows.into_iter().map(Follow::from).collect())
}

pub fn count_follows(conn: &mut SqliteConnection, filter: &FollowFilter) -> QueryResult<i64> {
    match filter {
        FollowFilter::Follower(user) => follows::table
            .filter(follows::follower_id.eq(user.0.as_str()))
            .count()
            .get_result(conn),
        FollowFilter::Following(user) => follows::table
            .filter(follows::following_id.eq(user.0.as_str()))
            .count()
            .get_result(conn),
    }
}

pub fn insert_follow(
    conn: &mut SqliteConnection,
    follow: &Follow,
    created_at: i64,
) -> QueryResult<usize> {
    let row = FollowRow {
        follower_id: follow.follower_id.0.clone(),
        following_id: follow.following_id.0.clone(),
        created_at,
    };
    diesel::insert_or_ignore_into(follows::table)
        .values(&row)
        .execute(conn)
}

pub fn delete_follow(conn: &mut SqliteConnection, follow: &Follow) -> QueryResult<usize> {
    diesel::delete(
        follows::table
            .filter(follows::follower_id.eq(follow.follower_id.0.as_str()))
            .filter(follows::following_id.eq(follow.following_id.0.as_str())),
    )
    .execute(conn)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Single-connection in-memory pool with the schema applied.
    pub fn memory_pool() -> DbPool {
        let pool = establish_pool(":memory:", 1, 2000).expect("in-memory pool");
        let mut conn = pool.get().expect("connection");
        run_migrations(&mut conn).expect("migrations");
        pool
    }

    pub fn add_profile(conn: &mut SqliteConnection, user: &str, username: &str, created_at: i64) {
        insert_profile(
            conn,
            &ProfileRow {
                id: format!("profile-{user}"),
                user_id: user.to_string(),
                username: username.to_string(),
                display_name: None,
                avatar_url: None,
                bio: None,
                created_at,
            },
        )
        .expect("insert profile");
    }

    pub fn add_post(conn: &mut SqliteConnection, id: &str, user: &str, created_at: i64) {
        insert_post(
            conn,
            &NewPostRow {
                id: id.to_string(),
                user_id: user.to_string(),
                content: format!("post {id}"),
                image_url: None,
                created_at,
            },
        )
        .expect("insert post");
    }
}
