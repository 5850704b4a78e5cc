use super::DataAccess;
use crate::error::{FeedError, Result};
use crate::models::{
    AuthorProfile, Comment, CommentFilter, Follow, FollowFilter, Like, LikeFilter, NewComment,
    NewPost, Post, PostId, PostOrder, PostQuery, Profile, ProfileUpdate, UserId,
};
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const POST_COLUMNS: &str = "id,content,image_url,created_at,user_id,\
profiles!posts_user_id_fkey(username,display_name,avatar_url)";
const COMMENT_COLUMNS: &str = "id,post_id,content,created_at,user_id,\
profiles!comments_user_id_fkey(username,display_name,avatar_url)";
const PROFILE_COLUMNS: &str = "id,user_id,username,display_name,avatar_url,bio,created_at";
const OBJECT_MEDIA_TYPE: &str = "application/vnd.pgrst.object+json";

#[derive(Debug, Clone)]
pub struct RestConfig {
    pub base_url: String,
    pub api_key: String,
    /// Session token of the signed-in viewer; row policies are evaluated
    /// against it. Falls back to the api key.
    pub access_token: Option<String>,
    pub schema_path: String,
}

/// Client for a PostgREST-style hosted backend (`/rest/v1/<relation>`).
#[derive(Clone)]
pub struct RestStore {
    client: reqwest::Client,
    config: RestConfig,
}

#[derive(Debug, Deserialize)]
struct PostRecord {
    id: String,
    content: String,
    image_url: Option<String>,
    created_at: DateTime<Utc>,
    user_id: String,
    profiles: Option<AuthorProfile>,
}

#[derive(Debug, Deserialize)]
struct CommentRecord {
    id: String,
    post_id: String,
    content: String,
    created_at: DateTime<Utc>,
    user_id: String,
    profiles: Option<AuthorProfile>,
}

#[derive(Debug, Deserialize)]
struct LikeRecord {
    post_id: String,
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct FollowRecord {
    follower_id: String,
    following_id: String,
}

#[derive(Debug, Deserialize)]
struct ProfileRecord {
    id: String,
    user_id: String,
    username: String,
    display_name: Option<String>,
    avatar_url: Option<String>,
    bio: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct IdRecord {
    id: String,
}

#[derive(Debug, Serialize)]
struct PostBody<'a> {
    user_id: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct LikeBody<'a> {
    post_id: &'a str,
    user_id: &'a str,
}

#[derive(Debug, Serialize)]
struct CommentBody<'a> {
    post_id: &'a str,
    user_id: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct FollowBody<'a> {
    follower_id: &'a str,
    following_id: &'a str,
}

#[derive(Debug, Serialize)]
struct ProfileBody<'a> {
    display_name: Option<&'a str>,
    bio: Option<&'a str>,
}

impl From<PostRecord> for Post {
    fn from(record: PostRecord) -> Self {
        Self {
            id: PostId(record.id),
            author_id: UserId(record.user_id),
            content: record.content,
            image_url: record.image_url,
            created_at: record.created_at,
            author: record.profiles,
        }
    }
}

impl From<CommentRecord> for Comment {
    fn from(record: CommentRecord) -> Self {
        Self {
            id: record.id,
            post_id: PostId(record.post_id),
            author_id: UserId(record.user_id),
            content: record.content,
            created_at: record.created_at,
            author: record.profiles,
        }
    }
}

impl From<ProfileRecord> for Profile {
    fn from(record: ProfileRecord) -> Self {
        Self {
            id: record.id,
            user_id: UserId(record.user_id),
            username: record.username,
            display_name: record.display_name,
            avatar_url: record.avatar_url,
            bio: record.bio,
            created_at: record.created_at,
        }
    }
}

/// `column=op.value` pairs, percent-encoded.
#[derive(Debug, Default)]
struct Params(Vec<(String, String)>);

impl Params {
    fn select(columns: &str) -> Self {
        Self(vec![("select".to_string(), columns.to_string())])
    }

    fn none() -> Self {
        Self::default()
    }

    fn eq(mut self, column: &str, value: &str) -> Self {
        self.0.push((column.to_string(), format!("eq.{value}")));
        self
    }

    fn neq(mut self, column: &str, value: &str) -> Self {
        self.0.push((column.to_string(), format!("neq.{value}")));
        self
    }

    fn order(mut self, column: &str, order: PostOrder) -> Self {
        let dir = match order {
            PostOrder::NewestFirst => "desc",
            PostOrder::OldestFirst => "asc",
        };
        self.0.push(("order".to_string(), format!("{column}.{dir}")));
        self
    }

    fn limit(mut self, limit: usize) -> Self {
        self.0.push(("limit".to_string(), limit.to_string()));
        self
    }

    fn encode(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn status_error(status: StatusCode, body: &str) -> FeedError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FeedError::Authorization(detail),
        StatusCode::NOT_FOUND | StatusCode::NOT_ACCEPTABLE => FeedError::NotFound(detail),
        StatusCode::BAD_REQUEST
        | StatusCode::CONFLICT
        | StatusCode::PAYLOAD_TOO_LARGE
        | StatusCode::UNPROCESSABLE_ENTITY => FeedError::Validation(detail),
        _ => FeedError::Connectivity(detail),
    }
}

/// Total from a `Content-Range` header such as `0-9/42` or `*/0`.
fn parse_content_range_total(header: &str) -> Option<u64> {
    header.rsplit('/').next()?.trim().parse().ok()
}

impl RestStore {
    pub fn new(config: RestConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn url(&self, relation: &str, params: &Params) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        let schema = self.config.schema_path.trim_matches('/');
        let query = params.encode();
        if query.is_empty() {
            format!("{base}/{schema}/{relation}")
        } else {
            format!("{base}/{schema}/{relation}?{query}")
        }
    }

    fn request(&self, method: Method, relation: &str, params: &Params) -> RequestBuilder {
        let token = self
            .config
            .access_token
            .as_deref()
            .unwrap_or(&self.config.api_key);
        self.client
            .request(method, self.url(relation, params))
            .header("apikey", &self.config.api_key)
            .bearer_auth(token)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!(%status, "backend rejected request");
        Err(status_error(status, &body))
    }

    async fn fetch<T: DeserializeOwned>(&self, relation: &str, params: Params) -> Result<Vec<T>> {
        let response = self
            .send(self.request(Method::GET, relation, &params))
            .await?;
        response
            .json::<Vec<T>>()
            .await
            .map_err(|e| FeedError::Connectivity(format!("failed to parse {relation}: {e}")))
    }

    async fn write<B: Serialize>(
        &self,
        method: Method,
        relation: &str,
        params: Params,
        body: &B,
    ) -> Result<()> {
        self.send(
            self.request(method, relation, &params)
                .header("Prefer", "return=minimal")
                .json(body),
        )
        .await?;
        Ok(())
    }

    async fn remove(&self, relation: &str, params: Params) -> Result<()> {
        self.send(
            self.request(Method::DELETE, relation, &params)
                .header("Prefer", "return=minimal"),
        )
        .await?;
        Ok(())
    }
}

impl DataAccess for RestStore {
    async fn list_posts(&self, query: &PostQuery) -> Result<Vec<Post>> {
        let mut params = Params::select(POST_COLUMNS);
        if let Some(author) = &query.author {
            params = params.eq("user_id", &author.0);
        }
        let params = params.order("created_at", query.order).limit(query.limit);
        let records: Vec<PostRecord> = self.fetch("posts", params).await?;
        debug!(count = records.len(), "posts fetched");
        Ok(records.into_iter().map(Post::from).collect())
    }

    async fn insert_post(&self, post: &NewPost) -> Result<PostId> {
        let body = PostBody {
            user_id: &post.author_id.0,
            content: &post.content,
            image_url: post.image_url.as_deref(),
        };
        let response = self
            .send(
                self.request(Method::POST, "posts", &Params::select("id"))
                    .header("Prefer", "return=representation")
                    .header("Accept", OBJECT_MEDIA_TYPE)
                    .json(&body),
            )
            .await?;
        let created: IdRecord = response
            .json()
            .await
            .map_err(|e| FeedError::Connectivity(format!("failed to parse created post: {e}")))?;
        Ok(PostId(created.id))
    }

    async fn delete_post(&self, post: &PostId, actor: &UserId) -> Result<()> {
        let params = Params::select("id")
            .eq("id", &post.0)
            .eq("user_id", &actor.0);
        let response = self
            .send(
                self.request(Method::DELETE, "posts", &params)
                    .header("Prefer", "return=representation"),
            )
            .await?;
        let deleted: Vec<IdRecord> = response
            .json()
            .await
            .map_err(|e| FeedError::Connectivity(format!("failed to parse delete result: {e}")))?;
        if !deleted.is_empty() {
            return Ok(());
        }

        // Nothing matched: either the post is gone or it belongs to someone else.
        let existing: Vec<IdRecord> = self
            .fetch("posts", Params::select("id").eq("id", &post.0))
            .await?;
        if existing.is_empty() {
            Err(FeedError::NotFound(format!("post {post}")))
        } else {
            Err(FeedError::Authorization(format!(
                "{actor} does not own post {post}"
            )))
        }
    }

    async fn list_likes(&self, filter: &LikeFilter) -> Result<Vec<Like>> {
        let mut params = Params::select("post_id,user_id");
        if let Some(post) = &filter.post {
            params = params.eq("post_id", &post.0);
        }
        if let Some(user) = &filter.user {
            params = params.eq("user_id", &user.0);
        }
        let records: Vec<LikeRecord> = self.fetch("likes", params).await?;
        Ok(records
            .into_iter()
            .map(|r| Like {
                post_id: PostId(r.post_id),
                user_id: UserId(r.user_id),
            })
            .collect())
    }

    async fn insert_like(&self, like: &Like) -> Result<()> {
        let body = LikeBody {
            post_id: &like.post_id.0,
            user_id: &like.user_id.0,
        };
        self.write(Method::POST, "likes", Params::none(), &body).await
    }

    async fn delete_like(&self, like: &Like) -> Result<()> {
        let params = Params::none()
            .eq("post_id", &like.post_id.0)
            .eq("user_id", &like.user_id.0);
        self.remove("likes", params).await
    }

    async fn list_comments(&self, filter: &CommentFilter) -> Result<Vec<Comment>> {
        let mut params = Params::select(COMMENT_COLUMNS);
        if let Some(post) = &filter.post {
            params = params.eq("post_id", &post.0);
        }
        let params = params.order("created_at", PostOrder::OldestFirst);
        let records: Vec<CommentRecord> = self.fetch("comments", params).await?;
        Ok(records.into_iter().map(Comment::from).collect())
    }

    async fn insert_comment(&self, comment: &NewComment) -> Result<()> {
        let body = CommentBody {
            post_id: &comment.post_id.0,
            user_id: &comment.author_id.0,
            content: &comment.content,
        };
        self.write(Method::POST, "comments", Params::none(), &body)
            .await
    }

    async fn get_profile(&self, user: &UserId) -> Result<Profile> {
        let params = Params::select(PROFILE_COLUMNS).eq("user_id", &user.0);
        let response = self
            .send(
                self.request(Method::GET, "profiles", &params)
                    .header("Accept", OBJECT_MEDIA_TYPE),
            )
            .await
            .map_err(|e| match e {
                FeedError::NotFound(_) => FeedError::NotFound(format!("profile for {user}")),
                other => other,
            })?;
        let record: ProfileRecord = response
            .json()
            .await
            .map_err(|e| FeedError::Connectivity(format!("failed to parse profile: {e}")))?;
        Ok(Profile::from(record))
    }

    async fn update_profile(&self, user: &UserId, update: &ProfileUpdate) -> Result<()> {
        let body = ProfileBody {
            display_name: update.display_name.as_deref(),
            bio: update.bio.as_deref(),
        };
        self.write(
            Method::PATCH,
            "profiles",
            Params::none().eq("user_id", &user.0),
            &body,
        )
        .await
    }

    async fn list_profiles(&self, exclude: Option<&UserId>) -> Result<Vec<Profile>> {
        let mut params = Params::select(PROFILE_COLUMNS);
        if let Some(user) = exclude {
            params = params.neq("user_id", &user.0);
        }
        let params = params.order("created_at", PostOrder::NewestFirst);
        let records: Vec<ProfileRecord> = self.fetch("profiles", params).await?;
        Ok(records.into_iter().map(Profile::from).collect())
    }

    async fn list_follows(&self, filter: &FollowFilter) -> Result<Vec<Follow>> {
        let params = match filter {
            FollowFilter::Follower(user) => {
                Params::select("follower_id,following_id").eq("follower_id", &user.0)
            }
            FollowFilter::Following(user) => {
                Params::select("follower_id,following_id").eq("following_id", &user.0)
            }
        };
        let records: Vec<FollowRecord> = self.fetch("follows", params).await?;
        Ok(records
            .into_iter()
            .map(|r| Follow {
                follower_id: UserId(r.follower_id),
                following_id: UserId(r.following_id),
            })
            .collect())
    }

    async fn count_follows(&self, filter: &FollowFilter) -> Result<u64> {
        let params = match filter {
            FollowFilter::Follower(user) => Params::select("id").eq("follower_id", &user.0),
            FollowFilter::Following(user) => Params::select("id").eq("following_id", &user.0),
        };
        let response = self
            .send(
                self.request(Method::HEAD, "follows", &params)
                    .header("Prefer", "count=exact"),
            )
            .await?;
        response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| FeedError::Connectivity("missing follow count".to_string()))
    }

    async fn insert_follow(&self, follow: &Follow) -> Result<()> {
        let body = FollowBody {
            follower_id: &follow.follower_id.0,
            following_id: &follow.following_id.0,
        };
        self.write(Method::POST, "follows", Params::none(), &body)
            .await
    }

    async fn delete_follow(&self, follow: &Follow) -> Result<()> {
        let params = Params::none()
            .eq("follower_id", &follow.follower_id.0)
            .eq("following_id", &follow.following_id.0);
        self.remove("follows", params).await
    }
}
