use super::DataAccess;
use crate::error::{FeedError, Result};
use crate::models::{
    AuthorProfile, Comment, CommentFilter, Follow, FollowFilter, Like, LikeFilter, NewComment,
    NewPost, Post, PostId, PostOrder, PostQuery, Profile, ProfileUpdate, UserId,
};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    ListPosts,
    ListLikes,
    ListComments,
    InsertLike,
    DeleteLike,
    InsertComment,
    InsertPost,
    DeletePost,
    InsertFollow,
    DeleteFollow,
}

#[derive(Default)]
struct State {
    posts: Vec<Post>,
    likes: Vec<Like>,
    comments: Vec<Comment>,
    profiles: Vec<Profile>,
    follows: Vec<Follow>,
    failing: HashSet<Op>,
    stalled: HashSet<Op>,
    calls: Vec<Op>,
    next_id: u64,
}

/// In-memory store with failure injection. Every call yields once before
/// touching state so concurrent callers can interleave at that point.
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<State>,
}

pub fn at(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, 0).unwrap_or_default()
}

pub fn post(id: &str, author: &str, seconds: i64) -> Post {
    Post {
        id: PostId::from(id),
        author_id: UserId::from(author),
        content: format!("post {id}"),
        image_url: None,
        created_at: at(seconds),
        author: Some(AuthorProfile {
            username: author.to_string(),
            display_name: None,
            avatar_url: None,
        }),
    }
}

pub fn like(post: &str, user: &str) -> Like {
    Like {
        post_id: PostId::from(post),
        user_id: UserId::from(user),
    }
}

pub fn comment(id: &str, post: &str, user: &str) -> Comment {
    Comment {
        id: id.to_string(),
        post_id: PostId::from(post),
        author_id: UserId::from(user),
        content: format!("comment {id}"),
        created_at: at(0),
        author: None,
    }
}

pub fn profile(user: &str, username: &str, seconds: i64) -> Profile {
    Profile {
        id: format!("profile-{user}"),
        user_id: UserId::from(user),
        username: username.to_string(),
        display_name: None,
        avatar_url: None,
        bio: None,
        created_at: at(seconds),
    }
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_posts(self, posts: Vec<Post>) -> Self {
        self.state.lock().unwrap().posts = posts;
        self
    }

    pub fn with_likes(self, likes: Vec<Like>) -> Self {
        self.state.lock().unwrap().likes = likes;
        self
    }

    pub fn with_comments(self, comments: Vec<Comment>) -> Self {
        self.state.lock().unwrap().comments = comments;
        self
    }

    pub fn with_profiles(self, profiles: Vec<Profile>) -> Self {
        self.state.lock().unwrap().profiles = profiles;
        self
    }

    pub fn with_follows(self, follows: Vec<Follow>) -> Self {
        self.state.lock().unwrap().follows = follows;
        self
    }

    pub fn fail(&self, op: Op) {
        self.state.lock().unwrap().failing.insert(op);
    }

    /// Calls to `op` never complete.
    pub fn stall(&self, op: Op) {
        self.state.lock().unwrap().stalled.insert(op);
    }

    pub fn recover(&self, op: Op) {
        self.state.lock().unwrap().failing.remove(&op);
    }

    pub fn calls(&self, op: Op) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| **c == op)
            .count()
    }

    pub fn likes(&self) -> Vec<Like> {
        self.state.lock().unwrap().likes.clone()
    }

    pub fn comments(&self) -> Vec<Comment> {
        self.state.lock().unwrap().comments.clone()
    }

    pub fn follows(&self) -> Vec<Follow> {
        self.state.lock().unwrap().follows.clone()
    }

    async fn enter(&self, op: Op) -> Result<()> {
        tokio::task::yield_now().await;
        let stalled = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(op);
            if state.failing.contains(&op) {
                return Err(FeedError::Connectivity(format!("injected {op:?} failure")));
            }
            state.stalled.contains(&op)
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn read(&self) {
        tokio::task::yield_now().await;
    }
}

impl DataAccess for FakeStore {
    async fn list_posts(&self, query: &PostQuery) -> Result<Vec<Post>> {
        self.enter(Op::ListPosts).await?;
        let state = self.state.lock().unwrap();
        let mut posts: Vec<Post> = state
            .posts
            .iter()
            .filter(|p| query.author.as_ref().map_or(true, |a| &p.author_id == a))
            .cloned()
            .collect();
        match query.order {
            PostOrder::NewestFirst => posts.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            PostOrder::OldestFirst => posts.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        }
        posts.truncate(query.limit);
        Ok(posts)
    }

    async fn insert_post(&self, post: &NewPost) -> Result<PostId> {
        self.enter(Op::InsertPost).await?;
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = PostId(format!("new-{}", state.next_id));
        let created_at = at(1_000_000 + state.next_id as i64);
        state.posts.push(Post {
            id: id.clone(),
            author_id: post.author_id.clone(),
            content: post.content.clone(),
            image_url: post.image_url.clone(),
            created_at,
            author: None,
        });
        Ok(id)
    }

    async fn delete_post(&self, post: &PostId, actor: &UserId) -> Result<()> {
        self.enter(Op::DeletePost).await?;
        let mut state = self.state.lock().unwrap();
        let Some(index) = state.posts.iter().position(|p| &p.id == post) else {
            return Err(FeedError::NotFound(format!("post {post}")));
        };
        if &state.posts[index].author_id != actor {
            return Err(FeedError::Authorization(format!("{actor} does not own {post}")));
        }
        state.posts.remove(index);
        state.likes.retain(|l| &l.post_id != post);
        state.comments.retain(|c| &c.post_id != post);
        Ok(())
    }

    async fn list_likes(&self, filter: &LikeFilter) -> Result<Vec<Like>> {
        self.enter(Op::ListLikes).await?;
        let state = self.state.lock().unwrap();
        Ok(state
            .likes
            .iter()
            .filter(|l| filter.post.as_ref().map_or(true, |p| &l.post_id == p))
            .filter(|l| filter.user.as_ref().map_or(true, |u| &l.user_id == u))
            .cloned()
            .collect())
    }

    async fn insert_like(&self, like: &Like) -> Result<()> {
        self.enter(Op::InsertLike).await?;
        let mut state = self.state.lock().unwrap();
        if !state.posts.iter().any(|p| p.id == like.post_id) {
            return Err(FeedError::NotFound(format!("post {}", like.post_id)));
        }
        if !state.likes.contains(like) {
            state.likes.push(like.clone());
        }
        Ok(())
    }

    async fn delete_like(&self, like: &Like) -> Result<()> {
        self.enter(Op::DeleteLike).await?;
        self.state.lock().unwrap().likes.retain(|l| l != like);
        Ok(())
    }

    async fn list_comments(&self, filter: &CommentFilter) -> Result<Vec<Comment>> {
        self.enter(Op::ListComments).await?;
        let state = self.state.lock().unwrap();
        Ok(state
            .comments
            .iter()
            .filter(|c| filter.post.as_ref().map_or(true, |p| &c.post_id == p))
            .cloned()
            .collect())
    }

    async fn insert_comment(&self, comment: &NewComment) -> Result<()> {
        self.enter(Op::InsertComment).await?;
        let mut state = self.state.lock().unwrap();
        if !state.posts.iter().any(|p| p.id == comment.post_id) {
            return Err(FeedError::NotFound(format!("post {}", comment.post_id)));
        }
        state.next_id += 1;
        let id = format!("c-{}", state.next_id);
        state.comments.push(Comment {
            id,
            post_id: comment.post_id.clone(),
            author_id: comment.author_id.clone(),
            content: comment.content.clone(),
            created_at: at(0),
            author: None,
        });
        Ok(())
    }

    async fn get_profile(&self, user: &UserId) -> Result<Profile> {
        self.read().await;
        let state = self.state.lock().unwrap();
        state
            .profiles
            .iter()
            .find(|p| &p.user_id == user)
            .cloned()
            .ok_or_else(|| FeedError::NotFound(format!("profile for {user}")))
    }

    async fn update_profile(&self, user: &UserId, update: &ProfileUpdate) -> Result<()> {
        self.read().await;
        let mut state = self.state.lock().unwrap();
        let profile = state
            .profiles
            .iter_mut()
            .find(|p| &p.user_id == user)
            .ok_or_else(|| FeedError::NotFound(format!("profile for {user}")))?;
        profile.display_name = update.display_name.clone();
        profile.bio = update.bio.clone();
        Ok(())
    }

    async fn list_profiles(&self, exclude: Option<&UserId>) -> Result<Vec<Profile>> {
        self.read().await;
        let state = self.state.lock().unwrap();
        let mut profiles: Vec<Profile> = state
            .profiles
            .iter()
            .filter(|p| exclude.map_or(true, |u| &p.user_id != u))
            .cloned()
            .collect();
        profiles.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(profiles)
    }

    async fn list_follows(&self, filter: &FollowFilter) -> Result<Vec<Follow>> {
        self.read().await;
        let state = self.state.lock().unwrap();
        Ok(state
            .follows
            .iter()
            .filter(|f| match filter {
                FollowFilter::Follower(u) => &f.follower_id == u,
                FollowFilter::Following(u) => &f.following_id == u,
            })
            .cloned()
            .collect())
    }

    async fn count_follows(&self, filter: &FollowFilter) -> Result<u64> {
        Ok(self.list_follows(filter).await?.len() as u64)
    }

    async fn insert_follow(&self, follow: &Follow) -> Result<()> {
        self.enter(Op::InsertFollow).await?;
        let mut state = self.state.lock().unwrap();
        if !state.follows.contains(follow) {
            state.follows.push(follow.clone());
        }
        Ok(())
    }

    async fn delete_follow(&self, follow: &Follow) -> Result<()> {
        self.enter(Op::DeleteFollow).await?;
        self.state.lock().unwrap().follows.retain(|f| f != follow);
        Ok(())
    }
}
