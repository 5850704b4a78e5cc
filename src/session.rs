use arc_swap::ArcSwap;
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use crate::enrichment::{load_feed, LoadOptions};
use crate::error::{FeedError, Result, ToggleError};
use crate::models::{
    Comment, CommentFilter, EnrichedPost, Follow, FollowFilter, FollowStats, Like, LikeState,
    NewComment, NewPost, PostId, PostQuery, Profile, ProfileCard, ProfileUpdate, UserId,
};
use crate::settings::{self, Settings};
use crate::store::{with_timeout, DataAccess};
use crate::utils::logs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeVariant {
    Default,
    Destructive,
}

/// Transient message for the view, drained with [`FeedSession::drain_notices`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub description: String,
    pub variant: NoticeVariant,
}

impl Notice {
    pub fn info(title: &str, description: impl Into<String>) -> Self {
        Self {
            title: title.to_string(),
            description: description.into(),
            variant: NoticeVariant::Default,
        }
    }

    pub fn destructive(title: &str, description: impl Into<String>) -> Self {
        Self {
            title: title.to_string(),
            description: description.into(),
            variant: NoticeVariant::Destructive,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Marks a key as having a write in flight until dropped.
struct InFlight<'a, K: Eq + Hash> {
    held: &'a Mutex<HashSet<K>>,
    key: K,
}

impl<'a, K: Eq + Hash + Clone> InFlight<'a, K> {
    fn acquire(held: &'a Mutex<HashSet<K>>, key: &K) -> Option<Self> {
        if !lock(held).insert(key.clone()) {
            return None;
        }
        Some(Self {
            held,
            key: key.clone(),
        })
    }
}

impl<K: Eq + Hash> Drop for InFlight<'_, K> {
    fn drop(&mut self) {
        lock(self.held).remove(&self.key);
    }
}

/// Posts of the profile page currently shown, if any.
#[derive(Debug, Clone, Default)]
struct ProfileView {
    user: Option<UserId>,
    posts: Vec<EnrichedPost>,
}

/// One viewer's view of the feed: the current enriched snapshot plus the
/// writes that patch or replace it.
pub struct FeedSession<S> {
    store: S,
    viewer: UserId,
    limits: settings::Feed,
    timeout: Duration,
    load_options: LoadOptions,
    feed: ArcSwap<Vec<EnrichedPost>>,
    profile_view: ArcSwap<ProfileView>,
    following: ArcSwap<HashSet<UserId>>,
    following_loaded: AtomicBool,
    liking: Mutex<HashSet<PostId>>,
    following_in_flight: Mutex<HashSet<UserId>>,
    notices: Mutex<Vec<Notice>>,
}

impl<S: DataAccess> FeedSession<S> {
    pub fn new(store: S, viewer: UserId, settings: &Settings) -> Self {
        let timeout = settings.store.request_timeout();
        Self {
            store,
            viewer,
            limits: settings.feed.clone(),
            timeout,
            load_options: LoadOptions {
                timeout,
                on_aux_failure: settings.feed.on_aux_failure,
            },
            feed: ArcSwap::from_pointee(Vec::new()),
            profile_view: ArcSwap::from_pointee(ProfileView::default()),
            following: ArcSwap::from_pointee(HashSet::new()),
            following_loaded: AtomicBool::new(false),
            liking: Mutex::new(HashSet::new()),
            following_in_flight: Mutex::new(HashSet::new()),
            notices: Mutex::new(Vec::new()),
        }
    }

    pub fn viewer(&self) -> &UserId {
        &self.viewer
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Current snapshot. Empty until the first successful [`refresh`](Self::refresh).
    pub fn feed(&self) -> Arc<Vec<EnrichedPost>> {
        self.feed.load_full()
    }

    /// Looks in the feed first, then in the profile page last loaded with
    /// [`profile_feed`](Self::profile_feed).
    pub fn post(&self, id: &PostId) -> Option<EnrichedPost> {
        if let Some(entry) = self.feed.load().iter().find(|p| p.id() == id) {
            return Some(entry.clone());
        }
        self.profile_view
            .load()
            .posts
            .iter()
            .find(|p| p.id() == id)
            .cloned()
    }

    /// Posts of the profile page last loaded, with local like patches applied.
    pub fn profile_posts(&self) -> Vec<EnrichedPost> {
        self.profile_view.load().posts.clone()
    }

    pub fn drain_notices(&self) -> Vec<Notice> {
        std::mem::take(&mut *lock(&self.notices))
    }

    fn notify(&self, notice: Notice) {
        lock(&self.notices).push(notice);
    }

    fn fail(&self, action: &str, description: &str, error: FeedError) -> FeedError {
        logs::log_mutation_failed(action, &error);
        self.notify(Notice::destructive("Error", description));
        error
    }

    /// Loads the newest posts and swaps them in. On failure the previous
    /// snapshot stays.
    pub async fn refresh(&self) -> Result<Arc<Vec<EnrichedPost>>> {
        let query = PostQuery::recent(self.limits.fetch_limit);
        match load_feed(&self.store, &self.viewer, &query, self.load_options).await {
            Ok(posts) => {
                logs::log_feed_loaded(posts.len());
                let posts = Arc::new(posts);
                self.feed.store(Arc::clone(&posts));
                Ok(posts)
            }
            Err(e) => {
                logs::log_feed_failed(&e);
                self.notify(Notice::destructive("Error", "Could not load feed"));
                Err(e)
            }
        }
    }

    /// Refresh after a write that already succeeded. A failed reload has
    /// reported itself and leaves the old snapshot. An open profile page is
    /// reloaded too.
    async fn refetch(&self) {
        if self.refresh().await.is_err() {
            debug!("snapshot kept after failed reload");
        }
        let Some(user) = self.profile_view.load().user.clone() else {
            return;
        };
        if let Err(e) = self.profile_feed(&user).await {
            logs::log_feed_failed(&e);
        }
    }

    fn patch_like(&self, post: &PostId, state: LikeState) {
        let patch = |posts: &mut Vec<EnrichedPost>| {
            if let Some(entry) = posts.iter_mut().find(|p| p.id() == post) {
                entry.set_like_state(state);
            }
        };
        self.feed.rcu(|current| {
            let mut next = Vec::clone(current);
            patch(&mut next);
            next
        });
        self.profile_view.rcu(|current| {
            let mut next = ProfileView::clone(current);
            patch(&mut next.posts);
            next
        });
    }

    /// Flips the viewer's like on `post` right away, then writes it through.
    /// A failed write puts back the exact state from before the flip.
    pub async fn toggle_like(&self, post: &PostId) -> Result<LikeState, ToggleError> {
        let Some(_guard) = InFlight::acquire(&self.liking, post) else {
            return Err(ToggleError {
                post_id: post.clone(),
                reason: FeedError::Busy(format!("like on {post}")),
                restored: self.post(post).map(|p| p.like_state()),
            });
        };
        let Some(before) = self.post(post).map(|p| p.like_state()) else {
            return Err(ToggleError {
                post_id: post.clone(),
                reason: FeedError::NotFound(format!("post {post}")),
                restored: None,
            });
        };

        let after = before.toggled();
        self.patch_like(post, after);

        let like = Like {
            post_id: post.clone(),
            user_id: self.viewer.clone(),
        };
        let written = if after.viewer_has_liked {
            with_timeout(self.timeout, self.store.insert_like(&like)).await
        } else {
            with_timeout(self.timeout, self.store.delete_like(&like)).await
        };

        match written {
            Ok(()) => {
                logs::log_like_toggled(post, after);
                Ok(after)
            }
            Err(reason) => {
                self.patch_like(post, before);
                let err = ToggleError {
                    post_id: post.clone(),
                    reason,
                    restored: Some(before),
                };
                logs::log_like_rolled_back(&err);
                self.notify(Notice::destructive("Error", "Could not update like"));
                Err(err)
            }
        }
    }

    fn require_text<'t>(&self, text: &'t str, what: &str, max: usize) -> Result<&'t str> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(FeedError::Validation(format!("{what} is empty")));
        }
        if trimmed.chars().count() > max {
            return Err(FeedError::Validation(format!(
                "{what} is longer than {max} characters"
            )));
        }
        Ok(trimmed)
    }

    pub async fn create_post(&self, content: &str, image_url: Option<&str>) -> Result<PostId> {
        let content = self.require_text(content, "post", self.limits.max_post_length)?;
        let post = NewPost {
            author_id: self.viewer.clone(),
            content: content.to_string(),
            image_url: image_url
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(String::from),
        };
        let id = with_timeout(self.timeout, self.store.insert_post(&post))
            .await
            .map_err(|e| self.fail("post", "Could not create post", e))?;
        self.notify(Notice::info("Posted!", "Your post is now live."));
        self.refetch().await;
        Ok(id)
    }

    /// Stores the trimmed comment, then reloads the whole feed so every
    /// counter comes from the store.
    pub async fn create_comment(&self, post: &PostId, text: &str) -> Result<()> {
        let content = self.require_text(text, "comment", self.limits.max_comment_length)?;
        let comment = NewComment {
            post_id: post.clone(),
            author_id: self.viewer.clone(),
            content: content.to_string(),
        };
        with_timeout(self.timeout, self.store.insert_comment(&comment))
            .await
            .map_err(|e| self.fail("comment", "Could not add comment", e))?;
        self.refetch().await;
        Ok(())
    }

    pub async fn comments_for(&self, post: &PostId) -> Result<Vec<Comment>> {
        let filter = CommentFilter {
            post: Some(post.clone()),
        };
        with_timeout(self.timeout, self.store.list_comments(&filter))
            .await
            .map_err(|e| self.fail("comments", "Could not load comments", e))
    }

    /// Only the author may delete. The snapshot decides ownership before the
    /// store is asked.
    pub async fn delete_post(&self, post: &PostId) -> Result<()> {
        let Some(entry) = self.post(post) else {
            return Err(self.fail(
                "delete",
                "Could not delete post",
                FeedError::NotFound(format!("post {post}")),
            ));
        };
        if entry.post.author_id != self.viewer {
            return Err(self.fail(
                "delete",
                "Could not delete post",
                FeedError::Authorization(format!("{} does not own post {post}", self.viewer)),
            ));
        }
        with_timeout(self.timeout, self.store.delete_post(post, &self.viewer))
            .await
            .map_err(|e| self.fail("delete", "Could not delete post", e))?;
        self.notify(Notice::info("Post deleted", "Your post has been removed."));
        self.refetch().await;
        Ok(())
    }

    pub async fn own_profile(&self) -> Result<Profile> {
        self.profile(&self.viewer).await
    }

    pub async fn profile(&self, user: &UserId) -> Result<Profile> {
        with_timeout(self.timeout, self.store.get_profile(user)).await
    }

    /// `user`'s own posts, enriched against the same relations as the feed.
    /// They become the profile page that likes and deletes can act on.
    pub async fn profile_feed(&self, user: &UserId) -> Result<Vec<EnrichedPost>> {
        let query = PostQuery::by_author(user.clone(), self.limits.fetch_limit);
        let posts = load_feed(&self.store, &self.viewer, &query, self.load_options).await?;
        self.profile_view.store(Arc::new(ProfileView {
            user: Some(user.clone()),
            posts: posts.clone(),
        }));
        Ok(posts)
    }

    pub async fn follow_stats(&self, user: &UserId) -> Result<FollowStats> {
        let followers = FollowFilter::Following(user.clone());
        let following = FollowFilter::Follower(user.clone());
        let (followers, following) = tokio::try_join!(
            with_timeout(self.timeout, self.store.count_follows(&followers)),
            with_timeout(self.timeout, self.store.count_follows(&following)),
        )?;
        Ok(FollowStats {
            followers,
            following,
        })
    }

    /// Blank fields clear the stored value.
    pub async fn update_profile(&self, display_name: &str, bio: &str) -> Result<Profile> {
        let update = ProfileUpdate::from_form(display_name, bio);
        with_timeout(self.timeout, self.store.update_profile(&self.viewer, &update))
            .await
            .map_err(|e| self.fail("profile", "Could not update profile", e))?;
        self.notify(Notice::info("Profile updated", "Your changes have been saved."));
        self.own_profile().await
    }

    /// Like [`update_profile`](Self::update_profile), but a field passed as
    /// `None` keeps its current value.
    pub async fn edit_profile(
        &self,
        display_name: Option<&str>,
        bio: Option<&str>,
    ) -> Result<Profile> {
        let current = self.own_profile().await?;
        let display_name = display_name
            .map(String::from)
            .or(current.display_name)
            .unwrap_or_default();
        let bio = bio.map(String::from).or(current.bio).unwrap_or_default();
        self.update_profile(&display_name, &bio).await
    }

    /// Everyone but the viewer, newest first, narrowed to profiles whose
    /// username or display name contains `query` (case-insensitive).
    pub async fn discover(&self, query: &str) -> Result<Vec<ProfileCard>> {
        let edges = FollowFilter::Follower(self.viewer.clone());
        let (profiles, follows) = tokio::try_join!(
            with_timeout(self.timeout, self.store.list_profiles(Some(&self.viewer))),
            with_timeout(self.timeout, self.store.list_follows(&edges)),
        )?;

        self.remember_following(follows);
        let following = self.following.load();

        let needle = query.trim().to_lowercase();
        Ok(profiles
            .into_iter()
            .filter(|p| {
                needle.is_empty()
                    || p.username.to_lowercase().contains(&needle)
                    || p.display_name
                        .as_deref()
                        .is_some_and(|name| name.to_lowercase().contains(&needle))
            })
            .map(|profile| ProfileCard {
                is_following: following.contains(&profile.user_id),
                profile,
            })
            .collect())
    }

    fn remember_following(&self, follows: Vec<Follow>) {
        let following: HashSet<UserId> = follows.into_iter().map(|f| f.following_id).collect();
        self.following.store(Arc::new(following));
        self.following_loaded.store(true, Ordering::Release);
    }

    /// The viewer's follow edges, read from the store on first use.
    async fn known_following(&self) -> Result<()> {
        if self.following_loaded.load(Ordering::Acquire) {
            return Ok(());
        }
        let edges = FollowFilter::Follower(self.viewer.clone());
        let follows = with_timeout(self.timeout, self.store.list_follows(&edges)).await?;
        self.remember_following(follows);
        Ok(())
    }

    pub fn is_following(&self, user: &UserId) -> bool {
        self.following.load().contains(user)
    }

    /// Follows or unfollows `target` depending on the known follow edges.
    /// Returns whether the viewer follows `target` afterwards.
    pub async fn toggle_follow(&self, target: &Profile) -> Result<bool> {
        let user = &target.user_id;
        if user == &self.viewer {
            return Err(FeedError::Validation("cannot follow yourself".to_string()));
        }
        let Some(_guard) = InFlight::acquire(&self.following_in_flight, user) else {
            return Err(FeedError::Busy(format!("follow on {user}")));
        };

        self.known_following()
            .await
            .map_err(|e| self.fail("follow", "Could not update follow status", e))?;
        let follow = Follow {
            follower_id: self.viewer.clone(),
            following_id: user.clone(),
        };
        let was_following = self.is_following(user);
        let written = if was_following {
            with_timeout(self.timeout, self.store.delete_follow(&follow)).await
        } else {
            with_timeout(self.timeout, self.store.insert_follow(&follow)).await
        };
        written.map_err(|e| self.fail("follow", "Could not update follow status", e))?;

        self.following.rcu(|current| {
            let mut next = HashSet::clone(current);
            if was_following {
                next.remove(user);
            } else {
                next.insert(user.clone());
            }
            next
        });

        if was_following {
            self.notify(Notice::info(
                "Unfollowed",
                format!("You unfollowed @{}", target.username),
            ));
        } else {
            self.notify(Notice::info(
                "Following",
                format!("You're now following @{}", target.username),
            ));
        }
        Ok(!was_following)
    }
}
