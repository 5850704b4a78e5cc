use crate::error::Result;
use crate::models::{CommentFilter, EnrichedPost, LikeFilter, Post, PostId, PostQuery, UserId};
use crate::settings::AuxFailurePolicy;
use crate::store::{with_timeout, DataAccess};
use crate::utils::logs;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Joins posts with like and comment rows.
///
/// `likes` and `comments` yield the post id of every row in those relations,
/// in any order and including rows for posts outside `posts`. `viewer_likes`
/// yields the post ids the viewer has liked. Output order matches `posts`.
pub fn enrich<'a>(
    posts: Vec<Post>,
    likes: impl IntoIterator<Item = &'a PostId>,
    comments: impl IntoIterator<Item = &'a PostId>,
    viewer_likes: impl IntoIterator<Item = &'a PostId>,
) -> Vec<EnrichedPost> {
    let like_counts = count_by_post(likes);
    let comment_counts = count_by_post(comments);
    let liked: HashSet<&PostId> = viewer_likes.into_iter().collect();

    posts
        .into_iter()
        .map(|post| {
            let like_count = like_counts.get(&post.id).copied().unwrap_or(0);
            let comment_count = comment_counts.get(&post.id).copied().unwrap_or(0);
            let viewer_has_liked = liked.contains(&post.id);
            EnrichedPost {
                post,
                like_count,
                comment_count,
                viewer_has_liked,
            }
        })
        .collect()
}

fn count_by_post<'a>(rows: impl IntoIterator<Item = &'a PostId>) -> HashMap<&'a PostId, u64> {
    let mut counts = HashMap::new();
    for post_id in rows {
        *counts.entry(post_id).or_insert(0) += 1;
    }
    counts
}

fn or_empty<T>(rows: Result<Vec<T>>) -> Vec<T> {
    rows.unwrap_or_else(|e| {
        logs::log_aux_degraded(&e);
        Vec::new()
    })
}

#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    pub timeout: Duration,
    pub on_aux_failure: AuxFailurePolicy,
}

/// Fetches the post window and the three auxiliary relations concurrently,
/// then enriches once all four have arrived.
pub async fn load_feed<S: DataAccess>(
    store: &S,
    viewer: &UserId,
    query: &PostQuery,
    options: LoadOptions,
) -> Result<Vec<EnrichedPost>> {
    let all_likes = LikeFilter::all();
    let viewer_filter = LikeFilter::by_user(viewer);
    let all_comments = CommentFilter::default();

    let posts = with_timeout(options.timeout, store.list_posts(query));
    let likes = with_timeout(options.timeout, store.list_likes(&all_likes));
    let comments = with_timeout(options.timeout, store.list_comments(&all_comments));
    let viewer_likes = with_timeout(options.timeout, store.list_likes(&viewer_filter));

    let (posts, likes, comments, viewer_likes) = match options.on_aux_failure {
        AuxFailurePolicy::Abort => tokio::try_join!(posts, likes, comments, viewer_likes)?,
        AuxFailurePolicy::ZeroCounts => {
            let (posts, likes, comments, viewer_likes) =
                tokio::join!(posts, likes, comments, viewer_likes);
            (
                posts?,
                or_empty(likes),
                or_empty(comments),
                or_empty(viewer_likes),
            )
        }
    };

    Ok(enrich(
        posts,
        likes.iter().map(|l| &l.post_id),
        comments.iter().map(|c| &c.post_id),
        viewer_likes.iter().map(|l| &l.post_id),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::fake::{comment, like, post, FakeStore, Op};

    fn ids<'a>(rows: &'a [crate::models::Like]) -> impl Iterator<Item = &'a PostId> {
        rows.iter().map(|l| &l.post_id)
    }

    fn none<'a>() -> std::iter::Empty<&'a PostId> {
        std::iter::empty()
    }

    fn options(on_aux_failure: AuxFailurePolicy) -> LoadOptions {
        LoadOptions {
            timeout: Duration::from_secs(5),
            on_aux_failure,
        }
    }

    #[test]
    fn test_single_post_scenario() {
        let posts = vec![post("1", "C", 10)];
        let likes = vec![like("1", "A"), like("1", "B")];
        let comments = vec![comment("c1", "1", "B")];
        let viewer_likes = vec![like("1", "A")];

        let enriched = enrich(
            posts,
            ids(&likes),
            comments.iter().map(|c| &c.post_id),
            ids(&viewer_likes),
        );

        assert_eq!(enriched.len(), 1);
        assert_eq!(enriched[0].like_count, 2);
        assert_eq!(enriched[0].comment_count, 1);
        assert!(enriched[0].viewer_has_liked);
    }

    #[test]
    fn test_counts_ignore_row_order() {
        let posts = vec![post("1", "A", 30), post("2", "A", 20), post("3", "B", 10)];
        let mut likes = vec![
            like("1", "A"),
            like("2", "A"),
            like("1", "B"),
            like("3", "C"),
            like("1", "C"),
        ];

        let forward = enrich(posts.clone(), ids(&likes), none(), none());
        likes.reverse();
        let backward = enrich(posts, ids(&likes), none(), none());

        assert_eq!(forward, backward);
        let counts: Vec<u64> = forward.iter().map(|p| p.like_count).collect();
        assert_eq!(counts, vec![3, 1, 1]);
    }

    #[test]
    fn test_preserves_post_order_and_defaults_to_zero() {
        let posts = vec![post("b", "A", 10), post("a", "A", 30), post("c", "A", 20)];
        let enriched = enrich(posts, none(), none(), none());
        let order: Vec<&str> = enriched.iter().map(|p| p.id().0.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
        assert!(enriched
            .iter()
            .all(|p| p.like_count == 0 && p.comment_count == 0 && !p.viewer_has_liked));
    }

    #[test]
    fn test_rows_outside_window_do_not_disturb_counts() {
        let posts = vec![post("1", "A", 10)];
        let likes = vec![like("1", "A"), like("old", "A"), like("old", "B")];
        let enriched = enrich(posts, ids(&likes), none(), none());
        assert_eq!(enriched.len(), 1);
        assert_eq!(enriched[0].like_count, 1);
    }

    #[test]
    fn test_viewer_flag_independent_of_other_likers() {
        let posts = vec![post("1", "A", 20), post("2", "A", 10)];
        let likes = vec![like("1", "B"), like("2", "B"), like("2", "V")];
        let viewer_likes = vec![like("2", "V")];
        let enriched = enrich(posts, ids(&likes), none(), ids(&viewer_likes));
        assert!(!enriched[0].viewer_has_liked);
        assert!(enriched[1].viewer_has_liked);
    }

    #[test]
    fn test_enrich_is_idempotent() {
        let posts = vec![post("1", "A", 20), post("2", "B", 10)];
        let likes = vec![like("1", "B"), like("2", "A")];
        let comments = vec![comment("c1", "2", "A"), comment("c2", "2", "B")];
        let run = || {
            enrich(
                posts.clone(),
                ids(&likes),
                comments.iter().map(|c| &c.post_id),
                ids(&likes[..1]),
            )
        };
        assert_eq!(run(), run());
    }

    #[tokio::test]
    async fn test_load_feed_joins_four_reads() {
        let store = FakeStore::new()
            .with_posts(vec![post("1", "A", 10), post("2", "B", 20)])
            .with_likes(vec![like("1", "V"), like("1", "B"), like("2", "A")])
            .with_comments(vec![comment("c1", "2", "V")]);
        let viewer = UserId::from("V");

        let feed = load_feed(
            &store,
            &viewer,
            &PostQuery::recent(50),
            options(AuxFailurePolicy::Abort),
        )
        .await
        .unwrap();

        assert_eq!(feed[0].id().0, "2");
        assert_eq!((feed[0].like_count, feed[0].comment_count), (1, 1));
        assert!(!feed[0].viewer_has_liked);
        assert_eq!(feed[1].like_count, 2);
        assert!(feed[1].viewer_has_liked);
        assert_eq!(store.calls(Op::ListLikes), 2);
        assert_eq!(store.calls(Op::ListComments), 1);
    }

    #[tokio::test]
    async fn test_load_feed_aborts_on_aux_failure() {
        let store = FakeStore::new()
            .with_posts(vec![post("1", "A", 10)])
            .with_likes(vec![like("1", "V")]);
        store.fail(Op::ListComments);

        let err = load_feed(
            &store,
            &UserId::from("V"),
            &PostQuery::recent(50),
            options(AuxFailurePolicy::Abort),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connectivity);
    }

    #[tokio::test]
    async fn test_load_feed_zero_counts_policy() {
        let store = FakeStore::new()
            .with_posts(vec![post("1", "A", 10)])
            .with_likes(vec![like("1", "V")])
            .with_comments(vec![comment("c1", "1", "V")]);
        store.fail(Op::ListLikes);

        let feed = load_feed(
            &store,
            &UserId::from("V"),
            &PostQuery::recent(50),
            options(AuxFailurePolicy::ZeroCounts),
        )
        .await
        .unwrap();
        assert_eq!(feed[0].like_count, 0);
        assert!(!feed[0].viewer_has_liked);
        assert_eq!(feed[0].comment_count, 1);

        store.fail(Op::ListPosts);
        assert!(load_feed(
            &store,
            &UserId::from("V"),
            &PostQuery::recent(50),
            options(AuxFailurePolicy::ZeroCounts),
        )
        .await
        .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_feed_times_out() {
        let store = FakeStore::new().with_posts(vec![post("1", "A", 10)]);
        store.stall(Op::ListPosts);

        let err = load_feed(
            &store,
            &UserId::from("V"),
            &PostQuery::recent(50),
            options(AuxFailurePolicy::Abort),
        )
        .await
        .unwrap_err();
        assert_eq!(
            err,
            crate::error::FeedError::Connectivity("request timed out".into())
        );
    }
}
