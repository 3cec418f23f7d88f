use async_trait::async_trait;
use feed_msg::{CommentDto, PostDto, ReactionKind, ReactionOutcome, Target};
use feed_ref::{CommentId, ImageRef, PostId};
use thiserror::Error as ThisError;

#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum RemoteError {
    /// Network trouble or a 5xx. Worth retrying later.
    #[error("Remote unavailable: {0}")]
    Transient(String),
    /// The remote state is not what the request assumed.
    #[error("Remote conflict: {0}")]
    Conflict(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

/// The backend collaborator. Transport and authentication live behind this
/// trait; the acting user is implied by whoever built the implementation.
///
/// Futures are `?Send`: the feed runs on a single-threaded event loop.
#[async_trait(?Send)]
pub trait FeedRemote {
    async fn fetch_posts(&self) -> Result<Vec<PostDto>, RemoteError>;

    /// Flat and unsorted. May contain replies whose parent is missing.
    async fn fetch_comments(&self, post_id: &PostId) -> Result<Vec<CommentDto>, RemoteError>;

    async fn create_post(
        &self,
        text: &str,
        image: Option<&ImageRef>,
    ) -> Result<PostDto, RemoteError>;

    async fn create_comment(
        &self,
        post_id: &PostId,
        parent_comment_id: Option<&CommentId>,
        content: &str,
        image: Option<&ImageRef>,
    ) -> Result<CommentDto, RemoteError>;

    async fn delete_comment(&self, comment_id: &CommentId) -> Result<(), RemoteError>;

    async fn delete_post(&self, post_id: &PostId) -> Result<(), RemoteError>;

    /// The remote applies its own toggle rule and reports what it did.
    async fn upsert_reaction(
        &self,
        target: &Target,
        kind: ReactionKind,
    ) -> Result<ReactionOutcome, RemoteError>;

    async fn delete_reaction(&self, target: &Target) -> Result<(), RemoteError>;
}
