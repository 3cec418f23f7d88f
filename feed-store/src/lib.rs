use feed_msg::{Target, ValidationError};
use feed_ref::{CommentId, PostId};
use thiserror::Error as ThisError;

mod config;
pub mod engine;
mod feed;
pub mod memory;
mod remote;
mod state;

pub use config::{Config, SortMode};
pub use engine::{Engine, MutationSpec, Outcome};
pub use feed::Feed;
pub use memory::{Dump, MemoryRemote, Op};
pub use remote::{FeedRemote, RemoteError};
pub use state::{FeedState, Refresh};

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Invalid submission: {0}")]
    Validation(#[from] ValidationError),
    #[error("Nothing loaded for {0}")]
    UnknownTarget(Target),
    #[error("Comment {0} is still waiting on the remote")]
    NotYetConfirmed(CommentId),
    #[error("Comment {parent_comment_id} is not on post {post_id}")]
    InvalidParent {
        post_id: PostId,
        parent_comment_id: CommentId,
    },
    #[error("Remote rejected change to {target}, reverted, cause: {source}")]
    Reverted {
        target: Target,
        #[source]
        source: RemoteError,
    },
    #[error("Remote rejected an older change to {target}, left newer state, cause: {source}")]
    Superseded {
        target: Target,
        #[source]
        source: RemoteError,
    },
    #[error("Remote disagrees about {target}, re-fetch queued: {reason}")]
    Conflict { target: Target, reason: String },
    #[error("Failed to load from remote, cause: {0}")]
    Load(#[source] RemoteError),
    #[error("Remote refused to create post, cause: {0}")]
    CreatePost(#[source] RemoteError),
}

impl Error {
    /// Whether the user should be told. Everything here is scoped to one
    /// mutation; none of it is fatal.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, Error::Superseded { .. })
    }
}
