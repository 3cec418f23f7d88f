use chrono::{DateTime, Utc};
use feed_ref::{ActorId, CommentId, ImageRef, PostId};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};
use thiserror::Error as ThisError;

mod dto;
pub use dto::{CommentDto, PostDto, ReactionOutcome};

#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum ValidationError {
    #[error("Nothing to submit: content is empty and there is no image")]
    EmptySubmission,
    #[error("Unknown reaction kind: {0}")]
    UnknownReactionKind(String),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum ReactionKind {
    Like,
    Dislike,
    Love,
    Haha,
    Wow,
    Angry,
}

impl ReactionKind {
    pub const ALL: [ReactionKind; 6] = [
        ReactionKind::Like,
        ReactionKind::Dislike,
        ReactionKind::Love,
        ReactionKind::Haha,
        ReactionKind::Wow,
        ReactionKind::Angry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReactionKind::Like => "like",
            ReactionKind::Dislike => "dislike",
            ReactionKind::Love => "love",
            ReactionKind::Haha => "haha",
            ReactionKind::Wow => "wow",
            ReactionKind::Angry => "angry",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl FromStr for ReactionKind {
    type Err = ValidationError;

    // Backends send "Like", "like" or "LIKE" depending on who wrote the endpoint
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        ReactionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lowered)
            .ok_or_else(|| ValidationError::UnknownReactionKind(s.to_string()))
    }
}

impl TryFrom<String> for ReactionKind {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for ReactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one actor currently has on one target.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "Option<ReactionKind>", into = "Option<ReactionKind>")]
pub enum ReactionState {
    #[default]
    NoReaction,
    Reacted(ReactionKind),
}

impl ReactionState {
    pub fn kind(&self) -> Option<ReactionKind> {
        match self {
            ReactionState::NoReaction => None,
            ReactionState::Reacted(kind) => Some(*kind),
        }
    }

    pub fn is_reacted(&self) -> bool {
        matches!(self, ReactionState::Reacted(_))
    }
}

impl From<Option<ReactionKind>> for ReactionState {
    fn from(value: Option<ReactionKind>) -> Self {
        match value {
            Some(kind) => ReactionState::Reacted(kind),
            None => ReactionState::NoReaction,
        }
    }
}

impl From<ReactionState> for Option<ReactionKind> {
    fn from(value: ReactionState) -> Self {
        value.kind()
    }
}

/// Independent per-kind tallies. They are not a partition of participants,
/// so `total` can disagree with the number of people who reacted.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "BTreeMap<String, i64>", into = "BTreeMap<String, u32>")]
pub struct ReactionCounts([u32; 6]);

impl ReactionCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: ReactionKind) -> u32 {
        self.0[kind.index()]
    }

    pub fn set(&mut self, kind: ReactionKind, count: u32) {
        self.0[kind.index()] = count;
    }

    pub fn increment(&mut self, kind: ReactionKind) {
        let slot = &mut self.0[kind.index()];
        *slot = slot.saturating_add(1);
    }

    // Clamped at zero, remote confirmations can land out of order
    pub fn decrement(&mut self, kind: ReactionKind) {
        let slot = &mut self.0[kind.index()];
        *slot = slot.saturating_sub(1);
    }

    pub fn total(&self) -> u64 {
        self.0.iter().map(|count| u64::from(*count)).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ReactionKind, u32)> + '_ {
        ReactionKind::ALL
            .into_iter()
            .map(move |kind| (kind, self.get(kind)))
    }
}

impl From<BTreeMap<String, i64>> for ReactionCounts {
    fn from(map: BTreeMap<String, i64>) -> Self {
        let mut counts = ReactionCounts::new();
        for (name, count) in map {
            // unknown kinds from newer servers are skipped, not fatal
            if let Ok(kind) = name.parse::<ReactionKind>() {
                let count = u32::try_from(count.max(0)).unwrap_or(u32::MAX);
                counts.set(kind, count);
            }
        }
        counts
    }
}

impl From<ReactionCounts> for BTreeMap<String, u32> {
    fn from(counts: ReactionCounts) -> Self {
        counts
            .iter()
            .map(|(kind, count)| (kind.as_str().to_string(), count))
            .collect()
    }
}

/// Something that can receive a reaction.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(tag = "type", content = "id")]
pub enum Target {
    Post(PostId),
    Comment(CommentId),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Post(id) => write!(f, "post:{}", id),
            Target::Comment(id) => write!(f, "comment:{}", id),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: PostId,
    pub author_id: ActorId,
    pub text: String,
    pub image: Option<ImageRef>,
    pub created_at: DateTime<Utc>,
    pub reaction_counts: ReactionCounts,
    pub current_actor_reaction: ReactionState,
    pub comments_count: u32,
}

impl Post {
    pub fn target(&self) -> Target {
        Target::Post(self.id.clone())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,
    pub author_id: ActorId,
    pub parent_comment_id: Option<CommentId>,
    pub content: String,
    pub image: Option<ImageRef>,
    pub created_at: DateTime<Utc>,
    pub reaction_counts: ReactionCounts,
    pub current_actor_reaction: ReactionState,
    /// Only ever filled in by the tree builder.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replies: Vec<Comment>,
}

impl Comment {
    pub fn target(&self) -> Target {
        Target::Comment(self.id.clone())
    }

    /// Copy of this comment with an empty reply list.
    pub fn shallow(&self) -> Comment {
        Comment {
            id: self.id.clone(),
            post_id: self.post_id.clone(),
            author_id: self.author_id.clone(),
            parent_comment_id: self.parent_comment_id.clone(),
            content: self.content.clone(),
            image: self.image.clone(),
            created_at: self.created_at,
            reaction_counts: self.reaction_counts,
            current_actor_reaction: self.current_actor_reaction,
            replies: Vec::new(),
        }
    }
}

/// A post as typed by the user, before it reaches the remote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewPost {
    pub text: String,
    pub image: Option<ImageRef>,
}

impl NewPost {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_not_empty(&self.text, &self.image)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewComment {
    pub post_id: PostId,
    pub parent_comment_id: Option<CommentId>,
    pub content: String,
    pub image: Option<ImageRef>,
}

impl NewComment {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_not_empty(&self.content, &self.image)
    }
}

fn check_not_empty(text: &str, image: &Option<ImageRef>) -> Result<(), ValidationError> {
    if text.trim().is_empty() && image.is_none() {
        Err(ValidationError::EmptySubmission)
    } else {
        Ok(())
    }
}
