// Remote records arrive in either camelCase or PascalCase depending on which
// backend serialized them. This module is the only place that knows.

use chrono::{DateTime, Utc};
use feed_ref::{ActorId, CommentId, ImageRef, PostId};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnError};

use crate::{Comment, Post, ReactionCounts, ReactionKind, ReactionState};

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDto {
    #[serde(alias = "Id")]
    pub id: PostId,
    #[serde(alias = "AuthorId")]
    pub author_id: ActorId,
    #[serde(alias = "Text", alias = "content", alias = "Content")]
    pub text: String,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default, alias = "Image", alias = "imageUrl", alias = "ImageUrl")]
    pub image: Option<ImageRef>,
    #[serde(alias = "CreatedAt")]
    pub created_at: DateTime<Utc>,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default, alias = "ReactionCounts")]
    pub reaction_counts: ReactionCounts,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default, alias = "CurrentActorReaction")]
    pub current_actor_reaction: Option<ReactionKind>,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default, alias = "CommentsCount")]
    pub comments_count: u32,
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentDto {
    #[serde(alias = "Id")]
    pub id: CommentId,
    #[serde(alias = "PostId")]
    pub post_id: PostId,
    #[serde(alias = "AuthorId")]
    pub author_id: ActorId,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default, alias = "ParentCommentId")]
    pub parent_comment_id: Option<CommentId>,
    #[serde(default, alias = "Content")]
    pub content: String,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default, alias = "Image", alias = "imageUrl", alias = "ImageUrl")]
    pub image: Option<ImageRef>,
    #[serde(alias = "CreatedAt")]
    pub created_at: DateTime<Utc>,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default, alias = "ReactionCounts")]
    pub reaction_counts: ReactionCounts,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default, alias = "CurrentActorReaction")]
    pub current_actor_reaction: Option<ReactionKind>,
}

/// What the remote did with an upsert, after applying its own toggle rule.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionOutcome {
    #[serde(alias = "Created")]
    Created,
    #[serde(alias = "Updated")]
    Updated,
    #[serde(alias = "Deleted")]
    Deleted,
}

impl From<PostDto> for Post {
    fn from(dto: PostDto) -> Self {
        Post {
            id: dto.id,
            author_id: dto.author_id,
            text: dto.text,
            image: dto.image,
            created_at: dto.created_at,
            reaction_counts: dto.reaction_counts,
            current_actor_reaction: ReactionState::from(dto.current_actor_reaction),
            comments_count: dto.comments_count,
        }
    }
}

impl From<&Post> for PostDto {
    fn from(post: &Post) -> Self {
        PostDto {
            id: post.id.clone(),
            author_id: post.author_id.clone(),
            text: post.text.clone(),
            image: post.image.clone(),
            created_at: post.created_at,
            reaction_counts: post.reaction_counts,
            current_actor_reaction: post.current_actor_reaction.kind(),
            comments_count: post.comments_count,
        }
    }
}

impl From<CommentDto> for Comment {
    fn from(dto: CommentDto) -> Self {
        Comment {
            id: dto.id,
            post_id: dto.post_id,
            author_id: dto.author_id,
            parent_comment_id: dto.parent_comment_id,
            content: dto.content,
            image: dto.image,
            created_at: dto.created_at,
            reaction_counts: dto.reaction_counts,
            current_actor_reaction: ReactionState::from(dto.current_actor_reaction),
            replies: Vec::new(),
        }
    }
}

impl From<&Comment> for CommentDto {
    fn from(comment: &Comment) -> Self {
        CommentDto {
            id: comment.id.clone(),
            post_id: comment.post_id.clone(),
            author_id: comment.author_id.clone(),
            parent_comment_id: comment.parent_comment_id.clone(),
            content: comment.content.clone(),
            image: comment.image.clone(),
            created_at: comment.created_at,
            reaction_counts: comment.reaction_counts,
            current_actor_reaction: comment.current_actor_reaction.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_dto_camel_case() {
        let json = r#"{
            "id": "p1",
            "authorId": "u1",
            "text": "Check in was smooth",
            "image": "https://cdn.example.com/lobby.jpg",
            "createdAt": "2024-03-01T10:00:00Z",
            "reactionCounts": {"like": 2, "wow": 1},
            "currentActorReaction": "like",
            "commentsCount": 4
        }"#;
        let post: Post = serde_json::from_str::<PostDto>(json).unwrap().into();
        assert_eq!(post.id.as_str(), "p1");
        assert_eq!(post.reaction_counts.get(ReactionKind::Like), 2);
        assert_eq!(
            post.current_actor_reaction,
            ReactionState::Reacted(ReactionKind::Like)
        );
        assert_eq!(post.comments_count, 4);
        assert!(post.image.is_some());
    }

    #[test]
    fn test_post_dto_pascal_case() {
        let json = r#"{
            "Id": 17,
            "AuthorId": 3,
            "Content": "Pool closes at 9",
            "CreatedAt": "2024-03-01T10:00:00Z",
            "ReactionCounts": {"Love": 1},
            "CurrentActorReaction": "Love"
        }"#;
        let post: Post = serde_json::from_str::<PostDto>(json).unwrap().into();
        assert_eq!(post.id.as_str(), "17");
        assert_eq!(post.author_id.as_str(), "3");
        assert_eq!(post.text, "Pool closes at 9");
        assert_eq!(post.reaction_counts.get(ReactionKind::Love), 1);
        assert_eq!(post.comments_count, 0);
        assert_eq!(post.image, None);
    }

    #[test]
    fn test_malformed_optional_fields_degrade() {
        let json = r#"{
            "id": "c9",
            "postId": "p1",
            "authorId": "u2",
            "parentCommentId": "",
            "content": "same",
            "image": "not-a-url",
            "createdAt": "2024-03-01T10:00:00Z",
            "reactionCounts": [1, 2, 3],
            "currentActorReaction": "sparkle"
        }"#;
        let comment: Comment = serde_json::from_str::<CommentDto>(json).unwrap().into();
        assert_eq!(comment.parent_comment_id, None);
        assert_eq!(comment.image, None);
        assert_eq!(comment.reaction_counts.total(), 0);
        assert_eq!(comment.current_actor_reaction, ReactionState::NoReaction);
        assert!(comment.replies.is_empty());
    }

    #[test]
    fn test_reaction_outcome_casing() {
        let outcome: ReactionOutcome = serde_json::from_str("\"Deleted\"").unwrap();
        assert_eq!(outcome, ReactionOutcome::Deleted);
        let outcome: ReactionOutcome = serde_json::from_str("\"created\"").unwrap();
        assert_eq!(outcome, ReactionOutcome::Created);
    }
}
