//! An in-process remote. Applies the same toggle rule as the client through a
//! shared `ReactionLedger`, and can be told to fail or stall specific calls.

use async_trait::async_trait;
use chrono::Utc;
use feed_ledger::ReactionLedger;
use feed_msg::{Comment, CommentDto, Post, PostDto, ReactionKind, ReactionOutcome, Target};
use feed_ref::{ActorId, CommentId, ImageRef, PostId};
use feed_threads::descendant_ids;
use log::trace;
use serde_derive::{Deserialize, Serialize};
use std::{
    cell::RefCell,
    collections::{HashMap, HashSet, VecDeque},
};
use tokio::sync::oneshot;

use crate::remote::{FeedRemote, RemoteError};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    FetchPosts,
    FetchComments,
    CreatePost,
    CreateComment,
    DeleteComment,
    DeletePost,
    UpsertReaction,
    DeleteReaction,
}

/// A saved feed: posts and flat comments as the remote would serve them.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dump {
    #[serde(default, alias = "ActorId")]
    pub actor_id: Option<ActorId>,
    #[serde(default, alias = "Posts")]
    pub posts: Vec<PostDto>,
    #[serde(default, alias = "Comments")]
    pub comments: Vec<CommentDto>,
}

#[derive(Default)]
struct Store {
    posts: Vec<Post>,
    comments: Vec<Comment>,
    ledger: ReactionLedger,
    next_id: u64,
}

impl Store {
    fn mint_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}{}", prefix, self.next_id)
    }

    fn has_target(&self, target: &Target) -> bool {
        match target {
            Target::Post(post_id) => self.posts.iter().any(|post| &post.id == post_id),
            Target::Comment(comment_id) => {
                self.comments.iter().any(|comment| &comment.id == comment_id)
            }
        }
    }
}

pub struct MemoryRemote {
    actor: ActorId,
    store: RefCell<Store>,
    failures: RefCell<HashMap<Op, VecDeque<RemoteError>>>,
    held: RefCell<HashSet<Op>>,
    waiting: RefCell<Vec<(Op, oneshot::Sender<()>)>>,
    calls: RefCell<Vec<Op>>,
}

impl MemoryRemote {
    pub fn new(actor: ActorId) -> Self {
        MemoryRemote {
            actor,
            store: RefCell::new(Store::default()),
            failures: RefCell::new(HashMap::new()),
            held: RefCell::new(HashSet::new()),
            waiting: RefCell::new(Vec::new()),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Seeds the store from a dump. Counts are taken as given; the dump's
    /// current-actor reactions are recorded for `actor` without recounting.
    pub fn from_dump(actor: ActorId, dump: Dump) -> Self {
        let remote = MemoryRemote::new(actor.clone());
        {
            let mut store = remote.store.borrow_mut();
            for dto in dump.posts {
                let post = Post::from(dto);
                store.ledger.seed_counts(post.target(), post.reaction_counts);
                store
                    .ledger
                    .seed_reaction(actor.clone(), post.target(), post.current_actor_reaction);
                store.posts.push(post);
            }
            for dto in dump.comments {
                let comment = Comment::from(dto);
                store
                    .ledger
                    .seed_counts(comment.target(), comment.reaction_counts);
                store.ledger.seed_reaction(
                    actor.clone(),
                    comment.target(),
                    comment.current_actor_reaction,
                );
                store.comments.push(comment);
            }
        }
        remote
    }

    /// The next call to `op` fails with `error`. Queued per op, consumed in
    /// call order.
    pub fn fail_next(&self, op: Op, error: RemoteError) {
        self.failures
            .borrow_mut()
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Calls to `op` stall until released.
    pub fn hold(&self, op: Op) {
        self.held.borrow_mut().insert(op);
    }

    /// Stops stalling `op` and releases everything waiting on it.
    pub fn unhold(&self, op: Op) {
        self.held.borrow_mut().remove(&op);
        self.release_matching(|waiting| waiting == op, usize::MAX);
    }

    pub fn waiting(&self) -> usize {
        self.waiting.borrow().len()
    }

    /// Lets the oldest stalled call through.
    pub fn release_oldest(&self) -> bool {
        self.release_matching(|_| true, 1) == 1
    }

    /// Lets the most recent stalled call through.
    pub fn release_newest(&self) -> bool {
        match self.waiting.borrow_mut().pop() {
            Some((_, sender)) => sender.send(()).is_ok(),
            None => false,
        }
    }

    pub fn release_all(&self) -> usize {
        self.release_matching(|_| true, usize::MAX)
    }

    /// Every op called so far, in call order.
    pub fn calls(&self) -> Vec<Op> {
        self.calls.borrow().clone()
    }

    fn release_matching(&self, matches: impl Fn(Op) -> bool, limit: usize) -> usize {
        let mut waiting = self.waiting.borrow_mut();
        let mut released = 0;
        let mut index = 0;
        while index < waiting.len() && released < limit {
            if matches(waiting[index].0) {
                let (_, sender) = waiting.remove(index);
                let _ = sender.send(());
                released += 1;
            } else {
                index += 1;
            }
        }
        released
    }

    // Failures are decided when the call is made, the store is touched when
    // the call is let through.
    async fn gate(&self, op: Op) -> Result<(), RemoteError> {
        trace!("remote call {:?}", op);
        self.calls.borrow_mut().push(op);
        let failure = self
            .failures
            .borrow_mut()
            .get_mut(&op)
            .and_then(VecDeque::pop_front);

        if self.held.borrow().contains(&op) {
            let (sender, receiver) = oneshot::channel();
            self.waiting.borrow_mut().push((op, sender));
            let _ = receiver.await;
        }

        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn post_dto(&self, store: &Store, post: &Post) -> PostDto {
        let target = post.target();
        let comments_count = store
            .comments
            .iter()
            .filter(|comment| comment.post_id == post.id)
            .count();
        let mut post = post.clone();
        post.reaction_counts = store.ledger.counts(&target);
        post.current_actor_reaction = store.ledger.state(&self.actor, &target);
        post.comments_count = u32::try_from(comments_count).unwrap_or(u32::MAX);
        PostDto::from(&post)
    }

    fn comment_dto(&self, store: &Store, comment: &Comment) -> CommentDto {
        let target = comment.target();
        let mut comment = comment.shallow();
        comment.reaction_counts = store.ledger.counts(&target);
        comment.current_actor_reaction = store.ledger.state(&self.actor, &target);
        CommentDto::from(&comment)
    }
}

#[async_trait(?Send)]
impl FeedRemote for MemoryRemote {
    async fn fetch_posts(&self) -> Result<Vec<PostDto>, RemoteError> {
        self.gate(Op::FetchPosts).await?;
        let store = self.store.borrow();
        Ok(store
            .posts
            .iter()
            .map(|post| self.post_dto(&store, post))
            .collect())
    }

    async fn fetch_comments(&self, post_id: &PostId) -> Result<Vec<CommentDto>, RemoteError> {
        self.gate(Op::FetchComments).await?;
        let store = self.store.borrow();
        if !store.has_target(&Target::Post(post_id.clone())) {
            return Err(RemoteError::NotFound(format!("post {}", post_id)));
        }
        Ok(store
            .comments
            .iter()
            .filter(|comment| &comment.post_id == post_id)
            .map(|comment| self.comment_dto(&store, comment))
            .collect())
    }

    async fn create_post(
        &self,
        text: &str,
        image: Option<&ImageRef>,
    ) -> Result<PostDto, RemoteError> {
        self.gate(Op::CreatePost).await?;
        let mut store = self.store.borrow_mut();
        let id = PostId::from_string(store.mint_id("post-"))
            .map_err(|error| RemoteError::Transient(error.to_string()))?;
        let post = Post {
            id,
            author_id: self.actor.clone(),
            text: text.to_string(),
            image: image.cloned(),
            created_at: Utc::now(),
            reaction_counts: Default::default(),
            current_actor_reaction: Default::default(),
            comments_count: 0,
        };
        store.posts.push(post.clone());
        Ok(self.post_dto(&store, &post))
    }

    async fn create_comment(
        &self,
        post_id: &PostId,
        parent_comment_id: Option<&CommentId>,
        content: &str,
        image: Option<&ImageRef>,
    ) -> Result<CommentDto, RemoteError> {
        self.gate(Op::CreateComment).await?;
        let mut store = self.store.borrow_mut();
        if !store.has_target(&Target::Post(post_id.clone())) {
            return Err(RemoteError::NotFound(format!("post {}", post_id)));
        }
        if let Some(parent_id) = parent_comment_id {
            let parent_on_post = store
                .comments
                .iter()
                .any(|comment| &comment.id == parent_id && &comment.post_id == post_id);
            if !parent_on_post {
                return Err(RemoteError::Conflict(format!(
                    "parent comment {} is not on post {}",
                    parent_id, post_id
                )));
            }
        }
        let id = CommentId::from_string(store.mint_id("comment-"))
            .map_err(|error| RemoteError::Transient(error.to_string()))?;
        let comment = Comment {
            id,
            post_id: post_id.clone(),
            author_id: self.actor.clone(),
            parent_comment_id: parent_comment_id.cloned(),
            content: content.to_string(),
            image: image.cloned(),
            created_at: Utc::now(),
            reaction_counts: Default::default(),
            current_actor_reaction: Default::default(),
            replies: Vec::new(),
        };
        store.comments.push(comment.clone());
        Ok(self.comment_dto(&store, &comment))
    }

    async fn delete_comment(&self, comment_id: &CommentId) -> Result<(), RemoteError> {
        self.gate(Op::DeleteComment).await?;
        let mut store = self.store.borrow_mut();
        if !store.has_target(&Target::Comment(comment_id.clone())) {
            return Err(RemoteError::NotFound(format!("comment {}", comment_id)));
        }
        let mut doomed = descendant_ids(&store.comments, comment_id);
        doomed.push(comment_id.clone());
        for id in &doomed {
            store.ledger.forget_target(&Target::Comment(id.clone()));
        }
        store.comments.retain(|comment| !doomed.contains(&comment.id));
        Ok(())
    }

    async fn delete_post(&self, post_id: &PostId) -> Result<(), RemoteError> {
        self.gate(Op::DeletePost).await?;
        let mut store = self.store.borrow_mut();
        let target = Target::Post(post_id.clone());
        if !store.has_target(&target) {
            return Err(RemoteError::NotFound(format!("post {}", post_id)));
        }
        store.ledger.forget_target(&target);
        let doomed: Vec<Target> = store
            .comments
            .iter()
            .filter(|comment| &comment.post_id == post_id)
            .map(Comment::target)
            .collect();
        for comment_target in &doomed {
            store.ledger.forget_target(comment_target);
        }
        store.comments.retain(|comment| &comment.post_id != post_id);
        store.posts.retain(|post| &post.id != post_id);
        Ok(())
    }

    async fn upsert_reaction(
        &self,
        target: &Target,
        kind: ReactionKind,
    ) -> Result<ReactionOutcome, RemoteError> {
        self.gate(Op::UpsertReaction).await?;
        let mut store = self.store.borrow_mut();
        if !store.has_target(target) {
            return Err(RemoteError::NotFound(target.to_string()));
        }
        let (_, delta) = store.ledger.toggle(&self.actor, target, kind);
        delta
            .expected_outcome()
            .ok_or_else(|| RemoteError::Conflict(format!("toggle on {} changed nothing", target)))
    }

    async fn delete_reaction(&self, target: &Target) -> Result<(), RemoteError> {
        self.gate(Op::DeleteReaction).await?;
        let mut store = self.store.borrow_mut();
        if !store.has_target(target) {
            return Err(RemoteError::NotFound(target.to_string()));
        }
        store.ledger.clear(&self.actor, target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dump() -> Dump {
        serde_json::from_str(
            r#"{
                "actorId": "guest",
                "Posts": [
                    {"Id": "p1", "AuthorId": "host", "Text": "Welcome", "CreatedAt": "2024-03-01T10:00:00Z",
                     "ReactionCounts": {"Like": 2}, "CurrentActorReaction": "Like"}
                ],
                "comments": [
                    {"id": "c1", "postId": "p1", "authorId": "guest", "content": "Thanks", "createdAt": "2024-03-01T11:00:00Z"},
                    {"id": "c2", "postId": "p1", "authorId": "host", "parentCommentId": "c1", "content": "Anytime", "createdAt": "2024-03-01T12:00:00Z"}
                ]
            }"#,
        )
        .unwrap()
    }

    fn remote() -> MemoryRemote {
        MemoryRemote::from_dump(ActorId::try_from("guest").unwrap(), dump())
    }

    #[tokio::test]
    async fn test_server_toggle_rule() {
        let remote = remote();
        let target = Target::Post(PostId::try_from("p1").unwrap());

        // dump says guest already likes p1
        assert_eq!(
            remote.upsert_reaction(&target, ReactionKind::Like).await,
            Ok(ReactionOutcome::Deleted)
        );
        assert_eq!(
            remote.upsert_reaction(&target, ReactionKind::Wow).await,
            Ok(ReactionOutcome::Created)
        );
        assert_eq!(
            remote.upsert_reaction(&target, ReactionKind::Haha).await,
            Ok(ReactionOutcome::Updated)
        );

        let posts = remote.fetch_posts().await.unwrap();
        let post = Post::from(posts[0].clone());
        assert_eq!(post.reaction_counts.get(ReactionKind::Like), 1);
        assert_eq!(post.reaction_counts.get(ReactionKind::Haha), 1);
        assert_eq!(post.reaction_counts.get(ReactionKind::Wow), 0);
        assert_eq!(post.comments_count, 2);
    }

    #[tokio::test]
    async fn test_delete_comment_cascades() {
        let remote = remote();
        let post_id = PostId::try_from("p1").unwrap();
        remote
            .delete_comment(&CommentId::try_from("c1").unwrap())
            .await
            .unwrap();
        assert!(remote.fetch_comments(&post_id).await.unwrap().is_empty());
        assert_eq!(
            remote
                .delete_comment(&CommentId::try_from("c1").unwrap())
                .await,
            Err(RemoteError::NotFound("comment c1".into()))
        );
    }

    #[tokio::test]
    async fn test_reply_to_missing_parent_conflicts() {
        let remote = remote();
        let post_id = PostId::try_from("p1").unwrap();
        let result = remote
            .create_comment(
                &post_id,
                Some(&CommentId::try_from("nope").unwrap()),
                "hi",
                None,
            )
            .await;
        assert!(matches!(result, Err(RemoteError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_scripted_failures_in_call_order() {
        let remote = remote();
        remote.fail_next(Op::FetchPosts, RemoteError::Transient("502".into()));
        assert!(matches!(
            remote.fetch_posts().await,
            Err(RemoteError::Transient(reason)) if reason == "502"
        ));
        assert!(remote.fetch_posts().await.is_ok());
        assert_eq!(remote.calls(), vec![Op::FetchPosts, Op::FetchPosts]);
    }
}
