//! Optimistic mutations: snapshot the slice a change touches, apply the change
//! locally, call the remote, then confirm or restore.
//!
//! `begin` and `reconcile` are synchronous and run back to back with nothing
//! interleaved; the remote call between them is the only suspension point.
//!
//! Reactions use non-blocking ordering. A second toggle on a target that
//! still has one in flight is applied straight away on top of the
//! optimistic state. Each dispatch takes a monotonic stamp, and only the
//! response carrying a target's latest stamp may revert it; an older failure
//! leaves the display alone and schedules a re-fetch once the target is
//! quiet instead.

use feed_ledger::CountDelta;
use feed_msg::{
    Comment, NewComment, Post, ReactionCounts, ReactionKind, ReactionOutcome, ReactionState,
    Target,
};
use feed_ref::{ActorId, CommentId, PostId};
use feed_threads::descendant_ids;
use log::{debug, info, warn};
use std::{cell::RefCell, rc::Rc};

use crate::remote::{FeedRemote, RemoteError};
use crate::state::{FeedState, Refresh};
use crate::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutationSpec {
    ToggleReaction {
        target: Target,
        kind: ReactionKind,
    },
    ClearReaction {
        target: Target,
    },
    CreateComment {
        author: ActorId,
        draft: NewComment,
    },
    DeleteComment {
        comment_id: CommentId,
    },
    DeletePost {
        post_id: PostId,
    },
}

/// What a successful remote call handed back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Confirmation {
    Reaction(ReactionOutcome),
    Comment(Comment),
    Ack,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The remote agreed; local state already shows the result.
    Confirmed,
    /// The remote agreed, but a newer local change on the same target has
    /// already replaced this one on screen.
    Superseded,
    /// A comment was created; this is the remote's copy, now in place of
    /// the provisional one.
    Created(Comment),
    /// The feed was torn down while the call was in flight.
    Dropped,
}

#[derive(Clone, Debug)]
enum Snapshot {
    Reaction(ReactionSnapshot),
    CreatedComment {
        post_id: PostId,
        provisional: CommentId,
    },
    DeletedComments {
        post_id: PostId,
        comment_id: CommentId,
        removed: Vec<(usize, Comment)>,
    },
    DeletedPost {
        index: usize,
        post: Post,
        comments: Option<Vec<Comment>>,
    },
}

/// A mutation that has been applied locally and awaits its remote answer.
#[derive(Clone, Debug)]
pub struct Pending {
    epoch: u64,
    snapshot: Snapshot,
}

impl Pending {
    pub fn stamp(&self) -> Option<u64> {
        match &self.snapshot {
            Snapshot::Reaction(reaction) => Some(reaction.stamp),
            _ => None,
        }
    }

    /// Id of the optimistic comment inserted by a create.
    pub fn provisional_comment(&self) -> Option<&CommentId> {
        match &self.snapshot {
            Snapshot::CreatedComment { provisional, .. } => Some(provisional),
            _ => None,
        }
    }
}

/// Validates `mutation`, captures its snapshot and installs the optimistic
/// result. Nothing is touched when this returns an error.
pub fn begin(state: &mut FeedState, mutation: &MutationSpec) -> Result<Pending, Error> {
    let snapshot = match mutation {
        MutationSpec::ToggleReaction { target, kind } => {
            check_reactable(target)?;
            let kind = *kind;
            begin_reaction(state, target, false, |reactable| reactable.apply_toggle(kind))?
        }
        MutationSpec::ClearReaction { target } => {
            check_reactable(target)?;
            begin_reaction(state, target, true, |reactable| reactable.apply_clear())?
        }
        MutationSpec::CreateComment { author, draft } => begin_create_comment(state, author, draft)?,
        MutationSpec::DeleteComment { comment_id } => begin_delete_comment(state, comment_id)?,
        MutationSpec::DeletePost { post_id } => begin_delete_post(state, post_id)?,
    };

    Ok(Pending {
        epoch: state.epoch,
        snapshot,
    })
}

fn check_reactable(target: &Target) -> Result<(), Error> {
    if let Target::Comment(comment_id) = target {
        if comment_id.is_provisional() {
            return Err(Error::NotYetConfirmed(comment_id.clone()));
        }
    }
    Ok(())
}

fn begin_reaction(
    state: &mut FeedState,
    target: &Target,
    clearing: bool,
    apply: impl FnOnce(&mut dyn feed_ledger::Reactable) -> CountDelta,
) -> Result<Snapshot, Error> {
    let reactable = state
        .reactable_mut(target)
        .ok_or_else(|| Error::UnknownTarget(target.clone()))?;

    let (current, counts) = reactable.reaction_fields();
    let (previous_state, previous_counts) = (*current, *counts);
    let delta = apply(reactable);

    state.next_stamp += 1;
    let stamp = state.next_stamp;
    state.stamps.insert(target.clone(), stamp);
    *state.in_flight.entry(target.clone()).or_default() += 1;
    state.touched();

    debug!("applied reaction change on {} (stamp {})", target, stamp);

    Ok(Snapshot::Reaction(ReactionSnapshot {
        target: target.clone(),
        previous_state,
        previous_counts,
        expected: delta.expected_outcome(),
        clearing,
        stamp,
    }))
}

fn begin_create_comment(
    state: &mut FeedState,
    author: &ActorId,
    draft: &NewComment,
) -> Result<Snapshot, Error> {
    draft.validate()?;

    if state.post(&draft.post_id).is_none() {
        return Err(Error::UnknownTarget(Target::Post(draft.post_id.clone())));
    }
    if let Some(parent_id) = &draft.parent_comment_id {
        if parent_id.is_provisional() {
            return Err(Error::NotYetConfirmed(parent_id.clone()));
        }
        let parent_on_post = state
            .comments(&draft.post_id)
            .iter()
            .any(|comment| &comment.id == parent_id);
        if !parent_on_post {
            return Err(Error::InvalidParent {
                post_id: draft.post_id.clone(),
                parent_comment_id: parent_id.clone(),
            });
        }
    }

    state.next_provisional += 1;
    let provisional = CommentId::provisional(state.next_provisional);
    let comment = Comment {
        id: provisional.clone(),
        post_id: draft.post_id.clone(),
        author_id: author.clone(),
        parent_comment_id: draft.parent_comment_id.clone(),
        content: draft.content.clone(),
        image: draft.image.clone(),
        created_at: chrono::Utc::now(),
        reaction_counts: ReactionCounts::new(),
        current_actor_reaction: ReactionState::NoReaction,
        replies: Vec::new(),
    };
    state.comments_mut(&draft.post_id).push(comment);
    if let Some(post) = state.post_mut(&draft.post_id) {
        post.comments_count = post.comments_count.saturating_add(1);
    }
    state.touched();

    Ok(Snapshot::CreatedComment {
        post_id: draft.post_id.clone(),
        provisional,
    })
}

fn begin_delete_comment(state: &mut FeedState, comment_id: &CommentId) -> Result<Snapshot, Error> {
    if comment_id.is_provisional() {
        return Err(Error::NotYetConfirmed(comment_id.clone()));
    }
    let post_id = state
        .comment(comment_id)
        .map(|comment| comment.post_id.clone())
        .ok_or_else(|| Error::UnknownTarget(Target::Comment(comment_id.clone())))?;

    // replies go with their parent, or they would resurface as orphans
    let comments = state.comments_mut(&post_id);
    let mut doomed = descendant_ids(comments, comment_id);
    doomed.push(comment_id.clone());

    let mut removed = Vec::new();
    let mut index = 0;
    let mut original_index = 0;
    while index < comments.len() {
        if doomed.contains(&comments[index].id) {
            removed.push((original_index, comments.remove(index)));
        } else {
            index += 1;
        }
        original_index += 1;
    }

    for (_, comment) in &removed {
        state
            .deleting_comments
            .insert(comment.id.clone(), post_id.clone());
    }
    let removed_count = u32::try_from(removed.len()).unwrap_or(u32::MAX);
    if let Some(post) = state.post_mut(&post_id) {
        post.comments_count = post.comments_count.saturating_sub(removed_count);
    }
    state.touched();

    Ok(Snapshot::DeletedComments {
        post_id,
        comment_id: comment_id.clone(),
        removed,
    })
}

fn begin_delete_post(state: &mut FeedState, post_id: &PostId) -> Result<Snapshot, Error> {
    let index = state
        .post_index(post_id)
        .ok_or_else(|| Error::UnknownTarget(Target::Post(post_id.clone())))?;
    let (post, comments) = state.remove_post(index);
    state.deleting_posts.insert(post_id.clone());

    Ok(Snapshot::DeletedPost {
        index,
        post,
        comments,
    })
}

/// Calls the remote operation matching `mutation`.
pub async fn dispatch<R>(remote: &R, mutation: &MutationSpec) -> Result<Confirmation, RemoteError>
where
    R: FeedRemote + ?Sized,
{
    match mutation {
        MutationSpec::ToggleReaction { target, kind } => remote
            .upsert_reaction(target, *kind)
            .await
            .map(Confirmation::Reaction),
        MutationSpec::ClearReaction { target } => remote
            .delete_reaction(target)
            .await
            .map(|()| Confirmation::Ack),
        MutationSpec::CreateComment { draft, .. } => remote
            .create_comment(
                &draft.post_id,
                draft.parent_comment_id.as_ref(),
                &draft.content,
                draft.image.as_ref(),
            )
            .await
            .map(|dto| Confirmation::Comment(dto.into())),
        MutationSpec::DeleteComment { comment_id } => remote
            .delete_comment(comment_id)
            .await
            .map(|()| Confirmation::Ack),
        MutationSpec::DeletePost { post_id } => remote
            .delete_post(post_id)
            .await
            .map(|()| Confirmation::Ack),
    }
}

/// Settles a pending mutation against the remote's answer.
pub fn reconcile(
    state: &mut FeedState,
    pending: Pending,
    result: Result<Confirmation, RemoteError>,
) -> Result<Outcome, Error> {
    if pending.epoch != state.epoch {
        debug!("dropping response for a torn down feed");
        return Ok(Outcome::Dropped);
    }

    let outcome = match pending.snapshot {
        Snapshot::Reaction(reaction) => reconcile_reaction(state, reaction, result),
        Snapshot::CreatedComment {
            post_id,
            provisional,
        } => reconcile_create_comment(state, post_id, provisional, result),
        Snapshot::DeletedComments {
            post_id,
            comment_id,
            removed,
        } => reconcile_delete_comments(state, post_id, comment_id, removed, result),
        Snapshot::DeletedPost {
            index,
            post,
            comments,
        } => reconcile_delete_post(state, index, post, comments, result),
    };
    state.touched();
    outcome
}

#[derive(Clone, Debug)]
struct ReactionSnapshot {
    target: Target,
    previous_state: ReactionState,
    previous_counts: ReactionCounts,
    expected: Option<ReactionOutcome>,
    clearing: bool,
    stamp: u64,
}

fn reconcile_reaction(
    state: &mut FeedState,
    snapshot: ReactionSnapshot,
    result: Result<Confirmation, RemoteError>,
) -> Result<Outcome, Error> {
    let ReactionSnapshot {
        target,
        previous_state,
        previous_counts,
        expected,
        clearing,
        stamp,
    } = snapshot;
    let remaining = match state.in_flight.get_mut(&target) {
        Some(count) => {
            *count = count.saturating_sub(1);
            *count
        }
        None => 0,
    };
    let latest = state.stamps.get(&target) == Some(&stamp);
    if remaining == 0 {
        // nothing older can still arrive for this target
        state.in_flight.remove(&target);
        state.stamps.remove(&target);
    }

    let outcome = match result {
        Ok(Confirmation::Reaction(actual)) if expected.is_some() && Some(actual) != expected => {
            warn!(
                "remote reported {:?} on {}, expected {:?}; resyncing",
                actual, target, expected
            );
            state.resync(&target);
            Err(Error::Conflict {
                target: target.clone(),
                reason: format!("expected {:?}, remote reported {:?}", expected, actual),
            })
        }
        Ok(_) => finish_success(state, &target, latest),
        // clearing something already gone on the remote is what we wanted
        Err(RemoteError::NotFound(_)) if clearing => finish_success(state, &target, latest),
        Err(RemoteError::Conflict(reason)) => {
            warn!("conflict on {}: {}; resyncing", target, reason);
            state.resync(&target);
            Err(Error::Conflict {
                target: target.clone(),
                reason,
            })
        }
        Err(error) if latest => {
            info!("reverting {} after remote failure: {}", target, error);
            if let Some(reactable) = state.reactable_mut(&target) {
                let (current, counts) = reactable.reaction_fields();
                *current = previous_state;
                *counts = previous_counts;
            }
            if matches!(error, RemoteError::NotFound(_)) {
                state.resync(&target);
            }
            Err(Error::Reverted {
                target: target.clone(),
                source: error,
            })
        }
        Err(error) => {
            info!(
                "remote failure on {} after a newer change, leaving it: {}",
                target, error
            );
            state.resync(&target);
            Err(Error::Superseded {
                target: target.clone(),
                source: error,
            })
        }
    };

    if remaining == 0 && state.dirty.remove(&target) {
        state.resync(&target);
    }
    outcome
}

fn finish_success(state: &mut FeedState, target: &Target, latest: bool) -> Result<Outcome, Error> {
    if state.refresh_after_success {
        state.resync(target);
    }
    if latest {
        Ok(Outcome::Confirmed)
    } else {
        Ok(Outcome::Superseded)
    }
}

fn reconcile_create_comment(
    state: &mut FeedState,
    post_id: PostId,
    provisional: CommentId,
    result: Result<Confirmation, RemoteError>,
) -> Result<Outcome, Error> {
    let target = Target::Post(post_id.clone());
    match result {
        Ok(Confirmation::Comment(comment)) => {
            if let Some(comments) = state.loaded_comments_mut(&post_id) {
                let arrived = comments.iter().any(|c| c.id == comment.id);
                match comments.iter().position(|c| c.id == provisional) {
                    // a refresh already brought the remote's copy in
                    Some(position) if arrived => {
                        comments.remove(position);
                    }
                    Some(position) => comments[position] = comment.clone(),
                    None => debug!("provisional comment {} is gone, not replacing", provisional),
                }
            }
            if state.refresh_after_success {
                state.queue_refresh(Refresh::Comments(post_id));
            }
            Ok(Outcome::Created(comment))
        }
        Ok(other) => {
            warn!("unexpected answer to comment create: {:?}", other);
            remove_provisional(state, &post_id, &provisional);
            state.queue_refresh(Refresh::Comments(post_id));
            Err(Error::Conflict {
                target,
                reason: "remote did not return the created comment".to_string(),
            })
        }
        Err(RemoteError::Conflict(reason)) => {
            remove_provisional(state, &post_id, &provisional);
            state.queue_refresh(Refresh::Comments(post_id));
            Err(Error::Conflict { target, reason })
        }
        Err(error) => {
            info!("reverting comment on {}: {}", post_id, error);
            remove_provisional(state, &post_id, &provisional);
            if matches!(error, RemoteError::NotFound(_)) {
                state.queue_refresh(Refresh::Post(post_id));
            }
            Err(Error::Reverted {
                target,
                source: error,
            })
        }
    }
}

fn remove_provisional(state: &mut FeedState, post_id: &PostId, provisional: &CommentId) {
    let removed = match state.loaded_comments_mut(post_id) {
        Some(comments) => {
            let before = comments.len();
            comments.retain(|comment| &comment.id != provisional);
            comments.len() < before
        }
        None => false,
    };
    if removed {
        if let Some(post) = state.post_mut(post_id) {
            post.comments_count = post.comments_count.saturating_sub(1);
        }
    }
}

fn reconcile_delete_comments(
    state: &mut FeedState,
    post_id: PostId,
    comment_id: CommentId,
    removed: Vec<(usize, Comment)>,
    result: Result<Confirmation, RemoteError>,
) -> Result<Outcome, Error> {
    let target = Target::Comment(comment_id);
    for (_, comment) in &removed {
        state.deleting_comments.remove(&comment.id);
    }
    match result {
        Ok(_) | Err(RemoteError::NotFound(_)) => {
            if state.refresh_after_success {
                state.queue_refresh(Refresh::Comments(post_id));
            }
            Ok(Outcome::Confirmed)
        }
        Err(RemoteError::Conflict(reason)) => {
            state.queue_refresh(Refresh::Comments(post_id.clone()));
            state.queue_refresh(Refresh::Post(post_id));
            Err(Error::Conflict { target, reason })
        }
        Err(error) => {
            info!("restoring {} deleted comments on {}: {}", removed.len(), post_id, error);
            if state.post(&post_id).is_some() {
                let comments = state.comments_mut(&post_id);
                let mut restored: u32 = 0;
                for (index, comment) in removed {
                    if comments.iter().any(|present| present.id == comment.id) {
                        continue;
                    }
                    let index = index.min(comments.len());
                    comments.insert(index, comment);
                    restored = restored.saturating_add(1);
                }
                if let Some(post) = state.post_mut(&post_id) {
                    post.comments_count = post.comments_count.saturating_add(restored);
                }
            }
            Err(Error::Reverted {
                target,
                source: error,
            })
        }
    }
}

fn reconcile_delete_post(
    state: &mut FeedState,
    index: usize,
    post: Post,
    comments: Option<Vec<Comment>>,
    result: Result<Confirmation, RemoteError>,
) -> Result<Outcome, Error> {
    let target = post.target();
    state.deleting_posts.remove(&post.id);
    match result {
        Ok(_) | Err(RemoteError::NotFound(_)) => Ok(Outcome::Confirmed),
        Err(RemoteError::Conflict(reason)) => {
            state.queue_refresh(Refresh::Post(post.id.clone()));
            Err(Error::Conflict { target, reason })
        }
        Err(error) => {
            info!("restoring deleted post {}: {}", post.id, error);
            if state.post(&post.id).is_none() {
                let post_id = post.id.clone();
                state.insert_post(index, post);
                if let Some(comments) = comments {
                    state.restore_comments(post_id, comments);
                }
            }
            Err(Error::Reverted {
                target,
                source: error,
            })
        }
    }
}

/// Runs mutations against shared feed state and one remote.
pub struct Engine<R: FeedRemote> {
    state: Rc<RefCell<FeedState>>,
    remote: Rc<R>,
}

impl<R: FeedRemote> Engine<R> {
    pub fn new(state: Rc<RefCell<FeedState>>, remote: Rc<R>) -> Self {
        Engine { state, remote }
    }

    /// Snapshot, apply, dispatch, reconcile. The caller sees the optimistic
    /// result as soon as this future is first polled.
    pub async fn perform(&self, mutation: MutationSpec) -> Result<Outcome, Error> {
        let pending = begin(&mut self.state.borrow_mut(), &mutation)?;
        let result = dispatch(&*self.remote, &mutation).await;
        reconcile(&mut self.state.borrow_mut(), pending, result)
    }
}

impl<R: FeedRemote> Clone for Engine<R> {
    fn clone(&self) -> Self {
        Engine {
            state: Rc::clone(&self.state),
            remote: Rc::clone(&self.remote),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn post(id: &str) -> Post {
        Post {
            id: PostId::try_from(id).unwrap(),
            author_id: ActorId::try_from("host").unwrap(),
            text: "Breakfast moved to the terrace".to_string(),
            image: None,
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
            reaction_counts: ReactionCounts::new(),
            current_actor_reaction: ReactionState::NoReaction,
            comments_count: 0,
        }
    }

    fn state_with(post: Post) -> FeedState {
        let mut state = FeedState::new(&Config::default());
        state.replace_posts(vec![post]);
        state
    }

    fn target() -> Target {
        Target::Post(PostId::try_from("p1").unwrap())
    }

    fn toggle(kind: ReactionKind) -> MutationSpec {
        MutationSpec::ToggleReaction {
            target: target(),
            kind,
        }
    }

    fn transient() -> Result<Confirmation, RemoteError> {
        Err(RemoteError::Transient("timeout".to_string()))
    }

    fn shown(state: &FeedState) -> Post {
        state.posts()[0].clone()
    }

    #[test]
    fn test_unknown_target_touches_nothing() {
        let mut state = state_with(post("p1"));
        let mutation = MutationSpec::ToggleReaction {
            target: Target::Post(PostId::try_from("p9").unwrap()),
            kind: ReactionKind::Like,
        };
        assert!(matches!(begin(&mut state, &mutation), Err(Error::UnknownTarget(_))));
        assert_eq!(shown(&state), post("p1"));
        assert_eq!(state.next_stamp, 0);
    }

    #[test]
    fn test_provisional_comment_cannot_be_reacted_to() {
        let mut state = state_with(post("p1"));
        let mutation = MutationSpec::ToggleReaction {
            target: Target::Comment(CommentId::provisional(1)),
            kind: ReactionKind::Like,
        };
        assert!(matches!(begin(&mut state, &mutation), Err(Error::NotYetConfirmed(_))));
    }

    #[test]
    fn test_stamps_increase_per_dispatch() {
        let mut state = state_with(post("p1"));
        let first = begin(&mut state, &toggle(ReactionKind::Like)).unwrap();
        let second = begin(&mut state, &toggle(ReactionKind::Like)).unwrap();
        assert!(first.stamp() < second.stamp());
        assert_eq!(state.in_flight(&target()), 2);
    }

    #[test]
    fn test_newer_confirmation_wins_over_older_failure() {
        let mut state = state_with(post("p1"));
        let like = begin(&mut state, &toggle(ReactionKind::Like)).unwrap();
        let love = begin(&mut state, &toggle(ReactionKind::Love)).unwrap();

        let outcome = reconcile(
            &mut state,
            love,
            Ok(Confirmation::Reaction(ReactionOutcome::Updated)),
        );
        assert_eq!(outcome.unwrap(), Outcome::Confirmed);

        let outcome = reconcile(&mut state, like, transient());
        assert!(matches!(outcome, Err(Error::Superseded { .. })));

        let post = shown(&state);
        assert_eq!(post.current_actor_reaction, ReactionState::Reacted(ReactionKind::Love));
        assert_eq!(post.reaction_counts.get(ReactionKind::Love), 1);
        assert_eq!(post.reaction_counts.get(ReactionKind::Like), 0);
        assert_eq!(state.pending_refreshes(), &[Refresh::Post(post.id)]);
        assert_eq!(state.in_flight(&target()), 0);
        assert!(state.stamps.is_empty());
    }

    #[test]
    fn test_latest_failure_restores_its_own_snapshot() {
        let mut state = state_with(post("p1"));
        let like = begin(&mut state, &toggle(ReactionKind::Like)).unwrap();
        let after_like = shown(&state);
        let unlike = begin(&mut state, &toggle(ReactionKind::Like)).unwrap();

        let outcome = reconcile(
            &mut state,
            like,
            Ok(Confirmation::Reaction(ReactionOutcome::Created)),
        );
        assert_eq!(outcome.unwrap(), Outcome::Superseded);

        let outcome = reconcile(&mut state, unlike, transient());
        assert!(matches!(outcome, Err(Error::Reverted { .. })));
        assert_eq!(shown(&state), after_like);
        assert!(state.pending_refreshes().is_empty());
    }

    #[test]
    fn test_unexpected_outcome_resyncs_without_revert() {
        let mut state = state_with(post("p1"));
        let like = begin(&mut state, &toggle(ReactionKind::Like)).unwrap();
        let optimistic = shown(&state);

        let outcome = reconcile(
            &mut state,
            like,
            Ok(Confirmation::Reaction(ReactionOutcome::Deleted)),
        );
        assert!(matches!(outcome, Err(Error::Conflict { .. })));
        assert_eq!(shown(&state), optimistic);
        assert_eq!(state.pending_refreshes().len(), 1);
    }

    #[test]
    fn test_dropped_after_teardown() {
        let mut state = state_with(post("p1"));
        let like = begin(&mut state, &toggle(ReactionKind::Like)).unwrap();
        state.teardown();
        state.replace_posts(vec![post("p1")]);

        assert_eq!(reconcile(&mut state, like, transient()).unwrap(), Outcome::Dropped);
        assert_eq!(shown(&state), post("p1"));
    }

    fn draft(content: &str) -> MutationSpec {
        MutationSpec::CreateComment {
            author: ActorId::try_from("guest").unwrap(),
            draft: NewComment {
                post_id: PostId::try_from("p1").unwrap(),
                parent_comment_id: None,
                content: content.to_string(),
                image: None,
            },
        }
    }

    #[test]
    fn test_created_comment_fetched_early_is_not_duplicated() {
        let p1 = PostId::try_from("p1").unwrap();
        let mut state = state_with(post("p1"));
        let pending = begin(&mut state, &draft("Is parking free?")).unwrap();
        let provisional = pending.provisional_comment().unwrap().clone();

        // a refresh lands after the remote stored it, before the answer
        let mut stored = state.comment(&provisional).unwrap().clone();
        stored.id = CommentId::try_from("c7").unwrap();
        state.replace_comments(&p1, vec![stored.clone()]);
        assert_eq!(state.comments(&p1), &[stored.clone()]);

        let outcome = reconcile(&mut state, pending, Ok(Confirmation::Comment(stored.clone())));
        assert_eq!(outcome.unwrap(), Outcome::Created(stored.clone()));
        assert_eq!(state.comments(&p1), &[stored]);
        assert_eq!(shown(&state).comments_count, 1);
    }

    #[test]
    fn test_confirmed_comment_replaces_provisional_next_to_fetched_copy() {
        let p1 = PostId::try_from("p1").unwrap();
        let mut state = state_with(post("p1"));
        let pending = begin(&mut state, &draft("Is parking free? ")).unwrap();

        // the remote trimmed the body, so the refresh cannot pair them up
        let mut stored = state.comments(&p1)[0].clone();
        stored.id = CommentId::try_from("c7").unwrap();
        stored.content = "Is parking free?".to_string();
        state.replace_comments(&p1, vec![stored.clone()]);
        assert_eq!(state.comments(&p1).len(), 2);

        reconcile(&mut state, pending, Ok(Confirmation::Comment(stored.clone()))).unwrap();
        assert_eq!(state.comments(&p1), &[stored]);
        assert_eq!(shown(&state).comments_count, 1);
    }

    fn kind_strategy() -> impl Strategy<Value = ReactionKind> {
        prop::sample::select(ReactionKind::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_failed_toggle_reverts_exactly(
            counts in prop::collection::vec(0u32..5, 6),
            current in prop::option::of(kind_strategy()),
            requested in kind_strategy(),
        ) {
            let mut start = post("p1");
            for (kind, count) in ReactionKind::ALL.into_iter().zip(counts) {
                start.reaction_counts.set(kind, count);
            }
            start.current_actor_reaction = current.into();
            let mut state = state_with(start.clone());

            let pending = begin(&mut state, &toggle(requested)).unwrap();
            prop_assert_ne!(shown(&state), start.clone());
            let outcome = reconcile(&mut state, pending, transient());

            prop_assert!(matches!(outcome, Err(Error::Reverted { .. })), "expected a revert");
            prop_assert_eq!(shown(&state), start);
        }
    }
}
