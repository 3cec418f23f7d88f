use feed_ledger::Reactable;
use feed_msg::{Comment, Post, Target};
use feed_ref::{CommentId, PostId};
use itertools::Itertools;
use log::{debug, trace};
use std::collections::{HashMap, HashSet};

use crate::config::{Config, SortMode};

/// A slice of state waiting to be re-fetched from the remote.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Refresh {
    Post(PostId),
    Comments(PostId),
}

/// Everything the feed holds in memory for one session.
///
/// Only ever touched synchronously; callers must not hold a borrow of it
/// across an await.
#[derive(Debug)]
pub struct FeedState {
    posts: Vec<Post>,
    comments: HashMap<PostId, Vec<Comment>>,
    sort: SortMode,
    order: Option<Vec<usize>>,
    pub(crate) stamps: HashMap<Target, u64>,
    pub(crate) next_stamp: u64,
    pub(crate) in_flight: HashMap<Target, usize>,
    pub(crate) dirty: HashSet<Target>,
    pub(crate) deleting_comments: HashMap<CommentId, PostId>,
    pub(crate) deleting_posts: HashSet<PostId>,
    refresh: Vec<Refresh>,
    pub(crate) epoch: u64,
    pub(crate) next_provisional: u64,
    pub(crate) refresh_after_success: bool,
}

impl FeedState {
    pub fn new(config: &Config) -> Self {
        FeedState {
            posts: Vec::new(),
            comments: HashMap::new(),
            sort: config.sort,
            order: None,
            stamps: HashMap::new(),
            next_stamp: 0,
            in_flight: HashMap::new(),
            dirty: HashSet::new(),
            deleting_comments: HashMap::new(),
            deleting_posts: HashSet::new(),
            refresh: Vec::new(),
            epoch: 0,
            next_provisional: 0,
            refresh_after_success: config.refresh_after_success,
        }
    }

    // reads

    /// Posts in the order they were loaded or created.
    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    pub fn post(&self, post_id: &PostId) -> Option<&Post> {
        self.posts.iter().find(|post| &post.id == post_id)
    }

    /// Flat comments of a post, in the order they were loaded or created.
    pub fn comments(&self, post_id: &PostId) -> &[Comment] {
        self.comments
            .get(post_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn comment(&self, comment_id: &CommentId) -> Option<&Comment> {
        self.comments
            .values()
            .flatten()
            .find(|comment| &comment.id == comment_id)
    }

    pub fn sort_mode(&self) -> SortMode {
        self.sort
    }

    /// Posts in the active sort order. The order is computed on first read
    /// after a change and reused until the next one.
    pub fn sorted_posts(&mut self) -> Vec<Post> {
        if self.order.is_none() {
            trace!("recomputing {:?} order over {} posts", self.sort, self.posts.len());
            let sort = self.sort;
            let posts = &self.posts;
            self.order = Some(
                (0..posts.len())
                    .sorted_by(|a, b| sort.compare(&posts[*a], &posts[*b]))
                    .collect_vec(),
            );
        }
        self.order
            .iter()
            .flatten()
            .map(|index| self.posts[*index].clone())
            .collect()
    }

    pub fn pending_refreshes(&self) -> &[Refresh] {
        &self.refresh
    }

    pub fn in_flight(&self, target: &Target) -> usize {
        self.in_flight.get(target).copied().unwrap_or(0)
    }

    // writes

    pub(crate) fn set_sort(&mut self, sort: SortMode) {
        if self.sort != sort {
            self.sort = sort;
            self.order = None;
        }
    }

    pub(crate) fn touched(&mut self) {
        self.order = None;
    }

    pub(crate) fn post_index(&self, post_id: &PostId) -> Option<usize> {
        self.posts.iter().position(|post| &post.id == post_id)
    }

    pub(crate) fn post_mut(&mut self, post_id: &PostId) -> Option<&mut Post> {
        self.posts.iter_mut().find(|post| &post.id == post_id)
    }

    pub(crate) fn comments_mut(&mut self, post_id: &PostId) -> &mut Vec<Comment> {
        self.comments.entry(post_id.clone()).or_default()
    }

    pub(crate) fn loaded_comments_mut(&mut self, post_id: &PostId) -> Option<&mut Vec<Comment>> {
        self.comments.get_mut(post_id)
    }

    pub(crate) fn comment_mut(&mut self, comment_id: &CommentId) -> Option<&mut Comment> {
        self.comments
            .values_mut()
            .flatten()
            .find(|comment| &comment.id == comment_id)
    }

    pub(crate) fn reactable_mut(&mut self, target: &Target) -> Option<&mut dyn Reactable> {
        match target {
            Target::Post(post_id) => self
                .post_mut(post_id)
                .map(|post| post as &mut dyn Reactable),
            Target::Comment(comment_id) => self
                .comment_mut(comment_id)
                .map(|comment| comment as &mut dyn Reactable),
        }
    }

    pub(crate) fn insert_post(&mut self, index: usize, post: Post) {
        let index = index.min(self.posts.len());
        self.posts.insert(index, post);
        self.touched();
    }

    pub(crate) fn remove_post(&mut self, index: usize) -> (Post, Option<Vec<Comment>>) {
        let post = self.posts.remove(index);
        let comments = self.comments.remove(&post.id);
        self.touched();
        (post, comments)
    }

    pub(crate) fn restore_comments(&mut self, post_id: PostId, comments: Vec<Comment>) {
        self.comments.entry(post_id).or_insert(comments);
    }

    /// Queues a re-fetch of whatever holds `target`, or defers it until the
    /// mutations still in flight on it have landed.
    pub(crate) fn resync(&mut self, target: &Target) {
        if self.in_flight(target) > 0 {
            debug!("deferring resync of {} until in-flight changes land", target);
            self.dirty.insert(target.clone());
            return;
        }
        match target {
            Target::Post(post_id) => self.queue_refresh(Refresh::Post(post_id.clone())),
            Target::Comment(comment_id) => {
                if let Some(comment) = self.comment(comment_id) {
                    let post_id = comment.post_id.clone();
                    self.queue_refresh(Refresh::Comments(post_id));
                }
            }
        }
    }

    pub(crate) fn queue_refresh(&mut self, refresh: Refresh) {
        if !self.refresh.contains(&refresh) {
            trace!("queued refresh {:?}", refresh);
            self.refresh.push(refresh);
        }
    }

    pub(crate) fn take_refreshes(&mut self) -> Vec<Refresh> {
        std::mem::take(&mut self.refresh)
    }

    /// Replaces every post with what the remote returned. Targets with
    /// mutations in flight keep their local reaction fields, and posts being
    /// deleted stay gone.
    pub(crate) fn replace_posts(&mut self, fresh: Vec<Post>) {
        let merged = fresh
            .into_iter()
            .unique_by(|post| post.id.clone())
            .filter(|post| !self.deleting_posts.contains(&post.id))
            .map(|post| self.merge_local_post(post))
            .collect_vec();
        debug!("replacing {} posts with {}", self.posts.len(), merged.len());
        let kept: HashSet<PostId> = merged.iter().map(|post| post.id.clone()).collect();
        self.comments.retain(|post_id, _| kept.contains(post_id));
        self.posts = merged;
        self.touched();
    }

    /// Replaces one post, inserting it if it is new and dropping it if the
    /// remote no longer has it.
    pub(crate) fn replace_post(&mut self, post_id: &PostId, fresh: Option<Post>) {
        if self.deleting_posts.contains(post_id) {
            debug!("post {} is being deleted, ignoring refresh", post_id);
            return;
        }
        match (self.post_index(post_id), fresh) {
            (Some(index), Some(post)) => {
                let post = self.merge_local_post(post);
                self.posts[index] = post;
            }
            (None, Some(post)) => {
                let post = self.merge_local_post(post);
                self.posts.push(post);
            }
            (Some(index), None) => {
                self.remove_post(index);
            }
            (None, None) => {}
        }
        self.touched();
    }

    /// Replaces a post's comments.
    ///
    /// - comments being deleted stay gone
    /// - comments still waiting on the remote are kept at the end, unless the
    ///   remote already returned a new comment with the same author, parent
    ///   and body
    /// - in-flight reaction targets keep their local fields
    pub(crate) fn replace_comments(&mut self, post_id: &PostId, fresh: Vec<Comment>) {
        let known: HashSet<CommentId> = self
            .comments(post_id)
            .iter()
            .map(|comment| comment.id.clone())
            .collect();
        let mut provisional = self
            .comments(post_id)
            .iter()
            .filter(|comment| comment.id.is_provisional())
            .cloned()
            .collect_vec();
        let mut merged = fresh
            .into_iter()
            .unique_by(|comment| comment.id.clone())
            .filter(|comment| !self.deleting_comments.contains_key(&comment.id))
            .map(|comment| self.keep_in_flight_comment(comment))
            .collect_vec();

        for comment in merged.iter().filter(|comment| !known.contains(&comment.id)) {
            let twin = provisional.iter().position(|pending| {
                pending.author_id == comment.author_id
                    && pending.parent_comment_id == comment.parent_comment_id
                    && pending.content == comment.content
                    && pending.image == comment.image
            });
            if let Some(position) = twin {
                let pending = provisional.remove(position);
                debug!("{} arrived as {} before its create returned", pending.id, comment.id);
            }
        }
        merged.extend(provisional);
        self.comments.insert(post_id.clone(), merged);
    }

    // The remote's count still includes comments we are deleting and not yet
    // the ones we are creating.
    fn merge_local_post(&self, mut post: Post) -> Post {
        if self.in_flight(&post.target()) > 0 {
            if let Some(local) = self.post(&post.id) {
                post.current_actor_reaction = local.current_actor_reaction;
                post.reaction_counts = local.reaction_counts;
            }
        }
        let deleting = self
            .deleting_comments
            .values()
            .filter(|deleting_from| **deleting_from == post.id)
            .count();
        let creating = self
            .comments(&post.id)
            .iter()
            .filter(|comment| comment.id.is_provisional())
            .count();
        post.comments_count = post
            .comments_count
            .saturating_sub(u32::try_from(deleting).unwrap_or(u32::MAX))
            .saturating_add(u32::try_from(creating).unwrap_or(u32::MAX));
        post
    }

    fn keep_in_flight_comment(&self, mut comment: Comment) -> Comment {
        if self.in_flight(&comment.target()) > 0 {
            if let Some(local) = self.comment(&comment.id) {
                comment.current_actor_reaction = local.current_actor_reaction;
                comment.reaction_counts = local.reaction_counts;
            }
        }
        comment
    }

    /// Forgets everything. Responses to mutations issued before this are
    /// dropped on arrival.
    pub(crate) fn teardown(&mut self) {
        self.epoch += 1;
        self.posts.clear();
        self.comments.clear();
        self.order = None;
        self.stamps.clear();
        self.in_flight.clear();
        self.dirty.clear();
        self.deleting_comments.clear();
        self.deleting_posts.clear();
        self.refresh.clear();
    }
}
