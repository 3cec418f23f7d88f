use feed_msg::{Comment, NewComment, NewPost, Post, ReactionKind, Target};
use feed_ref::{ActorId, CommentId, ImageRef, PostId};
use feed_threads::{build_forest, depth_of};
use log::{debug, info, warn};
use std::{cell::RefCell, collections::HashSet, rc::Rc};

use crate::config::{Config, SortMode};
use crate::engine::{Engine, MutationSpec, Outcome};
use crate::remote::{FeedRemote, RemoteError};
use crate::state::{FeedState, Refresh};
use crate::Error;

/// One actor's view of the feed.
///
/// Every read returns owned data, so nothing the caller holds keeps the
/// state borrowed. Mutations show their optimistic result before their
/// future first yields.
pub struct Feed<R: FeedRemote> {
    state: Rc<RefCell<FeedState>>,
    engine: Engine<R>,
    remote: Rc<R>,
    actor: ActorId,
    config: Config,
}

impl<R: FeedRemote> Feed<R> {
    pub fn new(remote: Rc<R>, actor: ActorId, config: Config) -> Self {
        let state = Rc::new(RefCell::new(FeedState::new(&config)));
        let engine = Engine::new(Rc::clone(&state), Rc::clone(&remote));
        Feed {
            state,
            engine,
            remote,
            actor,
            config,
        }
    }

    pub fn actor(&self) -> &ActorId {
        &self.actor
    }

    pub fn state(&self) -> Rc<RefCell<FeedState>> {
        Rc::clone(&self.state)
    }

    fn epoch(&self) -> u64 {
        self.state.borrow().epoch
    }

    /// Replaces the loaded posts with the remote's. Returns how many posts
    /// the feed now holds.
    pub async fn load(&self) -> Result<usize, Error> {
        let epoch = self.epoch();
        let dtos = self.remote.fetch_posts().await.map_err(Error::Load)?;

        let mut state = self.state.borrow_mut();
        if state.epoch != epoch {
            debug!("feed torn down during load, discarding {} posts", dtos.len());
            return Ok(0);
        }
        state.replace_posts(dtos.into_iter().map(Post::from).collect());
        info!("loaded {} posts", state.posts().len());
        Ok(state.posts().len())
    }

    /// Fetches the flat comment list of one post.
    pub async fn load_comments(&self, post_id: &PostId) -> Result<usize, Error> {
        self.fetch_comments(post_id).await.map_err(Error::Load)
    }

    async fn fetch_comments(&self, post_id: &PostId) -> Result<usize, RemoteError> {
        let epoch = self.epoch();
        let result = self.remote.fetch_comments(post_id).await;

        let mut state = self.state.borrow_mut();
        if state.epoch != epoch {
            return Ok(0);
        }
        let dtos = match result {
            Ok(dtos) => dtos,
            Err(RemoteError::NotFound(reason)) => {
                info!("post {} is gone from the remote, dropping it", post_id);
                state.replace_post(post_id, None);
                return Err(RemoteError::NotFound(reason));
            }
            Err(error) => return Err(error),
        };

        let (own, stray): (Vec<Comment>, Vec<Comment>) = dtos
            .into_iter()
            .map(Comment::from)
            .partition(|comment| &comment.post_id == post_id);
        if !stray.is_empty() {
            warn!(
                "ignoring {} comments for other posts in comments of {}",
                stray.len(),
                post_id
            );
        }
        let count = own.len();
        state.replace_comments(post_id, own);
        debug!("loaded {} comments on {}", count, post_id);
        Ok(count)
    }

    async fn fetch_post(&self, post_id: &PostId) -> Result<(), RemoteError> {
        let epoch = self.epoch();
        let dtos = self.remote.fetch_posts().await?;

        let mut state = self.state.borrow_mut();
        if state.epoch == epoch {
            let fresh = dtos
                .into_iter()
                .find(|dto| &dto.id == post_id)
                .map(Post::from);
            state.replace_post(post_id, fresh);
        }
        Ok(())
    }

    // reads

    /// Posts in the active sort order.
    pub fn posts(&self) -> Vec<Post> {
        self.state.borrow_mut().sorted_posts()
    }

    pub fn post(&self, post_id: &PostId) -> Option<Post> {
        self.state.borrow().post(post_id).cloned()
    }

    /// Flat comments of a post as loaded.
    pub fn comments(&self, post_id: &PostId) -> Vec<Comment> {
        self.state.borrow().comments(post_id).to_vec()
    }

    pub fn comment(&self, comment_id: &CommentId) -> Option<Comment> {
        self.state.borrow().comment(comment_id).cloned()
    }

    /// Threads of a post, rebuilt from the flat list on every call.
    pub fn comment_forest(&self, post_id: &PostId) -> Vec<Comment> {
        let mut flat = self.comments(post_id);
        if self.config.chronological_comments {
            flat.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        }
        if log::log_enabled!(log::Level::Debug) {
            let ids: HashSet<&CommentId> = flat.iter().map(|comment| &comment.id).collect();
            let orphans = flat
                .iter()
                .filter(|comment| match &comment.parent_comment_id {
                    Some(parent_id) => !ids.contains(parent_id),
                    None => false,
                })
                .count();
            if orphans > 0 {
                debug!("{} replies on {} promoted to top level", orphans, post_id);
            }
        }
        build_forest(&flat)
    }

    /// Nesting depth of a loaded comment, 0 for top-level.
    pub fn comment_depth(&self, comment_id: &CommentId) -> Option<usize> {
        let state = self.state.borrow();
        let comment = state.comment(comment_id)?;
        depth_of(state.comments(&comment.post_id), comment_id)
    }

    pub fn sort_mode(&self) -> SortMode {
        self.state.borrow().sort_mode()
    }

    pub fn set_sort(&self, sort: SortMode) {
        self.state.borrow_mut().set_sort(sort);
    }

    pub fn pending_refreshes(&self) -> Vec<Refresh> {
        self.state.borrow().pending_refreshes().to_vec()
    }

    // writes

    /// Posts are not optimistic: there is nothing to show until the remote
    /// has assigned an id.
    pub async fn create_post(&self, draft: NewPost) -> Result<Post, Error> {
        draft.validate()?;
        let epoch = self.epoch();
        let dto = self
            .remote
            .create_post(&draft.text, draft.image.as_ref())
            .await
            .map_err(Error::CreatePost)?;
        let post = Post::from(dto);

        let mut state = self.state.borrow_mut();
        if state.epoch == epoch {
            state.replace_post(&post.id, Some(post.clone()));
        }
        Ok(post)
    }

    pub async fn create_comment(&self, draft: NewComment) -> Result<Outcome, Error> {
        self.engine
            .perform(MutationSpec::CreateComment {
                author: self.actor.clone(),
                draft,
            })
            .await
    }

    pub async fn create_reply(
        &self,
        parent_comment_id: &CommentId,
        content: String,
        image: Option<ImageRef>,
    ) -> Result<Outcome, Error> {
        let post_id = self
            .state
            .borrow()
            .comment(parent_comment_id)
            .map(|parent| parent.post_id.clone())
            .ok_or_else(|| Error::UnknownTarget(Target::Comment(parent_comment_id.clone())))?;
        self.create_comment(NewComment {
            post_id,
            parent_comment_id: Some(parent_comment_id.clone()),
            content,
            image,
        })
        .await
    }

    pub async fn toggle_reaction(&self, target: Target, kind: ReactionKind) -> Result<Outcome, Error> {
        self.engine
            .perform(MutationSpec::ToggleReaction { target, kind })
            .await
    }

    pub async fn clear_reaction(&self, target: Target) -> Result<Outcome, Error> {
        self.engine
            .perform(MutationSpec::ClearReaction { target })
            .await
    }

    /// Removes the comment and all its replies.
    pub async fn delete_comment(&self, comment_id: CommentId) -> Result<Outcome, Error> {
        self.engine
            .perform(MutationSpec::DeleteComment { comment_id })
            .await
    }

    pub async fn delete_post(&self, post_id: PostId) -> Result<Outcome, Error> {
        self.engine
            .perform(MutationSpec::DeletePost { post_id })
            .await
    }

    /// Runs the queued re-fetches. A refresh that fails stays queued along
    /// with everything behind it. Returns how many ran.
    pub async fn refresh_pending(&self) -> Result<usize, Error> {
        let epoch = self.epoch();
        let queued = self.state.borrow_mut().take_refreshes();
        let mut done = 0;

        for (position, refresh) in queued.iter().enumerate() {
            let result = match refresh {
                Refresh::Post(post_id) => self.fetch_post(post_id).await,
                // the post went away; fetch_comments already dropped it
                Refresh::Comments(post_id) => match self.fetch_comments(post_id).await {
                    Err(RemoteError::NotFound(_)) => Ok(()),
                    other => other.map(|_| ()),
                },
            };
            if let Err(error) = result {
                warn!("refresh {:?} failed: {}", refresh, error);
                let mut state = self.state.borrow_mut();
                if state.epoch == epoch {
                    for refresh in &queued[position..] {
                        state.queue_refresh(refresh.clone());
                    }
                }
                return Err(Error::Load(error));
            }
            done += 1;
        }
        Ok(done)
    }

    /// Forgets everything loaded. Responses to calls already in flight are
    /// dropped when they arrive.
    pub fn teardown(&self) {
        info!("tearing down feed");
        self.state.borrow_mut().teardown();
    }
}
