use feed_msg::{Comment, Post, ReactionCounts, ReactionKind, ReactionOutcome, ReactionState, Target};
use feed_ref::ActorId;
use log::trace;
use std::collections::HashMap;

/// Change to the per-kind tallies caused by one transition.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CountDelta {
    pub decrement: Option<ReactionKind>,
    pub increment: Option<ReactionKind>,
}

impl CountDelta {
    pub const NONE: CountDelta = CountDelta {
        decrement: None,
        increment: None,
    };

    pub fn apply(&self, counts: &mut ReactionCounts) {
        if let Some(kind) = self.decrement {
            counts.decrement(kind);
        }
        if let Some(kind) = self.increment {
            counts.increment(kind);
        }
    }

    /// Signed change for one kind, ignoring clamping.
    pub fn net(&self, kind: ReactionKind) -> i32 {
        let mut net = 0;
        if self.decrement == Some(kind) {
            net -= 1;
        }
        if self.increment == Some(kind) {
            net += 1;
        }
        net
    }

    pub fn is_none(&self) -> bool {
        self.decrement.is_none() && self.increment.is_none()
    }

    /// What a remote applying the same rule reports for this transition.
    pub fn expected_outcome(&self) -> Option<ReactionOutcome> {
        match (self.decrement, self.increment) {
            (None, Some(_)) => Some(ReactionOutcome::Created),
            (Some(_), Some(_)) => Some(ReactionOutcome::Updated),
            (Some(_), None) => Some(ReactionOutcome::Deleted),
            (None, None) => None,
        }
    }
}

/// Same kind again removes the reaction, any other kind replaces it.
pub fn toggle(current: ReactionState, requested: ReactionKind) -> (ReactionState, CountDelta) {
    match current {
        ReactionState::Reacted(kind) if kind == requested => (
            ReactionState::NoReaction,
            CountDelta {
                decrement: Some(requested),
                increment: None,
            },
        ),
        ReactionState::Reacted(old) => (
            ReactionState::Reacted(requested),
            CountDelta {
                decrement: Some(old),
                increment: Some(requested),
            },
        ),
        ReactionState::NoReaction => (
            ReactionState::Reacted(requested),
            CountDelta {
                decrement: None,
                increment: Some(requested),
            },
        ),
    }
}

pub fn clear(current: ReactionState) -> (ReactionState, CountDelta) {
    match current {
        ReactionState::Reacted(kind) => (
            ReactionState::NoReaction,
            CountDelta {
                decrement: Some(kind),
                increment: None,
            },
        ),
        ReactionState::NoReaction => (ReactionState::NoReaction, CountDelta::NONE),
    }
}

/// Anything carrying the current actor's reaction alongside its tallies.
pub trait Reactable {
    fn reaction_fields(&mut self) -> (&mut ReactionState, &mut ReactionCounts);

    fn apply_toggle(&mut self, requested: ReactionKind) -> CountDelta {
        let (state, counts) = self.reaction_fields();
        let (next, delta) = toggle(*state, requested);
        delta.apply(counts);
        *state = next;
        delta
    }

    fn apply_clear(&mut self) -> CountDelta {
        let (state, counts) = self.reaction_fields();
        let (next, delta) = clear(*state);
        delta.apply(counts);
        *state = next;
        delta
    }
}

impl Reactable for Post {
    fn reaction_fields(&mut self) -> (&mut ReactionState, &mut ReactionCounts) {
        (&mut self.current_actor_reaction, &mut self.reaction_counts)
    }
}

impl Reactable for Comment {
    fn reaction_fields(&mut self) -> (&mut ReactionState, &mut ReactionCounts) {
        (&mut self.current_actor_reaction, &mut self.reaction_counts)
    }
}

/// Every actor's reaction on every target, plus the per-target tallies.
/// At most one reaction per (actor, target) by construction.
#[derive(Clone, Debug, Default)]
pub struct ReactionLedger {
    reactions: HashMap<(ActorId, Target), ReactionKind>,
    counts: HashMap<Target, ReactionCounts>,
}

impl ReactionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, actor: &ActorId, target: &Target) -> ReactionState {
        self.reactions
            .get(&(actor.clone(), target.clone()))
            .copied()
            .into()
    }

    pub fn counts(&self, target: &Target) -> ReactionCounts {
        self.counts.get(target).copied().unwrap_or_default()
    }

    pub fn toggle(
        &mut self,
        actor: &ActorId,
        target: &Target,
        requested: ReactionKind,
    ) -> (ReactionState, CountDelta) {
        let (next, delta) = toggle(self.state(actor, target), requested);
        trace!("toggle {} on {} by {}: {:?}", requested, target, actor, next);
        self.record(actor, target, next, delta);
        (next, delta)
    }

    pub fn clear(&mut self, actor: &ActorId, target: &Target) -> (ReactionState, CountDelta) {
        let (next, delta) = clear(self.state(actor, target));
        trace!("clear on {} by {}", target, actor);
        self.record(actor, target, next, delta);
        (next, delta)
    }

    /// Tallies known from elsewhere (a bulk import) without per-actor rows.
    pub fn seed_counts(&mut self, target: Target, counts: ReactionCounts) {
        self.counts.insert(target, counts);
    }

    /// Records an actor's reaction without touching the tallies.
    pub fn seed_reaction(&mut self, actor: ActorId, target: Target, state: ReactionState) {
        match state {
            ReactionState::Reacted(kind) => {
                self.reactions.insert((actor, target), kind);
            }
            ReactionState::NoReaction => {
                self.reactions.remove(&(actor, target));
            }
        }
    }

    pub fn forget_target(&mut self, target: &Target) {
        self.counts.remove(target);
        self.reactions.retain(|(_, reacted), _| reacted != target);
    }

    fn record(&mut self, actor: &ActorId, target: &Target, next: ReactionState, delta: CountDelta) {
        delta.apply(self.counts.entry(target.clone()).or_default());
        self.seed_reaction(actor.clone(), target.clone(), next);
    }
}
