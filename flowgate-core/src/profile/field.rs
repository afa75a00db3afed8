//! Per-field optimistic state.

use crate::locale::Language;

use super::types::{MainGoal, Profile, ProfilePatch};

/// Identifies one `update_profile` call or profile load. Issued in increasing order.
pub type Ticket = u64;

/// One profile field: the value the backend last confirmed and, while a call
/// is in flight, the value that call proposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldState<T> {
    confirmed: T,
    /// Newest call whose answer set `confirmed`.
    confirmed_by: Ticket,
    pending: Option<(T, Ticket)>,
}

impl<T: Clone> FieldState<T> {
    pub const fn new(value: T, confirmed_by: Ticket) -> Self {
        Self {
            confirmed: value,
            confirmed_by,
            pending: None,
        }
    }

    /// What readers see.
    pub fn current(&self) -> &T {
        self.pending.as_ref().map_or(&self.confirmed, |(value, _)| value)
    }

    /// Last value the backend agreed on.
    pub const fn confirmed(&self) -> &T {
        &self.confirmed
    }

    pub fn pending_ticket(&self) -> Option<Ticket> {
        self.pending.as_ref().map(|(_, ticket)| *ticket)
    }

    /// Applies `value` optimistically on behalf of `ticket`.
    pub fn propose(&mut self, value: T, ticket: Ticket) {
        self.pending = Some((value, ticket));
    }

    /// Records `value` from the answer to call `ticket`.
    ///
    /// A value the call itself sent always lands, so a field written by two
    /// calls ends at whichever answer arrived last. Any other value is only a
    /// snapshot of the row and is ignored once a newer call has confirmed the
    /// field. A field waiting on another call stays pending.
    pub fn confirm(&mut self, value: T, ticket: Ticket, sent: bool) {
        if sent || ticket >= self.confirmed_by {
            self.confirmed = value;
            self.confirmed_by = self.confirmed_by.max(ticket);
        }
        if self.pending_ticket() == Some(ticket) {
            self.pending = None;
        }
    }

    /// Reverts the field if it is still waiting on `ticket`. Returns whether it did.
    pub fn roll_back(&mut self, ticket: Ticket) -> bool {
        let waiting = self.pending_ticket() == Some(ticket);
        if waiting {
            self.pending = None;
        }
        waiting
    }
}

/// The cached profile, field by field.
#[derive(Debug, Clone)]
pub struct ProfileFields {
    user_id: String,
    onboarding_completed: FieldState<bool>,
    main_goal: FieldState<MainGoal>,
    language: FieldState<Language>,
    display_name: FieldState<Option<String>>,
    avatar_url: FieldState<Option<String>>,
}

impl ProfileFields {
    /// Cache of `profile` as read by `ticket`.
    pub fn confirmed(profile: Profile, ticket: Ticket) -> Self {
        Self {
            user_id: profile.user_id,
            onboarding_completed: FieldState::new(profile.onboarding_completed, ticket),
            main_goal: FieldState::new(profile.main_goal, ticket),
            language: FieldState::new(profile.language, ticket),
            display_name: FieldState::new(profile.display_name, ticket),
            avatar_url: FieldState::new(profile.avatar_url, ticket),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn snapshot(&self) -> Profile {
        Profile {
            user_id: self.user_id.clone(),
            onboarding_completed: *self.onboarding_completed.current(),
            main_goal: *self.main_goal.current(),
            language: *self.language.current(),
            display_name: self.display_name.current().clone(),
            avatar_url: self.avatar_url.current().clone(),
        }
    }

    /// Applies `patch` optimistically and returns what must be sent to the backend.
    ///
    /// `onboarding_completed: false` is dropped once the field is `true`.
    pub fn propose(&mut self, mut patch: ProfilePatch, ticket: Ticket) -> ProfilePatch {
        if patch.onboarding_completed == Some(false) && *self.onboarding_completed.current() {
            log::debug!("dropping onboarding_completed=false, onboarding is already complete");
            patch.onboarding_completed = None;
        }

        if let Some(value) = patch.onboarding_completed {
            self.onboarding_completed.propose(value, ticket);
        }
        if let Some(value) = patch.main_goal {
            self.main_goal.propose(value, ticket);
        }
        if let Some(value) = patch.language {
            self.language.propose(value, ticket);
        }
        if let Some(value) = &patch.display_name {
            self.display_name.propose(Some(value.clone()), ticket);
        }
        if let Some(value) = &patch.avatar_url {
            self.avatar_url.propose(Some(value.clone()), ticket);
        }
        patch
    }

    /// Folds the row returned for call `ticket`, which sent `sent`, into the cache.
    /// Loads pass an empty patch.
    pub fn confirm(&mut self, stored: Profile, ticket: Ticket, sent: &ProfilePatch) {
        let onboarded = stored.onboarding_completed || *self.onboarding_completed.confirmed();
        self.onboarding_completed
            .confirm(onboarded, ticket, sent.onboarding_completed.is_some());
        self.main_goal
            .confirm(stored.main_goal, ticket, sent.main_goal.is_some());
        self.language
            .confirm(stored.language, ticket, sent.language.is_some());
        self.display_name
            .confirm(stored.display_name, ticket, sent.display_name.is_some());
        self.avatar_url
            .confirm(stored.avatar_url, ticket, sent.avatar_url.is_some());
    }

    /// Rolls back every field still waiting on `ticket`, except a pending
    /// `onboarding_completed = true`, which is kept. Returns whether it was kept.
    pub fn roll_back(&mut self, ticket: Ticket) -> bool {
        let stranded = self.onboarding_completed.pending_ticket() == Some(ticket)
            && *self.onboarding_completed.current();
        if !stranded {
            self.onboarding_completed.roll_back(ticket);
        }
        self.main_goal.roll_back(ticket);
        self.language.roll_back(ticket);
        self.display_name.roll_back(ticket);
        self.avatar_url.roll_back(ticket);
        stranded
    }
}
