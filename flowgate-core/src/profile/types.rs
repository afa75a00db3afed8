use serde::{Deserialize, Serialize};

use crate::locale::Language;

/// What the user wants out of the app, chosen during onboarding.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, uniffi::Enum,
)]
#[serde(rename_all = "snake_case")]
pub enum MainGoal {
    /// Reduce stress and anxiety.
    ReduceStress,
    /// Sleep better.
    ImproveSleep,
    /// Improve focus.
    BuildFocus,
    /// Build a daily practice.
    BuildHabit,
    /// Not chosen yet, or a value this client does not know.
    #[default]
    #[serde(other)]
    Unspecified,
}

/// User-specific attributes stored remotely. Never persisted on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
pub struct Profile {
    /// Owner of the record. Always the id of the session it was loaded for.
    pub user_id: String,
    /// Monotonic: once `true` it is never set back to `false`.
    pub onboarding_completed: bool,
    /// Goal chosen during onboarding.
    pub main_goal: MainGoal,
    /// UI language.
    pub language: Language,
    /// Name shown in the app.
    pub display_name: Option<String>,
    /// Public URL of the uploaded avatar.
    pub avatar_url: Option<String>,
}

impl Profile {
    /// A fresh profile for `user_id`, as created right after sign-up.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            onboarding_completed: false,
            main_goal: MainGoal::default(),
            language: Language::default(),
            display_name: None,
            avatar_url: None,
        }
    }
}

/// A partial profile update. Absent fields are left untouched.
///
/// `display_name` and `avatar_url` cannot be cleared through a patch; `None`
/// always means "not part of this update".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
pub struct ProfilePatch {
    /// New onboarding flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onboarding_completed: Option<bool>,
    /// New goal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_goal: Option<MainGoal>,
    /// New language.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    /// New display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// New avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl ProfilePatch {
    /// Whether the patch carries no field at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.onboarding_completed.is_none()
            && self.main_goal.is_none()
            && self.language.is_none()
            && self.display_name.is_none()
            && self.avatar_url.is_none()
    }

    /// Adds the fields of `other` that `self` does not set.
    pub(crate) fn fill_from(&mut self, other: Self) {
        self.onboarding_completed = self.onboarding_completed.or(other.onboarding_completed);
        self.main_goal = self.main_goal.or(other.main_goal);
        self.language = self.language.or(other.language);
        if self.display_name.is_none() {
            self.display_name = other.display_name;
        }
        if self.avatar_url.is_none() {
            self.avatar_url = other.avatar_url;
        }
    }
}
