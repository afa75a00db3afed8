//! The signed-in user's profile: types, optimistic field state and the store.

mod field;
mod store;
mod types;

pub use store::{ProfileStore, ProfileStoreConfig, UpdateHandle};
pub use types::{MainGoal, Profile, ProfilePatch};
