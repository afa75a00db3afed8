//! Navigation: the pure gate and the coordinator feeding it to the router.

mod coordinator;
mod gate;
mod splash;

pub use coordinator::{
    AppCoordinator, CoordinatorConfig, RouteObserver, RouteState, RouteSubscription,
};
pub use gate::{gate, NavigationTarget};
pub use splash::SplashTimer;
