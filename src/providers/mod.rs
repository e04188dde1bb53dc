//! Dependency injection providers for service management.

pub mod app_state;
pub mod hangup;
pub mod reconciler;
pub mod traits;

pub use app_state::AppStateProvider;
pub use hangup::HangupServiceProvider;
pub use reconciler::ReconcilerServiceProvider;
pub use traits::{AsyncProvider, ServiceProvider};
