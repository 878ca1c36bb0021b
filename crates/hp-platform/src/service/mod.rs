//! Long-running services: deployment dispatch, usage polling, realtime
//! sessions and the background lifecycle tasks that drive them.

mod deployments;
mod lifecycle;
mod sessions;
mod usage;

pub use deployments::DeploymentDispatcher;
pub use lifecycle::{LifecycleConfig, LifecycleManager};
pub use sessions::{DeploymentUpdate, SessionGuard, SessionRegistry, Subscription};
pub use usage::{PollSummary, UsagePoller};
