//! Deployment orchestration: state machine, rollout strategies and the
//! service that drives them.

pub mod calls;
pub mod clock;
pub mod control;
pub mod events;
pub mod locks;
pub mod machine;
pub mod plan;
pub mod service;
pub mod strategy;

pub use calls::{CallOutcome, RuntimeCalls};
pub use clock::{Clock, ManualClock, SystemClock};
pub use control::{ControlSignal, DeploymentControl};
pub use events::{DeploymentEvent, EventBus};
pub use locks::ReleaseLocks;
pub use machine::{guard_checkpoint, guard_checks, guard_quorum, transition};
pub use plan::{dependency_graph, plan_chunks, ChunkPlan};
pub use service::{Collaborators, DeploymentService};
pub use strategy::{create_strategy, Rollout, RolloutError, RolloutObserver, RolloutStrategy};
