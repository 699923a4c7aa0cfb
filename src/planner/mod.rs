//! Planning and execution of stack operations.
//!
//! This module previews changes against recorded state, resolves the
//! declaration graph through a provider and tears recorded resources down.

mod plan;
mod resolver;
mod tasks;
mod teardown;

pub(crate) use plan::orphans;
pub use plan::{ActionType, DeploymentPlan, PlannedAction};
pub use resolver::{Resolution, ResolutionReport, Resolver};
pub use teardown::{Teardown, TeardownReport};
