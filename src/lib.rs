// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Halldyll Stack
//!
//! A declarative resource graph engine, and the stack that deploys the
//! blackcandy music server to GKE with a private Cloud SQL database.
//!
//! ## Overview
//!
//! A stack is a set of typed resource declarations. Their properties may
//! refer to outputs of other declarations that only exist once those are
//! created: a generated password, a cluster endpoint, the IP assigned to an
//! ingress. Halldyll lets you:
//!
//! - Declare resources whose properties are [`graph::Deferred`] values
//! - Derive the dependency graph from those references and reject cycles
//!   before anything is created
//! - Resolve the graph concurrently, in topological order, against a
//!   [`provider::Provider`]
//! - Record what was created, skip what did not change, and tear it all
//!   down in reverse order
//!
//! ## Architecture
//!
//! 1. **Declaration**: [`stack::BlackcandyStack`] declares resources into a
//!    [`graph::GraphBuilder`] from an explicit [`config::ConfigSource`]
//! 2. **Validation**: [`graph::GraphBuilder::build`] checks references and
//!    cycles
//! 3. **Resolution**: [`planner::Resolver`] issues every ready declaration
//!    to the provider and fills in the deferred values as outputs arrive
//! 4. **Reconciliation**: [`reconciler::StackReconciler`] records results in
//!    the [`state`] store and removes resources no longer declared
//!
//! ## Modules
//!
//! - [`config`]: Stack file parsing, validation and named inputs
//! - [`graph`]: Declarations, deferred values and the dependency graph
//! - [`planner`]: Plans, resolution and teardown
//! - [`provider`]: Provider trait and implementations
//! - [`stack`]: The blackcandy stack definition
//! - [`state`]: State storage backends
//! - [`reconciler`]: Preview, up and destroy for a stack
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: blackcandy
//!   stack: dev
//!   region: us-west1
//!
//! values:
//!   gcp-project: { value: my-project, secret: true }
//!   gke-cluster-id: main
//!   vpc-id: default
//!   hub-project: dns-hub
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod stack;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigSource, ConfigValidator, StackConfig};
pub use error::{HalldyllError, Result};
pub use graph::{Deferred, GraphBuilder, Properties, ResourceDeclaration, ResourceGraph, ResourceId};
pub use planner::{DeploymentPlan, ResolutionReport, Resolver, Teardown, TeardownReport};
pub use provider::{LocalProvider, Provider};
pub use reconciler::{StackReconciler, UpReport};
pub use stack::BlackcandyStack;
pub use state::{LocalStateStore, StackState, StateStore};
