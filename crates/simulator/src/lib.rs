//! meshrpc simulator
//!
//! Runs [`meshrpc_simulation`] scenarios from the command line. A scenario
//! can be described in a TOML file and overridden by flags:
//!
//! ```toml
//! seed = 7
//! clients = 4
//! rounds = 200
//!
//! [nodes]
//! honest = 20
//! lying = 3
//! offline = 2
//! staleReporters = 1
//!
//! [network]
//! baseLatencyMs = 80
//! packetLossRate = 0.02
//! ```

mod report;
mod scenario;

pub use report::print_summary;
pub use scenario::{NetworkScenario, NodeScenario, Scenario, ScenarioError};
