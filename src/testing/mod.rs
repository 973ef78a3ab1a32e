//! Test plan execution
//!
//! Loads declarative YAML test plans and drives them against an operation
//! dispatcher: credentials and parameters are resolved per operation, calls
//! go through the retry governor, outcomes are judged against declared
//! expectations and collected into a session.

pub mod config;
pub mod credentials;
pub mod events;
pub mod loader;
pub mod params;
pub mod retry;
pub mod runner;
pub mod session;
pub mod state;
pub mod validate;
pub mod validator;

pub use config::{ExpectedResult, OperationSpec, Phase, ResponseContains, TestGroup, TestPlan};
pub use events::{ChannelSink, Event, EventSink};
pub use loader::load_plan;
pub use runner::{Engine, ExecutionMode, RunOptions};
pub use session::{GroupReport, OperationResult, Session, Summary};
pub use state::GroupState;
pub use validator::Verdict;
