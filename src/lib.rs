//! Xcode build task
//!
//! Builds, signs, archives and exports Apple-platform applications from a
//! pipeline agent by driving `xcodebuild`, `security`, `PlistBuddy`,
//! `openssl` and `xcpretty`, then cleans up transient signing state in a
//! separate teardown phase.
//!
//! Every external tool is reached through [`tool::ToolRunner`], so the whole
//! task runs against [`mock::MockToolRunner`] in tests.

pub mod certificate;
pub mod config;
pub mod destination;
pub mod error;
pub mod export;
pub mod fsmatch;
pub mod keychain;
pub mod mock;
pub mod pipeline;
pub mod plist;
pub mod profile;
pub mod project;
pub mod signing;
pub mod state;
pub mod teardown;
pub mod telemetry;
pub mod tool;
pub mod toolchain;
pub mod warnings;
pub mod xcodebuild;

pub use config::{ConfigError, TaskInputs};
pub use error::TaskError;
pub use pipeline::{HostEnv, Pipeline, RunOutcome, RunReport};
pub use state::TaskState;
pub use teardown::{Teardown, TeardownReport};
pub use tool::{SystemRunner, ToolRunner};
