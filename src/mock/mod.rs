//! Scripted tool runner
//!
//! Implements [`ToolRunner`] without spawning anything, for testing the task
//! against canned tool output. Supports:
//!
//! - **Persistent rules**: answer every matching call the same way
//! - **One-shot rules**: consumed in registration order, for sequences
//!   such as "search list before and after" reads
//! - **Dynamic rules**: compute the response from the invocation
//! - **Missing tools**: make [`ToolRunner::which`] report a program absent
//!
//! Every call is recorded so tests can assert on exact argument lists.
//! Calls that match no rule succeed with empty output.

mod runner;

pub use runner::{MockResponse, MockToolRunner};
