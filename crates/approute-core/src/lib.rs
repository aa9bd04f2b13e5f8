//! approute Core - Policy types shared between the PipeWire layer and the daemon.
//!
//! Nothing in this crate touches processes or the daemon. It holds the pieces
//! that decide *what* to do: which nodes are hidden from routing pickers and how
//! long to keep asking a daemon that has not settled yet.

pub mod blacklist;
pub mod error;
pub mod retry;

pub use blacklist::Blacklist;
pub use error::{Error, Result};
pub use retry::{Backoff, RetryPolicy, Sleeper, ThreadSleeper};
