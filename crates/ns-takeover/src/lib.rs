#![warn(clippy::pedantic)]
// Don't care enough to fix
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::wildcard_imports)]

//! Discover the live delegation chain of a name, pick out the
//! nameservers which belong to a shared provider pool, and repeatedly
//! provision zones in that pool until one is assigned a nameserver
//! the parent zone still delegates to.
//!
//! Nothing in here installs a `tracing` subscriber: callers own that.

pub mod acquire;
pub mod cancel;
pub mod candidates;
pub mod delegation;
pub mod net;
pub mod provider;
pub mod stats;
