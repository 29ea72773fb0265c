//! The pattern search unit: one check against one host document.
//!
//! Units are pure functions of their inputs. They never observe
//! cancellation; the orchestrator decides whether a unit runs at all.

pub mod matcher;
mod unit;

pub use matcher::{PatternKey, PatternMatcher};
pub use unit::execute;
