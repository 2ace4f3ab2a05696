//! Game records and vote resolution.

pub mod tally;
pub mod types;
