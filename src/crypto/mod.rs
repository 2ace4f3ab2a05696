//! Ballot secrecy and roster membership.
//!
//! Produces the two artifacts a voter hands to the proving circuit:
//! a sealed ballot only the tally authority can open, and a Merkle
//! membership proof that the voter sits somewhere in the committed
//! roster without revealing where. Proof *verification* at execution
//! time belongs to the external circuit, not this crate.

pub mod ballot;
pub mod merkle;
