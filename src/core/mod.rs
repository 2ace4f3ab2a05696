//! Deterministic primitives.
//!
//! Hashing and randomness used by the membership tree, the ballot codec
//! and the tally tie-break. Everything here is pure and reproducible
//! from its inputs on any platform.

pub mod hash;
pub mod rng;
