//! Utility modules for nup

pub mod dates;
pub mod hashing;
pub mod normalize;
