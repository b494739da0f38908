pub mod authorization;
pub mod chain;
pub mod claims;
pub mod config;
pub mod contracts;
pub mod controller;
pub mod error;
pub mod leaderboard;
pub mod notify;
pub mod payment;
pub mod ranking;
pub mod rpc;
pub mod signer;
pub mod wallet;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use error::{
    Error,
    Result,
};
