pub mod actions;
pub mod chain;
pub mod commitment;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod notification;
pub mod phase;
pub mod session;
pub mod snapshot;
pub mod wallet;
pub mod winners;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub use ethers::types::{
    Address,
    TxHash,
    U256,
};
