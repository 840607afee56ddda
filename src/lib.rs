//! Tranched lock-up presale.
//!
//! A token presale with a fixed sale window, a beneficiary whitelist, an
//! owner-controlled exchange rate guarded to ±10% per change, off-chain
//! issuance, and a six-stage vesting schedule investors withdraw from.
//!
//! [`presale::PresaleLedger`] is the state machine. It never reads a clock;
//! every call receives a [`presale::CallContext`]. [`host::PresaleHost`]
//! wires it to an in-memory token and bank and replays [`host::Transaction`]s.

pub mod bank;
pub mod config;
pub mod error;
pub mod host;
pub mod presale;
pub mod primitives;
pub mod telemetry;
pub mod token;
pub mod vesting;

pub use error::PresaleError;
pub use host::{HostError, PresaleCall, PresaleHost, Transaction};
pub use presale::{CallContext, PresaleEvent, PresaleLedger};
pub use primitives::{Address, Amount, Timestamp, UNIT};
