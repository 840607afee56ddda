use thiserror::Error;

use crate::{
    bank::BankError,
    primitives::{Address, Amount, Timestamp},
    token::TokenError,
};

/// Rejections raised by the presale ledger. A rejected call leaves no state
/// change behind.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PresaleError {
    /// Caller is not the current owner.
    #[error("caller {caller} is not the owner")]
    NotOwner { caller: Address },

    /// Purchase beneficiary is not on the whitelist.
    #[error("beneficiary {beneficiary} is not whitelisted")]
    NotWhitelisted { beneficiary: Address },

    /// Outside `[opening_time, closing_time)`.
    #[error("sale is not open at {now}")]
    NotOpen { now: Timestamp },

    /// Unsold tokens can only be returned once the window has closed.
    #[error("sale is still open until {closing_time}")]
    SaleStillOpen { closing_time: Timestamp },

    /// Crediting would lock up more tokens than the presale holds.
    #[error("supply exceeded: requested {requested}, available {available}")]
    SupplyExceeded { requested: Amount, available: Amount },

    #[error("rate must be non-zero")]
    InvalidRate,

    /// Guarded change outside the ±10% band in the claimed direction.
    #[error("rate change from {current} to {requested} exceeds the 10% bound")]
    RateChangeTooLarge { current: Amount, requested: Amount },

    #[error("nothing to withdraw for {investor}")]
    NothingToWithdraw { investor: Address },

    /// The null address was given where a real account is required.
    #[error("invalid (null) address")]
    InvalidAddress,

    #[error("amount must be > 0")]
    ZeroAmount,

    #[error("arithmetic overflow")]
    MathOverflow,

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("token: {0}")]
    Token(#[from] TokenError),

    #[error("bank: {0}")]
    Bank(#[from] BankError),
}
