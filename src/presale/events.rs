use serde::{Deserialize, Serialize};

use crate::primitives::{serde_amount, Address, Amount};

/// Records emitted by the presale for off-chain observation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PresaleEvent {
    TokenPurchase {
        purchaser: Address,
        beneficiary: Address,
        #[serde(with = "serde_amount")]
        value: Amount,
        #[serde(with = "serde_amount")]
        amount: Amount,
    },
    TokensIssued {
        beneficiary: Address,
        #[serde(with = "serde_amount")]
        amount: Amount,
    },
    TokensWithdrawn {
        investor: Address,
        #[serde(with = "serde_amount")]
        amount: Amount,
    },
    RateChanged {
        #[serde(with = "serde_amount")]
        old_rate: Amount,
        #[serde(with = "serde_amount")]
        new_rate: Amount,
        unsafe_change: bool,
    },
    UnsoldTokensReturned {
        wallet: Address,
        #[serde(with = "serde_amount")]
        amount: Amount,
    },
    WhitelistUpdated {
        account: Address,
        added: bool,
    },
    OwnershipTransferred {
        previous: Address,
        new_owner: Address,
    },
}
