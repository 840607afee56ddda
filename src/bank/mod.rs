use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::primitives::{Address, Amount};

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum BankError {
    #[error("insufficient native balance in {account}: has {available}, needs {needed}")]
    InsufficientFunds {
        account: Address,
        available: Amount,
        needed: Amount,
    },
    #[error("native balance overflow in {account}")]
    Overflow { account: Address },
}

/// Native-currency transfer primitive used to forward purchase value.
pub trait NativeBank {
    fn balance_of(&self, account: &Address) -> Amount;

    /// Moves `value` synchronously; no balance changes on error.
    fn forward(&mut self, from: &Address, to: &Address, value: Amount) -> Result<(), BankError>;
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InMemoryBank {
    balances: BTreeMap<Address, Amount>,
}

impl InMemoryBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_genesis<I>(balances: I) -> Result<Self, BankError>
    where
        I: IntoIterator<Item = (Address, Amount)>,
    {
        let mut bank = Self::new();
        for (account, amount) in balances {
            bank.deposit(&account, amount)?;
        }
        Ok(bank)
    }

    pub fn deposit(&mut self, account: &Address, amount: Amount) -> Result<(), BankError> {
        let balance = self.balances.entry(*account).or_default();
        *balance = balance
            .checked_add(amount)
            .ok_or(BankError::Overflow { account: *account })?;
        Ok(())
    }
}

impl NativeBank for InMemoryBank {
    fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    fn forward(&mut self, from: &Address, to: &Address, value: Amount) -> Result<(), BankError> {
        let available = self.balance_of(from);
        if available < value {
            return Err(BankError::InsufficientFunds {
                account: *from,
                available,
                needed: value,
            });
        }
        if from == to {
            return Ok(());
        }
        let credited = self
            .balance_of(to)
            .checked_add(value)
            .ok_or(BankError::Overflow { account: *to })?;
        self.balances.insert(*from, available - value);
        self.balances.insert(*to, credited);
        Ok(())
    }
}
