use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::primitives::{serde_amount, Address, Amount, UNIT};

/// Default hard cap of the presale token: 145,249,999 whole tokens.
pub const DEFAULT_CAP: Amount = 145_249_999 * UNIT;

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum TokenError {
    #[error("insufficient token balance in {account}: has {available}, needs {needed}")]
    InsufficientBalance {
        account: Address,
        available: Amount,
        needed: Amount,
    },
    #[error("caller {caller} is not the token owner")]
    NotOwner { caller: Address },
    #[error("minting {amount} would exceed cap {cap}")]
    CapExceeded { amount: Amount, cap: Amount },
    #[error("transfer to the null address")]
    NullRecipient,
    #[error("token arithmetic overflow")]
    Overflow,
}

/// What the presale needs from the token it distributes.
pub trait TokenLedger {
    fn balance_of(&self, account: &Address) -> Amount;

    /// Moves `amount` from `from` to `to`. Must not change any balance on error.
    fn transfer(&mut self, from: &Address, to: &Address, amount: Amount) -> Result<(), TokenError>;
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TokenEvent {
    Mint {
        to: Address,
        #[serde(with = "serde_amount")]
        amount: Amount,
    },
    Burn {
        burner: Address,
        #[serde(with = "serde_amount")]
        value: Amount,
    },
    /// `to == None` marks tokens leaving circulation.
    Transfer {
        from: Address,
        to: Option<Address>,
        #[serde(with = "serde_amount")]
        value: Amount,
    },
}

/// Capped, mintable, owner-burnable fungible token held in memory.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomToken {
    pub owner: Address,
    #[serde(with = "serde_amount")]
    pub cap: Amount,
    #[serde(with = "serde_amount")]
    total_supply: Amount,
    balances: BTreeMap<Address, Amount>,
    pub events: Vec<TokenEvent>,
}

impl CustomToken {
    pub fn new(owner: Address) -> Self {
        Self::with_cap(owner, DEFAULT_CAP)
    }

    pub fn with_cap(owner: Address, cap: Amount) -> Self {
        Self {
            owner,
            cap,
            total_supply: 0,
            balances: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    pub fn mint(&mut self, caller: &Address, to: &Address, amount: Amount) -> Result<(), TokenError> {
        if caller != &self.owner {
            return Err(TokenError::NotOwner { caller: *caller });
        }
        if to.is_zero() {
            return Err(TokenError::NullRecipient);
        }
        let supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(TokenError::Overflow)?;
        if supply > self.cap {
            return Err(TokenError::CapExceeded {
                amount,
                cap: self.cap,
            });
        }
        self.total_supply = supply;
        *self.balances.entry(*to).or_default() += amount;
        self.events.push(TokenEvent::Mint { to: *to, amount });
        Ok(())
    }

    /// Burns from the caller's own balance; restricted to the owner.
    pub fn burn(&mut self, caller: &Address, value: Amount) -> Result<(), TokenError> {
        if caller != &self.owner {
            return Err(TokenError::NotOwner { caller: *caller });
        }
        self.debit(caller, value)?;
        self.total_supply -= value;
        self.events.push(TokenEvent::Burn {
            burner: *caller,
            value,
        });
        self.events.push(TokenEvent::Transfer {
            from: *caller,
            to: None,
            value,
        });
        Ok(())
    }

    fn debit(&mut self, account: &Address, amount: Amount) -> Result<(), TokenError> {
        let available = self.balance_of(account);
        if available < amount {
            return Err(TokenError::InsufficientBalance {
                account: *account,
                available,
                needed: amount,
            });
        }
        let remaining = available - amount;
        if remaining == 0 {
            self.balances.remove(account);
        } else {
            self.balances.insert(*account, remaining);
        }
        Ok(())
    }
}

impl TokenLedger for CustomToken {
    fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    fn transfer(&mut self, from: &Address, to: &Address, amount: Amount) -> Result<(), TokenError> {
        if to.is_zero() {
            return Err(TokenError::NullRecipient);
        }
        // credit side cannot overflow: total supply bounds every balance
        self.debit(from, amount)?;
        *self.balances.entry(*to).or_default() += amount;
        self.events.push(TokenEvent::Transfer {
            from: *from,
            to: Some(*to),
            value: amount,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Address {
        Address::from_low_u64(1)
    }

    #[test]
    fn starts_with_default_cap() {
        let token = CustomToken::new(owner());
        assert_eq!(token.cap, 145_249_999 * UNIT);
        assert_eq!(token.total_supply(), 0);
    }

    #[test]
    fn mint_below_cap_records_event() {
        let mut token = CustomToken::new(owner());
        token.mint(&owner(), &owner(), 100).unwrap();
        assert_eq!(
            token.events[0],
            TokenEvent::Mint {
                to: owner(),
                amount: 100
            }
        );
    }

    #[test]
    fn mint_past_cap_fails() {
        let mut token = CustomToken::new(owner());
        let err = token.mint(&owner(), &owner(), DEFAULT_CAP + 1).unwrap_err();
        assert!(matches!(err, TokenError::CapExceeded { .. }));

        token.mint(&owner(), &owner(), DEFAULT_CAP).unwrap();
        assert!(token.mint(&owner(), &owner(), 1).is_err());
        assert_eq!(token.total_supply(), DEFAULT_CAP);
    }

    #[test]
    fn only_owner_mints() {
        let mut token = CustomToken::new(owner());
        let other = Address::from_low_u64(2);
        assert_eq!(
            token.mint(&other, &other, 1).unwrap_err(),
            TokenError::NotOwner { caller: other }
        );
    }

    #[test]
    fn burn_reduces_balance_and_logs_both_events() {
        let mut token = CustomToken::new(owner());
        token.mint(&owner(), &owner(), 1_000).unwrap();
        token.burn(&owner(), 100).unwrap();
        assert_eq!(token.balance_of(&owner()), 900);
        assert_eq!(token.total_supply(), 900);
        assert!(token.events.contains(&TokenEvent::Burn {
            burner: owner(),
            value: 100
        }));
        assert!(token.events.contains(&TokenEvent::Transfer {
            from: owner(),
            to: None,
            value: 100
        }));
    }

    #[test]
    fn burn_rejects_overdraft_and_non_owner() {
        let mut token = CustomToken::new(owner());
        token.mint(&owner(), &owner(), 1_000).unwrap();
        assert!(token.burn(&owner(), 1_001).is_err());
        assert!(token.burn(&Address::from_low_u64(2), 100).is_err());
        assert_eq!(token.balance_of(&owner()), 1_000);
    }

    #[test]
    fn failed_transfer_changes_nothing() {
        let mut token = CustomToken::new(owner());
        let alice = Address::from_low_u64(7);
        token.mint(&owner(), &alice, 50).unwrap();
        let before = token.clone();
        assert!(token.transfer(&alice, &owner(), 51).is_err());
        assert!(token.transfer(&alice, &Address::ZERO, 1).is_err());
        assert_eq!(token, before);
        token.transfer(&alice, &owner(), 50).unwrap();
        assert_eq!(token.balance_of(&alice), 0);
        assert_eq!(token.balance_of(&owner()), 50);
    }
}
