use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    bank::NativeBank,
    error::PresaleError,
    primitives::{serde_amount, Address, Amount, Timestamp},
    token::TokenLedger,
    vesting::LockupSchedule,
};

mod events;

pub use events::PresaleEvent;

/// Caller identity and clock for one call. The ledger never reads a clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallContext {
    pub sender: Address,
    pub now: Timestamp,
}

impl CallContext {
    pub fn new(sender: Address, now: Timestamp) -> Self {
        Self { sender, now }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SaleWindow {
    pub opening_time: Timestamp,
    pub closing_time: Timestamp,
}

impl SaleWindow {
    pub fn new(opening_time: Timestamp, closing_time: Timestamp) -> Result<Self, PresaleError> {
        if opening_time >= closing_time {
            return Err(PresaleError::InvalidConfig(
                "opening_time must precede closing_time".into(),
            ));
        }
        Ok(Self {
            opening_time,
            closing_time,
        })
    }

    pub fn is_open(&self, now: Timestamp) -> bool {
        self.opening_time <= now && now < self.closing_time
    }

    pub fn has_closed(&self, now: Timestamp) -> bool {
        now >= self.closing_time
    }
}

/// Per-investor position. Pending = credited - released.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct InvestorAccount {
    #[serde(with = "serde_amount")]
    pub credited: Amount,
    #[serde(with = "serde_amount")]
    pub released: Amount,
}

impl InvestorAccount {
    pub fn pending(&self) -> Amount {
        self.credited - self.released
    }
}

/// Construction parameters for [`PresaleLedger`].
#[derive(Clone, Debug)]
pub struct PresaleParams {
    /// Address the ledger's token holdings live under.
    pub address: Address,
    pub owner: Address,
    pub wallet: Address,
    pub window: SaleWindow,
    pub rate: Amount,
    pub schedule: LockupSchedule,
}

/// The tranched lock-up presale state machine.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresaleLedger {
    address: Address,
    owner: Address,
    wallet: Address,
    window: SaleWindow,
    #[serde(with = "serde_amount")]
    rate: Amount,
    schedule: LockupSchedule,
    whitelist: BTreeSet<Address>,
    accounts: BTreeMap<Address, InvestorAccount>,
    #[serde(with = "serde_amount")]
    tokens_still_in_lockup: Amount,
    pub events: Vec<PresaleEvent>,
}

impl PresaleLedger {
    pub fn new(params: PresaleParams) -> Result<Self, PresaleError> {
        if params.rate == 0 {
            return Err(PresaleError::InvalidRate);
        }
        if params.owner.is_zero() || params.wallet.is_zero() || params.address.is_zero() {
            return Err(PresaleError::InvalidAddress);
        }
        Ok(Self {
            address: params.address,
            owner: params.owner,
            wallet: params.wallet,
            window: params.window,
            rate: params.rate,
            schedule: params.schedule,
            whitelist: BTreeSet::new(),
            accounts: BTreeMap::new(),
            tokens_still_in_lockup: 0,
            events: Vec::new(),
        })
    }

    // ---------- queries ----------

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn wallet(&self) -> Address {
        self.wallet
    }

    pub fn rate(&self) -> Amount {
        self.rate
    }

    pub fn window(&self) -> &SaleWindow {
        &self.window
    }

    pub fn schedule(&self) -> &LockupSchedule {
        &self.schedule
    }

    pub fn is_open(&self, now: Timestamp) -> bool {
        self.window.is_open(now)
    }

    pub fn has_closed(&self, now: Timestamp) -> bool {
        self.window.has_closed(now)
    }

    pub fn is_whitelisted(&self, account: &Address) -> bool {
        self.whitelist.contains(account)
    }

    pub fn whitelist(&self) -> impl Iterator<Item = &Address> {
        self.whitelist.iter()
    }

    /// Pending (still locked) balance of `investor`.
    pub fn balance_of(&self, investor: &Address) -> Amount {
        self.accounts.get(investor).map(|a| a.pending()).unwrap_or(0)
    }

    pub fn released_of(&self, investor: &Address) -> Amount {
        self.accounts.get(investor).map(|a| a.released).unwrap_or(0)
    }

    pub fn accounts(&self) -> &BTreeMap<Address, InvestorAccount> {
        &self.accounts
    }

    pub fn tokens_still_in_lockup(&self) -> Amount {
        self.tokens_still_in_lockup
    }

    pub fn events(&self) -> &[PresaleEvent] {
        &self.events
    }

    /// What `withdraw_tokens` would release for `investor` at `now`.
    pub fn withdrawable(&self, investor: &Address, now: Timestamp) -> Amount {
        self.accounts
            .get(investor)
            .map(|a| self.schedule.releasable(now, a.credited, a.released))
            .unwrap_or(0)
    }

    // ---------- guards ----------

    fn only_owner(&self, ctx: &CallContext) -> Result<(), PresaleError> {
        if ctx.sender != self.owner {
            return Err(PresaleError::NotOwner { caller: ctx.sender });
        }
        Ok(())
    }

    fn only_while_open(&self, ctx: &CallContext) -> Result<(), PresaleError> {
        if !self.window.is_open(ctx.now) {
            return Err(PresaleError::NotOpen { now: ctx.now });
        }
        Ok(())
    }

    /// Checks that `amount` more tokens can be locked up against what the
    /// presale holds; returns the new lock-up total.
    fn reserve<T: TokenLedger>(&self, token: &T, amount: Amount) -> Result<Amount, PresaleError> {
        let requested = self
            .tokens_still_in_lockup
            .checked_add(amount)
            .ok_or(PresaleError::MathOverflow)?;
        let available = token.balance_of(&self.address);
        if requested > available {
            return Err(PresaleError::SupplyExceeded {
                requested,
                available,
            });
        }
        Ok(requested)
    }

    /// Recipients must be real accounts other than the presale itself.
    fn ensure_recipient(&self, account: &Address) -> Result<(), PresaleError> {
        if account.is_zero() || *account == self.address {
            return Err(PresaleError::InvalidAddress);
        }
        Ok(())
    }

    fn credit(&mut self, beneficiary: &Address, amount: Amount, new_lockup_total: Amount) {
        let account = self.accounts.entry(*beneficiary).or_default();
        account.credited += amount;
        self.tokens_still_in_lockup = new_lockup_total;
    }

    // ---------- sale ----------

    /// Purchases `value * rate` tokens for `beneficiary`, paid by the sender.
    pub fn buy_tokens<T, N>(
        &mut self,
        ctx: &CallContext,
        token: &T,
        bank: &mut N,
        beneficiary: Address,
        value: Amount,
    ) -> Result<Amount, PresaleError>
    where
        T: TokenLedger,
        N: NativeBank,
    {
        self.ensure_recipient(&beneficiary)?;
        if value == 0 {
            return Err(PresaleError::ZeroAmount);
        }
        if !self.is_whitelisted(&beneficiary) {
            return Err(PresaleError::NotWhitelisted { beneficiary });
        }
        self.only_while_open(ctx)?;
        let amount = value
            .checked_mul(self.rate)
            .ok_or(PresaleError::MathOverflow)?;
        let new_total = self.reserve(token, amount)?;

        bank.forward(&ctx.sender, &self.wallet, value)?;

        self.credit(&beneficiary, amount, new_total);
        info!(
            purchaser = %ctx.sender,
            %beneficiary,
            value,
            amount,
            "token purchase"
        );
        self.events.push(PresaleEvent::TokenPurchase {
            purchaser: ctx.sender,
            beneficiary,
            value,
            amount,
        });
        Ok(amount)
    }

    /// Plain value transfer to the presale: buys for the sender.
    pub fn fallback_purchase<T, N>(
        &mut self,
        ctx: &CallContext,
        token: &T,
        bank: &mut N,
        value: Amount,
    ) -> Result<Amount, PresaleError>
    where
        T: TokenLedger,
        N: NativeBank,
    {
        self.buy_tokens(ctx, token, bank, ctx.sender, value)
    }

    /// Off-chain (fiat) issuance. Skips the whitelist and payment, keeps the
    /// window, supply cap and vesting.
    pub fn issue_tokens<T: TokenLedger>(
        &mut self,
        ctx: &CallContext,
        token: &T,
        beneficiary: Address,
        amount: Amount,
    ) -> Result<(), PresaleError> {
        self.only_owner(ctx)?;
        self.only_while_open(ctx)?;
        self.ensure_recipient(&beneficiary)?;
        if amount == 0 {
            return Err(PresaleError::ZeroAmount);
        }
        let new_total = self.reserve(token, amount)?;
        self.credit(&beneficiary, amount, new_total);
        info!(%beneficiary, amount, "tokens issued");
        self.events.push(PresaleEvent::TokensIssued {
            beneficiary,
            amount,
        });
        Ok(())
    }

    // ---------- vesting ----------

    /// Releases everything unlocked for the sender so far.
    pub fn withdraw_tokens<T: TokenLedger>(
        &mut self,
        ctx: &CallContext,
        token: &mut T,
    ) -> Result<Amount, PresaleError> {
        let investor = ctx.sender;
        let amount = self.withdrawable(&investor, ctx.now);
        if amount == 0 {
            return Err(PresaleError::NothingToWithdraw { investor });
        }

        token.transfer(&self.address, &investor, amount)?;

        let account = self.accounts.entry(investor).or_default();
        account.released += amount;
        let pending = account.pending();
        self.tokens_still_in_lockup -= amount;
        info!(
            %investor,
            amount,
            pending,
            stage = self.schedule.stages_reached(ctx.now),
            "tokens withdrawn"
        );
        self.events.push(PresaleEvent::TokensWithdrawn { investor, amount });
        Ok(amount)
    }

    // ---------- owner ----------

    /// Owner-only rate update. Without `unsafe_change` the new rate must lie
    /// within 10% of the current one in the claimed direction, inclusive.
    pub fn change_rate(
        &mut self,
        ctx: &CallContext,
        new_rate: Amount,
        up: bool,
        unsafe_change: bool,
    ) -> Result<(), PresaleError> {
        self.only_owner(ctx)?;
        if new_rate == 0 {
            return Err(PresaleError::InvalidRate);
        }
        if !unsafe_change && !within_guard(self.rate, new_rate, up) {
            return Err(PresaleError::RateChangeTooLarge {
                current: self.rate,
                requested: new_rate,
            });
        }
        let old_rate = self.rate;
        self.rate = new_rate;
        info!(old_rate, new_rate, up, unsafe_change, "rate changed");
        self.events.push(PresaleEvent::RateChanged {
            old_rate,
            new_rate,
            unsafe_change,
        });
        Ok(())
    }

    /// Sends everything the presale holds beyond the locked-up total to
    /// `wallet`. Only after the sale has closed.
    pub fn transfer_unsold_tokens<T: TokenLedger>(
        &mut self,
        ctx: &CallContext,
        token: &mut T,
        wallet: Address,
    ) -> Result<Amount, PresaleError> {
        self.only_owner(ctx)?;
        if !self.window.has_closed(ctx.now) {
            return Err(PresaleError::SaleStillOpen {
                closing_time: self.window.closing_time,
            });
        }
        self.ensure_recipient(&wallet)?;
        let unsold = token
            .balance_of(&self.address)
            .saturating_sub(self.tokens_still_in_lockup);
        if unsold > 0 {
            token.transfer(&self.address, &wallet, unsold)?;
        }
        info!(
            %wallet,
            unsold,
            still_locked = self.tokens_still_in_lockup,
            "unsold tokens returned"
        );
        self.events.push(PresaleEvent::UnsoldTokensReturned {
            wallet,
            amount: unsold,
        });
        Ok(unsold)
    }

    pub fn transfer_ownership(
        &mut self,
        ctx: &CallContext,
        new_owner: Address,
    ) -> Result<(), PresaleError> {
        self.only_owner(ctx)?;
        if new_owner.is_zero() {
            return Err(PresaleError::InvalidAddress);
        }
        let previous = self.owner;
        self.owner = new_owner;
        info!(%previous, %new_owner, "ownership transferred");
        self.events.push(PresaleEvent::OwnershipTransferred {
            previous,
            new_owner,
        });
        Ok(())
    }

    // ---------- whitelist ----------

    pub fn add_to_whitelist(
        &mut self,
        ctx: &CallContext,
        account: Address,
    ) -> Result<(), PresaleError> {
        self.only_owner(ctx)?;
        self.set_whitelisted(account, true);
        Ok(())
    }

    pub fn add_many_to_whitelist(
        &mut self,
        ctx: &CallContext,
        accounts: &[Address],
    ) -> Result<(), PresaleError> {
        self.only_owner(ctx)?;
        for account in accounts {
            self.set_whitelisted(*account, true);
        }
        Ok(())
    }

    pub fn remove_from_whitelist(
        &mut self,
        ctx: &CallContext,
        account: Address,
    ) -> Result<(), PresaleError> {
        self.only_owner(ctx)?;
        self.set_whitelisted(account, false);
        Ok(())
    }

    fn set_whitelisted(&mut self, account: Address, added: bool) {
        if added {
            self.whitelist.insert(account);
        } else {
            self.whitelist.remove(&account);
        }
        debug!(%account, added, "whitelist updated");
        self.events
            .push(PresaleEvent::WhitelistUpdated { account, added });
    }
}

/// `up`: `current <= new <= current * 1.1`; down: `current * 0.9 <= new <= current`.
/// Compares the step, `|new - current| * 10 <= current`, so no rate overflows.
fn within_guard(current: Amount, new_rate: Amount, up: bool) -> bool {
    let step = if up {
        new_rate.checked_sub(current)
    } else {
        current.checked_sub(new_rate)
    };
    step.and_then(|d| d.checked_mul(10))
        .is_some_and(|scaled| scaled <= current)
}
