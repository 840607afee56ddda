//! A deployed presale together with its token and native-currency bank.
//!
//! The host is the only place that sees wall-clock time: each
//! [`Transaction`] carries its sender and timestamp, and the host turns them
//! into a [`CallContext`] for the ledger. Transactions apply all-or-nothing
//! in submission order.

use std::{fs, io::BufRead, path::Path};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::{
    bank::{BankError, InMemoryBank, NativeBank},
    config::{ConfigError, PresaleConfig},
    error::PresaleError,
    presale::{CallContext, InvestorAccount, PresaleEvent, PresaleLedger},
    primitives::{serde_amount, Address, Amount, Timestamp},
    token::{CustomToken, TokenError, TokenLedger},
};

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("transaction at {now} precedes last accepted timestamp {last}")]
    ClockWentBackwards { last: Timestamp, now: Timestamp },
    #[error(transparent)]
    Presale(#[from] PresaleError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("deployment mint failed: {0}")]
    Mint(#[from] TokenError),
    #[error("genesis balances: {0}")]
    Genesis(#[from] BankError),
    #[error("line {line}: bad transaction: {source}")]
    BadTransaction {
        line: usize,
        source: serde_json::Error,
    },
    #[error("reading transactions: {0}")]
    Read(#[source] std::io::Error),
    #[error("state file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("state encoding: {0}")]
    Json(#[from] serde_json::Error),
}

/// One operation of the presale, as submitted by `sender`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PresaleCall {
    BuyTokens {
        beneficiary: Address,
        #[serde(with = "serde_amount")]
        value: Amount,
    },
    /// Plain value transfer; buys for the sender.
    Fallback {
        #[serde(with = "serde_amount")]
        value: Amount,
    },
    IssueTokens {
        beneficiary: Address,
        #[serde(with = "serde_amount")]
        amount: Amount,
    },
    WithdrawTokens,
    ChangeRate {
        #[serde(with = "serde_amount")]
        new_rate: Amount,
        up: bool,
        #[serde(default)]
        unsafe_change: bool,
    },
    TransferUnsoldTokens {
        wallet: Address,
    },
    AddToWhitelist {
        account: Address,
    },
    AddManyToWhitelist {
        accounts: Vec<Address>,
    },
    RemoveFromWhitelist {
        account: Address,
    },
    TransferOwnership {
        new_owner: Address,
    },
}

impl PresaleCall {
    pub fn name(&self) -> &'static str {
        match self {
            PresaleCall::BuyTokens { .. } => "buy_tokens",
            PresaleCall::Fallback { .. } => "fallback",
            PresaleCall::IssueTokens { .. } => "issue_tokens",
            PresaleCall::WithdrawTokens => "withdraw_tokens",
            PresaleCall::ChangeRate { .. } => "change_rate",
            PresaleCall::TransferUnsoldTokens { .. } => "transfer_unsold_tokens",
            PresaleCall::AddToWhitelist { .. } => "add_to_whitelist",
            PresaleCall::AddManyToWhitelist { .. } => "add_many_to_whitelist",
            PresaleCall::RemoveFromWhitelist { .. } => "remove_from_whitelist",
            PresaleCall::TransferOwnership { .. } => "transfer_ownership",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub sender: Address,
    pub timestamp: Timestamp,
    pub call: PresaleCall,
}

/// Presale-wide view at one instant, with a Merkle root over investor
/// accounts and the whitelist.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresaleSnapshot {
    pub at: Timestamp,
    pub presale: Address,
    pub owner: Address,
    pub wallet: Address,
    #[serde(with = "serde_amount")]
    pub rate: Amount,
    pub is_open: bool,
    pub has_closed: bool,
    #[serde(with = "serde_amount")]
    pub token_held: Amount,
    #[serde(with = "serde_amount")]
    pub tokens_still_in_lockup: Amount,
    #[serde(with = "serde_amount")]
    pub token_total_supply: Amount,
    pub investors: Vec<InvestorView>,
    pub whitelisted: usize,
    pub event_count: usize,
    #[serde(with = "hex_root")]
    pub merkle_root: [u8; 32],
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvestorView {
    pub investor: Address,
    #[serde(with = "serde_amount")]
    pub credited: Amount,
    #[serde(with = "serde_amount")]
    pub released: Amount,
    #[serde(with = "serde_amount")]
    pub pending: Amount,
    #[serde(with = "serde_amount")]
    pub withdrawable: Amount,
}

/// Outcome of replaying a batch of transaction lines.
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: usize,
    pub rejected: Vec<Rejection>,
    /// Line the replay stopped at when not asked to keep going.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted_at: Option<usize>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct Rejection {
    pub line: usize,
    pub call: &'static str,
    pub error: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresaleHost {
    presale: PresaleLedger,
    token: CustomToken,
    bank: InMemoryBank,
    last_timestamp: Timestamp,
}

impl PresaleHost {
    /// Creates the token, mints `token_supply` to the presale and seeds the
    /// bank. The token is owned by the configured owner.
    pub fn deploy(config: &PresaleConfig, now: Timestamp) -> Result<Self, HostError> {
        config.validate()?;
        let address = Address::derive(b"presale", &config.owner);
        let presale = PresaleLedger::new(config.params(address)?)?;

        let mut token = CustomToken::with_cap(config.owner, config.token_cap());
        if config.token_supply > 0 {
            token.mint(&config.owner, &address, config.token_supply)?;
        }
        let bank = InMemoryBank::with_genesis(
            config
                .genesis_balances
                .iter()
                .map(|g| (g.account, g.amount)),
        )?;
        info!(
            presale = %address,
            owner = %config.owner,
            supply = config.token_supply,
            "presale deployed"
        );
        Ok(Self {
            presale,
            token,
            bank,
            last_timestamp: now,
        })
    }

    pub fn presale(&self) -> &PresaleLedger {
        &self.presale
    }

    pub fn token(&self) -> &CustomToken {
        &self.token
    }

    pub fn bank(&self) -> &InMemoryBank {
        &self.bank
    }

    pub fn last_timestamp(&self) -> Timestamp {
        self.last_timestamp
    }

    /// Applies one transaction and returns the presale events it emitted.
    /// On error nothing changes, the clock included.
    pub fn execute(&mut self, tx: &Transaction) -> Result<Vec<PresaleEvent>, HostError> {
        if tx.timestamp < self.last_timestamp {
            let err = HostError::ClockWentBackwards {
                last: self.last_timestamp,
                now: tx.timestamp,
            };
            warn!(sender = %tx.sender, call = tx.call.name(), %err, "transaction rejected");
            return Err(err);
        }
        let mark = self.presale.events().len();
        match self.dispatch(tx) {
            Ok(()) => {
                self.last_timestamp = tx.timestamp;
                Ok(self.presale.events()[mark..].to_vec())
            }
            Err(err) => {
                warn!(sender = %tx.sender, call = tx.call.name(), %err, "transaction rejected");
                Err(err.into())
            }
        }
    }

    /// Replays JSON-lines transactions (blank and `#` lines skipped). A
    /// rejected transaction is recorded; without `keep_going` the replay
    /// stops there, keeping everything accepted before it. A malformed line
    /// aborts with [`HostError::BadTransaction`].
    pub fn apply_lines<R: BufRead>(
        &mut self,
        input: R,
        keep_going: bool,
    ) -> Result<ApplyReport, HostError> {
        let mut report = ApplyReport::default();
        for (idx, line) in input.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.map_err(HostError::Read)?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let tx: Transaction = serde_json::from_str(trimmed).map_err(|source| {
                HostError::BadTransaction {
                    line: line_no,
                    source,
                }
            })?;
            match self.execute(&tx) {
                Ok(_) => report.applied += 1,
                Err(err) => {
                    report.rejected.push(Rejection {
                        line: line_no,
                        call: tx.call.name(),
                        error: err.to_string(),
                    });
                    if !keep_going {
                        report.halted_at = Some(line_no);
                        break;
                    }
                }
            }
        }
        info!(
            applied = report.applied,
            rejected = report.rejected.len(),
            "transactions applied"
        );
        Ok(report)
    }

    fn dispatch(&mut self, tx: &Transaction) -> Result<(), PresaleError> {
        let ctx = CallContext::new(tx.sender, tx.timestamp);
        let Self {
            presale,
            token,
            bank,
            ..
        } = self;
        match &tx.call {
            PresaleCall::BuyTokens { beneficiary, value } => {
                presale.buy_tokens(&ctx, &*token, bank, *beneficiary, *value)?;
            }
            PresaleCall::Fallback { value } => {
                presale.fallback_purchase(&ctx, &*token, bank, *value)?;
            }
            PresaleCall::IssueTokens {
                beneficiary,
                amount,
            } => presale.issue_tokens(&ctx, &*token, *beneficiary, *amount)?,
            PresaleCall::WithdrawTokens => {
                presale.withdraw_tokens(&ctx, token)?;
            }
            PresaleCall::ChangeRate {
                new_rate,
                up,
                unsafe_change,
            } => presale.change_rate(&ctx, *new_rate, *up, *unsafe_change)?,
            PresaleCall::TransferUnsoldTokens { wallet } => {
                presale.transfer_unsold_tokens(&ctx, token, *wallet)?;
            }
            PresaleCall::AddToWhitelist { account } => presale.add_to_whitelist(&ctx, *account)?,
            PresaleCall::AddManyToWhitelist { accounts } => {
                presale.add_many_to_whitelist(&ctx, accounts)?
            }
            PresaleCall::RemoveFromWhitelist { account } => {
                presale.remove_from_whitelist(&ctx, *account)?
            }
            PresaleCall::TransferOwnership { new_owner } => {
                presale.transfer_ownership(&ctx, *new_owner)?
            }
        }
        Ok(())
    }

    pub fn snapshot(&self, at: Timestamp) -> PresaleSnapshot {
        let presale = &self.presale;
        let investors = presale
            .accounts()
            .iter()
            .map(|(investor, account)| InvestorView {
                investor: *investor,
                credited: account.credited,
                released: account.released,
                pending: account.pending(),
                withdrawable: presale.withdrawable(investor, at),
            })
            .collect();
        PresaleSnapshot {
            at,
            presale: presale.address(),
            owner: presale.owner(),
            wallet: presale.wallet(),
            rate: presale.rate(),
            is_open: presale.is_open(at),
            has_closed: presale.has_closed(at),
            token_held: self.token.balance_of(&presale.address()),
            tokens_still_in_lockup: presale.tokens_still_in_lockup(),
            token_total_supply: self.token.total_supply(),
            investors,
            whitelisted: presale.whitelist().count(),
            event_count: presale.events().len(),
            merkle_root: compute_merkle_root(presale),
        }
    }

    pub fn native_balance(&self, account: &Address) -> Amount {
        self.bank.balance_of(account)
    }

    pub fn load(path: &Path) -> Result<Self, HostError> {
        let bytes = fs::read(path).map_err(|source| HostError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), HostError> {
        let io_err = |source| HostError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(path, json).map_err(io_err)
    }
}

fn account_leaf(investor: &Address, account: &InvestorAccount) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"acct");
    hasher.update(investor.0);
    hasher.update(account.credited.to_le_bytes());
    hasher.update(account.released.to_le_bytes());
    hasher.finalize().into()
}

fn compute_merkle_root(presale: &PresaleLedger) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = presale
        .accounts()
        .iter()
        .map(|(investor, account)| account_leaf(investor, account))
        .collect();
    for account in presale.whitelist() {
        let mut hasher = Sha256::new();
        hasher.update(b"wl");
        hasher.update(account.0);
        leaves.push(hasher.finalize().into());
    }
    merkle_root(&leaves)
}

/// Root over `leaves` split at the largest power of two below the length,
/// so an unpaired subtree is carried up unhashed.
fn merkle_root(leaves: &[[u8; 32]]) -> [u8; 32] {
    match leaves {
        [] => Sha256::digest(b"presale-empty").into(),
        [leaf] => *leaf,
        _ => {
            let split = leaves.len().next_power_of_two() / 2;
            let (left, right) = leaves.split_at(split);
            Sha256::new()
                .chain_update(b"node")
                .chain_update(merkle_root(left))
                .chain_update(merkle_root(right))
                .finalize()
                .into()
        }
    }
}

mod hex_root {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(root: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(root))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("merkle root must be 32 bytes"))
    }
}
