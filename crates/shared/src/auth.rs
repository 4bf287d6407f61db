//! API-key identity, scopes, and spend limits.
//!
//! Every request is made on behalf of an API key bound to one wallet. The
//! key carries a scope set restricting which operations it may invoke and
//! optional spend ceilings enforced by the ledger engine under the payer's
//! account lock.

use serde::{Deserialize, Serialize};

use crate::types::{ApiKeyId, WalletId};

/// Operations an API key may be authorized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Read balances and transaction history.
    Read,
    /// Create transfers.
    Transfer,
    /// Create and release holds.
    Hold,
    /// Capture holds.
    Capture,
    /// Refund captures.
    Refund,
    /// Create and cancel payment intents.
    IntentCreate,
    /// Pay payment intents.
    IntentPay,
    /// Administrative operations: wallets, deposits, freezes.
    Admin,
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Read => "read",
            Self::Transfer => "transfer",
            Self::Hold => "hold",
            Self::Capture => "capture",
            Self::Refund => "refund",
            Self::IntentCreate => "intent_create",
            Self::IntentPay => "intent_pay",
            Self::Admin => "admin",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Self::Read),
            "transfer" => Ok(Self::Transfer),
            "hold" => Ok(Self::Hold),
            "capture" => Ok(Self::Capture),
            "refund" => Ok(Self::Refund),
            "intent_create" => Ok(Self::IntentCreate),
            "intent_pay" => Ok(Self::IntentPay),
            "admin" => Ok(Self::Admin),
            _ => Err(format!("Unknown scope: {s}")),
        }
    }
}

/// Spend ceilings attached to an API key, in the wallet's minor units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendLimits {
    /// Maximum outgoing amount per transaction.
    pub per_tx_max: Option<i64>,
    /// Maximum summed outgoing debits within the rolling spend window.
    pub window_max: Option<i64>,
}

impl SpendLimits {
    /// Limits that never restrict anything.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            per_tx_max: None,
            window_max: None,
        }
    }
}

/// The authenticated caller of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyIdentity {
    /// The API key's id, used as the idempotency scope.
    pub api_key_id: ApiKeyId,
    /// The wallet the key acts on behalf of.
    pub wallet_id: WalletId,
    /// Operations the key is allowed to invoke.
    pub scopes: Vec<Scope>,
    /// Spend ceilings for outgoing money movement.
    pub limits: SpendLimits,
}

impl ApiKeyIdentity {
    /// Returns true if the identity carries the given scope.
    #[must_use]
    pub fn has_scope(&self, scope: Scope) -> bool {
        self.scopes.contains(&scope)
    }
}
