//! Authorization: scope checks and spend-ceiling enforcement.
//!
//! Scopes gate which operations an API key may invoke at all; spend ceilings
//! bound how much it may move. The rolling-window ceiling is evaluated under
//! the payer's account lock so concurrent requests cannot slip past it.

use chrono::{DateTime, Duration, Utc};

use tesoro_shared::types::AccountId;
use tesoro_shared::{ApiKeyIdentity, Money, Scope};

use crate::ledger::error::LedgerError;
use crate::store::LedgerStore;

/// Verifies the identity carries the scope an operation requires.
///
/// # Errors
///
/// Returns `ForbiddenScope` naming the missing scope.
pub fn require_scope(identity: &ApiKeyIdentity, scope: Scope) -> Result<(), LedgerError> {
    if identity.has_scope(scope) {
        Ok(())
    } else {
        Err(LedgerError::ForbiddenScope(format!(
            "missing required scope: {scope}"
        )))
    }
}

/// Enforces the caller's spend ceilings for an outgoing amount debited from
/// `payer`. Must run with the payer's account lock held.
///
/// The per-transaction ceiling bounds a single operation; the window ceiling
/// bounds the rolling sum of committed AVAILABLE-bucket debits plus this
/// operation.
///
/// # Errors
///
/// Returns `LimitExceeded` with the applicable ceiling, or `Arithmetic` if
/// the sums overflow.
pub async fn enforce_spend_ceiling<S: LedgerStore>(
    store: &S,
    tx: &mut S::Tx,
    identity: &ApiKeyIdentity,
    payer: AccountId,
    amount: Money,
    window: Duration,
    now: DateTime<Utc>,
) -> Result<(), LedgerError> {
    if let Some(per_tx_max) = identity.limits.per_tx_max {
        if amount.minor_units > per_tx_max {
            return Err(LedgerError::LimitExceeded {
                spent: 0,
                requested: amount.minor_units,
                limit: per_tx_max,
            });
        }
    }

    if let Some(window_max) = identity.limits.window_max {
        let since = now - window;
        let spent = store.sum_available_debits_since(tx, payer, since).await?;
        let projected = spent
            .checked_add(amount.minor_units)
            .ok_or(LedgerError::Arithmetic)?;
        if projected > window_max {
            return Err(LedgerError::LimitExceeded {
                spent,
                requested: amount.minor_units,
                limit: window_max,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tesoro_shared::types::{ApiKeyId, WalletId};
    use tesoro_shared::SpendLimits;

    fn identity(scopes: Vec<Scope>) -> ApiKeyIdentity {
        ApiKeyIdentity {
            api_key_id: ApiKeyId::new(),
            wallet_id: WalletId::new(),
            scopes,
            limits: SpendLimits::unlimited(),
        }
    }

    #[test]
    fn test_require_scope() {
        let id = identity(vec![Scope::Read, Scope::Transfer]);
        assert!(require_scope(&id, Scope::Transfer).is_ok());
        assert!(matches!(
            require_scope(&id, Scope::Refund),
            Err(LedgerError::ForbiddenScope(_))
        ));
    }
}
