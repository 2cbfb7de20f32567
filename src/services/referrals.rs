use rust_decimal::Decimal;

use super::ServiceError;
use crate::models::referrals::{NewReferralBonus, ReferralBonus};
use crate::models::transactions::{NewTransaction, TransactionKind};
use crate::repositories::LedgerTx;
use crate::utils::percent_of;

/// Pays the referrer their share of a new deposit inside the caller's unit of
/// work, so the bonus only exists if the deposit does.
///
/// The bonus is credited to the referrer's balance, written to their ledger as
/// a `referral_bonus` transaction and recorded in the bonus table linked to
/// that transaction.
pub async fn credit_referral_bonus(
    tx: &mut dyn LedgerTx,
    referrer_id: i64,
    referred_id: i64,
    deposit_amount: Decimal,
    bonus_percent: Decimal,
) -> Result<Option<ReferralBonus>, ServiceError> {
    if tx.get_user(referrer_id).await?.is_none() {
        log::warn!(
            "Referrer {} of user {} no longer exists, skipping bonus",
            referrer_id,
            referred_id
        );
        return Ok(None);
    }

    let amount = percent_of(deposit_amount, bonus_percent);
    if amount <= Decimal::ZERO {
        return Ok(None);
    }

    tx.adjust_user_balance(referrer_id, amount).await?;
    let transaction = tx
        .insert_transaction(
            &NewTransaction::completed(referrer_id, TransactionKind::ReferralBonus, amount)
                .with_description(format!("Referral bonus for user {}", referred_id)),
        )
        .await?;
    let bonus = tx
        .insert_referral_bonus(&NewReferralBonus {
            referrer_id,
            referred_id,
            amount,
            transaction_id: Some(transaction.transaction_id),
        })
        .await?;

    Ok(Some(bonus))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::{memory::MemoryLedger, LedgerStore};
    use crate::services::testing::funded_user;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn bonus_is_credited_and_linked_to_its_ledger_entry() {
        let store = MemoryLedger::new();
        funded_user(&store, 1, None, Decimal::ZERO).await;
        funded_user(&store, 2, Some(1), Decimal::ZERO).await;

        let mut tx = store.begin().await.unwrap();
        let bonus = credit_referral_bonus(tx.as_mut(), 1, 2, dec!(100), dec!(5))
            .await
            .unwrap()
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(bonus.amount, dec!(5));
        assert_eq!(store.get_user(1).await.unwrap().unwrap().balance, dec!(5));

        let ledger = store.user_transactions(1).await;
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].transaction_type, TransactionKind::ReferralBonus);
        assert_eq!(bonus.transaction_id, Some(ledger[0].transaction_id));
    }

    #[tokio::test]
    async fn missing_referrer_gets_nothing() {
        let store = MemoryLedger::new();
        funded_user(&store, 2, None, Decimal::ZERO).await;

        let mut tx = store.begin().await.unwrap();
        let bonus = credit_referral_bonus(tx.as_mut(), 99, 2, dec!(100), dec!(5))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert!(bonus.is_none());
        assert!(store.referral_bonuses().await.is_empty());
    }
}
