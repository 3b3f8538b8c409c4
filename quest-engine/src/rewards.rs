//! Token claims and badge mints.
//!
//! Every operation for one user runs under that user's async mutex, so two
//! claims can never both see the same unclaimed batch. A batch is marked
//! claimed only after the ledger accepted the transfer. When a transaction
//! may have been sent but cannot be recorded, it is journaled in the store
//! and checked on chain before the user's next claim or mint sends anything.

use chain_ledger::{ChainId, ChainRegistry, LedgerError, TxHash};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};

use crate::config::RewardsConfig;
use crate::error::{RewardError, StoreError};
use crate::store::Store;
use crate::types::{
    AssignmentStatus, BadgeRecord, ClaimResult, MintResult, PendingClaim, PendingReward,
};

/// Per-user async mutexes.
#[derive(Default)]
pub struct UserLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `user_id`.
    pub async fn lock(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let mutex = self.locks.entry(user_id.to_string()).or_default().clone();
        mutex.lock_owned().await
    }
}

/// Where a journaled transaction stands on chain.
enum Settlement {
    Landed,
    Dropped,
}

pub struct RewardDispatcher {
    store: Arc<dyn Store>,
    chains: Arc<ChainRegistry>,
    locks: Arc<UserLocks>,
    config: RewardsConfig,
}

type Result<T> = std::result::Result<T, RewardError>;

impl RewardDispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        chains: Arc<ChainRegistry>,
        locks: Arc<UserLocks>,
        config: RewardsConfig,
    ) -> Self {
        Self {
            store,
            chains,
            locks,
            config,
        }
    }

    /// Unrecorded reward transactions for a user.
    pub async fn pending_reconciliation(&self, user_id: &str) -> Result<Vec<PendingClaim>> {
        Ok(self.store.pending_for_user(user_id).await?)
    }

    pub async fn pending_count(&self) -> Result<usize> {
        Ok(self.store.pending_count().await?)
    }

    /// Pay out every verified, unclaimed token reward in one transfer.
    pub async fn claim(&self, user_id: &str, chain: Option<&ChainId>) -> Result<ClaimResult> {
        let _guard = self.locks.lock(user_id).await;

        let client = self.chains.resolve(chain)?;
        let chain = client.chain().id.clone();

        if let Some(result) = self.reconcile_tokens(user_id).await? {
            return Ok(result);
        }

        let user = self.store.get_user(user_id).await?;

        let mut assignment_ids = Vec::new();
        let mut amount: u64 = 0;
        for assignment in self.store.assignments_for_user(user_id).await? {
            if assignment.status != AssignmentStatus::Verified || assignment.reward_claimed {
                continue;
            }
            let task = self.store.get_task(&assignment.task_id).await?;
            if task.token_reward == 0 || !task.supports_chain(&chain) {
                continue;
            }
            amount = amount
                .checked_add(task.token_reward)
                .ok_or(RewardError::AmountOverflow)?;
            assignment_ids.push(assignment.id);
        }

        if assignment_ids.is_empty() {
            return Err(RewardError::NothingToClaim);
        }
        let wallet = user
            .wallet_for(&chain)
            .ok_or_else(|| RewardError::NoWalletConfigured(chain.clone()))?;

        let tx_hash = match client.transfer(wallet, amount).await {
            Ok(hash) => hash,
            Err(LedgerError::Ambiguous { tx_hash, reason }) => {
                warn!(user_id, %chain, %tx_hash, %reason, "Reward transfer outcome unknown");
                let reward = PendingReward::Tokens {
                    assignment_ids,
                    amount,
                };
                return Err(self.journal(user_id, &chain, tx_hash, reward, reason).await);
            }
            Err(e) => {
                warn!(user_id, %chain, error = %e, "Reward transfer failed");
                return Err(e.into());
            }
        };

        if let Err(e) = self.store.mark_claimed(&assignment_ids, &chain, &tx_hash).await {
            error!(user_id, %chain, %tx_hash, error = %e, "Transfer sent but claim not recorded");
            let reward = PendingReward::Tokens {
                assignment_ids,
                amount,
            };
            return Err(self.journal(user_id, &chain, tx_hash, reward, e.to_string()).await);
        }

        info!(user_id, %chain, amount, %tx_hash, batch = assignment_ids.len(), "Tokens claimed");
        Ok(ClaimResult {
            explorer_url: client.chain().explorer_tx_url(&tx_hash),
            chain,
            tx_hash,
            amount,
            assignment_ids,
            reconciled: false,
        })
    }

    /// Mint the badge for the user's current level.
    pub async fn claim_badge(&self, user_id: &str, chain: Option<&ChainId>) -> Result<MintResult> {
        let _guard = self.locks.lock(user_id).await;

        let client = self.chains.resolve(chain)?;
        let chain = client.chain().id.clone();

        if let Some(result) = self.reconcile_badges(user_id).await? {
            return Ok(result);
        }

        let user = self.store.get_user(user_id).await?;
        let level = user.level;
        if level < self.config.badge_level_threshold {
            return Err(RewardError::LevelTooLow {
                level,
                required: self.config.badge_level_threshold,
            });
        }

        let badges = self.store.badges_for_user(user_id).await?;
        if badges.iter().any(|b| b.level == level) {
            return Err(RewardError::AlreadyClaimed { level });
        }

        let wallet = user
            .wallet_for(&chain)
            .ok_or_else(|| RewardError::NoWalletConfigured(chain.clone()))?;
        let metadata_uri = format!(
            "{}/level_{}_badge",
            self.config.badge_uri_prefix.trim_end_matches('/'),
            level
        );

        let tx_hash = match client.mint_badge(wallet, &metadata_uri).await {
            Ok(hash) => hash,
            Err(LedgerError::Ambiguous { tx_hash, reason }) => {
                warn!(user_id, %chain, level, %tx_hash, %reason, "Badge mint outcome unknown");
                let reward = PendingReward::Badge {
                    level,
                    metadata_uri,
                };
                return Err(self.journal(user_id, &chain, tx_hash, reward, reason).await);
            }
            Err(e) => {
                warn!(user_id, %chain, level, error = %e, "Badge mint failed");
                return Err(e.into());
            }
        };

        let record = BadgeRecord {
            user_id: user_id.to_string(),
            level,
            chain: chain.clone(),
            tx_hash: tx_hash.clone(),
            metadata_uri: metadata_uri.clone(),
            minted_at: Utc::now(),
        };
        if let Err(e) = self.store.insert_badge(record).await {
            error!(user_id, %chain, level, %tx_hash, error = %e, "Badge minted but not recorded");
            let reward = PendingReward::Badge {
                level,
                metadata_uri,
            };
            return Err(self.journal(user_id, &chain, tx_hash, reward, e.to_string()).await);
        }

        info!(user_id, %chain, level, %tx_hash, "Badge minted");
        Ok(MintResult {
            explorer_url: client.chain().explorer_tx_url(&tx_hash),
            chain,
            level,
            tx_hash,
            metadata_uri,
            reconciled: false,
        })
    }

    async fn journal(
        &self,
        user_id: &str,
        chain: &ChainId,
        tx_hash: TxHash,
        reward: PendingReward,
        reason: String,
    ) -> RewardError {
        let claim = PendingClaim {
            user_id: user_id.to_string(),
            chain: chain.clone(),
            tx_hash: tx_hash.clone(),
            reward,
            reason: reason.clone(),
            recorded_at: Utc::now(),
        };
        if let Err(e) = self.store.record_pending(claim).await {
            error!(user_id, %chain, %tx_hash, error = %e, "Reward transaction could not be journaled");
        }
        RewardError::ReconciliationRequired { tx_hash, reason }
    }

    /// Look a journaled transaction up on chain.
    ///
    /// A transaction the node knows but has not mined is still pending.
    async fn settle(&self, pending: &PendingClaim) -> Result<Settlement> {
        let client = self.chains.get(&pending.chain)?;
        let hash = &pending.tx_hash;

        match client.get_receipt(hash).await? {
            Some(receipt) if receipt.is_success() => Ok(Settlement::Landed),
            Some(_) => {
                warn!(user_id = %pending.user_id, tx_hash = %hash, "Journaled transaction reverted");
                Ok(Settlement::Dropped)
            }
            None => match client.get_transaction(hash).await? {
                Some(_) => Err(RewardError::ReconciliationPending(hash.clone())),
                None => {
                    warn!(user_id = %pending.user_id, tx_hash = %hash, "Journaled transaction never reached the chain");
                    Ok(Settlement::Dropped)
                }
            },
        }
    }

    /// Settle journaled transfers. Caller holds the user lock.
    ///
    /// Returns the claim when an earlier transfer landed; `None` when the
    /// user is free to claim normally.
    async fn reconcile_tokens(&self, user_id: &str) -> Result<Option<ClaimResult>> {
        for pending in self.store.pending_for_user(user_id).await? {
            let PendingReward::Tokens {
                assignment_ids,
                amount,
            } = &pending.reward
            else {
                continue;
            };

            match self.settle(&pending).await? {
                Settlement::Dropped => self.store.clear_pending(&pending.tx_hash).await?,
                Settlement::Landed => {
                    match self
                        .store
                        .mark_claimed(assignment_ids, &pending.chain, &pending.tx_hash)
                        .await
                    {
                        Ok(()) | Err(StoreError::AlreadyMarked(_)) => {}
                        Err(e) => {
                            return Err(RewardError::ReconciliationRequired {
                                tx_hash: pending.tx_hash.clone(),
                                reason: e.to_string(),
                            })
                        }
                    }
                    self.store.clear_pending(&pending.tx_hash).await?;
                    info!(user_id, chain = %pending.chain, tx_hash = %pending.tx_hash, "Earlier transfer reconciled");

                    let client = self.chains.get(&pending.chain)?;
                    return Ok(Some(ClaimResult {
                        explorer_url: client.chain().explorer_tx_url(&pending.tx_hash),
                        chain: pending.chain.clone(),
                        tx_hash: pending.tx_hash.clone(),
                        amount: *amount,
                        assignment_ids: assignment_ids.clone(),
                        reconciled: true,
                    }));
                }
            }
        }
        Ok(None)
    }

    /// Settle journaled mints. Caller holds the user lock.
    async fn reconcile_badges(&self, user_id: &str) -> Result<Option<MintResult>> {
        for pending in self.store.pending_for_user(user_id).await? {
            let PendingReward::Badge {
                level,
                metadata_uri,
            } = &pending.reward
            else {
                continue;
            };

            match self.settle(&pending).await? {
                Settlement::Dropped => self.store.clear_pending(&pending.tx_hash).await?,
                Settlement::Landed => {
                    let record = BadgeRecord {
                        user_id: user_id.to_string(),
                        level: *level,
                        chain: pending.chain.clone(),
                        tx_hash: pending.tx_hash.clone(),
                        metadata_uri: metadata_uri.clone(),
                        minted_at: pending.recorded_at,
                    };
                    match self.store.insert_badge(record).await {
                        Ok(()) | Err(StoreError::Duplicate { .. }) => {}
                        Err(e) => {
                            return Err(RewardError::ReconciliationRequired {
                                tx_hash: pending.tx_hash.clone(),
                                reason: e.to_string(),
                            })
                        }
                    }
                    self.store.clear_pending(&pending.tx_hash).await?;
                    info!(user_id, level, tx_hash = %pending.tx_hash, "Earlier badge mint reconciled");

                    let client = self.chains.get(&pending.chain)?;
                    return Ok(Some(MintResult {
                        explorer_url: client.chain().explorer_tx_url(&pending.tx_hash),
                        chain: pending.chain.clone(),
                        level: *level,
                        tx_hash: pending.tx_hash.clone(),
                        metadata_uri: metadata_uri.clone(),
                        reconciled: true,
                    }));
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::FaultyStore;
    use crate::types::{Assignment, Task, TaskType, User, VerificationType};
    use chain_ledger::{ChainConfig, MockLedger, ReceiptStatus, SubmittedWrite, WriteFailure};

    const WALLET: &str = "0x00000000000000000000000000000000000000aa";

    struct Fixture {
        store: Arc<FaultyStore>,
        ledger: Arc<MockLedger>,
        chains: Arc<ChainRegistry>,
        rewards: RewardDispatcher,
        user: User,
    }

    async fn fixture(ledger: MockLedger) -> Fixture {
        let store = Arc::new(FaultyStore::new());
        let ledger = Arc::new(ledger);
        let chains = Arc::new(ChainRegistry::new("gnosis").with_client(ledger.clone()));
        let user = User::new("alice", vec!["defi".into()]).with_wallet("gnosis", WALLET);
        store.insert_user(user.clone()).await.unwrap();

        let rewards = dispatcher(&store, &chains);
        Fixture {
            store,
            ledger,
            chains,
            rewards,
            user,
        }
    }

    fn dispatcher(store: &Arc<FaultyStore>, chains: &Arc<ChainRegistry>) -> RewardDispatcher {
        RewardDispatcher::new(
            store.clone(),
            chains.clone(),
            Arc::new(UserLocks::new()),
            RewardsConfig::default(),
        )
    }

    fn gnosis() -> MockLedger {
        MockLedger::new(ChainConfig::gnosis("http://unused"))
    }

    impl Fixture {
        async fn verified(&self, tokens: u64) -> String {
            let task = Task::new("t", TaskType::Practice, VerificationType::Quiz, tokens * 2)
                .with_token_reward(tokens);
            self.store.insert_task(task.clone()).await.unwrap();
            let mut assignment = Assignment::new(&self.user.id, &task.id);
            assignment.status = AssignmentStatus::Verified;
            let id = assignment.id.clone();
            self.store.insert_assignment(assignment).await.unwrap();
            id
        }

        async fn set_level(&self, level: u32) {
            let mut user = self.store.get_user(&self.user.id).await.unwrap();
            user.level = level;
            self.store.update_user(&user).await.unwrap();
        }

        async fn mints(&self) -> usize {
            self.ledger
                .writes()
                .await
                .into_iter()
                .filter(|w| matches!(w, SubmittedWrite::Mint { .. }))
                .count()
        }

        async fn pending(&self) -> usize {
            self.rewards
                .pending_reconciliation(&self.user.id)
                .await
                .unwrap()
                .len()
        }
    }

    #[tokio::test]
    async fn test_claim_pays_batch_once() {
        let f = fixture(gnosis()).await;
        f.verified(25).await;
        f.verified(10).await;

        let result = f.rewards.claim(&f.user.id, None).await.unwrap();
        assert_eq!(result.amount, 35);
        assert_eq!(result.assignment_ids.len(), 2);
        assert!(!result.reconciled);

        let again = f.rewards.claim(&f.user.id, None).await;
        assert!(matches!(again, Err(RewardError::NothingToClaim)));
        assert_eq!(f.ledger.transferred_total().await, 35);
    }

    #[tokio::test]
    async fn test_claim_skips_other_chain_tasks() {
        let f = fixture(gnosis()).await;
        let task = Task::new("t", TaskType::Quest, VerificationType::Quiz, 50)
            .with_chains(["polygon"]);
        f.store.insert_task(task.clone()).await.unwrap();
        let mut assignment = Assignment::new(&f.user.id, &task.id);
        assignment.status = AssignmentStatus::Verified;
        f.store.insert_assignment(assignment).await.unwrap();

        let result = f.rewards.claim(&f.user.id, None).await;
        assert!(matches!(result, Err(RewardError::NothingToClaim)));
    }

    #[tokio::test]
    async fn test_claim_requires_wallet() {
        let f = fixture(gnosis()).await;
        f.verified(25).await;
        let mut user = f.user.clone();
        user.wallets.clear();
        f.store.update_user(&user).await.unwrap();

        let result = f.rewards.claim(&f.user.id, None).await;
        assert!(matches!(result, Err(RewardError::NoWalletConfigured(_))));
        assert!(f.ledger.writes().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_transfer_marks_nothing() {
        let f = fixture(gnosis()).await;
        let id = f.verified(25).await;
        f.ledger.fail_writes(Some(WriteFailure::InsufficientFunds)).await;

        let result = f.rewards.claim(&f.user.id, None).await;
        assert!(matches!(
            result,
            Err(RewardError::Ledger(LedgerError::InsufficientFunds(_)))
        ));
        assert!(!f.store.get_assignment(&id).await.unwrap().reward_claimed);
        assert_eq!(f.pending().await, 0);
    }

    #[tokio::test]
    async fn test_unrecorded_claim_is_reconciled_without_resending() {
        let f = fixture(gnosis()).await;
        let id = f.verified(25).await;

        f.store.fail_mark_claimed(1);
        let first = f.rewards.claim(&f.user.id, None).await;
        assert!(matches!(first, Err(RewardError::ReconciliationRequired { .. })));
        assert_eq!(f.pending().await, 1);

        let second = f.rewards.claim(&f.user.id, None).await.unwrap();
        assert!(second.reconciled);
        assert_eq!(second.amount, 25);

        assert_eq!(f.ledger.writes().await.len(), 1);
        assert!(f.store.get_assignment(&id).await.unwrap().reward_claimed);
        assert_eq!(f.pending().await, 0);
    }

    #[tokio::test]
    async fn test_journal_outlives_the_dispatcher() {
        let f = fixture(gnosis()).await;
        f.verified(25).await;

        f.store.fail_mark_claimed(1);
        let first = f.rewards.claim(&f.user.id, None).await;
        assert!(matches!(first, Err(RewardError::ReconciliationRequired { .. })));

        // a fresh dispatcher over the same store, as after a restart
        let restarted = dispatcher(&f.store, &f.chains);
        let second = restarted.claim(&f.user.id, None).await.unwrap();
        assert!(second.reconciled);
        assert_eq!(f.ledger.transferred_total().await, 25);
        assert_eq!(restarted.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dropped_transfer_reopens_claim() {
        let f = fixture(gnosis()).await;
        f.verified(25).await;

        f.ledger
            .fail_writes(Some(WriteFailure::Ambiguous { landed: false }))
            .await;
        let first = f.rewards.claim(&f.user.id, None).await;
        assert!(matches!(first, Err(RewardError::ReconciliationRequired { .. })));

        f.ledger.fail_writes(None).await;
        let second = f.rewards.claim(&f.user.id, None).await.unwrap();
        assert!(!second.reconciled);
        assert_eq!(f.ledger.transferred_total().await, 25);
        assert_eq!(f.pending().await, 0);
    }

    #[tokio::test]
    async fn test_unmined_transfer_blocks_claim() {
        let f = fixture(gnosis().without_auto_confirm()).await;
        f.verified(25).await;

        f.ledger
            .fail_writes(Some(WriteFailure::Ambiguous { landed: true }))
            .await;
        let first = f.rewards.claim(&f.user.id, None).await;
        let Err(RewardError::ReconciliationRequired { tx_hash, .. }) = first else {
            panic!("expected a reconciliation error");
        };

        f.ledger.fail_writes(None).await;
        let blocked = f.rewards.claim(&f.user.id, None).await;
        assert!(matches!(blocked, Err(RewardError::ReconciliationPending(ref h)) if *h == tx_hash));

        f.ledger.confirm(&tx_hash, ReceiptStatus::Success).await;
        let settled = f.rewards.claim(&f.user.id, None).await.unwrap();
        assert!(settled.reconciled);
        assert_eq!(settled.tx_hash, tx_hash);
        assert_eq!(f.ledger.transferred_total().await, 25);
    }

    #[tokio::test]
    async fn test_badge_threshold_and_uniqueness() {
        let f = fixture(gnosis()).await;

        f.set_level(2).await;
        let low = f.rewards.claim_badge(&f.user.id, None).await;
        assert!(matches!(
            low,
            Err(RewardError::LevelTooLow {
                level: 2,
                required: 3
            })
        ));

        f.set_level(3).await;
        let minted = f.rewards.claim_badge(&f.user.id, None).await.unwrap();
        assert_eq!(minted.level, 3);
        assert_eq!(minted.metadata_uri, "ipfs://badge/level_3_badge");
        assert!(!minted.reconciled);

        let again = f.rewards.claim_badge(&f.user.id, None).await;
        assert!(matches!(again, Err(RewardError::AlreadyClaimed { level: 3 })));
        assert_eq!(f.mints().await, 1);
    }

    #[tokio::test]
    async fn test_unrecorded_badge_is_not_minted_twice() {
        let f = fixture(gnosis()).await;
        f.set_level(3).await;

        f.store.fail_insert_badge(1);
        let first = f.rewards.claim_badge(&f.user.id, None).await;
        assert!(matches!(first, Err(RewardError::ReconciliationRequired { .. })));

        let second = f.rewards.claim_badge(&f.user.id, None).await.unwrap();
        assert!(second.reconciled);
        assert_eq!(second.level, 3);

        let third = f.rewards.claim_badge(&f.user.id, None).await;
        assert!(matches!(third, Err(RewardError::AlreadyClaimed { level: 3 })));
        assert_eq!(f.mints().await, 1);
        assert_eq!(f.store.badges_for_user(&f.user.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ambiguous_mint_that_landed_is_recorded() {
        let f = fixture(gnosis()).await;
        f.set_level(4).await;
        f.ledger
            .fail_writes(Some(WriteFailure::Ambiguous { landed: true }))
            .await;

        let first = f.rewards.claim_badge(&f.user.id, None).await;
        let Err(RewardError::ReconciliationRequired { tx_hash, .. }) = first else {
            panic!("expected a reconciliation error");
        };

        f.ledger.fail_writes(None).await;
        let second = f.rewards.claim_badge(&f.user.id, None).await.unwrap();
        assert!(second.reconciled);
        assert_eq!(second.tx_hash, tx_hash);
        assert_eq!(f.mints().await, 1);

        let badges = f.store.badges_for_user(&f.user.id).await.unwrap();
        assert_eq!(badges.len(), 1);
        assert_eq!(badges[0].level, 4);
    }

    #[tokio::test]
    async fn test_ambiguous_mint_that_never_landed_is_retried() {
        let f = fixture(gnosis()).await;
        f.set_level(3).await;
        f.ledger
            .fail_writes(Some(WriteFailure::Ambiguous { landed: false }))
            .await;

        let first = f.rewards.claim_badge(&f.user.id, None).await;
        assert!(matches!(first, Err(RewardError::ReconciliationRequired { .. })));

        f.ledger.fail_writes(None).await;
        let second = f.rewards.claim_badge(&f.user.id, None).await.unwrap();
        assert!(!second.reconciled);
        assert_eq!(f.mints().await, 1);
        assert_eq!(f.pending().await, 0);
    }

    #[tokio::test]
    async fn test_pending_mint_blocks_until_mined() {
        let f = fixture(gnosis().without_auto_confirm()).await;
        f.set_level(3).await;
        f.ledger
            .fail_writes(Some(WriteFailure::Ambiguous { landed: true }))
            .await;

        let first = f.rewards.claim_badge(&f.user.id, None).await;
        let Err(RewardError::ReconciliationRequired { tx_hash, .. }) = first else {
            panic!("expected a reconciliation error");
        };

        f.ledger.fail_writes(None).await;
        let blocked = f.rewards.claim_badge(&f.user.id, None).await;
        assert!(matches!(blocked, Err(RewardError::ReconciliationPending(ref h)) if *h == tx_hash));

        // reverted on chain: the level is free again
        f.ledger.confirm(&tx_hash, ReceiptStatus::Reverted).await;
        let retried = f.rewards.claim_badge(&f.user.id, None).await.unwrap();
        assert!(!retried.reconciled);
        assert_ne!(retried.tx_hash, tx_hash);
        assert_eq!(f.mints().await, 2);
        assert_eq!(f.pending().await, 0);
    }
}
