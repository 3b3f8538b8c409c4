//! Persistence collaborator.
//!
//! The engine enforces its invariants through a few primitives that any
//! backend must implement atomically: compare-and-set status transitions,
//! resolution together with its XP credit, and an all-or-nothing claim
//! marker. Reward transactions that could not be recorded are journaled
//! here too, so they survive a restart.

use async_trait::async_trait;
use chain_ledger::{ChainId, TxHash};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{ProgressionError, StoreError};
use crate::progression::{apply_xp, LevelChange};
use crate::types::{
    Assignment, AssignmentStatus, BadgeRecord, LearningPath, PathStatus, PendingClaim, Task,
    TaskType, User, VerificationPayload,
};

pub type Result<T> = std::result::Result<T, StoreError>;

/// Fields written together with a status change.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: AssignmentStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub evidence: Option<serde_json::Value>,
}

impl StatusUpdate {
    pub fn started(at: DateTime<Utc>) -> Self {
        Self {
            status: AssignmentStatus::Active,
            started_at: Some(at),
            completed_at: None,
            evidence: None,
        }
    }

    pub fn resolved(passed: bool, evidence: serde_json::Value, at: DateTime<Utc>) -> Self {
        Self {
            status: if passed {
                AssignmentStatus::Verified
            } else {
                AssignmentStatus::Failed
            },
            started_at: None,
            completed_at: Some(at),
            evidence: Some(evidence),
        }
    }
}

/// Written state after `Store::resolve_assignment`.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub assignment: Assignment,
    pub user: User,
    /// Present when XP was credited
    pub xp: Option<LevelChange>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_user(&self, user: User) -> Result<()>;
    async fn get_user(&self, id: &str) -> Result<User>;
    async fn find_user_by_handle(&self, handle: &str) -> Result<Option<User>>;
    /// Overwrite XP, level, wallets and interests.
    async fn update_user(&self, user: &User) -> Result<()>;

    async fn insert_task(&self, task: Task) -> Result<()>;
    async fn get_task(&self, id: &str) -> Result<Task>;
    /// Replace the verification payload, the only mutable part of a task.
    async fn update_task_payload(&self, id: &str, payload: VerificationPayload) -> Result<()>;
    async fn tasks_by_type(&self, task_type: TaskType) -> Result<Vec<Task>>;

    async fn insert_assignment(&self, assignment: Assignment) -> Result<()>;
    async fn get_assignment(&self, id: &str) -> Result<Assignment>;
    async fn assignments_for_user(&self, user_id: &str) -> Result<Vec<Assignment>>;

    /// Apply `update` only if the current status is one of `from`.
    ///
    /// Fails with `StoreError::Conflict` carrying the current status
    /// otherwise.
    async fn transition_assignment(
        &self,
        id: &str,
        from: &[AssignmentStatus],
        update: StatusUpdate,
    ) -> Result<Assignment>;

    /// Resolve an assignment and credit its XP in one step.
    ///
    /// Same compare-and-set rule as `transition_assignment`. When `update`
    /// moves to `Verified`, `xp_reward` is added to the owner. Either both
    /// writes happen or neither does.
    async fn resolve_assignment(
        &self,
        id: &str,
        from: &[AssignmentStatus],
        update: StatusUpdate,
        xp_reward: u64,
    ) -> Result<Resolution>;

    /// Mark every assignment claimed with one transaction, or none of them.
    async fn mark_claimed(&self, ids: &[String], chain: &ChainId, tx_hash: &TxHash) -> Result<()>;

    async fn insert_path(&self, path: LearningPath) -> Result<()>;
    async fn get_path(&self, id: &str) -> Result<LearningPath>;
    async fn set_path_status(&self, id: &str, status: PathStatus) -> Result<()>;
    async fn paths_for_user(&self, user_id: &str) -> Result<Vec<LearningPath>>;

    /// Fails with `StoreError::Duplicate` if the user already has a badge
    /// for that level.
    async fn insert_badge(&self, badge: BadgeRecord) -> Result<()>;
    async fn badges_for_user(&self, user_id: &str) -> Result<Vec<BadgeRecord>>;

    /// Journal a reward transaction whose outcome is not recorded yet.
    async fn record_pending(&self, claim: PendingClaim) -> Result<()>;
    /// Journal entries for one user, oldest first.
    async fn pending_for_user(&self, user_id: &str) -> Result<Vec<PendingClaim>>;
    async fn clear_pending(&self, tx_hash: &TxHash) -> Result<()>;
    async fn pending_count(&self) -> Result<usize>;
}

#[derive(Default)]
struct State {
    users: HashMap<String, User>,
    tasks: HashMap<String, Task>,
    assignments: HashMap<String, Assignment>,
    paths: HashMap<String, LearningPath>,
    badges: Vec<BadgeRecord>,
    pending: HashMap<TxHash, PendingClaim>,
}

fn not_found(kind: &'static str, id: &str) -> StoreError {
    StoreError::NotFound {
        kind,
        id: id.to_string(),
    }
}

fn apply_update(assignment: &mut Assignment, update: StatusUpdate) {
    assignment.status = update.status;
    if update.started_at.is_some() {
        assignment.started_at = update.started_at;
    }
    if update.completed_at.is_some() {
        assignment.completed_at = update.completed_at;
    }
    if update.evidence.is_some() {
        assignment.evidence = update.evidence;
    }
}

/// In-memory store.
///
/// One lock over all tables; every operation is atomic.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_user(&self, user: User) -> Result<()> {
        let mut state = self.state.write().await;
        if state.users.values().any(|u| u.handle == user.handle) {
            return Err(StoreError::Duplicate {
                kind: "user",
                id: user.handle,
            });
        }
        state.users.insert(user.id.clone(), user);
        Ok(())
    }

    async fn get_user(&self, id: &str) -> Result<User> {
        self.state
            .read()
            .await
            .users
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("user", id))
    }

    async fn find_user_by_handle(&self, handle: &str) -> Result<Option<User>> {
        Ok(self
            .state
            .read()
            .await
            .users
            .values()
            .find(|u| u.handle == handle)
            .cloned())
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        let mut state = self.state.write().await;
        let stored = state
            .users
            .get_mut(&user.id)
            .ok_or_else(|| not_found("user", &user.id))?;
        *stored = user.clone();
        Ok(())
    }

    async fn insert_task(&self, task: Task) -> Result<()> {
        self.state.write().await.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Task> {
        self.state
            .read()
            .await
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("task", id))
    }

    async fn update_task_payload(&self, id: &str, payload: VerificationPayload) -> Result<()> {
        let mut state = self.state.write().await;
        let task = state.tasks.get_mut(id).ok_or_else(|| not_found("task", id))?;
        task.payload = payload;
        Ok(())
    }

    async fn tasks_by_type(&self, task_type: TaskType) -> Result<Vec<Task>> {
        Ok(self
            .state
            .read()
            .await
            .tasks
            .values()
            .filter(|t| t.task_type == task_type)
            .cloned()
            .collect())
    }

    async fn insert_assignment(&self, assignment: Assignment) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&assignment.user_id) {
            return Err(not_found("user", &assignment.user_id));
        }
        if !state.tasks.contains_key(&assignment.task_id) {
            return Err(not_found("task", &assignment.task_id));
        }
        state.assignments.insert(assignment.id.clone(), assignment);
        Ok(())
    }

    async fn get_assignment(&self, id: &str) -> Result<Assignment> {
        self.state
            .read()
            .await
            .assignments
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("assignment", id))
    }

    async fn assignments_for_user(&self, user_id: &str) -> Result<Vec<Assignment>> {
        let state = self.state.read().await;
        let mut assignments: Vec<Assignment> = state
            .assignments
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        assignments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.position.cmp(&b.position)));
        Ok(assignments)
    }

    async fn transition_assignment(
        &self,
        id: &str,
        from: &[AssignmentStatus],
        update: StatusUpdate,
    ) -> Result<Assignment> {
        let mut state = self.state.write().await;
        let assignment = state
            .assignments
            .get_mut(id)
            .ok_or_else(|| not_found("assignment", id))?;

        if !from.contains(&assignment.status) {
            return Err(StoreError::Conflict {
                id: id.to_string(),
                current: assignment.status,
            });
        }

        apply_update(assignment, update);
        Ok(assignment.clone())
    }

    async fn resolve_assignment(
        &self,
        id: &str,
        from: &[AssignmentStatus],
        update: StatusUpdate,
        xp_reward: u64,
    ) -> Result<Resolution> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let (status, user_id) = state
            .assignments
            .get(id)
            .map(|a| (a.status, a.user_id.clone()))
            .ok_or_else(|| not_found("assignment", id))?;
        if !from.contains(&status) {
            return Err(StoreError::Conflict {
                id: id.to_string(),
                current: status,
            });
        }

        // compute everything before writing anything
        let mut user = state
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| not_found("user", &user_id))?;
        let xp = if update.status == AssignmentStatus::Verified {
            let delta = i64::try_from(xp_reward).map_err(|_| ProgressionError::XpOverflow {
                xp: user.xp,
                delta: xp_reward,
            })?;
            Some(apply_xp(&mut user, delta)?)
        } else {
            None
        };

        let assignment = state
            .assignments
            .get_mut(id)
            .ok_or_else(|| not_found("assignment", id))?;
        apply_update(assignment, update);
        let assignment = assignment.clone();
        state.users.insert(user.id.clone(), user.clone());

        Ok(Resolution {
            assignment,
            user,
            xp,
        })
    }

    async fn mark_claimed(&self, ids: &[String], chain: &ChainId, tx_hash: &TxHash) -> Result<()> {
        let mut state = self.state.write().await;

        let mut already = Vec::new();
        for id in ids {
            match state.assignments.get(id) {
                Some(a) if a.reward_claimed => already.push(id.clone()),
                Some(_) => {}
                None => return Err(not_found("assignment", id)),
            }
        }
        if !already.is_empty() {
            return Err(StoreError::AlreadyMarked(already));
        }

        for id in ids {
            if let Some(a) = state.assignments.get_mut(id) {
                a.reward_claimed = true;
                a.reward_chain = Some(chain.clone());
                a.reward_tx_hash = Some(tx_hash.clone());
            }
        }
        Ok(())
    }

    async fn insert_path(&self, path: LearningPath) -> Result<()> {
        self.state.write().await.paths.insert(path.id.clone(), path);
        Ok(())
    }

    async fn get_path(&self, id: &str) -> Result<LearningPath> {
        self.state
            .read()
            .await
            .paths
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("learning path", id))
    }

    async fn set_path_status(&self, id: &str, status: PathStatus) -> Result<()> {
        let mut state = self.state.write().await;
        let path = state
            .paths
            .get_mut(id)
            .ok_or_else(|| not_found("learning path", id))?;
        path.status = status;
        Ok(())
    }

    async fn paths_for_user(&self, user_id: &str) -> Result<Vec<LearningPath>> {
        let state = self.state.read().await;
        let mut paths: Vec<LearningPath> = state
            .paths
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        paths.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paths)
    }

    async fn insert_badge(&self, badge: BadgeRecord) -> Result<()> {
        let mut state = self.state.write().await;
        if state
            .badges
            .iter()
            .any(|b| b.user_id == badge.user_id && b.level == badge.level)
        {
            return Err(StoreError::Duplicate {
                kind: "badge",
                id: format!("{}/level_{}", badge.user_id, badge.level),
            });
        }
        state.badges.push(badge);
        Ok(())
    }

    async fn badges_for_user(&self, user_id: &str) -> Result<Vec<BadgeRecord>> {
        Ok(self
            .state
            .read()
            .await
            .badges
            .iter()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn record_pending(&self, claim: PendingClaim) -> Result<()> {
        self.state
            .write()
            .await
            .pending
            .insert(claim.tx_hash.clone(), claim);
        Ok(())
    }

    async fn pending_for_user(&self, user_id: &str) -> Result<Vec<PendingClaim>> {
        let state = self.state.read().await;
        let mut pending: Vec<PendingClaim> = state
            .pending
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
        Ok(pending)
    }

    async fn clear_pending(&self, tx_hash: &TxHash) -> Result<()> {
        self.state.write().await.pending.remove(tx_hash);
        Ok(())
    }

    async fn pending_count(&self) -> Result<usize> {
        Ok(self.state.read().await.pending.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VerificationType;

    async fn seeded() -> (InMemoryStore, User, Task) {
        let store = InMemoryStore::new();
        let user = User::new("alice", vec!["defi".into()]);
        let task = Task::new("Swap", TaskType::Practice, VerificationType::Transaction, 20);
        store.insert_user(user.clone()).await.unwrap();
        store.insert_task(task.clone()).await.unwrap();
        (store, user, task)
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let (store, user, task) = seeded().await;
        let assignment = Assignment::new(&user.id, &task.id);
        let id = assignment.id.clone();
        store.insert_assignment(assignment).await.unwrap();

        let verified = StatusUpdate::resolved(true, serde_json::json!({}), Utc::now());
        let from = [AssignmentStatus::Pending, AssignmentStatus::Active];
        store
            .transition_assignment(&id, &from, verified.clone())
            .await
            .unwrap();

        let second = store.transition_assignment(&id, &from, verified).await;
        assert!(matches!(
            second,
            Err(StoreError::Conflict {
                current: AssignmentStatus::Verified,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_mark_claimed_is_all_or_nothing() {
        let (store, user, task) = seeded().await;
        let a = Assignment::new(&user.id, &task.id);
        let b = Assignment::new(&user.id, &task.id);
        let ids = vec![a.id.clone(), b.id.clone()];
        store.insert_assignment(a).await.unwrap();
        store.insert_assignment(b).await.unwrap();

        let chain = ChainId::new("gnosis");
        let tx = TxHash::new("0x01");
        store.mark_claimed(&ids[..1], &chain, &tx).await.unwrap();

        let result = store.mark_claimed(&ids, &chain, &TxHash::new("0x02")).await;
        assert!(matches!(result, Err(StoreError::AlreadyMarked(ref ids)) if ids.len() == 1));

        let untouched = store.get_assignment(&ids[1]).await.unwrap();
        assert!(!untouched.reward_claimed);
    }

    #[tokio::test]
    async fn test_badge_unique_per_level() {
        let (store, user, _) = seeded().await;
        let badge = BadgeRecord {
            user_id: user.id.clone(),
            level: 3,
            chain: ChainId::new("gnosis"),
            tx_hash: TxHash::new("0x03"),
            metadata_uri: "ipfs://badge/level_3_badge".into(),
            minted_at: Utc::now(),
        };
        store.insert_badge(badge.clone()).await.unwrap();
        assert!(matches!(
            store.insert_badge(badge).await,
            Err(StoreError::Duplicate { kind: "badge", .. })
        ));
    }

    #[tokio::test]
    async fn test_resolution_credits_xp_once() {
        let (store, user, task) = seeded().await;
        let assignment = Assignment::new(&user.id, &task.id);
        let id = assignment.id.clone();
        store.insert_assignment(assignment).await.unwrap();

        let from = [AssignmentStatus::Pending, AssignmentStatus::Active];
        let verified = StatusUpdate::resolved(true, serde_json::json!({}), Utc::now());
        let resolution = store
            .resolve_assignment(&id, &from, verified.clone(), 120)
            .await
            .unwrap();
        assert_eq!(resolution.assignment.status, AssignmentStatus::Verified);
        assert_eq!(resolution.user.xp, 120);
        assert!(resolution.xp.unwrap().leveled_up);

        let again = store.resolve_assignment(&id, &from, verified, 120).await;
        assert!(matches!(again, Err(StoreError::Conflict { .. })));
        assert_eq!(store.get_user(&user.id).await.unwrap().xp, 120);
    }

    #[tokio::test]
    async fn test_rejected_xp_leaves_assignment_open() {
        let (store, mut user, task) = seeded().await;
        user.xp = u64::MAX - 5;
        store.update_user(&user).await.unwrap();
        let assignment = Assignment::new(&user.id, &task.id);
        let id = assignment.id.clone();
        store.insert_assignment(assignment).await.unwrap();

        let verified = StatusUpdate::resolved(true, serde_json::json!({}), Utc::now());
        let result = store
            .resolve_assignment(&id, &[AssignmentStatus::Pending], verified, 10)
            .await;
        assert!(matches!(
            result,
            Err(StoreError::Progression(ProgressionError::XpOverflow { .. }))
        ));
        let untouched = store.get_assignment(&id).await.unwrap();
        assert_eq!(untouched.status, AssignmentStatus::Pending);
        assert_eq!(store.get_user(&user.id).await.unwrap().xp, u64::MAX - 5);
    }

    #[tokio::test]
    async fn test_failed_resolution_credits_nothing() {
        let (store, user, task) = seeded().await;
        let assignment = Assignment::new(&user.id, &task.id);
        let id = assignment.id.clone();
        store.insert_assignment(assignment).await.unwrap();

        let failed = StatusUpdate::resolved(false, serde_json::json!({}), Utc::now());
        let resolution = store
            .resolve_assignment(&id, &[AssignmentStatus::Pending], failed, 50)
            .await
            .unwrap();
        assert_eq!(resolution.assignment.status, AssignmentStatus::Failed);
        assert!(resolution.xp.is_none());
        assert_eq!(resolution.user.xp, 0);
    }

    #[tokio::test]
    async fn test_pending_journal() {
        let (store, user, _) = seeded().await;
        let claim = PendingClaim {
            user_id: user.id.clone(),
            chain: ChainId::new("gnosis"),
            tx_hash: TxHash::new("0x0a"),
            reward: crate::types::PendingReward::Tokens {
                assignment_ids: vec!["a1".into()],
                amount: 25,
            },
            reason: "timeout".into(),
            recorded_at: Utc::now(),
        };
        store.record_pending(claim).await.unwrap();
        assert_eq!(store.pending_count().await.unwrap(), 1);
        assert_eq!(store.pending_for_user(&user.id).await.unwrap().len(), 1);
        assert!(store.pending_for_user("someone-else").await.unwrap().is_empty());

        store.clear_pending(&TxHash::new("0x0A")).await.unwrap();
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_assignment_requires_known_task() {
        let (store, user, _) = seeded().await;
        let result = store
            .insert_assignment(Assignment::new(&user.id, "missing"))
            .await;
        assert!(matches!(result, Err(StoreError::NotFound { kind: "task", .. })));
    }
}
