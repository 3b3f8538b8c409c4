//! Task and assignment orchestration.
//!
//! `QuestEngine` is the facade the outer surfaces (chat bot, HTTP) call.
//! It owns the lifecycle generate → assign → start → verify and hands token
//! and badge requests to the reward dispatcher.

use chain_ledger::{parse_address, ChainId, ChainRegistry};
use chrono::Utc;
use learn_agent::{
    AgentService, ContentService, JudgmentService, LlmBackend, LlmContentService, LlmJudge,
    OpenAiBackend, PathEntry, QuizQuestion, TaskSpec,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result, StoreError, VerificationError};
use crate::notify::{self, Notification, Notifier};
use crate::rewards::{RewardDispatcher, UserLocks};
use crate::store::{StatusUpdate, Store};
use crate::types::{
    Assignment, AssignmentStatus, ClaimResult, LearningPath, MintResult, PathProgress,
    PathStatus, PendingClaim, Proof, Task, TaskType, TransactionRequirements, User,
    VerificationPayload, VerificationType, VerifyResult,
};
use crate::verification::{Verifier, VerifierRegistry};

/// Result of onboarding a user.
#[derive(Debug, Clone, Serialize)]
pub struct OnboardResult {
    pub user_id: String,
    /// False when the handle was already known
    pub created: bool,
    pub path_id: String,
    pub first_assignment_id: Option<String>,
    pub level: u32,
}

/// The next thing a user should work on.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentTask {
    pub assignment: Assignment,
    pub task: Task,
}

/// Lesson content for a learning task.
#[derive(Debug, Clone, Serialize)]
pub struct Lesson {
    pub task_id: String,
    pub content: String,
    pub questions: Vec<QuizQuestion>,
}

/// A quest created by a sponsoring project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectQuest {
    pub project: String,
    pub title: String,
    pub description: String,
    pub verification_type: Option<VerificationType>,
    pub xp_reward: Option<u64>,
    pub token_reward: Option<u64>,
    pub min_level: Option<u32>,
    pub badge_eligible: bool,
    pub requirements: TransactionRequirements,
    pub chains: BTreeSet<ChainId>,
}

const PATH_TASK_TYPES: [TaskType; 3] = [TaskType::Learning, TaskType::Practice, TaskType::Quest];

pub struct QuestEngine {
    config: EngineConfig,
    store: Arc<dyn Store>,
    chains: Arc<ChainRegistry>,
    content: Arc<dyn ContentService>,
    verifiers: VerifierRegistry,
    rewards: RewardDispatcher,
    notifier: Arc<dyn Notifier>,
    locks: Arc<UserLocks>,
}

impl QuestEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn Store>,
        chains: Arc<ChainRegistry>,
        content: Arc<dyn ContentService>,
        judge: Arc<dyn JudgmentService>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let locks = Arc::new(UserLocks::new());
        let verifiers = VerifierRegistry::standard(chains.clone(), judge, &config.verification);
        let rewards = RewardDispatcher::new(
            store.clone(),
            chains.clone(),
            locks.clone(),
            config.rewards.clone(),
        );
        Self {
            config,
            store,
            chains,
            content,
            verifiers,
            rewards,
            notifier,
            locks,
        }
    }

    /// Build an engine from configuration: connect every configured chain
    /// and the OpenAI-compatible model backend.
    pub async fn connect(
        config: EngineConfig,
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let chains = ChainRegistry::connect(
            &config.chains.networks,
            &config.chains.default_chain,
            &config.chains.rpc,
        )
        .await?;

        let backend: Arc<dyn LlmBackend> = Arc::new(OpenAiBackend::from_config(&config.agent.backend)?);
        let agent = Arc::new(AgentService::new(vec![backend]).with_config(config.agent.service.clone()));
        let content = Arc::new(LlmContentService::new(agent.clone()));
        let judge = Arc::new(LlmJudge::new(agent));

        info!(
            chains = ?chains.chains(),
            default_chain = %config.chains.default_chain,
            model = %config.agent.backend.model,
            "Quest engine ready"
        );
        Ok(Self::new(config, store, Arc::new(chains), content, judge, notifier))
    }

    /// Replace or add a verification strategy.
    pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifiers.register(verifier);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    // ---- users ----

    /// Get or create the user behind `handle` and start a learning path on
    /// `interest`.
    pub async fn onboard_user(
        &self,
        handle: &str,
        interest: &str,
        wallets: BTreeMap<ChainId, String>,
    ) -> Result<OnboardResult> {
        let handle = handle.trim();
        let interest = interest.trim();
        if handle.is_empty() {
            return Err(EngineError::InvalidInput("handle is empty".into()));
        }
        if interest.is_empty() {
            return Err(EngineError::InvalidInput("interest is empty".into()));
        }
        for (chain, address) in &wallets {
            self.check_wallet(chain, address)?;
        }

        let (user, created) = match self.store.find_user_by_handle(handle).await? {
            Some(existing) => {
                let _guard = self.locks.lock(&existing.id).await;
                let mut user = self.store.get_user(&existing.id).await?;
                user.wallets.extend(wallets);
                if !user.interests.iter().any(|i| i.eq_ignore_ascii_case(interest)) {
                    user.interests.push(interest.to_string());
                }
                user.updated_at = Utc::now();
                self.store.update_user(&user).await?;
                (user, false)
            }
            None => {
                let mut user = User::new(handle, vec![interest.to_string()]);
                user.wallets = wallets;
                self.store.insert_user(user.clone()).await?;
                info!(user_id = %user.id, handle, "User created");
                (user, true)
            }
        };

        let path = self.create_learning_path(&user.id, interest).await?;
        Ok(OnboardResult {
            user_id: user.id,
            created,
            first_assignment_id: path.assignment_ids.first().cloned(),
            path_id: path.id,
            level: user.level,
        })
    }

    /// Set the user's wallet address on one chain.
    pub async fn set_wallet(&self, user_id: &str, chain: &ChainId, address: &str) -> Result<User> {
        self.check_wallet(chain, address)?;

        let _guard = self.locks.lock(user_id).await;
        let mut user = self.store.get_user(user_id).await?;
        user.wallets.insert(chain.clone(), address.trim().to_string());
        user.updated_at = Utc::now();
        self.store.update_user(&user).await?;
        info!(user_id, %chain, "Wallet updated");
        Ok(user)
    }

    fn check_wallet(&self, chain: &ChainId, address: &str) -> Result<()> {
        self.chains.get(chain)?;
        parse_address(address)?;
        Ok(())
    }

    // ---- tasks and paths ----

    /// Generate one task of each kind (learning, practice, quest) on `topic`
    /// and assign them to the user in that order.
    pub async fn create_learning_path(&self, user_id: &str, topic: &str) -> Result<LearningPath> {
        let user = self.store.get_user(user_id).await?;

        // generate everything before writing anything
        let mut tasks = Vec::with_capacity(PATH_TASK_TYPES.len());
        for task_type in PATH_TASK_TYPES {
            tasks.push(self.build_task(&user, Some(topic), task_type).await?);
        }
        let entries: Vec<PathEntry> = tasks
            .iter()
            .map(|t| PathEntry {
                task_type: t.task_type.to_string(),
                title: t.title.clone(),
            })
            .collect();
        let description = self
            .content
            .describe_path(topic, user.level, &entries)
            .await?;

        let path_id = uuid::Uuid::new_v4().to_string();
        let mut assignments = Vec::with_capacity(tasks.len());
        for (position, task) in tasks.iter().enumerate() {
            self.store.insert_task(task.clone()).await?;
            let assignment = Assignment::new(&user.id, &task.id).in_path(&path_id, position as u32);
            self.store.insert_assignment(assignment.clone()).await?;
            assignments.push(assignment);
        }

        let path = LearningPath {
            id: path_id,
            user_id: user.id.clone(),
            topic: topic.to_string(),
            description,
            status: PathStatus::Active,
            assignment_ids: assignments.iter().map(|a| a.id.clone()).collect(),
            created_at: Utc::now(),
        };
        self.store.insert_path(path.clone()).await?;

        for (assignment, task) in assignments.iter().zip(&tasks) {
            if task.task_type == TaskType::Quest {
                self.notify(&user.id, Notification::NewTask {
                    assignment_id: assignment.id.clone(),
                    title: task.title.clone(),
                })
                .await;
            }
        }

        info!(user_id = %user.id, path_id = %path.id, topic, "Learning path created");
        Ok(path)
    }

    /// Generate and store a task at the user's level.
    ///
    /// The topic defaults to the user's primary interest.
    pub async fn generate_task(
        &self,
        user_id: &str,
        topic: Option<&str>,
        task_type: TaskType,
    ) -> Result<Task> {
        let user = self.store.get_user(user_id).await?;
        let task = self.build_task(&user, topic, task_type).await?;
        self.store.insert_task(task.clone()).await?;
        info!(task_id = %task.id, %task_type, verification_type = %task.verification_type, "Task generated");
        Ok(task)
    }

    async fn build_task(&self, user: &User, topic: Option<&str>, task_type: TaskType) -> Result<Task> {
        let topic = topic
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .or_else(|| user.primary_interest())
            .ok_or_else(|| EngineError::InvalidInput("no topic and no declared interest".into()))?;

        let spec = TaskSpec {
            topic: topic.to_string(),
            level: user.level,
            task_type: task_type.as_str().to_string(),
        };
        let generated = self.content.generate_task(&spec).await?;

        let verification_type: VerificationType = generated.verification_type.parse()?;
        if !self.verifiers.supports(verification_type) {
            return Err(VerificationError::UnsupportedVerificationType(
                verification_type.to_string(),
            )
            .into());
        }

        let mut task = Task::new(
            generated.title,
            task_type,
            verification_type,
            u64::from(generated.xp_reward),
        )
        .with_description(generated.description);
        if let Some(tokens) = generated.token_reward {
            task = task.with_token_reward(u64::from(tokens));
        }
        task.min_level = user.level;
        task.project = generated.project;

        if verification_type == VerificationType::Quiz {
            let quiz = self
                .content
                .generate_quiz(&task.title, &task.description)
                .await?;
            task.payload.answers = quiz.answer_key();
            task.payload.questions = quiz.questions;
        }
        Ok(task)
    }

    /// Lesson for a learning task. Generates the task's quiz when it has none.
    pub async fn lesson(&self, task_id: &str) -> Result<Lesson> {
        let task = self.store.get_task(task_id).await?;
        if task.task_type != TaskType::Learning {
            return Err(EngineError::NotALearningTask(task.id));
        }

        let content = self.content.generate_lesson(&task.title).await?;

        let questions = if task.payload.questions.is_empty() {
            let quiz = self
                .content
                .generate_quiz(&task.title, &task.description)
                .await?;
            let payload = VerificationPayload {
                answers: quiz.answer_key(),
                questions: quiz.questions.clone(),
                requirements: task.payload.requirements.clone(),
            };
            self.store.update_task_payload(&task.id, payload).await?;
            debug!(task_id = %task.id, "Lesson quiz stored");
            quiz.questions
        } else {
            task.payload.questions
        };

        Ok(Lesson {
            task_id: task.id,
            content,
            questions,
        })
    }

    /// Register a sponsor quest.
    pub async fn create_project_quest(&self, quest: ProjectQuest) -> Result<Task> {
        if quest.title.trim().is_empty() {
            return Err(EngineError::InvalidInput("quest title is empty".into()));
        }
        for chain in &quest.chains {
            self.chains.get(chain)?;
        }

        let defaults = &self.config.tasks;
        let verification_type = quest
            .verification_type
            .unwrap_or(VerificationType::SocialProof);
        let mut task = Task::new(
            quest.title.trim(),
            TaskType::Quest,
            verification_type,
            quest.xp_reward.unwrap_or(defaults.quest_default_xp),
        )
        .with_description(quest.description)
        .with_token_reward(quest.token_reward.unwrap_or(defaults.quest_default_tokens))
        .with_payload(VerificationPayload {
            requirements: quest.requirements,
            ..Default::default()
        })
        .with_chains(quest.chains);
        task.min_level = quest.min_level.unwrap_or(defaults.quest_default_min_level);
        task.badge_eligible = quest.badge_eligible;
        task.project = Some(quest.project).filter(|p| !p.trim().is_empty());

        self.store.insert_task(task.clone()).await?;
        info!(task_id = %task.id, project = ?task.project, "Project quest created");
        Ok(task)
    }

    /// Quests the user is eligible for, newest first.
    pub async fn find_relevant_quests(&self, user_id: &str, count: Option<usize>) -> Result<Vec<Task>> {
        let user = self.store.get_user(user_id).await?;
        let mut quests: Vec<Task> = self
            .store
            .tasks_by_type(TaskType::Quest)
            .await?
            .into_iter()
            .filter(|t| t.min_level <= user.level)
            .collect();
        quests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        quests.truncate(count.unwrap_or(self.config.tasks.relevant_quest_count));
        Ok(quests)
    }

    // ---- assignments ----

    /// Assign an existing task to a user.
    pub async fn assign(&self, user_id: &str, task_id: &str) -> Result<Assignment> {
        let user = self.store.get_user(user_id).await?;
        let task = self.store.get_task(task_id).await?;
        self.assign_task(&user, &task).await
    }

    /// Assign a quest, enforcing its minimum level.
    pub async fn assign_quest(&self, user_id: &str, task_id: &str) -> Result<Assignment> {
        let user = self.store.get_user(user_id).await?;
        let task = self.store.get_task(task_id).await?;
        if task.task_type != TaskType::Quest {
            return Err(EngineError::InvalidInput(format!("task {} is not a quest", task.id)));
        }
        if user.level < task.min_level {
            return Err(EngineError::LevelTooLow {
                level: user.level,
                required: task.min_level,
            });
        }
        self.assign_task(&user, &task).await
    }

    async fn assign_task(&self, user: &User, task: &Task) -> Result<Assignment> {
        let assignment = Assignment::new(&user.id, &task.id);
        self.store.insert_assignment(assignment.clone()).await?;
        info!(user_id = %user.id, task_id = %task.id, assignment_id = %assignment.id, "Task assigned");

        self.notify(&user.id, Notification::NewTask {
            assignment_id: assignment.id.clone(),
            title: task.title.clone(),
        })
        .await;
        Ok(assignment)
    }

    /// Move a pending assignment to active.
    pub async fn start(&self, assignment_id: &str) -> Result<Assignment> {
        match self
            .store
            .transition_assignment(
                assignment_id,
                &[AssignmentStatus::Pending],
                StatusUpdate::started(Utc::now()),
            )
            .await
        {
            Ok(assignment) => {
                debug!(assignment_id, "Assignment started");
                Ok(assignment)
            }
            Err(StoreError::Conflict { id, current }) => Err(EngineError::InvalidStateTransition {
                id,
                from: current,
                to: AssignmentStatus::Active,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Check a proof and resolve the assignment.
    ///
    /// The status change and the XP credit are one store write, so XP is
    /// applied once, by whichever call wins the transition.
    pub async fn verify(&self, assignment_id: &str, proof: Proof) -> Result<VerifyResult> {
        let assignment = self.store.get_assignment(assignment_id).await?;
        if assignment.status.is_resolved() {
            return Err(EngineError::AlreadyResolved {
                id: assignment.id,
                status: assignment.status,
            });
        }
        let task = self.store.get_task(&assignment.task_id).await?;

        let outcome = self.verifiers.verify(&task, &proof).await?;

        let update = StatusUpdate::resolved(outcome.passed, outcome.evidence.clone(), Utc::now());
        let target = update.status;
        let resolution = {
            let _guard = self.locks.lock(&assignment.user_id).await;
            self.store
                .resolve_assignment(
                    assignment_id,
                    &[AssignmentStatus::Pending, AssignmentStatus::Active],
                    update,
                    task.xp_reward,
                )
                .await
        };
        let resolution = match resolution {
            Ok(resolution) => resolution,
            Err(StoreError::Conflict { id, current }) if current.is_resolved() => {
                return Err(EngineError::AlreadyResolved {
                    id,
                    status: current,
                })
            }
            Err(StoreError::Conflict { id, current }) => {
                return Err(EngineError::InvalidStateTransition {
                    id,
                    from: current,
                    to: target,
                })
            }
            Err(StoreError::Progression(e)) => return Err(e.into()),
            Err(e) => return Err(e.into()),
        };

        let resolved = resolution.assignment;
        let user = resolution.user;
        let (xp_earned, leveled_up) = match resolution.xp {
            Some(change) => (task.xp_reward, change.leveled_up),
            None => (0, false),
        };

        info!(
            user_id = %user.id,
            assignment_id,
            passed = outcome.passed,
            xp_earned,
            level = user.level,
            "Assignment resolved"
        );

        if leveled_up {
            self.notify(&user.id, Notification::LevelUp { level: user.level })
                .await;
        }
        if outcome.passed {
            if let Some(path_id) = &resolved.path_id {
                self.complete_path_if_done(path_id).await?;
            }
        }

        Ok(VerifyResult {
            assignment_id: resolved.id,
            status: resolved.status,
            outcome,
            xp_earned,
            xp: user.xp,
            level: user.level,
            leveled_up,
        })
    }

    async fn complete_path_if_done(&self, path_id: &str) -> Result<()> {
        let path = self.store.get_path(path_id).await?;
        if path.status == PathStatus::Completed {
            return Ok(());
        }
        let assignments = self.path_assignments(&path).await?;
        if assignments.iter().any(|a| a.status != AssignmentStatus::Verified) {
            return Ok(());
        }
        self.store
            .set_path_status(path_id, PathStatus::Completed)
            .await?;
        info!(path_id, user_id = %path.user_id, "Learning path completed");
        Ok(())
    }

    /// First unresolved assignment, in path order.
    pub async fn current_task(&self, user_id: &str) -> Result<Option<CurrentTask>> {
        let assignment = self
            .store
            .assignments_for_user(user_id)
            .await?
            .into_iter()
            .find(|a| !a.status.is_resolved());
        match assignment {
            Some(assignment) => {
                let task = self.store.get_task(&assignment.task_id).await?;
                Ok(Some(CurrentTask { assignment, task }))
            }
            None => Ok(None),
        }
    }

    /// The user's learning paths, newest first, with progress.
    pub async fn paths(&self, user_id: &str) -> Result<Vec<PathProgress>> {
        let mut progress = Vec::new();
        for path in self.store.paths_for_user(user_id).await? {
            let assignments = self.path_assignments(&path).await?;
            let verified = assignments
                .iter()
                .filter(|a| a.status == AssignmentStatus::Verified)
                .count();
            let total = assignments.len();
            progress.push(PathProgress {
                path,
                verified,
                total,
            });
        }
        Ok(progress)
    }

    async fn path_assignments(&self, path: &LearningPath) -> Result<Vec<Assignment>> {
        let lookups = path
            .assignment_ids
            .iter()
            .map(|id| self.store.get_assignment(id));
        Ok(futures::future::try_join_all(lookups).await?)
    }

    // ---- rewards ----

    pub async fn claim(&self, user_id: &str, chain: Option<&ChainId>) -> Result<ClaimResult> {
        Ok(self.rewards.claim(user_id, chain).await?)
    }

    pub async fn claim_badge(&self, user_id: &str, chain: Option<&ChainId>) -> Result<MintResult> {
        Ok(self.rewards.claim_badge(user_id, chain).await?)
    }

    /// Reward transactions sent for the user but not yet recorded.
    pub async fn pending_reconciliation(&self, user_id: &str) -> Result<Vec<PendingClaim>> {
        Ok(self.rewards.pending_reconciliation(user_id).await?)
    }

    /// Close chain connections.
    pub async fn shutdown(&self) {
        match self.rewards.pending_count().await {
            Ok(0) => {}
            Ok(pending) => warn!(pending, "Shutting down with unreconciled reward transactions"),
            Err(e) => warn!(error = %e, "Could not count unreconciled reward transactions"),
        }
        self.chains.shutdown().await;
    }

    async fn notify(&self, user_id: &str, notification: Notification) {
        let timeout = Duration::from_millis(self.config.general.notification_timeout_ms);
        notify::send(&self.notifier, user_id, notification, timeout).await;
    }
}
