//! Content generation service.
//!
//! Produces task definitions, quizzes, lessons and path summaries from the
//! model. Structured replies are validated here: a reply missing a required
//! key fails with `GenerationError::MalformedResponse` instead of being
//! patched up.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::audit::Purpose;
use crate::backend::CompletionRequest;
use crate::service::{AgentService, ServiceError};

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// The model could not be reached or did not answer in time
    #[error("generation failed: {0}")]
    GenerationFailed(#[from] ServiceError),

    /// The reply was not the JSON shape we asked for
    #[error("malformed generation response: {0}")]
    MalformedResponse(String),
}

/// What kind of task to generate.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub topic: String,
    pub level: u32,
    /// learning, practice, quest or advanced
    pub task_type: String,
}

/// Task fields produced by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedTask {
    pub title: String,
    pub description: String,
    /// Unvalidated strategy name; callers map it to their own enum
    pub verification_type: String,
    pub xp_reward: u32,
    pub token_reward: Option<u32>,
    pub project: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedQuiz {
    pub questions: Vec<QuizQuestion>,
}

impl GeneratedQuiz {
    /// Answer key keyed `q1..qN` in question order.
    pub fn answer_key(&self) -> BTreeMap<String, String> {
        self.questions
            .iter()
            .enumerate()
            .map(|(i, q)| (format!("q{}", i + 1), q.correct_answer.clone()))
            .collect()
    }
}

/// One line of a learning path summary request.
#[derive(Debug, Clone)]
pub struct PathEntry {
    pub task_type: String,
    pub title: String,
}

/// Generates learning content.
#[async_trait]
pub trait ContentService: Send + Sync {
    async fn generate_task(&self, spec: &TaskSpec) -> Result<GeneratedTask, GenerationError>;

    /// Three multiple-choice questions about a task.
    async fn generate_quiz(
        &self,
        title: &str,
        description: &str,
    ) -> Result<GeneratedQuiz, GenerationError>;

    /// Markdown lesson for a learning task.
    async fn generate_lesson(&self, title: &str) -> Result<String, GenerationError>;

    /// Two-sentence overview of a learning path.
    async fn describe_path(
        &self,
        topic: &str,
        level: u32,
        entries: &[PathEntry],
    ) -> Result<String, GenerationError>;
}

/// Model-backed content generator.
pub struct LlmContentService {
    agent: Arc<AgentService>,
}

impl LlmContentService {
    pub fn new(agent: Arc<AgentService>) -> Self {
        Self { agent }
    }

    async fn ask(
        &self,
        purpose: Purpose,
        subject: &str,
        request: CompletionRequest,
    ) -> Result<String, GenerationError> {
        let response = self.agent.invoke(purpose, subject, request).await?;
        Ok(response.content)
    }
}

fn task_prompt(spec: &TaskSpec) -> String {
    let project_line = if spec.task_type == "quest" {
        "\n- project: 'AI Generated'"
    } else {
        ""
    };
    format!(
        "Create a {kind} task about {topic} for a Web3 learner (Level {level}).\n\
         Format as JSON with:\n\
         - title: Max 8 words\n\
         - description: 1-2 sentences\n\
         - verification_type: quiz/transaction/social_proof/submission\n\
         - xp_reward: {min} to {max}\n\
         - token_reward: Half of XP value{project_line}\n\n\
         Example for Level 1 DeFi:\n\
         {{\"title\": \"What is a DEX?\", \"description\": \"Explain how decentralized exchanges work in 2 sentences.\", \
         \"verification_type\": \"quiz\", \"xp_reward\": 15, \"token_reward\": 7}}",
        kind = spec.task_type,
        topic = spec.topic,
        level = spec.level,
        min = 10 * spec.level,
        max = 20 * spec.level,
    )
}

fn quiz_prompt(title: &str, description: &str) -> String {
    format!(
        "Generate 3 multiple-choice questions about:\n\
         {} - {}\n\
         Format as JSON with 'questions' array containing:\n\
         - question: String\n\
         - options: Array of 4 strings\n\
         - correct_answer: String (exact option text)",
        title, description
    )
}

fn lesson_prompt(title: &str) -> String {
    format!(
        "Create an interactive Web3 lesson on:\n\
         Topic: {title}\n\n\
         Requirements:\n\
         1. Explain {title} in a beginner-friendly way\n\
         2. Include 3-5 key concepts\n\
         3. Add 2-3 real-world examples\n\
         4. End with a short 3-question quiz to test knowledge\n\n\
         Format as markdown with clear sections."
    )
}

fn path_prompt(topic: &str, level: u32, entries: &[PathEntry]) -> String {
    let lines: Vec<String> = entries
        .iter()
        .map(|e| format!("- {}: {}", e.task_type, e.title))
        .collect();
    format!(
        "Summarize this {} learning path (Level {}) in 2 sentences.\nTasks:\n{}",
        topic,
        level,
        lines.join("\n")
    )
}

/// Strip a surrounding markdown code fence, if any.
fn strip_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    // drop the language tag line
    match inner.find('\n') {
        Some(idx) => inner[idx + 1..].trim(),
        None => inner.trim(),
    }
}

fn parse_object(raw: &str) -> Result<Map<String, Value>, GenerationError> {
    match serde_json::from_str::<Value>(strip_fence(raw)) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(GenerationError::MalformedResponse(format!(
            "expected a JSON object, got {}",
            other
        ))),
        Err(e) => Err(GenerationError::MalformedResponse(format!("invalid JSON: {}", e))),
    }
}

fn required_str(map: &Map<String, Value>, key: &str) -> Result<String, GenerationError> {
    match map.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(_) => Err(GenerationError::MalformedResponse(format!(
            "`{}` must be a non-empty string",
            key
        ))),
        None => Err(GenerationError::MalformedResponse(format!("missing `{}`", key))),
    }
}

fn as_u32(value: &Value, key: &str) -> Result<u32, GenerationError> {
    value
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| {
            GenerationError::MalformedResponse(format!("`{}` must be a non-negative integer", key))
        })
}

/// Validate a task generation reply.
pub fn parse_generated_task(raw: &str) -> Result<GeneratedTask, GenerationError> {
    let map = parse_object(raw)?;

    let xp_reward = map
        .get("xp_reward")
        .ok_or_else(|| GenerationError::MalformedResponse("missing `xp_reward`".into()))
        .and_then(|v| as_u32(v, "xp_reward"))?;
    if xp_reward == 0 {
        return Err(GenerationError::MalformedResponse(
            "`xp_reward` must be positive".into(),
        ));
    }

    let token_reward = match map.get("token_reward") {
        None | Some(Value::Null) => None,
        Some(v) => Some(as_u32(v, "token_reward")?),
    };

    let project = match map.get("project") {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    };

    Ok(GeneratedTask {
        title: required_str(&map, "title")?,
        description: required_str(&map, "description")?,
        verification_type: required_str(&map, "verification_type")?,
        xp_reward,
        token_reward,
        project,
    })
}

/// Validate a quiz generation reply.
pub fn parse_generated_quiz(raw: &str) -> Result<GeneratedQuiz, GenerationError> {
    let map = parse_object(raw)?;
    let Some(Value::Array(items)) = map.get("questions") else {
        return Err(GenerationError::MalformedResponse(
            "missing `questions` array".into(),
        ));
    };
    if items.is_empty() {
        return Err(GenerationError::MalformedResponse(
            "`questions` is empty".into(),
        ));
    }

    let mut questions = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let Value::Object(q) = item else {
            return Err(GenerationError::MalformedResponse(format!(
                "question {} is not an object",
                i + 1
            )));
        };

        let options: Vec<String> = match q.get("options") {
            Some(Value::Array(opts)) => opts
                .iter()
                .map(|o| o.as_str().map(|s| s.trim().to_string()))
                .collect::<Option<_>>()
                .ok_or_else(|| {
                    GenerationError::MalformedResponse(format!(
                        "question {} has non-string options",
                        i + 1
                    ))
                })?,
            _ => {
                return Err(GenerationError::MalformedResponse(format!(
                    "question {} is missing `options`",
                    i + 1
                )))
            }
        };
        if options.len() != 4 {
            return Err(GenerationError::MalformedResponse(format!(
                "question {} has {} options, expected 4",
                i + 1,
                options.len()
            )));
        }

        let correct_answer = required_str(q, "correct_answer")?;
        if !options.contains(&correct_answer) {
            return Err(GenerationError::MalformedResponse(format!(
                "question {} answer is not one of its options",
                i + 1
            )));
        }

        questions.push(QuizQuestion {
            question: required_str(q, "question")?,
            options,
            correct_answer,
        });
    }

    Ok(GeneratedQuiz { questions })
}

#[async_trait]
impl ContentService for LlmContentService {
    async fn generate_task(&self, spec: &TaskSpec) -> Result<GeneratedTask, GenerationError> {
        let request = CompletionRequest::user(task_prompt(spec))
            .with_json_output()
            .with_temperature(0.7);
        let raw = self.ask(Purpose::TaskGeneration, &spec.topic, request).await?;
        parse_generated_task(&raw)
    }

    async fn generate_quiz(
        &self,
        title: &str,
        description: &str,
    ) -> Result<GeneratedQuiz, GenerationError> {
        let request = CompletionRequest::user(quiz_prompt(title, description))
            .with_system("You are creating a Web3 quiz.")
            .with_json_output()
            .with_temperature(0.3);
        let raw = self.ask(Purpose::QuizGeneration, title, request).await?;
        parse_generated_quiz(&raw)
    }

    async fn generate_lesson(&self, title: &str) -> Result<String, GenerationError> {
        let request = CompletionRequest::user(lesson_prompt(title))
            .with_system("You are an expert Web3 educator.")
            .with_max_tokens(2048);
        let lesson = self.ask(Purpose::LessonGeneration, title, request).await?;
        if lesson.trim().is_empty() {
            return Err(GenerationError::MalformedResponse("empty lesson".into()));
        }
        Ok(lesson)
    }

    async fn describe_path(
        &self,
        topic: &str,
        level: u32,
        entries: &[PathEntry],
    ) -> Result<String, GenerationError> {
        let request =
            CompletionRequest::user(path_prompt(topic, level, entries)).with_max_tokens(100);
        let summary = self.ask(Purpose::PathSummary, topic, request).await?;
        Ok(summary.trim().to_string())
    }
}
