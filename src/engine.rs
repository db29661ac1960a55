//! The tutor engine: one conversation turn end to end.
//!
//! A turn flows through the session window, long-term memory, the contextual
//! matcher and the personalizer before reaching the completion provider. The
//! proficiency analysis of the learner's utterance runs detached on the
//! analysis queue and never delays the reply.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::{AnalysisJob, AnalysisQueue, ProficiencyAnalyzer};
use crate::config::Config;
use crate::embedding::{build_embedder, ensure_dimensions, Embedder};
use crate::error::{Error, Result};
use crate::feedback::{to_payload, ExperiencePayload, FeedbackType, LearningSignal};
use crate::ledger::FeedbackLedger;
use crate::memory::{LongTermMemory, Recollection};
use crate::message::{Role, Turn};
use crate::personalization::{assemble, turn_injections, Personalizer};
use crate::progress::{summarize, ProgressSummary};
use crate::providers::{CompletionOptions, CompletionProvider, OpenAiChat, OpenAiSpeech, SpeechRenderer};
use crate::retrieval::ContextualMatcher;
use crate::storage::{open_index, VectorIndex};
use crate::window::ConversationWindow;

/// The outcome of one conversation turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConverseReply {
    pub session_id: String,
    pub reply: String,
    /// Long-term memory id of the reply, for attaching feedback to it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_id: Option<String>,
    /// File name of the rendered reply audio
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_ref: Option<String>,
}

/// A learner's rating of one exchange
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedbackSubmission {
    pub session_id: String,
    pub learning_feedback: String,
    pub ai_response: String,
    pub user_message: String,
    #[serde(default)]
    pub target_lang: Option<String>,
    #[serde(default)]
    pub reply_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackAck {
    pub session_id: String,
    /// `false` when the ledger could not store the record
    pub recorded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Collaborators the engine is built from
pub struct Components {
    pub embedder: Arc<dyn Embedder>,
    pub index: Arc<dyn VectorIndex>,
    pub completion: Arc<dyn CompletionProvider>,
    pub speech: Option<Arc<dyn SpeechRenderer>>,
}

pub struct TutorEngine {
    config: Config,
    window: ConversationWindow,
    memory: Arc<LongTermMemory>,
    ledger: Arc<FeedbackLedger>,
    matcher: ContextualMatcher,
    personalizer: Personalizer,
    completion: Arc<dyn CompletionProvider>,
    speech: Option<Arc<dyn SpeechRenderer>>,
    analysis: AnalysisQueue,
}

impl TutorEngine {
    /// Build the engine and its hosted collaborators from configuration
    pub async fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        config.ensure_dirs()?;

        let embedder = build_embedder(&config)?;
        ensure_dimensions(embedder.as_ref(), config.embedding_dimensions)?;
        let index = open_index(&config).await?;
        let completion: Arc<dyn CompletionProvider> = Arc::new(OpenAiChat::new(&config)?);
        let speech: Arc<dyn SpeechRenderer> = Arc::new(OpenAiSpeech::new(&config)?);

        info!(
            model = completion.model_name(),
            embedding = ?config.embedding_backend,
            index = ?config.vector_backend,
            "tutor engine ready"
        );

        Ok(Self::with_components(
            config,
            Components {
                embedder,
                index,
                completion,
                speech: Some(speech),
            },
        ))
    }

    /// Build the engine around caller-supplied collaborators.
    ///
    /// Spawns the analysis dispatcher, so this must run inside a Tokio runtime.
    pub fn with_components(config: Config, components: Components) -> Self {
        let Components {
            embedder,
            index,
            completion,
            speech,
        } = components;

        let memory = Arc::new(LongTermMemory::new(embedder.clone(), index.clone()));
        let ledger = Arc::new(FeedbackLedger::new(
            embedder,
            index,
            config.feedback_namespace.clone(),
        ));
        let matcher = ContextualMatcher::new(
            memory.clone(),
            ledger.clone(),
            config.recall_top_k,
            config.contextual_feedback_limit,
        );
        let personalizer = Personalizer::new(ledger.clone(), config.feedback_query_limit);
        let analyzer = Arc::new(ProficiencyAnalyzer::new(
            completion.clone(),
            ledger.clone(),
            config.analysis_timeout,
        ));
        let analysis = AnalysisQueue::spawn(
            analyzer,
            config.analysis_queue_capacity,
            config.max_concurrent_analyses,
        );

        Self {
            window: ConversationWindow::new(config.max_history),
            config,
            memory,
            ledger,
            matcher,
            personalizer,
            completion,
            speech,
            analysis,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The session's short-term window, oldest turn first
    pub fn history(&self, session_id: &str) -> Vec<Turn> {
        self.window.history(session_id)
    }

    /// Run one conversation turn and return the tutor's reply
    pub async fn converse(
        &self,
        session_id: &str,
        text: &str,
        target_lang: &str,
        tts: bool,
    ) -> Result<ConverseReply> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::invalid_input("text must not be empty"));
        }

        if self.window.is_empty(session_id) {
            let instruction = self
                .personalizer
                .session_instruction(session_id, target_lang)
                .await;
            if self.window.seed(session_id, Turn::system(instruction)) {
                debug!(session_id, "seeded session instruction");
            }
        }

        self.window.append(session_id, Role::User, text);
        self.memory.remember(session_id, Role::User, text).await;

        let (matches, experiences) = tokio::join!(
            self.matcher.matches(session_id, text),
            self.personalizer.experiences(session_id),
        );
        let injections = turn_injections(&experiences, &matches);
        debug!(
            session_id,
            matches = matches.len(),
            injections = injections.len(),
            "personalized turn"
        );
        let turns = assemble(self.window.history(session_id), injections);

        let reply = self.complete(&turns).await?;

        self.window.append(session_id, Role::Assistant, reply.as_str());
        let reply_id = self
            .memory
            .remember(session_id, Role::Assistant, &reply)
            .await;

        let job = AnalysisJob {
            session_id: session_id.to_string(),
            message_pair_id: reply_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            user_message: text.to_string(),
            target_lang: target_lang.to_string(),
        };
        self.analysis.submit(job);

        let audio_ref = if tts {
            self.speak(&reply, target_lang).await
        } else {
            None
        };

        Ok(ConverseReply {
            session_id: session_id.to_string(),
            reply,
            reply_id,
            audio_ref,
        })
    }

    async fn complete(&self, turns: &[Turn]) -> Result<String> {
        let options = CompletionOptions {
            temperature: Some(self.config.temperature),
            ..Default::default()
        };

        match tokio::time::timeout(
            self.config.provider_timeout,
            self.completion.complete(turns, &options),
        )
        .await
        {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(Error::Completion(msg))) => Err(Error::Completion(msg)),
            Ok(Err(e)) => Err(Error::completion(e.to_string())),
            Err(_) => Err(Error::completion(format!(
                "no reply within {:?}",
                self.config.provider_timeout
            ))),
        }
    }

    async fn speak(&self, reply: &str, target_lang: &str) -> Option<String> {
        let speech = self.speech.as_ref()?;
        match speech.render(reply, target_lang).await {
            Ok(file) => Some(file),
            Err(e) => {
                warn!(error = %e, "speech rendering failed");
                None
            }
        }
    }

    /// Past utterances of a session most similar to `query`
    pub async fn search(
        &self,
        session_id: &str,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<Recollection>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::invalid_input("query must not be empty"));
        }
        let top_k = top_k.unwrap_or(self.config.recall_top_k);
        Ok(self.memory.recall(session_id, query, top_k).await)
    }

    /// Store a learner's rating of one exchange
    pub async fn submit_feedback(&self, submission: FeedbackSubmission) -> Result<FeedbackAck> {
        for (field, value) in [
            ("session_id", &submission.session_id),
            ("learning_feedback", &submission.learning_feedback),
            ("ai_response", &submission.ai_response),
            ("user_message", &submission.user_message),
        ] {
            if value.trim().is_empty() {
                return Err(Error::invalid_input(format!("{} is required", field)));
            }
        }

        let FeedbackSubmission {
            session_id,
            learning_feedback,
            ai_response,
            user_message,
            target_lang,
            reply_id,
        } = submission;

        let payload = to_payload(&ExperiencePayload {
            learning_feedback: LearningSignal::from(learning_feedback.trim()),
            ai_response,
            user_message,
            target_lang,
            timestamp: Some(Utc::now().timestamp_millis() as f64 / 1000.0),
            memory_id: reply_id.clone(),
        })?;
        let pair_id = reply_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let id = self
            .ledger
            .record(&session_id, &pair_id, FeedbackType::LearningExperience, payload)
            .await;

        Ok(FeedbackAck {
            session_id,
            recorded: id.is_some(),
            id,
        })
    }

    /// Trend summary of the session's proficiency assessments
    pub async fn get_progress(&self, session_id: &str) -> ProgressSummary {
        let records = self
            .ledger
            .query(
                Some(FeedbackType::UserProgress),
                Some(session_id),
                self.config.feedback_query_limit,
            )
            .await;
        summarize(session_id, &records)
    }

    /// Forget the session's short-term window. Long-term memory and feedback stay.
    pub fn reset(&self, session_id: &str) {
        self.window.reset(session_id);
        info!(session_id, "session reset");
    }

    /// Stop accepting analyses and wait for queued ones to finish
    pub async fn shutdown(&self) {
        self.analysis.shutdown().await;
    }
}
