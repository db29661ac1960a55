//! Background proficiency analysis
//!
//! Every user utterance is queued for a structured evaluation whose result is
//! appended to the feedback ledger as a `user_progress` record. The queue is
//! bounded and the number of evaluations in flight is capped; when the queue
//! is full new jobs are dropped. Nothing here can fail a conversation turn.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::feedback::{to_payload, FeedbackType, ProgressPayload};
use crate::ledger::FeedbackLedger;
use crate::message::Turn;
use crate::providers::{CompletionOptions, CompletionProvider};

/// One utterance waiting to be assessed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisJob {
    pub session_id: String,
    pub message_pair_id: String,
    pub user_message: String,
    pub target_lang: String,
}

/// Evaluates single utterances and records the result
pub struct ProficiencyAnalyzer {
    provider: Arc<dyn CompletionProvider>,
    ledger: Arc<FeedbackLedger>,
    timeout: Duration,
}

impl ProficiencyAnalyzer {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        ledger: Arc<FeedbackLedger>,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            ledger,
            timeout,
        }
    }

    /// Assess one utterance. Returns the ledger id of the stored assessment,
    /// or `None` when any step failed.
    pub async fn analyze(&self, job: &AnalysisJob) -> Option<String> {
        let payload = match self.assess(job).await {
            Ok(payload) => payload,
            Err(e) => {
                debug!(session_id = %job.session_id, error = %e, "analysis abandoned");
                return None;
            }
        };

        let payload = match to_payload(&payload) {
            Ok(map) => map,
            Err(e) => {
                warn!(session_id = %job.session_id, error = %e, "could not encode assessment");
                return None;
            }
        };

        self.ledger
            .record(
                &job.session_id,
                &job.message_pair_id,
                FeedbackType::UserProgress,
                payload,
            )
            .await
    }

    async fn assess(&self, job: &AnalysisJob) -> Result<ProgressPayload> {
        let turns = evaluation_prompt(job);
        let options = CompletionOptions {
            temperature: Some(0.0),
            max_tokens: Some(600),
            json_response: true,
        };

        let raw = tokio::time::timeout(self.timeout, self.provider.complete(&turns, &options))
            .await
            .map_err(|_| Error::timeout(format!("analysis exceeded {:?}", self.timeout)))??;

        parse_assessment(&raw)
    }
}

fn evaluation_prompt(job: &AnalysisJob) -> Vec<Turn> {
    vec![
        Turn::system(format!(
            "You assess language learners. The learner practices language '{}'. \
             Evaluate their message and reply with JSON only, using exactly this shape: \
             {{\"grammar_score\": <0-10>, \"vocabulary_level\": \"basic|intermediate|advanced\", \
             \"estimated_level\": \"A1|A2|B1|B2|C1|C2\", \
             \"errors\": [{{\"type\": \"...\", \"error\": \"...\", \"correction\": \"...\"}}], \
             \"strengths\": [\"...\"], \"focus_areas\": [\"...\"]}}",
            job.target_lang
        )),
        Turn::user(format!(
            "Session: {}\nLearner message: {}",
            job.session_id, job.user_message
        )),
    ]
}

/// Parse and validate a model's assessment. Accepts a bare JSON object or one
/// wrapped in prose or a fenced code block.
pub fn parse_assessment(raw: &str) -> Result<ProgressPayload> {
    let start = raw
        .find('{')
        .ok_or_else(|| Error::invalid_input("assessment contains no JSON object"))?;
    let end = raw
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| Error::invalid_input("assessment JSON is not closed"))?;

    let mut payload: ProgressPayload = serde_json::from_str(&raw[start..=end])?;
    payload.validate()?;
    payload.estimated_level = payload.level().map(|l| l.to_string());
    Ok(payload)
}

/// Bounded queue feeding a capped pool of analysis tasks
pub struct AnalysisQueue {
    sender: Mutex<Option<mpsc::Sender<AnalysisJob>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl AnalysisQueue {
    /// Start the dispatcher. Must be called inside a tokio runtime.
    pub fn spawn(analyzer: Arc<ProficiencyAnalyzer>, capacity: usize, max_concurrent: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let permits = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let dispatcher = tokio::spawn(dispatch(rx, analyzer, permits));

        Self {
            sender: Mutex::new(Some(tx)),
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Queue a job without waiting. Returns false if it was dropped.
    pub fn submit(&self, job: AnalysisJob) -> bool {
        let guard = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = guard.as_ref() else {
            debug!(session_id = %job.session_id, "analysis queue closed, job dropped");
            return false;
        };

        match tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(session_id = %job.session_id, "analysis queue full, job dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                warn!(session_id = %job.session_id, "analysis dispatcher stopped, job dropped");
                false
            }
        }
    }

    /// Stop accepting jobs and wait for queued and in-flight work to finish
    pub async fn shutdown(&self) {
        self.sender.lock().unwrap_or_else(|e| e.into_inner()).take();
        let handle = self.dispatcher.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "analysis dispatcher ended abnormally");
            }
        }
    }
}

async fn dispatch(
    mut rx: mpsc::Receiver<AnalysisJob>,
    analyzer: Arc<ProficiencyAnalyzer>,
    permits: Arc<Semaphore>,
) {
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            job = rx.recv() => {
                let Some(job) = job else { break };
                let Ok(permit) = permits.clone().acquire_owned().await else { break };
                let analyzer = analyzer.clone();
                in_flight.spawn(async move {
                    let _permit = permit;
                    analyzer.analyze(&job).await;
                });
            }
            Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = done {
                    warn!(error = %e, "analysis task failed");
                }
            }
        }
    }

    while let Some(done) = in_flight.join_next().await {
        if let Err(e) = done {
            warn!(error = %e, "analysis task failed");
        }
    }
    info!("analysis dispatcher stopped");
}
