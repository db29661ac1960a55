//! Progress trend summaries over a session's assessments

use std::collections::HashMap;

use serde::Serialize;

use crate::feedback::{FeedbackRecord, ProgressPayload};

/// Minimum change in mean grammar score that counts as a trend
const TREND_THRESHOLD: f64 = 0.5;
const COMMON_ERRORS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Declining,
    Steady,
    InsufficientData,
}

/// How a learner's assessments have moved over time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSummary {
    pub session_id: String,
    pub assessments: usize,
    pub first_level: Option<String>,
    pub latest_level: Option<String>,
    pub latest_grammar_score: Option<f64>,
    pub average_grammar_score: Option<f64>,
    pub trend: Trend,
    pub common_errors: Vec<String>,
    pub focus_areas: Vec<String>,
    pub strengths: Vec<String>,
}

/// Summarize `user_progress` records for one session
pub fn summarize(session_id: &str, records: &[FeedbackRecord]) -> ProgressSummary {
    let mut ordered: Vec<&FeedbackRecord> = records.iter().collect();
    ordered.sort_by(|a, b| {
        a.timestamp
            .partial_cmp(&b.timestamp)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let payloads: Vec<ProgressPayload> = ordered.iter().filter_map(|r| r.progress()).collect();

    let scores: Vec<f64> = payloads.iter().filter_map(|p| p.grammar_score).collect();
    let latest = payloads.last();

    ProgressSummary {
        session_id: session_id.to_string(),
        assessments: payloads.len(),
        first_level: payloads.iter().find_map(|p| p.estimated_level.clone()),
        latest_level: payloads.iter().rev().find_map(|p| p.estimated_level.clone()),
        latest_grammar_score: scores.last().copied(),
        average_grammar_score: mean(&scores),
        trend: trend(&scores),
        common_errors: common_errors(&payloads),
        focus_areas: latest.map(|p| p.focus_areas.clone()).unwrap_or_default(),
        strengths: latest.map(|p| p.strengths.clone()).unwrap_or_default(),
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Compare the older half of the scores with the newer half
fn trend(scores: &[f64]) -> Trend {
    if scores.len() < 2 {
        return Trend::InsufficientData;
    }
    let (older, newer) = scores.split_at(scores.len() / 2);
    match (mean(older), mean(newer)) {
        (Some(before), Some(after)) if after - before >= TREND_THRESHOLD => Trend::Improving,
        (Some(before), Some(after)) if before - after >= TREND_THRESHOLD => Trend::Declining,
        _ => Trend::Steady,
    }
}

/// Most frequent error types, ties broken by first appearance
fn common_errors(payloads: &[ProgressPayload]) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    let mut seen = 0;
    for kind in payloads.iter().flat_map(|p| p.error_types(usize::MAX)) {
        let entry = counts.entry(kind).or_insert((0, seen));
        entry.0 += 1;
        seen += 1;
    }

    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked.into_iter().take(COMMON_ERRORS).map(|(k, _)| k).collect()
}
