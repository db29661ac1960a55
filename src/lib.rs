//! # Lingua Memory
//!
//! Session memory and personalization for language-learning conversation
//! practice.
//!
//! ## Architecture
//!
//! Each conversation turn passes through several layers:
//! - **Session window** - bounded, in-process history per session
//! - **Long-term memory** - every utterance embedded into a per-session namespace
//! - **Feedback ledger** - learner ratings and proficiency assessments
//! - **Contextual matcher** - joins similar past replies with the ratings they got
//! - **Personalizer** - turns the ledger into tutor directives
//! - **Analysis queue** - grades each utterance in the background
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lingua_memory::{Config, TutorEngine};
//!
//! let engine = TutorEngine::from_config(Config::from_env()?).await?;
//!
//! let turn = engine.converse("session-1", "Hola, ¿qué tal?", "es", false).await?;
//! println!("{}", turn.reply);
//!
//! let progress = engine.get_progress("session-1").await;
//! ```

pub mod analysis;
pub mod api;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod ledger;
pub mod memory;
pub mod message;
pub mod personalization;
pub mod progress;
pub mod providers;
pub mod retrieval;
pub mod storage;
pub mod window;

pub use config::Config;
pub use engine::{Components, ConverseReply, FeedbackAck, FeedbackSubmission, TutorEngine};
pub use error::{Error, Result};
pub use feedback::{FeedbackRecord, FeedbackType, LearningSignal};
pub use memory::{LongTermMemory, Recollection};
pub use message::{Role, Turn};
pub use progress::{ProgressSummary, Trend};
pub use window::ConversationWindow;
