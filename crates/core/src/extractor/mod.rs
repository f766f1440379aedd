//! Declarative HTML metadata extraction.
//!
//! A program is an ordered list of actions (`go`, `extract`, `check`,
//! `return`) interpreted against upstream pages. Programs are configured per
//! meta field; one [`MetaExtractor::extract`] call runs all of them and
//! returns whatever fields produced a non-empty result.

mod engine;

pub use engine::Limits;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::torrent::PageSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Fetch a URL template; the response body feeds the next action.
    Go,
    /// Run a regex; the next action runs once per match with capture 1.
    Extract,
    /// Gate: continue iff the input matches (or is non-empty for an empty
    /// parameter).
    Check,
    /// Store the current input as the result and stop.
    Return,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ActionConfig {
    pub action: ActionKind,
    #[serde(default)]
    pub param: String,
}

/// One named extraction program.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetaProgramConfig {
    pub field: String,
    pub actions: Vec<ActionConfig>,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    /// Iteration or stack budget exhausted; the guard against adversarial
    /// upstream pages.
    #[error("extraction budget exhausted")]
    LimitExceeded,

    #[error("invalid action regex `{pattern}`: {source}")]
    Regex {
        pattern: String,
        source: regex::Error,
    },
}

/// Runs the configured programs against a page context.
pub struct MetaExtractor {
    pages: Arc<dyn PageSource>,
    base_url: String,
    programs: Vec<MetaProgramConfig>,
    limits: Limits,
}

impl MetaExtractor {
    pub fn new(
        pages: Arc<dyn PageSource>,
        base_url: String,
        programs: Vec<MetaProgramConfig>,
        limits: Limits,
    ) -> Self {
        Self {
            pages,
            base_url,
            programs,
            limits,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Execute every program with `${torrent}` bound to `context`.
    ///
    /// Fields whose program failed or produced nothing are absent from the
    /// result; a failure in one field does not affect the others.
    pub async fn extract(&self, context: &str) -> HashMap<String, Vec<u8>> {
        let mut out = HashMap::new();
        for program in &self.programs {
            match engine::run_program(
                self.pages.as_ref(),
                &self.base_url,
                context,
                &program.actions,
                &self.limits,
            )
            .await
            {
                Ok(Some(bytes)) if !bytes.is_empty() => {
                    out.insert(program.field.clone(), bytes);
                }
                Ok(_) => {}
                Err(e) => warn!(field = %program.field, error = %e, "meta extraction failed"),
            }
        }
        out
    }
}
