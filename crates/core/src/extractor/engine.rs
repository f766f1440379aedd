//! The action program interpreter.
//!
//! An explicit work stack instead of chained closures: every frame is either
//! a plain "run action N on this input" step or a sibling iterator left
//! behind by an `extract`, so the remaining matches are revisited when the
//! inner chain finishes. Both guard counters fall out of the representation:
//! iterations = processed frames, depth = stack height.

use std::collections::VecDeque;

use regex::bytes::{Regex, RegexBuilder};
use tracing::warn;

use super::{ActionConfig, ActionKind, ExtractError};
use crate::torrent::PageSource;

const PARAM_ARG: &str = "${arg}";
const PARAM_TORRENT: &str = "${torrent}";

/// Guard budgets for a single program run.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_iterations: usize,
    pub max_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            max_depth: 64,
        }
    }
}

enum Frame {
    Run { idx: usize, input: Vec<u8> },
    Siblings { idx: usize, matches: VecDeque<Vec<u8>> },
}

pub(super) async fn run_program(
    pages: &dyn PageSource,
    base_url: &str,
    context: &str,
    actions: &[ActionConfig],
    limits: &Limits,
) -> Result<Option<Vec<u8>>, ExtractError> {
    let mut stack = vec![Frame::Run {
        idx: 0,
        input: Vec::new(),
    }];
    let mut iterations = 0usize;
    let mut result = None;

    while let Some(frame) = stack.pop() {
        iterations += 1;
        if iterations > limits.max_iterations || stack.len() >= limits.max_depth {
            return Err(ExtractError::LimitExceeded);
        }

        match frame {
            Frame::Run { idx, input } => {
                let Some(action) = actions.get(idx) else {
                    continue;
                };
                match action.action {
                    ActionKind::Go => {
                        let input_str = String::from_utf8_lossy(&input).into_owned();
                        let mut url = action
                            .param
                            .replace(PARAM_ARG, &input_str)
                            .replace(PARAM_TORRENT, context);
                        if !input_str.contains(base_url) {
                            url = format!("{base_url}{url}");
                        }
                        match pages.fetch(&url).await {
                            Ok(body) => stack.push(Frame::Run {
                                idx: idx + 1,
                                input: body,
                            }),
                            // Dead branch; siblings are still visited.
                            Err(e) => warn!(url, error = %e, "go action failed"),
                        }
                    }
                    ActionKind::Check => {
                        let pass = if action.param.is_empty() {
                            !input.is_empty()
                        } else {
                            compile(&action.param.replace(PARAM_TORRENT, context))?
                                .is_match(&input)
                        };
                        if pass {
                            stack.push(Frame::Run {
                                idx: idx + 1,
                                input,
                            });
                        }
                    }
                    ActionKind::Extract => {
                        let regex = compile(&action.param.replace(PARAM_TORRENT, context))?;
                        // Collecting past the iteration budget is pointless:
                        // visiting a match costs at least one iteration.
                        let matches: VecDeque<Vec<u8>> = regex
                            .captures_iter(&input)
                            .filter_map(|captures| {
                                captures.get(1).map(|m| m.as_bytes().to_vec())
                            })
                            .take(limits.max_iterations + 1)
                            .collect();
                        stack.push(Frame::Siblings {
                            idx: idx + 1,
                            matches,
                        });
                    }
                    ActionKind::Return => {
                        result = Some(input);
                        break;
                    }
                }
            }
            Frame::Siblings { idx, mut matches } => {
                if let Some(input) = matches.pop_front() {
                    stack.push(Frame::Siblings { idx, matches });
                    stack.push(Frame::Run { idx, input });
                }
            }
        }
    }

    Ok(result)
}

fn compile(pattern: &str) -> Result<Regex, ExtractError> {
    RegexBuilder::new(pattern)
        .dot_matches_new_line(true)
        .build()
        .map_err(|source| ExtractError::Regex {
            pattern: pattern.to_string(),
            source,
        })
}
