//! Task-to-agent matching.
//!
//! Two policies live here:
//! - [`matches_labels`]: label overlap, used by the registry's first-match
//!   auto-assign.
//! - [`score`] / [`find_best_agent`]: keyword scoring against agent
//!   capabilities, weighted by load, used by the tracker sync loop.
//!
//! Everything in this module is pure so matching policy can be tested
//! without a registry or a running sync loop.

use crate::agents::{Agent, Task};

/// Tokens of this length or shorter are never keywords.
const MIN_KEYWORD_LEN: usize = 4;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "had", "her", "was", "one",
    "our", "out", "day", "get", "has", "him", "his", "how", "its", "may", "new", "now", "old",
    "see", "two", "way", "who", "boy", "did", "she", "use", "with", "this", "that", "from", "they",
    "have", "will", "would", "there", "their",
];

/// Whether an agent with `agent_labels` handles a task with `task_labels`.
///
/// An agent without labels handles anything.
pub fn matches_labels(agent_labels: &[String], task_labels: &[String]) -> bool {
    if agent_labels.is_empty() {
        return true;
    }
    agent_labels
        .iter()
        .any(|al| task_labels.iter().any(|tl| al == tl))
}

fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Extract lowercase keywords from free text.
///
/// Splits on whitespace, trims surrounding punctuation, and drops short
/// tokens and stop words. Duplicates are kept: a word mentioned twice counts
/// twice.
pub fn extract_keywords(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|word| {
            word.trim_matches(|c: char| c.is_ascii_punctuation())
                .to_lowercase()
        })
        .filter(|word| word.chars().count() >= MIN_KEYWORD_LEN && !is_stop_word(word))
        .collect()
}

/// Score how well `agent` fits `task`.
///
/// Each keyword of the task's title and description adds 1.0 for every
/// capability that contains it (case-insensitive). The total is scaled by
/// `1 - load/100`, so a fully loaded agent always scores 0.
pub fn score(task: &Task, agent: &Agent) -> f64 {
    let capabilities: Vec<String> = agent
        .capabilities
        .iter()
        .map(|c| c.to_lowercase())
        .collect();

    let mut total = 0.0;
    for keyword in extract_keywords(&task.search_text()) {
        for capability in &capabilities {
            if capability.contains(keyword.as_str()) {
                total += 1.0;
            }
        }
    }

    total * load_factor(agent.load)
}

fn load_factor(load: u8) -> f64 {
    1.0 - f64::from(load.min(100)) / 100.0
}

/// Pick the best idle agent for `task`.
///
/// Agents that are not idle are skipped. Returns `None` unless some agent
/// scores above zero. Equal top scores go to the lowest agent ID, so the
/// result does not depend on the order of `agents`.
pub fn find_best_agent<'a, I>(task: &Task, agents: I) -> Option<&'a Agent>
where
    I: IntoIterator<Item = &'a Agent>,
{
    let mut best: Option<(&'a Agent, f64)> = None;

    for agent in agents {
        if !agent.is_available() {
            continue;
        }

        let s = score(task, agent);
        if s <= 0.0 {
            continue;
        }

        best = match best {
            None => Some((agent, s)),
            Some((current, current_score)) => {
                if s > current_score || (s == current_score && agent.id < current.id) {
                    Some((agent, s))
                } else {
                    Some((current, current_score))
                }
            }
        };
    }

    best.map(|(agent, _)| agent)
}
