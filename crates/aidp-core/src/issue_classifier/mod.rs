//! Issue classification: decide which [`AgentKind`] should pick up a given
//! upstream issue.
//!
//! Ported from `original_source/agents/assignment_manager.py`'s
//! `classify_issue` -- a weighted-scoring classifier over labels (weight
//! 3.0), title keywords (weight 2.0), and body keywords (weight 1.0), with
//! confidence normalized to the winning agent's share of the total score.

use std::sync::LazyLock;

use regex::Regex;

use aidp_broker::models::AgentKind;

/// A classified issue: the chosen agent and a 0.0-1.0 confidence score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub agent_kind: AgentKind,
    pub confidence: f64,
}

/// An upstream issue as seen by the classifier. Intentionally narrower than
/// the full upstream API type -- only the fields the scoring model reads.
#[derive(Debug, Clone, Default)]
pub struct IssueSummary {
    pub labels: Vec<String>,
    pub title: String,
    pub body: String,
}

const CLASSIFIABLE_KINDS: [AgentKind; 5] = [
    AgentKind::Backend,
    AgentKind::Frontend,
    AgentKind::Database,
    AgentKind::Devops,
    AgentKind::Qa,
];

fn label_to_agent(label: &str) -> Option<AgentKind> {
    match label {
        "backend" | "api" | "server" | "authentication" | "authorization" | "security"
        | "endpoint" => Some(AgentKind::Backend),
        "frontend" | "ui" | "ux" | "component" | "design" | "css" | "responsive" => {
            Some(AgentKind::Frontend)
        }
        "database" | "db" | "schema" | "migration" | "query" | "model" => {
            Some(AgentKind::Database)
        }
        "devops" | "deployment" | "infrastructure" | "ci/cd" | "docker" | "kubernetes"
        | "monitoring" => Some(AgentKind::Devops),
        "qa" | "testing" | "test" | "bug" => Some(AgentKind::Qa),
        _ => None,
    }
}

struct KeywordSet {
    agent_kind: AgentKind,
    patterns: Vec<Regex>,
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?i){p}")).expect("static keyword pattern is valid regex"))
        .collect()
}

static KEYWORD_PATTERNS: LazyLock<Vec<KeywordSet>> = LazyLock::new(|| {
    vec![
        KeywordSet {
            agent_kind: AgentKind::Backend,
            patterns: compile(&[
                r"api\b",
                r"endpoint",
                r"route",
                r"service",
                r"backend",
                r"auth(entication|orization)?",
                r"server",
                r"rest",
                r"graphql",
                r"business logic",
                r"validation",
                r"middleware",
            ]),
        },
        KeywordSet {
            agent_kind: AgentKind::Frontend,
            patterns: compile(&[
                r"ui\b",
                r"ux\b",
                r"component",
                r"page",
                r"screen",
                r"button",
                r"form",
                r"modal",
                r"dashboard",
                r"menu",
                r"nav",
                r"layout",
                r"react",
                r"vue",
                r"angular",
                r"frontend",
                r"responsive",
            ]),
        },
        KeywordSet {
            agent_kind: AgentKind::Database,
            patterns: compile(&[
                r"database",
                r"\bdb\b",
                r"schema",
                r"table",
                r"column",
                r"index",
                r"migration",
                r"query",
                r"model",
                r"relation",
                r"foreign key",
                r"postgres",
                r"mysql",
                r"sqlite",
                r"orm",
                r"alembic",
            ]),
        },
        KeywordSet {
            agent_kind: AgentKind::Devops,
            patterns: compile(&[
                r"deploy",
                r"docker",
                r"kubernetes",
                r"container",
                r"ci/cd",
                r"pipeline",
                r"nginx",
                r"ssl",
                r"certificate",
                r"domain",
                r"server setup",
                r"infrastructure",
                r"scaling",
                r"monitoring",
            ]),
        },
        KeywordSet {
            agent_kind: AgentKind::Qa,
            patterns: compile(&[
                r"test(ing)?",
                r"bug",
                r"fix",
                r"broken",
                r"error",
                r"coverage",
                r"assertion",
                r"jest",
                r"pytest",
                r"cypress",
                r"regression",
                r"quality",
            ]),
        },
    ]
});

const LABEL_WEIGHT: f64 = 3.0;
const TITLE_WEIGHT: f64 = 2.0;
const BODY_WEIGHT: f64 = 1.0;

/// Score and classify an issue. Falls back to a 0.5 confidence when every
/// agent scores zero (no labels or recognisable keywords at all).
pub fn classify(issue: &IssueSummary) -> Classification {
    let mut scores: Vec<(AgentKind, f64)> = CLASSIFIABLE_KINDS.iter().map(|k| (*k, 0.0)).collect();
    let score_of = |scores: &mut Vec<(AgentKind, f64)>, kind: AgentKind, weight: f64| {
        if let Some(entry) = scores.iter_mut().find(|(k, _)| *k == kind) {
            entry.1 += weight;
        }
    };

    for label in &issue.labels {
        if let Some(agent_kind) = label_to_agent(&label.to_lowercase()) {
            score_of(&mut scores, agent_kind, LABEL_WEIGHT);
        }
    }

    let title = issue.title.to_lowercase();
    for set in KEYWORD_PATTERNS.iter() {
        if set.patterns.iter().any(|re| re.is_match(&title)) {
            score_of(&mut scores, set.agent_kind, TITLE_WEIGHT);
        }
    }

    let body = issue.body.to_lowercase();
    for set in KEYWORD_PATTERNS.iter() {
        if set.patterns.iter().any(|re| re.is_match(&body)) {
            score_of(&mut scores, set.agent_kind, BODY_WEIGHT);
        }
    }

    // First-wins on ties (matching the original Python `max()`'s stable
    // left-to-right tie-break), not `Iterator::max_by`'s last-wins: a later
    // entry only replaces the running best when it's strictly higher.
    let (best_agent, best_score) = scores
        .iter()
        .copied()
        .fold(None, |acc: Option<(AgentKind, f64)>, candidate| match acc {
            Some((_, best)) if best >= candidate.1 => acc,
            _ => Some(candidate),
        })
        .expect("scores is never empty");
    let total: f64 = scores.iter().map(|(_, s)| s).sum();

    let confidence = if total > 0.0 { best_score / total } else { 0.5 };

    Classification { agent_kind: best_agent, confidence }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_alone_wins_outright() {
        let issue = IssueSummary {
            labels: vec!["database".to_owned()],
            title: String::new(),
            body: String::new(),
        };
        let result = classify(&issue);
        assert_eq!(result.agent_kind, AgentKind::Database);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn title_keyword_beats_no_signal() {
        let issue = IssueSummary {
            labels: vec![],
            title: "Add a new API endpoint for users".to_owned(),
            body: String::new(),
        };
        let result = classify(&issue);
        assert_eq!(result.agent_kind, AgentKind::Backend);
    }

    #[test]
    fn label_outweighs_conflicting_title_keyword() {
        // label (3.0 db) should beat a single frontend title keyword (2.0).
        let issue = IssueSummary {
            labels: vec!["database".to_owned()],
            title: "Fix the UI for this".to_owned(),
            body: String::new(),
        };
        let result = classify(&issue);
        assert_eq!(result.agent_kind, AgentKind::Database);
    }

    #[test]
    fn no_signal_returns_default_confidence() {
        let issue = IssueSummary {
            labels: vec![],
            title: "Something unrelated".to_owned(),
            body: String::new(),
        };
        let result = classify(&issue);
        assert_eq!(result.confidence, 0.5);
        // All-zero scores tie-break to the first entry in CLASSIFIABLE_KINDS.
        assert_eq!(result.agent_kind, AgentKind::Backend);
    }

    #[test]
    fn tied_scores_pick_the_earlier_agent_kind() {
        // Two labels that score Frontend and Qa equally (3.0 each); Backend
        // appears before both in CLASSIFIABLE_KINDS but scores zero here, so
        // this isolates the tie-break between two *non-zero* equal scores.
        let issue = IssueSummary {
            labels: vec!["ui".to_owned(), "bug".to_owned()],
            title: String::new(),
            body: String::new(),
        };
        let result = classify(&issue);
        assert_eq!(result.agent_kind, AgentKind::Frontend);
    }

    #[test]
    fn unrecognised_label_is_ignored() {
        let issue = IssueSummary {
            labels: vec!["wontfix".to_owned()],
            title: String::new(),
            body: String::new(),
        };
        let result = classify(&issue);
        assert_eq!(result.confidence, 0.5);
    }
}
