use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SharkError};

/// Special-status sets recognized from the `special_statuses` config key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpecialStatuses {
    #[serde(rename = "_start_", default)]
    pub start: Vec<String>,
    #[serde(rename = "_complete_", default)]
    pub complete: Vec<String>,
}

/// Config-driven status state machine.
///
/// The graph maps each status to the ordered statuses reachable from it in
/// one step. No status name is hardcoded anywhere outside the default
/// configuration data: every check in the repository and command layers
/// routes through this engine.
#[derive(Debug, Clone)]
pub struct Workflow {
    graph: BTreeMap<String, Vec<String>>,
    start: Vec<String>,
    complete: Vec<String>,
    verbs: BTreeMap<String, String>,
}

impl Workflow {
    pub fn new(
        graph: BTreeMap<String, Vec<String>>,
        special: SpecialStatuses,
        verbs: BTreeMap<String, String>,
    ) -> Result<Self> {
        let wf = Self {
            graph,
            start: special.start,
            complete: special.complete,
            verbs,
        };
        wf.check()?;
        Ok(wf)
    }

    /// The legacy pipeline used when the config carries no workflow section.
    pub fn default_graph() -> BTreeMap<String, Vec<String>> {
        let mut graph = BTreeMap::new();
        graph.insert("todo".into(), vec!["in_progress".into(), "blocked".into()]);
        graph.insert(
            "in_progress".into(),
            vec!["ready_for_review".into(), "blocked".into(), "todo".into()],
        );
        graph.insert("blocked".into(), vec!["todo".into()]);
        graph.insert(
            "ready_for_review".into(),
            vec!["completed".into(), "in_progress".into()],
        );
        graph.insert("completed".into(), vec!["todo".into(), "archived".into()]);
        graph.insert("archived".into(), vec![]);
        graph
    }

    pub fn default_special() -> SpecialStatuses {
        SpecialStatuses {
            start: vec!["todo".into()],
            complete: vec!["completed".into(), "archived".into()],
        }
    }

    /// Default verb → target-status mapping. Remapping a verb (e.g.
    /// `complete` → `ready_for_code_review`) is a config edit, not a code
    /// change.
    pub fn default_verbs() -> BTreeMap<String, String> {
        let mut verbs = BTreeMap::new();
        verbs.insert("start".into(), "in_progress".into());
        verbs.insert("complete".into(), "ready_for_review".into());
        verbs.insert("approve".into(), "completed".into());
        verbs.insert("reopen".into(), "todo".into());
        verbs.insert("block".into(), "blocked".into());
        verbs.insert("unblock".into(), "todo".into());
        verbs
    }

    fn check(&self) -> Result<()> {
        if self.graph.is_empty() {
            return Err(SharkError::ConfigInvalid(
                "status_flow must define at least one status".into(),
            ));
        }
        for (from, nexts) in &self.graph {
            for to in nexts {
                if !self.graph.contains_key(to) {
                    return Err(SharkError::ConfigInvalid(format!(
                        "transition '{from}' -> '{to}' targets an undeclared status"
                    )));
                }
            }
        }
        for s in self.start.iter().chain(&self.complete) {
            if !self.graph.contains_key(s) {
                return Err(SharkError::ConfigInvalid(format!(
                    "special status '{s}' is not in status_flow"
                )));
            }
        }
        if self.start.is_empty() {
            return Err(SharkError::ConfigInvalid(
                "special_statuses._start_ must not be empty".into(),
            ));
        }
        if self.complete.is_empty() {
            return Err(SharkError::ConfigInvalid(
                "special_statuses._complete_ must not be empty".into(),
            ));
        }
        for (verb, target) in &self.verbs {
            if !self.graph.contains_key(target) {
                return Err(SharkError::ConfigInvalid(format!(
                    "verb '{verb}' targets unknown status '{target}'"
                )));
            }
        }
        Ok(())
    }

    fn known(&self) -> String {
        self.graph
            .keys()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn validate_status(&self, status: &str) -> Result<()> {
        if self.graph.contains_key(status) {
            Ok(())
        } else {
            Err(SharkError::InvalidStatus {
                status: status.to_string(),
                known: self.known(),
            })
        }
    }

    pub fn can_transition(&self, from: &str, to: &str) -> bool {
        self.graph
            .get(from)
            .is_some_and(|nexts| nexts.iter().any(|n| n == to))
    }

    pub fn validate_transition(&self, from: &str, to: &str) -> Result<()> {
        self.validate_status(from)?;
        self.validate_status(to)?;
        if self.can_transition(from, to) {
            Ok(())
        } else {
            Err(SharkError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
                allowed: self.allowed_transitions(from).join(", "),
            })
        }
    }

    pub fn all_statuses(&self) -> Vec<&str> {
        self.graph.keys().map(String::as_str).collect()
    }

    pub fn allowed_transitions(&self, from: &str) -> &[String] {
        self.graph.get(from).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn start_statuses(&self) -> &[String] {
        &self.start
    }

    pub fn complete_statuses(&self) -> &[String] {
        &self.complete
    }

    pub fn is_start(&self, status: &str) -> bool {
        self.start.iter().any(|s| s == status)
    }

    pub fn is_complete(&self, status: &str) -> bool {
        self.complete.iter().any(|s| s == status)
    }

    /// Status newly created tasks receive.
    pub fn initial_status(&self) -> &str {
        &self.start[0]
    }

    /// Terminal status that `complete`-style bulk operations target.
    pub fn primary_complete_status(&self) -> &str {
        &self.complete[0]
    }

    /// True when some terminal status is one legal step away.
    pub fn directly_completable(&self, status: &str) -> bool {
        self.first_reachable_complete(status).is_some()
    }

    /// The terminal status one legal step away, if any; the allowed-next
    /// ordering breaks ties when several are reachable.
    pub fn first_reachable_complete(&self, status: &str) -> Option<&str> {
        self.allowed_transitions(status)
            .iter()
            .find(|n| self.is_complete(n))
            .map(String::as_str)
    }

    pub fn verb_target(&self, verb: &str) -> Result<&str> {
        self.verbs
            .get(verb)
            .map(String::as_str)
            .ok_or_else(|| SharkError::UnknownVerb(verb.to_string()))
    }

    /// Sanity checks for `config validate`: statuses no transition reaches.
    pub fn unreachable_statuses(&self) -> Vec<&str> {
        self.graph
            .keys()
            .filter(|s| !self.is_start(s))
            .filter(|s| !self.graph.values().any(|nexts| nexts.contains(s)))
            .map(String::as_str)
            .collect()
    }
}

impl Default for Workflow {
    fn default() -> Self {
        Self::new(
            Self::default_graph(),
            Self::default_special(),
            Self::default_verbs(),
        )
        .expect("default workflow is internally consistent")
    }
}
