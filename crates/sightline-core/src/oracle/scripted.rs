//! # Scripted Oracle
//!
//! Replays a recorded JSON transcript instead of calling a model. Used for
//! offline replays, the HTTP reconcile route, tests and benchmarks.
//!
//! ```json
//! {
//!   "initial": [{"description": "Start", "suggested_id": "Start"}],
//!   "steps": {"Start": {"outgoing_edges": [{"target_id": "A"}]}},
//!   "audits": {"A": [{"audit_confirmed_incoming": ["Start"]}]},
//!   "synthesis": "graph TD\n    Start --> A"
//! }
//! ```
//!
//! Steps are keyed by the registry-resolved node id. Each node's audit
//! responses are consumed in order; the last one repeats forever.

use super::{ImageRef, Oracle};
use crate::drafts::{DraftOracle, DraftSource};
use crate::graph::GraphStructure;
use crate::{Focus, OracleError, SightlineError, StepInterpretation, TokenUsage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

/// Recorded oracle answers for one image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transcript {
    /// Answer to `find_initial_focus`.
    pub initial: Vec<Focus>,
    /// node id -> answer to `interpret_step`.
    pub steps: BTreeMap<String, StepInterpretation>,
    /// node id -> successive answers to `audit_node`.
    pub audits: BTreeMap<String, Vec<StepInterpretation>>,
    /// Answer to `synthesize`. Absent means no usable text.
    pub synthesis: Option<String>,
    /// draft source name -> whole-diagram text, for multi-draft mode.
    pub drafts: BTreeMap<String, String>,
    /// Draft id -> anchor id, applied to every non-anchor draft.
    pub id_map: BTreeMap<String, String>,
    /// Usage charged for every call.
    pub usage_per_call: TokenUsage,
    /// Unknown nodes are errors instead of empty reports.
    pub strict: bool,
}

/// `Oracle` backed by a [`Transcript`].
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    transcript: Transcript,
    /// node id -> audit responses already served.
    audit_cursor: Mutex<BTreeMap<String, usize>>,
}

impl ScriptedOracle {
    #[must_use]
    pub fn new(transcript: Transcript) -> Self {
        Self {
            transcript,
            audit_cursor: Mutex::new(BTreeMap::new()),
        }
    }

    /// Parse a JSON transcript.
    pub fn from_json(json: &str) -> Result<Self, SightlineError> {
        let transcript: Transcript = serde_json::from_str(json)
            .map_err(|e| SightlineError::SerializationError(format!("Invalid transcript: {}", e)))?;
        Ok(Self::new(transcript))
    }

    /// Load a JSON transcript from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SightlineError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            SightlineError::IoError(format!("Cannot read transcript '{}': {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    #[must_use]
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    fn node_key(focus: &Focus) -> &str {
        focus.suggested_id.as_deref().unwrap_or_default()
    }

    fn unknown(&self, what: &str, node: &str) -> Result<StepInterpretation, OracleError> {
        if self.transcript.strict {
            Err(OracleError::MissingScript(format!("{} of '{}'", what, node)))
        } else {
            Ok(StepInterpretation::default())
        }
    }
}

impl Oracle for ScriptedOracle {
    fn find_initial_focus(&self, _image: &ImageRef) -> Result<(Vec<Focus>, TokenUsage), OracleError> {
        if self.transcript.strict && self.transcript.initial.is_empty() {
            return Err(OracleError::MissingScript("initial focus".to_string()));
        }
        Ok((self.transcript.initial.clone(), self.transcript.usage_per_call))
    }

    fn interpret_step(
        &self,
        _image: &ImageRef,
        focus: &Focus,
        _history: &[StepInterpretation],
    ) -> Result<(StepInterpretation, TokenUsage), OracleError> {
        let node = Self::node_key(focus);
        let step = match self.transcript.steps.get(node) {
            Some(step) => step.clone(),
            None => self.unknown("step", node)?,
        };
        Ok((step, self.transcript.usage_per_call))
    }

    fn audit_node(
        &self,
        _image: &ImageRef,
        focus: &Focus,
        _history: &[StepInterpretation],
        _proposed_in: &[String],
        _proposed_out: &[String],
    ) -> Result<(StepInterpretation, TokenUsage), OracleError> {
        let node = Self::node_key(focus);
        let Some(queue) = self.transcript.audits.get(node).filter(|q| !q.is_empty()) else {
            return Ok((self.unknown("audit", node)?, self.transcript.usage_per_call));
        };

        let mut cursor = self
            .audit_cursor
            .lock()
            .map_err(|_| OracleError::Transport("audit cursor poisoned".to_string()))?;
        let served = cursor.entry(node.to_string()).or_insert(0);
        let index = (*served).min(queue.len().saturating_sub(1));
        *served = served.saturating_add(1);

        let response = queue.get(index).cloned().unwrap_or_default();
        Ok((response, self.transcript.usage_per_call))
    }

    fn synthesize(
        &self,
        _image: &ImageRef,
        _history: &[StepInterpretation],
    ) -> Result<(String, TokenUsage), OracleError> {
        match &self.transcript.synthesis {
            Some(text) => Ok((text.clone(), self.transcript.usage_per_call)),
            None if self.transcript.strict => {
                Err(OracleError::MissingScript("synthesis".to_string()))
            }
            None => Ok((String::new(), self.transcript.usage_per_call)),
        }
    }
}

impl DraftOracle for ScriptedOracle {
    fn draft(&self, _image: &ImageRef, source: &DraftSource) -> Result<String, OracleError> {
        self.transcript
            .drafts
            .get(&source.name)
            .cloned()
            .ok_or_else(|| OracleError::MissingScript(format!("draft '{}'", source.name)))
    }

    fn map_ids(
        &self,
        _anchor: &GraphStructure,
        draft: &GraphStructure,
    ) -> Result<BTreeMap<String, String>, OracleError> {
        Ok(self
            .transcript
            .id_map
            .iter()
            .filter(|(from, _)| draft.contains_node(from))
            .map(|(from, to)| (from.clone(), to.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> ImageRef {
        ImageRef::new("test.png")
    }

    #[test]
    fn audit_queue_repeats_last_response() {
        let oracle = ScriptedOracle::from_json(
            r#"{"audits":{"A":[
                {"audit_confirmed_outgoing":["B"]},
                {"audit_confirmed_outgoing":["B","C"]}
            ]}}"#,
        )
        .expect("transcript");
        let focus = Focus::new("a", "A");
        let answers: Vec<_> = (0..3)
            .map(|_| {
                oracle
                    .audit_node(&image(), &focus, &[], &[], &[])
                    .expect("audit")
                    .0
                    .audit_confirmed_outgoing
                    .unwrap_or_default()
                    .len()
            })
            .collect();
        assert_eq!(answers, vec![1, 2, 2]);
    }

    #[test]
    fn unknown_node_is_empty_unless_strict() {
        let lenient = ScriptedOracle::default();
        let (step, _) = lenient
            .interpret_step(&image(), &Focus::new("x", "X"), &[])
            .expect("lenient");
        assert!(step.outgoing_edges.is_empty());

        let strict = ScriptedOracle::new(Transcript {
            strict: true,
            ..Transcript::default()
        });
        let err = strict
            .interpret_step(&image(), &Focus::new("x", "X"), &[])
            .expect_err("strict");
        assert!(matches!(err, OracleError::MissingScript(_)));
    }

    #[test]
    fn usage_is_charged_per_call() {
        let oracle = ScriptedOracle::new(Transcript {
            usage_per_call: TokenUsage::new(10, 2),
            synthesis: Some("graph TD".into()),
            ..Transcript::default()
        });
        let (_, usage) = oracle.synthesize(&image(), &[]).expect("synthesize");
        assert_eq!(usage.total(), 12);
    }

    #[test]
    fn missing_draft_is_an_error() {
        let oracle = ScriptedOracle::default();
        let source = DraftSource::new("Optimist", "");
        assert!(matches!(
            oracle.draft(&image(), &source),
            Err(OracleError::MissingScript(_))
        ));
    }

    #[test]
    fn malformed_transcript_is_a_serialization_error() {
        let result = ScriptedOracle::from_json("{not json");
        assert!(matches!(result, Err(SightlineError::SerializationError(_))));
    }
}
