//! Scoring a run against a reference annotation.
//!
//! A suggestion is a true positive when the reference has a correction on
//! exactly the same span and that correction is among the suggestion's
//! replacements. Anything else it proposes is a false positive; reference
//! corrections nobody matched are false negatives.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use orthos_common::{OrthosError, Result, Span, Suggestion};

use crate::annotated::AnnotatedDocument;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceCorrection {
    pub offset: usize,
    pub length: usize,
    pub correction: String,
}

impl ReferenceCorrection {
    pub fn span(&self) -> Span {
        Span::new(self.offset, self.length)
    }
}

/// Expected corrections for one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub corrections: Vec<ReferenceCorrection>,
}

impl Reference {
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| {
            OrthosError::InvalidRequest(format!("malformed reference {}: {}", path.display(), e))
        })
    }

    /// Distinct expected corrections grouped by span; repeated entries
    /// count once.
    fn by_span(&self) -> BTreeMap<Span, Vec<&str>> {
        let mut spans: BTreeMap<Span, Vec<&str>> = BTreeMap::new();
        for c in &self.corrections {
            let corrections = spans.entry(c.span()).or_default();
            if !corrections.contains(&c.correction.as_str()) {
                corrections.push(c.correction.as_str());
            }
        }
        spans
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl Scores {
    fn from_counts(tp: usize, fp: usize, fn_: usize) -> Self {
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Self {
            true_positives: tp,
            false_positives: fp,
            false_negatives: fn_,
            precision,
            recall,
            f1,
        }
    }
}

impl fmt::Display for Scores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tp={} fp={} fn={} precision={:.4} recall={:.4} f1={:.4}",
            self.true_positives,
            self.false_positives,
            self.false_negatives,
            self.precision,
            self.recall,
            self.f1
        )
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleScores {
    pub module: String,
    pub scores: Scores,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Per module, in registration order
    pub modules: Vec<ModuleScores>,
    pub overall: Scores,
    /// Modules that failed during the run and were not scored
    pub failed: Vec<String>,
}

impl EvaluationReport {
    pub fn module(&self, id: &str) -> Option<&Scores> {
        self.modules.iter().find(|m| m.module == id).map(|m| &m.scores)
    }
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for m in &self.modules {
            writeln!(f, "{:<16} {}", m.module, m.scores)?;
        }
        for module in &self.failed {
            writeln!(f, "{:<16} failed, not scored", module)?;
        }
        write!(f, "{:<16} {}", "overall", self.overall)
    }
}

/// Scores every module's suggestions and their union against `reference`.
pub fn evaluate(annotated: &AnnotatedDocument, reference: &Reference) -> EvaluationReport {
    let expected = reference.by_span();
    let total_expected: usize = expected.values().map(Vec::len).sum();

    let modules = annotated
        .annotations
        .iter()
        .map(|a| ModuleScores {
            module: a.module.clone(),
            scores: score(a.suggestions.iter(), &expected, total_expected),
        })
        .collect();

    // merge suggestions on the same span across modules
    let mut merged: BTreeMap<Span, Suggestion> = BTreeMap::new();
    for (_, suggestion) in annotated.suggestions() {
        merged
            .entry(suggestion.span)
            .and_modify(|existing| {
                for r in &suggestion.replacements {
                    if !existing.proposes(&r.text) {
                        existing.replacements.push(r.clone());
                    }
                }
            })
            .or_insert_with(|| suggestion.clone());
    }

    EvaluationReport {
        modules,
        overall: score(merged.values(), &expected, total_expected),
        failed: annotated.failed().into_iter().map(String::from).collect(),
    }
}

fn score<'a>(
    suggestions: impl Iterator<Item = &'a Suggestion>,
    expected: &BTreeMap<Span, Vec<&str>>,
    total_expected: usize,
) -> Scores {
    let mut matched: BTreeSet<(Span, &str)> = BTreeSet::new();
    let mut false_positives = 0;

    for suggestion in suggestions {
        let hits: Vec<&str> = expected
            .get(&suggestion.span)
            .map(|corrections| {
                corrections
                    .iter()
                    .copied()
                    .filter(|c| suggestion.proposes(c))
                    .collect()
            })
            .unwrap_or_default();

        if hits.is_empty() {
            false_positives += 1;
        }
        for hit in hits {
            matched.insert((suggestion.span, hit));
        }
    }

    let true_positives = matched.len();
    Scores::from_counts(
        true_positives,
        false_positives,
        total_expected.saturating_sub(true_positives),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use orthos_common::{Document, Replacement};

    fn reference(entries: &[(usize, usize, &str)]) -> Reference {
        Reference {
            corrections: entries
                .iter()
                .map(|&(offset, length, correction)| ReferenceCorrection {
                    offset,
                    length,
                    correction: correction.to_string(),
                })
                .collect(),
        }
    }

    fn suggest(doc: &Document, token: usize, replacements: &[&str]) -> Suggestion {
        Suggestion::for_token(
            &doc.tokens[token],
            replacements.iter().map(|r| Replacement::new(*r)).collect(),
        )
    }

    #[test]
    fn test_per_module_and_overall_scores() {
        // "I wa teh best." : wa@2..4, teh@5..8
        let doc = Document::from_text("d", "I wa teh best.");
        let mut annotated = AnnotatedDocument::new(doc.clone());
        annotated.annotate("errorlist", vec![suggest(&doc, 2, &["the"]), suggest(&doc, 3, &["bets"])]);
        annotated.annotate("lexicon", vec![suggest(&doc, 1, &["was", "we"]), suggest(&doc, 2, &["ten"])]);
        annotated.fail("confusible", &OrthosError::NoAvailableServer("confusible".into()));

        let report = evaluate(&annotated, &reference(&[(2, 2, "was"), (5, 3, "the")]));

        let errorlist = report.module("errorlist").unwrap();
        assert_eq!(
            (errorlist.true_positives, errorlist.false_positives, errorlist.false_negatives),
            (1, 1, 1)
        );
        assert_eq!(errorlist.precision, 0.5);
        assert_eq!(errorlist.recall, 0.5);

        let lexicon = report.module("lexicon").unwrap();
        assert_eq!(
            (lexicon.true_positives, lexicon.false_positives, lexicon.false_negatives),
            (1, 1, 1)
        );

        // "teh" is proposed by both modules and merged into one suggestion
        let overall = report.overall;
        assert_eq!(
            (overall.true_positives, overall.false_positives, overall.false_negatives),
            (2, 1, 0)
        );
        assert_eq!(overall.recall, 1.0);
        assert_eq!(report.failed, vec!["confusible".to_string()]);
        assert!(report.to_string().contains("confusible       failed, not scored"));
    }

    #[test]
    fn test_repeated_reference_entries_count_once() {
        let doc = Document::from_text("d", "I wa teh best.");
        let mut annotated = AnnotatedDocument::new(doc.clone());
        annotated.annotate("errorlist", vec![suggest(&doc, 2, &["the"])]);

        let report = evaluate(
            &annotated,
            &reference(&[(5, 3, "the"), (5, 3, "the"), (2, 2, "was"), (2, 2, "was")]),
        );
        let scores = report.module("errorlist").unwrap();
        assert_eq!(
            (scores.true_positives, scores.false_positives, scores.false_negatives),
            (1, 0, 1)
        );
        assert_eq!(scores.recall, 0.5);
    }

    #[test]
    fn test_division_by_zero_is_zero() {
        let doc = Document::from_text("d", "fine text");
        let mut annotated = AnnotatedDocument::new(doc);
        annotated.annotate("errorlist", Vec::new());

        let report = evaluate(&annotated, &Reference::default());
        let scores = report.module("errorlist").unwrap();
        assert_eq!(scores.precision, 0.0);
        assert_eq!(scores.recall, 0.0);
        assert_eq!(scores.f1, 0.0);
    }

    #[test]
    fn test_reference_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.json");
        std::fs::write(&path, r#"{ "corrections": [ { "offset": 5, "length": 3, "correction": "the" } ] }"#)
            .unwrap();
        let reference = Reference::from_path(&path).unwrap();
        assert_eq!(reference.corrections[0].span(), Span::new(5, 3));

        std::fs::write(&path, "[]").unwrap();
        assert!(matches!(Reference::from_path(&path), Err(OrthosError::InvalidRequest(_))));
    }
}
