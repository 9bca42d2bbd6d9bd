//! Confusible module: decides between words that are often mixed up
//! (`then`/`than`, `its`/`it's`) from their immediate left and right context.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use orthos_common::{
    Document, OrthosError, Replacement, Result, RunParameters, Suggestion, Token,
};

use crate::artifacts;
use crate::module::{Module, ModelSlot, Report};
use crate::spec::ModuleSpec;
use crate::text::match_case;

pub const CAPABILITY: &str = "confusible";

const DEFAULT_CLASS: &str = "confusion";
const BEGIN: &str = "<begin>";
const END: &str = "<end>";

/// Context counts for one confusible word.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct ContextCounts {
    occurrences: u64,
    left: BTreeMap<String, u64>,
    right: BTreeMap<String, u64>,
}

impl ContextCounts {
    fn merge(&mut self, other: ContextCounts) {
        self.occurrences += other.occurrences;
        for (k, v) in other.left {
            *self.left.entry(k).or_insert(0) += v;
        }
        for (k, v) in other.right {
            *self.right.entry(k).or_insert(0) += v;
        }
    }

    fn score(&self, left: &str, right: &str) -> f64 {
        (self.left.get(left).copied().unwrap_or(0) + self.right.get(right).copied().unwrap_or(0)) as f64
    }
}

type ContextModel = BTreeMap<String, ContextCounts>;

/// Outcome of scoring one occurrence against its confusible set.
struct Verdict<'a> {
    best: &'a str,
    best_score: f64,
    total: f64,
}

pub struct ConfusibleModule {
    spec: ModuleSpec,
    sets: Vec<Vec<String>>,
    /// word -> index into `sets`
    membership: HashMap<String, usize>,
    threshold: f64,
    min_evidence: f64,
    class: String,
    model: ModelSlot<ContextModel>,
}

impl ConfusibleModule {
    pub fn new(spec: ModuleSpec) -> Result<Self> {
        let id = spec.id.clone();
        let raw_sets = spec.options.str_list(&id, "sets")?.ok_or_else(|| {
            OrthosError::ConfigInvalid(format!("module '{}': confusible needs a 'sets' option", id))
        })?;

        let mut sets = Vec::new();
        let mut membership = HashMap::new();
        for raw in &raw_sets {
            let mut words: Vec<String> = Vec::new();
            for word in raw.split('|').map(|w| w.trim().to_lowercase()).filter(|w| !w.is_empty()) {
                if !words.contains(&word) {
                    words.push(word);
                }
            }
            if words.len() < 2 {
                return Err(OrthosError::ConfigInvalid(format!(
                    "module '{}': confusible set '{}' needs at least two words",
                    id, raw
                )));
            }
            for word in &words {
                membership.entry(word.clone()).or_insert(sets.len());
            }
            sets.push(words);
        }
        if sets.is_empty() {
            return Err(OrthosError::ConfigInvalid(format!(
                "module '{}': 'sets' must not be empty",
                id
            )));
        }

        let threshold = spec.options.f64(&id, "threshold")?.unwrap_or(1.0);
        if threshold < 0.0 {
            return Err(OrthosError::ConfigInvalid(format!(
                "module '{}': threshold must not be negative",
                id
            )));
        }
        let min_evidence = spec.options.u64(&id, "min_evidence")?.unwrap_or(1) as f64;
        let class = spec
            .options
            .str(&id, "class")?
            .unwrap_or_else(|| DEFAULT_CLASS.to_string());

        if spec.models.is_empty() {
            return Err(OrthosError::ConfigInvalid(format!(
                "module '{}': confusible needs at least one model",
                id
            )));
        }

        Ok(Self {
            spec,
            sets,
            membership,
            threshold,
            min_evidence,
            class,
            model: ModelSlot::new(),
        })
    }

    fn context(tokens: &[Token], i: usize) -> (String, String) {
        let left = match i.checked_sub(1) {
            Some(j) => tokens[j].text.to_lowercase(),
            None => BEGIN.to_string(),
        };
        let right = tokens
            .get(i + 1)
            .map(|t| t.text.to_lowercase())
            .unwrap_or_else(|| END.to_string());
        (left, right)
    }

    fn count_contexts(&self, text: &str) -> ContextModel {
        let mut model = ContextModel::new();
        for line in text.lines() {
            let tokens = Document::from_text("", line).tokens;
            for (i, token) in tokens.iter().enumerate() {
                let word = token.text.to_lowercase();
                if !self.membership.contains_key(&word) {
                    continue;
                }
                let (left, right) = Self::context(&tokens, i);
                let counts = model.entry(word).or_default();
                counts.occurrences += 1;
                *counts.left.entry(left).or_insert(0) += 1;
                *counts.right.entry(right).or_insert(0) += 1;
            }
        }
        model
    }

    fn load_model(&self) -> Result<ContextModel> {
        let mut merged = ContextModel::new();
        for path in &self.spec.models {
            let contents = artifacts::read_model(&self.spec, path)?;
            let model: ContextModel =
                serde_json::from_str(&contents).map_err(|e| OrthosError::RunFailure {
                    module: self.spec.id.clone(),
                    message: format!("corrupt model {}: {}", path.display(), e),
                })?;
            for (word, counts) in model {
                merged.entry(word).or_default().merge(counts);
            }
        }
        Ok(merged)
    }

    /// Scores every member of `word`'s set at position `i`. Ties keep the
    /// earlier member of the set.
    fn judge<'a>(&'a self, model: &ContextModel, word: &str, tokens: &[Token], i: usize) -> Option<(f64, Verdict<'a>)> {
        let set = &self.sets[*self.membership.get(word)?];
        let (left, right) = Self::context(tokens, i);

        let mut current = 0.0;
        let mut total = 0.0;
        let mut best: Option<(&str, f64)> = None;
        for candidate in set {
            let score = model.get(candidate).map(|c| c.score(&left, &right)).unwrap_or(0.0);
            total += score;
            if candidate == word {
                current = score;
            } else if best.map_or(true, |(_, s)| score > s) {
                best = Some((candidate.as_str(), score));
            }
        }

        let (best, best_score) = best?;
        Some((
            current,
            Verdict {
                best,
                best_score,
                total,
            },
        ))
    }

    fn prefers_alternative(&self, current: f64, verdict: &Verdict<'_>) -> bool {
        verdict.total >= self.min_evidence
            && verdict.best_score > 0.0
            && verdict.best_score > current * self.threshold
    }
}

impl Module for ConfusibleModule {
    fn spec(&self) -> &ModuleSpec {
        &self.spec
    }

    fn train(&self, _parameters: &RunParameters) -> Result<()> {
        artifacts::require_sources(&self.spec)?;
        self.model.clear();

        for (source, model) in self.spec.artifacts() {
            tracing::info!(module = %self.spec.id, source = %source.display(), "counting confusible contexts");
            let text = artifacts::read_source(&self.spec, source)?;
            let counts = self.count_contexts(&text);
            if counts.is_empty() {
                tracing::warn!(module = %self.spec.id, source = %source.display(), "no confusible occurrences in source");
            }
            let encoded = serde_json::to_vec_pretty(&counts)?;
            artifacts::write_model(model, &encoded)?;
        }
        Ok(())
    }

    /// Accuracy of keeping or replacing each confusible in `test_source`,
    /// which is assumed to be correct text.
    fn test(&self, parameters: &RunParameters) -> Result<Report> {
        let Some(text) = artifacts::read_option_source(&self.spec, parameters, "test_source")? else {
            return Ok(Report::new());
        };
        let model = self.model.get_or_load(|| self.load_model())?;

        let mut occurrences = 0usize;
        let mut correct = 0usize;
        for line in text.lines() {
            let tokens = Document::from_text("", line).tokens;
            for (i, token) in tokens.iter().enumerate() {
                let word = token.text.to_lowercase();
                if let Some((current, verdict)) = self.judge(&model, &word, &tokens, i) {
                    occurrences += 1;
                    if !self.prefers_alternative(current, &verdict) {
                        correct += 1;
                    }
                }
            }
        }

        let accuracy = if occurrences == 0 {
            0.0
        } else {
            correct as f64 / occurrences as f64
        };
        Ok(Report::new()
            .with("occurrences", occurrences as f64)
            .with("accuracy", accuracy))
    }

    fn load(&self) -> Result<()> {
        self.model.get_or_load(|| self.load_model()).map(|_| ())
    }

    fn unload(&self) {
        self.model.clear();
    }

    fn run(&self, document: &Document, parameters: &RunParameters) -> Result<Vec<Suggestion>> {
        let model = self.model.get_or_load(|| self.load_model())?;
        let tokens = &document.tokens;

        let mut suggestions = Vec::new();
        for (i, token) in tokens.iter().enumerate() {
            let word = token.text.to_lowercase();
            let Some((current, verdict)) = self.judge(&model, &word, tokens, i) else {
                continue;
            };
            if parameters.debug {
                tracing::debug!(
                    module = %self.spec.id,
                    word = %word,
                    current,
                    best = verdict.best,
                    best_score = verdict.best_score,
                    "scored confusible"
                );
            }
            if self.prefers_alternative(current, &verdict) {
                let replacement = Replacement::new(match_case(&token.text, verdict.best))
                    .with_confidence(verdict.best_score / verdict.total);
                suggestions.push(
                    Suggestion::for_token(token, vec![replacement]).with_class(self.class.clone()),
                );
            }
        }
        Ok(suggestions)
    }
}
