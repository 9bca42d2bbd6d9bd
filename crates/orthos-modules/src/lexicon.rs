//! Lexicon module: flags out-of-vocabulary words and proposes frequent
//! lexicon entries within a bounded edit distance.

use std::collections::{BTreeMap, HashMap};

use orthos_common::{
    Document, OrthosError, Replacement, Result, RunParameters, Suggestion,
};

use crate::artifacts;
use crate::module::{Module, ModelSlot, Report};
use crate::spec::ModuleSpec;
use crate::text::{bounded_levenshtein, is_word, match_case};

pub const CAPABILITY: &str = "lexicon";

const DEFAULT_CLASS: &str = "nonworderror";

#[derive(Debug)]
struct Lexicon {
    frequencies: HashMap<String, u64>,
    /// Entries ordered by descending frequency, then alphabetically
    ranked: Vec<(String, u64)>,
}

impl Lexicon {
    fn from_counts(frequencies: HashMap<String, u64>) -> Self {
        let mut ranked: Vec<(String, u64)> =
            frequencies.iter().map(|(w, c)| (w.clone(), *c)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Self {
            frequencies,
            ranked,
        }
    }

    fn contains(&self, word: &str) -> bool {
        self.frequencies.contains_key(&word.to_lowercase())
    }

    /// Closest entries first, more frequent first among equals.
    fn candidates(&self, word: &str, max_distance: usize, limit: usize) -> Vec<(String, u64)> {
        let word = word.to_lowercase();
        let mut found: Vec<(usize, &String, u64)> = self
            .ranked
            .iter()
            .filter_map(|(entry, count)| {
                bounded_levenshtein(&word, entry, max_distance).map(|d| (d, entry, *count))
            })
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| b.2.cmp(&a.2)).then_with(|| a.1.cmp(b.1)));
        found
            .into_iter()
            .take(limit)
            .map(|(_, entry, count)| (entry.clone(), count))
            .collect()
    }
}

pub struct LexiconModule {
    spec: ModuleSpec,
    min_frequency: u64,
    max_distance: usize,
    max_suggestions: usize,
    class: String,
    model: ModelSlot<Lexicon>,
}

impl LexiconModule {
    pub fn new(spec: ModuleSpec) -> Result<Self> {
        let id = spec.id.clone();
        let min_frequency = spec.options.u64(&id, "min_frequency")?.unwrap_or(1);
        let max_distance = spec.options.u64(&id, "max_distance")?.unwrap_or(2) as usize;
        let max_suggestions = spec.options.u64(&id, "max_suggestions")?.unwrap_or(3) as usize;
        let class = spec
            .options
            .str(&id, "class")?
            .unwrap_or_else(|| DEFAULT_CLASS.to_string());

        if spec.models.is_empty() {
            return Err(OrthosError::ConfigInvalid(format!(
                "module '{}': lexicon needs at least one model",
                id
            )));
        }
        if max_suggestions == 0 {
            return Err(OrthosError::ConfigInvalid(format!(
                "module '{}': max_suggestions must be at least 1",
                id
            )));
        }

        Ok(Self {
            spec,
            min_frequency,
            max_distance,
            max_suggestions,
            class,
            model: ModelSlot::new(),
        })
    }

    fn load_model(&self) -> Result<Lexicon> {
        let mut frequencies: HashMap<String, u64> = HashMap::new();
        for path in &self.spec.models {
            let contents = artifacts::read_model(&self.spec, path)?;
            for line in contents.lines().filter(|l| !l.is_empty()) {
                let parsed = line
                    .split_once('\t')
                    .and_then(|(word, count)| count.parse::<u64>().ok().map(|c| (word, c)));
                let (word, count) = parsed.ok_or_else(|| OrthosError::RunFailure {
                    module: self.spec.id.clone(),
                    message: format!("corrupt lexicon {}: '{}'", path.display(), line),
                })?;
                *frequencies.entry(word.to_string()).or_insert(0) += count;
            }
        }
        Ok(Lexicon::from_counts(frequencies))
    }

    fn suggest(&self, lexicon: &Lexicon, word: &str, max_distance: usize) -> Vec<Replacement> {
        let candidates = lexicon.candidates(word, max_distance, self.max_suggestions);
        let total: u64 = candidates.iter().map(|(_, c)| c).sum();
        candidates
            .into_iter()
            .map(|(entry, count)| {
                Replacement::new(match_case(word, &entry))
                    .with_confidence(count as f64 / total.max(1) as f64)
            })
            .collect()
    }
}

impl Module for LexiconModule {
    fn spec(&self) -> &ModuleSpec {
        &self.spec
    }

    fn train(&self, _parameters: &RunParameters) -> Result<()> {
        artifacts::require_sources(&self.spec)?;
        self.model.clear();

        for (source, model) in self.spec.artifacts() {
            tracing::info!(module = %self.spec.id, source = %source.display(), "building lexicon");
            let text = artifacts::read_source(&self.spec, source)?;

            let mut counts: BTreeMap<String, u64> = BTreeMap::new();
            for token in Document::from_text("", text).tokens {
                if is_word(&token.text) {
                    *counts.entry(token.text.to_lowercase()).or_insert(0) += 1;
                }
            }

            let mut out = String::new();
            for (word, count) in counts.iter().filter(|(_, c)| **c >= self.min_frequency) {
                out.push_str(word);
                out.push('\t');
                out.push_str(&count.to_string());
                out.push('\n');
            }
            artifacts::write_model(model, out.as_bytes())?;
        }
        Ok(())
    }

    fn test(&self, parameters: &RunParameters) -> Result<Report> {
        let lexicon = self.model.get_or_load(|| self.load_model())?;
        let mut report = Report::new().with("entries", lexicon.frequencies.len() as f64);

        if let Some(text) = artifacts::read_option_source(&self.spec, parameters, "test_source")? {
            let words: Vec<String> = Document::from_text("", text)
                .tokens
                .into_iter()
                .filter(|t| is_word(&t.text))
                .map(|t| t.text)
                .collect();
            let oov = words.iter().filter(|w| !lexicon.contains(w)).count();
            report.insert("tokens", words.len() as f64);
            report.insert("oov_rate", ratio(oov, words.len()));
        }
        Ok(report)
    }

    /// Picks the edit distance (1 to 3) whose suggestions most often contain
    /// the right correction for the pairs in `tune_source`.
    fn tune(&self, parameters: &RunParameters) -> Result<Report> {
        let Some(text) = artifacts::read_option_source(&self.spec, parameters, "tune_source")? else {
            return Ok(Report::new());
        };
        let lexicon = self.model.get_or_load(|| self.load_model())?;

        let pairs: Vec<(&str, &str)> = text
            .lines()
            .filter_map(|line| line.split_once('\t'))
            .map(|(wrong, correct)| (wrong.trim(), correct.trim()))
            .collect();

        let mut best = (self.max_distance, -1.0);
        for distance in 1..=3 {
            let hits = pairs
                .iter()
                .filter(|(wrong, correct)| {
                    self.suggest(&lexicon, wrong, distance)
                        .iter()
                        .any(|r| r.text.eq_ignore_ascii_case(correct))
                })
                .count();
            let rate = ratio(hits, pairs.len());
            tracing::debug!(module = %self.spec.id, distance, rate, "tuning max_distance");
            if rate > best.1 {
                best = (distance, rate);
            }
        }

        Ok(Report::new()
            .with("pairs", pairs.len() as f64)
            .with("max_distance", best.0 as f64)
            .with("hit_rate", best.1.max(0.0)))
    }

    fn load(&self) -> Result<()> {
        self.model.get_or_load(|| self.load_model()).map(|_| ())
    }

    fn unload(&self) {
        self.model.clear();
    }

    fn run(&self, document: &Document, _parameters: &RunParameters) -> Result<Vec<Suggestion>> {
        let lexicon = self.model.get_or_load(|| self.load_model())?;

        Ok(document
            .tokens
            .iter()
            .filter(|token| is_word(&token.text) && !lexicon.contains(&token.text))
            .map(|token| {
                let replacements = self.suggest(&lexicon, &token.text, self.max_distance);
                Suggestion::for_token(token, replacements).with_class(self.class.clone())
            })
            .collect())
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;

    const CORPUS: &str = "The cat sat on the mat. The dog was there and the cat was happy.";

    fn lexicon_in(dir: &Path, options: &[(&str, serde_json::Value)]) -> LexiconModule {
        let source = dir.join("corpus.txt");
        std::fs::write(&source, CORPUS).unwrap();
        let mut spec = ModuleSpec::new("lexicon", CAPABILITY).with_source(source, dir.join("lexicon.model"));
        for (k, v) in options {
            spec = spec.with_option(*k, v.clone());
        }
        LexiconModule::new(spec).unwrap()
    }

    #[test]
    fn test_flags_unknown_words_with_ranked_suggestions() {
        let dir = tempfile::tempdir().unwrap();
        let module = lexicon_in(dir.path(), &[]);
        module.train(&RunParameters::default()).unwrap();

        let doc = Document::from_text("d", "Teh cat wsa happy.");
        let suggestions = module.run(&doc, &RunParameters::default()).unwrap();

        let flagged: Vec<&str> = suggestions.iter().map(|s| s.original.as_str()).collect();
        assert_eq!(flagged, vec!["Teh", "wsa"]);
        assert_eq!(suggestions[0].replacements[0].text, "The");
        assert!(suggestions[1].proposes("was"));

        let total: f64 = suggestions[0]
            .replacements
            .iter()
            .filter_map(|r| r.confidence)
            .sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_min_frequency_prunes_rare_words() {
        let dir = tempfile::tempdir().unwrap();
        let module = lexicon_in(dir.path(), &[("min_frequency", json!(2))]);
        module.train(&RunParameters::default()).unwrap();

        let report = module.test(&RunParameters::default()).unwrap();
        // the, cat, was
        assert_eq!(report.get("entries"), Some(3.0));
    }

    #[test]
    fn test_oov_rate_over_test_source() {
        let dir = tempfile::tempdir().unwrap();
        let held_out = dir.path().join("held_out.txt");
        std::fs::write(&held_out, "the cat zzz qqq").unwrap();
        let module = lexicon_in(dir.path(), &[("test_source", json!(held_out.to_str().unwrap()))]);
        module.train(&RunParameters::default()).unwrap();

        let report = module.test(&RunParameters::default()).unwrap();
        assert_eq!(report.get("oov_rate"), Some(0.5));
    }

    #[test]
    fn test_tune_reports_best_distance() {
        let dir = tempfile::tempdir().unwrap();
        let pairs = dir.path().join("pairs.tsv");
        std::fs::write(&pairs, "teh\tthe\nhapyy\thappy\n").unwrap();
        let module = lexicon_in(dir.path(), &[("tune_source", json!(pairs.to_str().unwrap()))]);
        module.train(&RunParameters::default()).unwrap();

        let report = module.tune(&RunParameters::default()).unwrap();
        assert_eq!(report.get("max_distance"), Some(2.0));
        assert_eq!(report.get("hit_rate"), Some(1.0));
    }

    #[test]
    fn test_missing_source_on_train() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ModuleSpec::new("lexicon", CAPABILITY)
            .with_source(dir.path().join("absent.txt"), dir.path().join("lexicon.model"));
        let module = LexiconModule::new(spec).unwrap();
        assert!(matches!(module.train(&RunParameters::default()), Err(OrthosError::MissingSource { .. })));
    }
}
