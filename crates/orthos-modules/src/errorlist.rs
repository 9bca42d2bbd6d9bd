//! Error list module: flags words found in a list of known misspellings.
//!
//! Sources are delimited `wrong<delim>correct` pairs (or `correct<delim>wrong`
//! with `reversed`). Training normalizes them into a sorted, de-duplicated,
//! tab-separated model so repeated training yields identical artifacts.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use orthos_common::{
    Document, OrthosError, Replacement, Result, RunParameters, Suggestion,
};

use crate::artifacts;
use crate::module::{Module, ModelSlot, Report};
use crate::spec::ModuleSpec;

pub const CAPABILITY: &str = "errorlist";

const DEFAULT_CLASS: &str = "nonworderror";

#[derive(Debug)]
struct ErrorList {
    corrections: HashMap<String, Vec<String>>,
}

pub struct ErrorListModule {
    spec: ModuleSpec,
    delimiter: String,
    reversed: bool,
    class: String,
    model: ModelSlot<ErrorList>,
}

impl ErrorListModule {
    pub fn new(spec: ModuleSpec) -> Result<Self> {
        let delimiter = match spec.options.str(&spec.id, "delimiter")? {
            None => "\t".to_string(),
            Some(d) => match d.to_lowercase().as_str() {
                "" | "tab" => "\t".to_string(),
                "space" => " ".to_string(),
                "tilde" => "~".to_string(),
                _ => d,
            },
        };
        let reversed = spec.options.bool(&spec.id, "reversed")?.unwrap_or(false);
        let class = spec
            .options
            .str(&spec.id, "class")?
            .unwrap_or_else(|| DEFAULT_CLASS.to_string());

        if spec.models.is_empty() {
            return Err(OrthosError::ConfigInvalid(format!(
                "module '{}': errorlist needs at least one model",
                spec.id
            )));
        }

        Ok(Self {
            spec,
            delimiter,
            reversed,
            class,
            model: ModelSlot::new(),
        })
    }

    /// Parses one source file into `wrong -> {correct}`.
    fn parse_source(&self, path: &Path) -> Result<BTreeMap<String, BTreeSet<String>>> {
        let contents = artifacts::read_source(&self.spec, path)?;
        let mut pairs: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for (lineno, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(self.delimiter.as_str()).map(str::trim).collect();
            if fields.len() != 2 || fields.iter().any(|f| f.is_empty()) {
                return Err(OrthosError::TrainingFailure {
                    module: self.spec.id.clone(),
                    message: format!(
                        "{}:{}: expected two fields, got {}",
                        path.display(),
                        lineno + 1,
                        fields.len()
                    ),
                });
            }
            let (wrong, correct) = if self.reversed {
                (fields[1], fields[0])
            } else {
                (fields[0], fields[1])
            };
            pairs
                .entry(wrong.to_string())
                .or_default()
                .insert(correct.to_string());
        }
        Ok(pairs)
    }

    fn load_model(&self) -> Result<ErrorList> {
        let mut corrections: HashMap<String, Vec<String>> = HashMap::new();

        for path in &self.spec.models {
            let contents = artifacts::read_model(&self.spec, path)?;
            tracing::debug!(module = %self.spec.id, path = %path.display(), "loading error list");

            for line in contents.lines().filter(|l| !l.is_empty()) {
                let (wrong, correct) = line.split_once('\t').ok_or_else(|| OrthosError::RunFailure {
                    module: self.spec.id.clone(),
                    message: format!("corrupt model {}: '{}'", path.display(), line),
                })?;
                let entry = corrections.entry(wrong.to_string()).or_default();
                if !entry.iter().any(|c| c == correct) {
                    entry.push(correct.to_string());
                }
            }
        }

        Ok(ErrorList { corrections })
    }
}

impl Module for ErrorListModule {
    fn spec(&self) -> &ModuleSpec {
        &self.spec
    }

    fn train(&self, _parameters: &RunParameters) -> Result<()> {
        artifacts::require_sources(&self.spec)?;
        self.model.clear();

        for (source, model) in self.spec.artifacts() {
            tracing::info!(module = %self.spec.id, source = %source.display(), "training error list");
            let pairs = self.parse_source(source)?;

            let mut out = String::new();
            for (wrong, corrections) in &pairs {
                for correct in corrections {
                    out.push_str(wrong);
                    out.push('\t');
                    out.push_str(correct);
                    out.push('\n');
                }
            }
            artifacts::write_model(model, out.as_bytes())?;
        }
        Ok(())
    }

    fn test(&self, _parameters: &RunParameters) -> Result<Report> {
        let model = self.model.get_or_load(|| self.load_model())?;
        let ambiguous = model.corrections.values().filter(|c| c.len() > 1).count();
        Ok(Report::new()
            .with("entries", model.corrections.len() as f64)
            .with("ambiguous_entries", ambiguous as f64))
    }

    fn load(&self) -> Result<()> {
        self.model.get_or_load(|| self.load_model()).map(|_| ())
    }

    fn unload(&self) {
        self.model.clear();
    }

    fn run(&self, document: &Document, _parameters: &RunParameters) -> Result<Vec<Suggestion>> {
        let model = self.model.get_or_load(|| self.load_model())?;

        Ok(document
            .tokens
            .iter()
            .filter_map(|token| {
                model.corrections.get(&token.text).map(|corrections| {
                    let replacements = corrections.iter().map(Replacement::new).collect();
                    Suggestion::for_token(token, replacements).with_class(self.class.clone())
                })
            })
            .collect())
    }
}
