//! Orthos Modules
//!
//! The capability contract shared by all correction modules, the module
//! declaration types, the capability registry and the built-in modules.
//!
//! # Example
//!
//! ```no_run
//! use orthos_modules::{ModuleFactory, ModuleSpec};
//! use orthos_common::{Document, RunParameters};
//!
//! let spec = ModuleSpec::new("errorlist", "errorlist")
//!     .with_source("/data/errors.tsv", "/data/errors.model");
//! let module = ModuleFactory::builtin().create(spec)?;
//! module.train(&RunParameters::default())?;
//!
//! let doc = Document::from_text("letter", "I wa teh best.");
//! let suggestions = module.run(&doc, &RunParameters::default())?;
//! # Ok::<(), orthos_common::OrthosError>(())
//! ```

pub mod artifacts;
pub mod confusible;
pub mod dummy;
pub mod errorlist;
pub mod lexicon;
pub mod module;
pub mod registry;
pub mod spec;
pub mod text;

pub use module::{ModelSlot, Module, Report};
pub use registry::{ModuleConstructor, ModuleFactory};
pub use spec::{Endpoint, ExecutionMode, ModuleOptions, ModuleSpec};
