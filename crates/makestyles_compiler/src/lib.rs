//! Build-time compilation of `makeStyles` declarations into atomic CSS.
//!
//! A compilation unit flows through five stages:
//!
//! * [`detector`] finds calls to the configured style-definition function
//! * [`dependency_resolver`] computes the bindings each style expression needs, following
//!   imports through the [`module_graph`]
//! * [`sandbox`] evaluates all style expressions of the unit in one isolated batch
//! * [`style_compiler`] turns the resolved style objects into atomic classes and CSS rules
//! * [`rewriter`] replaces each resolved call with a call to the lightweight runtime primitive
//!
//! Call sites that cannot be resolved are left untouched so the runtime fallback path keeps
//! working unchanged.

pub mod call_site;
pub mod config;
pub mod dependency_resolver;
pub mod detector;
pub mod diagnostic;
pub mod loader;
pub mod module_graph;
pub mod rewriter;
pub mod runtime;
pub mod sandbox;
pub mod style_compiler;
mod transformer;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{
  ConfigurationError, CssEmission, ParserFeature, StyleCompilerConfig, StyleFunctionImport,
};
pub use diagnostic::{Diagnostic, FailureKind, Severity};
pub use loader::{FileSystemModuleLoader, ModuleId, ModuleLoader};
pub use transformer::{
  CallSiteOutcome, CallSiteReport, StyleTransformError, StyleTransformer, TransformInput,
  TransformOutput,
};
