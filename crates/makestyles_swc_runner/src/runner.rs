use std::string::FromUtf8Error;

use swc_core::common::input::StringInput;
use swc_core::common::sync::Lrc;
use swc_core::common::{BytePos, FileName, Globals, Mark, SourceMap, Span, Spanned, GLOBALS};
use swc_core::ecma::ast::{EsVersion, Expr, Module};
use swc_core::ecma::codegen::text_writer::JsWriter;
use swc_core::ecma::codegen::{Config as CodegenConfig, Emitter, Node};
use swc_core::ecma::parser::lexer::Lexer;
use swc_core::ecma::parser::{EsSyntax, Parser, Syntax, TsSyntax};
use swc_core::ecma::transforms::base::resolver;
use swc_core::ecma::visit::{Visit, VisitMutWith, VisitWith};

/// Source-language features the parser should accept.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ParseOptions {
  pub jsx: bool,
  pub typescript: bool,
  pub decorators: bool,
}

impl ParseOptions {
  pub fn syntax(&self) -> Syntax {
    if self.typescript {
      Syntax::Typescript(TsSyntax {
        tsx: self.jsx,
        decorators: self.decorators,
        ..Default::default()
      })
    } else {
      Syntax::Es(EsSyntax {
        jsx: self.jsx,
        decorators: self.decorators,
        ..Default::default()
      })
    }
  }
}

pub struct RunContext {
  /// Source-map in use
  pub source_map: Lrc<SourceMap>,
  /// Global mark from SWC resolver
  pub global_mark: Mark,
  /// Unresolved mark from SWC resolver
  pub unresolved_mark: Mark,
  /// Position of the first byte of the parsed source
  pub start_pos: BytePos,
}

impl RunContext {
  /// Byte offsets of `span` into the original source text.
  pub fn byte_range(&self, span: Span) -> std::ops::Range<usize> {
    let start = (span.lo.0 - self.start_pos.0) as usize;
    let end = (span.hi.0 - self.start_pos.0) as usize;
    start..end
  }
}

/// A module parsed without hygiene information.
pub struct ParsedModule {
  pub module: Module,
  pub start_pos: BytePos,
}

#[derive(Debug, thiserror::Error)]
pub enum RunWithTransformationError {
  #[error("Failed to parse module: {message}")]
  SwcParse { message: String, span: Span },
  #[error("IO Error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Invalid utf-8 output: {0}")]
  InvalidUtf8Output(#[from] FromUtf8Error),
}

impl RunWithTransformationError {
  fn from_parse_error(error: swc_core::ecma::parser::error::Error) -> Self {
    RunWithTransformationError::SwcParse {
      message: error.kind().msg().to_string(),
      span: error.span(),
    }
  }
}

/// Parse `code` as an ES module.
///
/// Recoverable parser errors are treated as failures: a module that only parses with
/// error recovery is not safe to evaluate.
pub fn parse_module(
  file_name: &str,
  code: &str,
  options: ParseOptions,
) -> Result<ParsedModule, RunWithTransformationError> {
  let source_map = Lrc::new(SourceMap::default());
  let (module, start_pos) = parse_with_source_map(&source_map, file_name, code, options)?;
  Ok(ParsedModule { module, start_pos })
}

fn parse_with_source_map(
  source_map: &Lrc<SourceMap>,
  file_name: &str,
  code: &str,
  options: ParseOptions,
) -> Result<(Module, BytePos), RunWithTransformationError> {
  let source_file = source_map.new_source_file(
    Lrc::new(FileName::Custom(file_name.to_string())),
    code.to_string(),
  );

  let lexer = Lexer::new(
    options.syntax(),
    EsVersion::latest(),
    StringInput::from(&*source_file),
    None,
  );

  let mut parser = Parser::new_from(lexer);
  let module = parser
    .parse_module()
    .map_err(RunWithTransformationError::from_parse_error)?;

  if let Some(error) = parser.take_errors().into_iter().next() {
    return Err(RunWithTransformationError::from_parse_error(error));
  }

  Ok((module, source_file.start_pos))
}

/// Parse code, run the hygiene resolver over it, then run the `transform` function with the
/// parsed module.
///
/// The resolver marks let callers tell module-level bindings apart from shadowing locals by
/// comparing `SyntaxContext`s.
pub fn run_with_resolver<R>(
  file_name: &str,
  code: &str,
  options: ParseOptions,
  transform: impl FnOnce(RunContext, &mut Module) -> R,
) -> Result<R, RunWithTransformationError> {
  let source_map = Lrc::new(SourceMap::default());
  let (mut module, start_pos) = parse_with_source_map(&source_map, file_name, code, options)?;

  GLOBALS.set(&Globals::new(), || {
    let global_mark = Mark::new();
    let unresolved_mark = Mark::new();
    module.visit_mut_with(&mut resolver(
      unresolved_mark,
      global_mark,
      options.typescript,
    ));

    let context = RunContext {
      source_map: source_map.clone(),
      global_mark,
      unresolved_mark,
      start_pos,
    };
    Ok(transform(context, &mut module))
  })
}

/// Same as `run_with_resolver` but drives a `Visit` implementation and returns it.
pub fn run_visit_const<V: Visit>(
  file_name: &str,
  code: &str,
  options: ParseOptions,
  make_visit: impl FnOnce(RunContext) -> V,
) -> Result<V, RunWithTransformationError> {
  run_with_resolver(file_name, code, options, |context, module| {
    let mut visit = make_visit(context);
    module.visit_with(&mut visit);
    visit
  })
}

/// Print a single expression as minified JavaScript.
pub fn emit_expr(expr: &Expr) -> Result<String, RunWithTransformationError> {
  let source_map = Lrc::new(SourceMap::default());
  let mut output_buffer = vec![];
  {
    let writer = JsWriter::new(source_map.clone(), "\n", &mut output_buffer, None);
    let mut emitter = Emitter {
      cfg: CodegenConfig::default().with_minify(true),
      cm: source_map.clone(),
      comments: None,
      wr: writer,
    };
    expr.emit_with(&mut emitter)?;
  }

  Ok(String::from_utf8(output_buffer)?)
}

#[cfg(test)]
mod tests {
  use indoc::indoc;
  use swc_core::ecma::ast::{CallExpr, Callee, Ident, Lit, Str};
  use swc_core::ecma::visit::Visit;

  use super::*;

  #[test]
  fn test_parse_module() {
    let parsed = parse_module("a.js", "export const a = 1;", ParseOptions::default()).unwrap();
    assert_eq!(parsed.module.body.len(), 1);
  }

  #[test]
  fn test_parse_error() {
    let error = parse_module("a.js", "const = ;", ParseOptions::default())
      .err()
      .unwrap();
    assert!(matches!(error, RunWithTransformationError::SwcParse { .. }));
  }

  #[test]
  fn test_typescript_requires_feature() {
    let code = "const a: number = 1;";
    assert!(parse_module("a.ts", code, ParseOptions::default()).is_err());
    assert!(parse_module(
      "a.ts",
      code,
      ParseOptions {
        typescript: true,
        ..Default::default()
      }
    )
    .is_ok());
  }

  #[test]
  fn test_run_visit_const_sees_hygiene_marks() {
    struct CallCollector {
      unresolved: Option<Mark>,
      calls: Vec<(String, bool)>,
    }

    impl Visit for CallCollector {
      fn visit_call_expr(&mut self, call: &CallExpr) {
        if let Callee::Expr(callee) = &call.callee {
          if let Some(Ident { sym, ctxt, .. }) = callee.as_ident() {
            let is_global = Some(ctxt.outer()) == self.unresolved;
            self.calls.push((sym.to_string(), is_global));
          }
        }
      }
    }

    let code = indoc! {r#"
      import { makeStyles } from 'lib';
      makeStyles({});
      unknown({});
    "#};
    let collector = run_visit_const("a.js", code, ParseOptions::default(), |context| {
      CallCollector {
        unresolved: Some(context.unresolved_mark),
        calls: vec![],
      }
    })
    .unwrap();

    assert_eq!(
      collector.calls,
      vec![
        ("makeStyles".to_string(), false),
        ("unknown".to_string(), true)
      ]
    );
  }

  #[test]
  fn test_byte_range() {
    let code = "const a = call(1);";
    let range = run_with_resolver("a.js", code, ParseOptions::default(), |context, module| {
      let span = module.body[0].as_stmt().unwrap().as_decl().unwrap().as_var().unwrap().decls[0]
        .init
        .as_ref()
        .unwrap()
        .as_call()
        .unwrap()
        .span;
      context.byte_range(span)
    })
    .unwrap();
    assert_eq!(&code[range], "call(1)");
  }

  #[test]
  fn test_emit_expr() {
    let expr = Expr::Lit(Lit::Str(Str::from("replacement")));
    assert_eq!(emit_expr(&expr).unwrap(), "\"replacement\"");
  }
}
