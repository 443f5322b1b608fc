use std::sync::Arc;

use indexmap::IndexMap;
use indoc::indoc;
use makestyles_compiler::loader::MockModuleLoader;
use makestyles_compiler::runtime::{make_styles, styles, StyleSheet};
use makestyles_compiler::sandbox::EvaluatedValue;
use makestyles_compiler::{
  CallSiteOutcome, ConfigurationError, CssEmission, FailureKind, ModuleId, Severity,
  StyleCompilerConfig, StyleTransformError, StyleTransformer, TransformInput,
};
use pretty_assertions::assert_eq;
use tracing_test::traced_test;

mod support;

use support::{tokens, transform, transformer};

const TOKENS: &str = indoc! {r#"
  export const spacing = { s: '4px', m: '8px' };
  export const colors = { brand: '#0f6cbd', muted: '#616161' };
  export function px(value: number): string {
    return `${value}px`;
  }
"#};

fn typescript() -> StyleCompilerConfig {
  StyleCompilerConfig::from_json(r#"{ "parserFeatures": ["typescript"] }"#).unwrap()
}

fn rewritten(outcome: &CallSiteOutcome) -> (&IndexMap<String, Vec<String>>, &IndexMap<String, Vec<String>>) {
  match outcome {
    CallSiteOutcome::Rewritten {
      class_mapping,
      rule_groups,
    } => (class_mapping, rule_groups),
    CallSiteOutcome::Skipped { message, .. } => panic!("call site was skipped: {message}"),
  }
}

#[test]
fn padding_left_and_flex_display_compile_to_two_classes() {
  let transformer = transformer(&[], StyleCompilerConfig::default());
  let output = transform(
    &transformer,
    "/src/Button.js",
    indoc! {r#"
      import { makeStyles } from '@griffel/react';
      export const useStyles = makeStyles({ root: { paddingLeft: '1px', display: 'flex' } });
    "#},
  );

  let (class_mapping, rule_groups) = rewritten(&output.call_sites[0].outcome);
  let root = &class_mapping["root"];
  assert_eq!(root.len(), 2);
  assert_eq!(
    rule_groups["d"],
    vec![
      format!(".{}{{padding-left:1px;}}", root[0]),
      format!(
        ".{}{{display:-webkit-box;display:-webkit-flex;display:flex;}}",
        root[1]
      ),
    ]
  );
}

#[test]
fn identical_declarations_share_classes_across_units() {
  let transformer = transformer(
    &[],
    StyleCompilerConfig {
      css_emission: CssEmission::Extract,
      ..Default::default()
    },
  );
  let button = indoc! {r#"
    import { makeStyles } from '@griffel/react';
    export const useStyles = makeStyles({ root: { paddingLeft: '1px', display: 'flex' } });
  "#};
  let card = indoc! {r#"
    import { makeStyles } from '@griffel/react';
    export const useStyles = makeStyles({
      header: { paddingLeft: '1px' },
      body: { paddingLeft: '1px', color: 'red' },
    });
  "#};

  let outputs = transformer.transform_all(vec![
    TransformInput::new("/src/Button.js", button),
    TransformInput::new("/src/Card.js", card),
  ]);
  let outputs: Vec<_> = outputs.into_iter().map(Result::unwrap).collect();

  let (button_classes, _) = rewritten(&outputs[0].call_sites[0].outcome);
  let (card_classes, _) = rewritten(&outputs[1].call_sites[0].outcome);
  assert_eq!(button_classes["root"][0], card_classes["header"][0]);
  assert_eq!(card_classes["header"][0], card_classes["body"][0]);

  // the padding rule appears once within the card unit and once across the build
  assert_eq!(outputs[1].css_artifacts.len(), 2);
  assert_eq!(transformer.registry().len(), 3);
  let stylesheet = transformer.registry().stylesheet();
  assert_eq!(stylesheet.matches("padding-left:1px").count(), 1);
}

#[test]
fn compilation_is_deterministic_across_transformers() {
  let files = [("/src/tokens.ts", TOKENS)];
  let source = indoc! {r#"
    import { makeStyles } from '@griffel/react';
    import { spacing, colors, px } from './tokens';

    export const useStyles = makeStyles({
      root: {
        padding: spacing.m,
        color: colors.brand,
        ':hover': { color: colors.muted },
        '@media (min-width: 480px)': { width: px(120) },
      },
    });
  "#};

  let first = transform(&transformer(&files, typescript()), "/src/Card.ts", source);
  let second = transform(&transformer(&files, typescript()), "/src/Card.ts", source);

  assert_eq!(first.code, second.code);
  assert_eq!(first.call_sites, second.call_sites);
}

#[test]
fn rewritten_primitive_matches_runtime_fallback() {
  let transformer = transformer(&[("/src/tokens.ts", TOKENS)], typescript());
  let output = transform(
    &transformer,
    "/src/Card.ts",
    indoc! {r#"
      import { makeStyles } from '@griffel/react';
      import { spacing, colors } from './tokens';

      export const useStyles = makeStyles({
        root: { margin: `0 ${spacing.s}`, ':focus-visible': { outlineColor: colors.brand } },
        label: { userSelect: 'none' },
      });
    "#},
  );

  let (class_mapping, rule_groups) = rewritten(&output.call_sites[0].outcome);
  let mut optimized_sheet = StyleSheet::new();
  let optimized = styles(&mut optimized_sheet, class_mapping, rule_groups);

  let literal = |value: &str| EvaluatedValue::String(value.to_string());
  let style_object = EvaluatedValue::Object(IndexMap::from([
    (
      String::from("root"),
      EvaluatedValue::Object(IndexMap::from([
        (String::from("margin"), literal("0 4px")),
        (
          String::from(":focus-visible"),
          EvaluatedValue::Object(IndexMap::from([(
            String::from("outlineColor"),
            literal("#0f6cbd"),
          )])),
        ),
      ])),
    ),
    (
      String::from("label"),
      EvaluatedValue::Object(IndexMap::from([(String::from("userSelect"), literal("none"))])),
    ),
  ]));
  let mut fallback_sheet = StyleSheet::new();
  let fallback = make_styles(&mut fallback_sheet, &style_object, "f").unwrap();

  for slot in ["root", "label"] {
    assert_eq!(tokens(&optimized[slot]), tokens(&fallback[slot]));
  }
  assert_eq!(
    optimized_sheet.rules().collect::<Vec<_>>(),
    fallback_sheet.rules().collect::<Vec<_>>()
  );
}

#[test]
fn unresolvable_call_sites_stay_byte_identical() {
  let transformer = transformer(&[], StyleCompilerConfig::default());
  let browser_only = "makeStyles({ root: { width: `${window.innerWidth}px` } })";
  let source = format!(
    "import {{ makeStyles }} from '@griffel/react';\n\
     export const useDynamic = {browser_only};\n\
     export const useStatic = makeStyles({{ root: {{ color: 'red' }} }});\n"
  );

  let output = transform(&transformer, "/src/Banner.js", &source);

  assert!(output.code.contains(&format!("export const useDynamic = {browser_only};\n")));
  assert!(!output.code.contains("useStatic = makeStyles"));
  assert!(matches!(
    &output.call_sites[0].outcome,
    CallSiteOutcome::Skipped { kind: FailureKind::EvaluationRuntimeFailure, .. }
  ));
  assert_eq!(output.diagnostics.len(), 1);
  assert_eq!(output.diagnostics[0].severity, Severity::Warning);
  assert_eq!(output.diagnostics[0].source_range, output.call_sites[0].source_range);
  assert_eq!(&source[output.call_sites[0].source_range.clone()], browser_only);
}

#[test]
fn fully_unresolvable_unit_is_returned_unchanged() {
  let transformer = transformer(&[], StyleCompilerConfig::default());
  let source = indoc! {r#"
    import { makeStyles } from '@griffel/react';
    import { theme } from 'some-package';

    export const useStyles = makeStyles({ root: { color: theme.color } });
  "#};

  let output = transform(&transformer, "/src/Themed.js", source);
  assert_eq!(output.code, source);
  assert!(matches!(
    &output.call_sites[0].outcome,
    CallSiteOutcome::Skipped { kind: FailureKind::UnresolvableDependency, .. }
  ));
}

#[test]
fn shared_dependency_module_runs_once_per_unit() {
  let transformer = transformer(
    &[(
      "/src/counter.ts",
      indoc! {r#"
        export const state = { loads: 0 };
        state.loads += 1;
        export const size = 8;
      "#},
    )],
    typescript(),
  );
  let output = transform(
    &transformer,
    "/src/List.ts",
    indoc! {r#"
      import { makeStyles } from '@griffel/react';
      import { state, size } from './counter';

      export const useA = makeStyles({ root: { zIndex: state.loads, width: size } });
      export const useB = makeStyles({ root: { zIndex: state.loads } });
    "#},
  );

  let (first, first_rules) = rewritten(&output.call_sites[0].outcome);
  let (second, _) = rewritten(&output.call_sites[1].outcome);
  assert_eq!(first["root"][0], second["root"][0]);
  assert!(first_rules["d"][0].ends_with("{z-index:1;}"));
  assert_eq!(
    output
      .execution_report
      .module_executions
      .get(&ModuleId::from("/src/counter.ts")),
    Some(&1)
  );
}

#[test]
fn circular_dependencies_are_reported() {
  let transformer = transformer(
    &[
      ("/src/a.js", "import { b } from './b';\nexport const a = b + 1;\n"),
      ("/src/b.js", "import { a } from './a';\nexport const b = a + 1;\n"),
    ],
    StyleCompilerConfig::default(),
  );
  let source = indoc! {r#"
    import { makeStyles } from '@griffel/react';
    import { a } from './a';
    export const useStyles = makeStyles({ root: { zIndex: a } });
  "#};

  let output = transform(&transformer, "/src/Cycle.js", source);
  assert_eq!(output.code, source);
  match &output.call_sites[0].outcome {
    CallSiteOutcome::Skipped { kind, message, .. } => {
      assert_eq!(*kind, FailureKind::UnresolvableDependency);
      assert!(message.starts_with("Circular dependency"), "{message}");
    }
    other => panic!("expected a skipped call site, got {other:?}"),
  }
}

#[test]
fn failing_keys_are_listed_in_the_diagnostic() {
  let transformer = transformer(&[], StyleCompilerConfig::default());
  let output = transform(
    &transformer,
    "/src/Mixed.js",
    indoc! {r#"
      import { makeStyles } from '@griffel/react';
      export const useStyles = makeStyles({
        ok: { color: 'red' },
        wide: { width: window.innerWidth },
        tall: { height: document.body.clientHeight },
      });
    "#},
  );

  match &output.call_sites[0].outcome {
    CallSiteOutcome::Skipped { failed_keys, .. } => {
      assert_eq!(failed_keys, &vec![String::from("wide"), String::from("tall")]);
    }
    other => panic!("expected a skipped call site, got {other:?}"),
  }
  assert_eq!(
    output.diagnostics[0].hints,
    vec![String::from("These style keys could not be evaluated: wide, tall")]
  );
}

#[test]
fn dependency_modules_are_read_once_per_build() {
  let mut loader = MockModuleLoader::new();
  loader
    .expect_resolve()
    .returning(|_, specifier| Ok(ModuleId::new(format!("/src/{}.js", &specifier[2..]))));
  loader
    .expect_read()
    .withf(|module_id| module_id.as_str() == "/src/tokens.js")
    .times(1)
    .returning(|_| Ok(String::from("export const brand = 'teal';")));

  let transformer = StyleTransformer::new(StyleCompilerConfig::default(), Arc::new(loader)).unwrap();
  let source = indoc! {r#"
    import { makeStyles } from '@griffel/react';
    import { brand } from './tokens';
    export const useStyles = makeStyles({ root: { color: brand } });
  "#};

  for path in ["/src/A.js", "/src/B.js", "/src/C.js"] {
    let output = transform(&transformer, path, source);
    assert!(output.code.contains("color:teal;"));
  }
  assert_eq!(transformer.module_cache().len(), 1);
}

#[test]
fn unit_top_level_modifications_leave_the_call_untouched() {
  let transformer = transformer(&[], StyleCompilerConfig::default());
  let source = indoc! {r#"
    import { makeStyles } from '@griffel/react';
    const theme = {};
    theme.color = 'red';
    export const useStyles = makeStyles({ root: { color: theme.color } });
  "#};

  let output = transform(&transformer, "/src/Late.js", source);
  assert_eq!(output.code, source);
  match &output.call_sites[0].outcome {
    CallSiteOutcome::Skipped { kind, message, .. } => {
      assert_eq!(*kind, FailureKind::UnresolvableDependency);
      assert!(message.contains("'theme'"), "{message}");
    }
    other => panic!("expected a skipped call site, got {other:?}"),
  }
}

#[test]
fn dependency_initializer_side_effects_are_applied() {
  let transformer = transformer(
    &[(
      "/src/palette.js",
      indoc! {r#"
        export const palette = {};
        function add(key, value) {
          palette[key] = value;
          return value;
        }
        export const brand = add('brand', 'red');
      "#},
    )],
    StyleCompilerConfig::default(),
  );
  let output = transform(
    &transformer,
    "/src/Swatch.js",
    indoc! {r#"
      import { makeStyles } from '@griffel/react';
      import { palette } from './palette';
      export const useStyles = makeStyles({ root: { color: palette.brand } });
    "#},
  );

  let (_, rule_groups) = rewritten(&output.call_sites[0].outcome);
  assert!(rule_groups["d"][0].ends_with("{color:red;}"), "{:?}", rule_groups["d"]);
}

#[test]
fn dependencies_needing_disabled_parser_features_are_fatal() {
  let transformer = transformer(
    &[("/src/sizes.ts", "export const gap: number = 4;\n")],
    StyleCompilerConfig::default(),
  );
  let error = transformer
    .transform(TransformInput::new(
      "/src/Grid.js",
      indoc! {r#"
        import { makeStyles } from '@griffel/react';
        import { gap } from './sizes';
        export const useStyles = makeStyles({ root: { gap } });
      "#},
    ))
    .unwrap_err();

  match error {
    StyleTransformError::Configuration(ConfigurationError::MissingParserFeature {
      module_id,
      features,
    }) => {
      assert_eq!(module_id, "/src/sizes.ts");
      assert_eq!(features, vec!["typescript"]);
    }
    other => panic!("expected a missing parser feature, got {other:?}"),
  }
}

#[test]
fn invalid_configuration_is_fatal() {
  let error = StyleCompilerConfig::from_json(r#"{ "parserFeatures": ["flow"] }"#).unwrap_err();
  assert!(error.to_string().contains("flow"));

  let loader = MockModuleLoader::new();
  let result = StyleTransformer::new(
    StyleCompilerConfig {
      max_evaluation_steps: 0,
      ..Default::default()
    },
    Arc::new(loader),
  );
  assert!(result.is_err());
}

#[traced_test]
#[test]
fn skipped_call_sites_are_logged() {
  let transformer = transformer(&[], StyleCompilerConfig::default());
  transform(
    &transformer,
    "/src/Viewport.js",
    indoc! {r#"
      import { makeStyles } from '@griffel/react';
      export const useStyles = makeStyles({ root: { height: window.innerHeight } });
    "#},
  );

  assert!(logs_contain("Style call left for the runtime"));
  assert!(logs_contain("/src/Viewport.js"));
}
