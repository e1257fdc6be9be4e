use std::collections::{BTreeMap, HashMap, HashSet};

use pipewright_config::{ExecutionContext, Pipeline, Scope, Step, StepKind, Variable, VariableValue};
use pipewright_workflow::validate;
use tracing::debug;

use crate::error::TemplateError;
use crate::template::Template;

/// Caller overrides applied while generating a pipeline.
#[derive(Debug, Clone, Default)]
pub struct Customizations {
  /// Pipeline name. Defaults to `"{template name} - {project name}"`.
  pub name: Option<String>,
  pub description: Option<String>,
  /// Values that win over the template's variable defaults. Names the
  /// template does not declare are added as extra variables.
  pub variables: BTreeMap<String, VariableValue>,
  /// Replaces the template's default execution context.
  pub context: Option<ExecutionContext>,
  /// Prepended to every generated step id as `{prefix}-{key}`.
  pub step_id_prefix: Option<String>,
}

/// Expand `template` into a new, unsaved pipeline for a project.
///
/// Every local key is mapped to its generated id before any `depends_on`
/// list is rewritten. A dependency on an undeclared key fails generation, as
/// does a resulting step graph that does not validate.
pub fn generate(
  template: &Template,
  project_id: &str,
  project_name: &str,
  customizations: &Customizations,
) -> Result<Pipeline, TemplateError> {
  let keys = template.local_keys()?;

  let ids: HashMap<&str, String> = keys
    .iter()
    .map(|key| {
      let id = match &customizations.step_id_prefix {
        Some(prefix) => format!("{prefix}-{key}"),
        None => key.clone(),
      };
      (key.as_str(), id)
    })
    .collect();

  let context = customizations
    .context
    .clone()
    .unwrap_or_else(|| template.default_context.clone());

  let mut steps = Vec::with_capacity(template.steps.len());
  for (template_step, key) in template.steps.iter().zip(&keys) {
    let id = ids[key.as_str()].clone();

    let depends_on = template_step
      .depends_on
      .iter()
      .map(|dep| {
        ids
          .get(dep.as_str())
          .cloned()
          .ok_or_else(|| TemplateError::DanglingDependency {
            template: template.key.clone(),
            step: key.clone(),
            depends_on: dep.clone(),
          })
      })
      .collect::<Result<Vec<_>, _>>()?;

    let execution = template_step.execution.unwrap_or(context.kind);

    steps.push(Step {
      kind: StepKind::new(execution, id.clone()),
      id,
      name: template_step.name.clone(),
      config: template_step.config.clone(),
      depends_on,
    });
  }

  let report = validate(&steps);
  if !report.is_valid() {
    return Err(TemplateError::InvalidGraph {
      template: template.key.clone(),
      report,
    });
  }

  let mut pipeline = Pipeline::new(
    project_id,
    customizations
      .name
      .clone()
      .unwrap_or_else(|| format!("{} - {}", template.name, project_name)),
  );
  pipeline.description = customizations
    .description
    .clone()
    .unwrap_or_else(|| template.description.clone());
  pipeline.context = context;
  pipeline.steps = steps;

  let scope = Scope::pipeline(&pipeline.id);
  let mut declared = HashSet::new();
  for declaration in &template.variables {
    declared.insert(declaration.name.as_str());
    let value = customizations
      .variables
      .get(&declaration.name)
      .cloned()
      .unwrap_or_else(|| declaration.default.clone());
    pipeline
      .variables
      .push(Variable::new(&declaration.name, value, scope.clone()));
  }
  for (name, value) in &customizations.variables {
    if !declared.contains(name.as_str()) {
      pipeline
        .variables
        .push(Variable::new(name, value.clone(), scope.clone()));
    }
  }

  debug!(
    template = %template.key,
    pipeline_id = %pipeline.id,
    steps = pipeline.steps.len(),
    "generated pipeline from template"
  );

  Ok(pipeline)
}

#[cfg(test)]
mod tests {
  use super::*;
  use pipewright_config::ExecutionKind;

  use crate::template::{TemplateStep, TemplateVariable};

  fn make_template() -> Template {
    let mut template = Template::new("ab", "AB", "two steps");
    template.default_context.kind = ExecutionKind::Sdk;
    template.steps = vec![
      TemplateStep::new("a", "Step A").command("echo a"),
      TemplateStep::new("b", "Step B")
        .depends_on(["a"])
        .execution(ExecutionKind::Docker),
    ];
    template.variables = vec![
      TemplateVariable::new("NODE_ENV", "production"),
      TemplateVariable::new("VERBOSE", false),
    ];
    template
  }

  #[test]
  fn test_dependencies_map_through_generated_ids() {
    let customizations = Customizations {
      step_id_prefix: Some("web".to_string()),
      ..Default::default()
    };
    let pipeline = generate(&make_template(), "proj", "Web", &customizations).unwrap();

    let a = &pipeline.steps[0];
    let b = &pipeline.steps[1];
    assert_eq!(a.id, "web-a");
    assert_eq!(b.id, "web-b");
    assert_eq!(b.depends_on, vec![a.id.clone()]);
    assert_ne!(b.depends_on, vec!["a".to_string()]);
  }

  #[test]
  fn test_ids_default_to_keys() {
    let pipeline = generate(&make_template(), "proj", "Web", &Customizations::default()).unwrap();
    assert_eq!(pipeline.steps[1].depends_on, vec!["a"]);
  }

  #[test]
  fn test_keyless_steps_use_slug() {
    let mut template = Template::new("t", "T", "");
    template.steps = vec![
      TemplateStep {
        key: None,
        ..TemplateStep::new("", "Install Deps")
      },
      TemplateStep::new("test", "Test").depends_on(["install-deps"]),
    ];

    let pipeline = generate(&template, "proj", "P", &Customizations::default()).unwrap();
    assert_eq!(pipeline.steps[0].id, "install-deps");
    assert_eq!(pipeline.steps[1].depends_on, vec!["install-deps"]);
  }

  #[test]
  fn test_kind_marker() {
    let pipeline = generate(&make_template(), "proj", "Web", &Customizations::default()).unwrap();
    assert_eq!(
      pipeline.steps[0].kind,
      StepKind::new(ExecutionKind::Sdk, "a")
    );
    assert_eq!(pipeline.steps[1].kind.to_string(), "docker:b");
  }

  #[test]
  fn test_dangling_key_fails() {
    let mut template = make_template();
    template.steps[1].depends_on = vec!["nope".to_string()];

    let err = generate(&template, "proj", "Web", &Customizations::default()).unwrap_err();
    assert!(matches!(err, TemplateError::DanglingDependency { ref depends_on, .. } if depends_on == "nope"));
  }

  #[test]
  fn test_cyclic_template_fails() {
    let mut template = make_template();
    template.steps[0].depends_on = vec!["b".to_string()];

    let err = generate(&template, "proj", "Web", &Customizations::default()).unwrap_err();
    assert!(matches!(err, TemplateError::InvalidGraph { .. }));
  }

  #[test]
  fn test_variable_overrides() {
    let mut customizations = Customizations::default();
    customizations
      .variables
      .insert("NODE_ENV".to_string(), "staging".into());
    customizations
      .variables
      .insert("EXTRA".to_string(), VariableValue::Number(3.0));

    let pipeline = generate(&make_template(), "proj", "Web", &customizations).unwrap();
    let value = |name: &str| {
      pipeline
        .variables
        .iter()
        .find(|v| v.name == name)
        .map(|v| v.value.clone())
    };

    assert_eq!(value("NODE_ENV"), Some(VariableValue::from("staging")));
    assert_eq!(value("VERBOSE"), Some(VariableValue::Boolean(false)));
    assert_eq!(value("EXTRA"), Some(VariableValue::Number(3.0)));
    assert!(
      pipeline
        .variables
        .iter()
        .all(|v| v.scope == Scope::pipeline(&pipeline.id))
    );
  }

  #[test]
  fn test_pipeline_metadata() {
    let pipeline = generate(&make_template(), "proj", "Web", &Customizations::default()).unwrap();
    assert_eq!(pipeline.name, "AB - Web");
    assert_eq!(pipeline.description, "two steps");
    assert_eq!(pipeline.project_id, "proj");
    assert_eq!(pipeline.context.kind, ExecutionKind::Sdk);
    assert!(pipeline.enabled);

    let named = Customizations {
      name: Some("Custom".to_string()),
      ..Default::default()
    };
    let pipeline = generate(&make_template(), "proj", "Web", &named).unwrap();
    assert_eq!(pipeline.name, "Custom");
  }
}
