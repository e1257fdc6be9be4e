use pipewright_config::{ExecutionContext, ExecutionKind};

use crate::template::{Template, TemplateStep, TemplateVariable};

const BUILTIN_KEYS: [&str; 4] = ["node", "rust", "python", "docker"];

/// Whether `key` belongs to a built-in template.
pub fn is_builtin(key: &str) -> bool {
  BUILTIN_KEYS.contains(&key)
}

/// Look up a built-in template by key.
pub fn builtin(key: &str) -> Option<Template> {
  match key {
    "node" => Some(node()),
    "rust" => Some(rust()),
    "python" => Some(python()),
    "docker" => Some(docker()),
    _ => None,
  }
}

/// All built-in templates, in a fixed order.
pub fn builtin_templates() -> Vec<Template> {
  BUILTIN_KEYS.iter().filter_map(|key| builtin(key)).collect()
}

fn sdk(name: &str) -> ExecutionContext {
  ExecutionContext {
    kind: ExecutionKind::Sdk,
    sdk: Some(name.to_string()),
    ..Default::default()
  }
}

fn node() -> Template {
  Template {
    framework: "node".to_string(),
    category: "build".to_string(),
    default_context: sdk("node@20"),
    tags: vec!["javascript".to_string(), "npm".to_string()],
    steps: vec![
      TemplateStep::new("install", "Install dependencies").command("npm ci"),
      TemplateStep::new("lint", "Lint")
        .command("npm run lint")
        .depends_on(["install"]),
      TemplateStep::new("test", "Test")
        .command("npm test")
        .depends_on(["install"]),
      TemplateStep::new("build", "Build")
        .command("npm run build")
        .depends_on(["lint", "test"]),
    ],
    variables: vec![TemplateVariable::new("NODE_ENV", "production")],
    ..Template::new("node", "Node.js", "Install, lint, test and build an npm project")
  }
}

fn rust() -> Template {
  Template {
    framework: "rust".to_string(),
    category: "build".to_string(),
    default_context: sdk("rust@stable"),
    tags: vec!["rust".to_string(), "cargo".to_string()],
    steps: vec![
      TemplateStep::new("fetch", "Fetch crates").command("cargo fetch"),
      TemplateStep::new("fmt", "Check formatting").command("cargo fmt --check"),
      TemplateStep::new("clippy", "Clippy")
        .command("cargo clippy --all-targets -- -D warnings")
        .depends_on(["fetch"]),
      TemplateStep::new("test", "Test")
        .command("cargo test")
        .depends_on(["fetch"]),
      TemplateStep::new("build", "Build release")
        .command("cargo build --release")
        .depends_on(["fmt", "clippy", "test"]),
    ],
    variables: vec![TemplateVariable::new("CARGO_TERM_COLOR", "always")],
    ..Template::new("rust", "Rust", "Format check, lint, test and build a cargo workspace")
  }
}

fn python() -> Template {
  Template {
    framework: "python".to_string(),
    category: "build".to_string(),
    default_context: sdk("python@3.12"),
    tags: vec!["python".to_string(), "pip".to_string()],
    steps: vec![
      TemplateStep::new("install", "Install dependencies")
        .command("pip install -r requirements.txt"),
      TemplateStep::new("lint", "Lint")
        .command("ruff check .")
        .depends_on(["install"]),
      TemplateStep::new("test", "Test")
        .command("pytest")
        .depends_on(["install"]),
      TemplateStep::new("package", "Build package")
        .command("python -m build")
        .depends_on(["lint", "test"]),
    ],
    variables: vec![TemplateVariable::new("PYTHONUNBUFFERED", true)],
    ..Template::new("python", "Python", "Install, lint, test and package a Python project")
  }
}

fn docker() -> Template {
  Template {
    framework: "docker".to_string(),
    category: "deploy".to_string(),
    default_context: ExecutionContext {
      kind: ExecutionKind::Docker,
      ..Default::default()
    },
    tags: vec!["container".to_string()],
    steps: vec![
      TemplateStep::new("build", "Build image")
        .command("docker build -t {{ IMAGE_NAME }}:{{ IMAGE_TAG }} ."),
      TemplateStep::new("scan", "Scan image")
        .command("docker scout cves {{ IMAGE_NAME }}:{{ IMAGE_TAG }}")
        .depends_on(["build"]),
      TemplateStep::new("push", "Push image")
        .command("docker push {{ IMAGE_NAME }}:{{ IMAGE_TAG }}")
        .depends_on(["scan"]),
    ],
    variables: vec![
      TemplateVariable::new("IMAGE_NAME", "app"),
      TemplateVariable::new("IMAGE_TAG", "latest"),
    ],
    ..Template::new("docker", "Docker", "Build, scan and push a container image")
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::generate::{Customizations, generate};

  #[test]
  fn test_builtins_have_no_identity() {
    let templates = builtin_templates();
    assert_eq!(templates.len(), BUILTIN_KEYS.len());
    for template in &templates {
      assert!(is_builtin(&template.key));
      assert!(template.id.is_none());
    }
  }

  #[test]
  fn test_builtins_generate_valid_pipelines() {
    for template in builtin_templates() {
      template.check_references().unwrap();
      let pipeline = generate(&template, "proj", "Demo", &Customizations::default()).unwrap();
      assert_eq!(pipeline.steps.len(), template.steps.len());
    }
  }

  #[test]
  fn test_unknown_builtin() {
    assert!(builtin("cobol").is_none());
    assert!(!is_builtin("cobol"));
  }
}
