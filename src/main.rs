use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pipewright_config::{Pipeline, Scope, SecretReference, Step, Variable, VariableValue};
use pipewright_orchestrator::{DryRunExecutor, Orchestrator, OrchestratorConfig};
use pipewright_resolver::{EnvVault, StandardResolver};
use pipewright_store::{FsStore, PipelineStore, VariableStore};
use pipewright_template::{Customizations, FsTemplateRegistry, TemplateRegistry};
use pipewright_workflow::{plan, validate};

/// Pipewright - define, plan and run multi-step pipelines
#[derive(Parser)]
#[command(name = "pipewright")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.pipewright)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Rendered into working directories as `project_path` (default: current directory)
  #[arg(long, global = true)]
  project_root: Option<PathBuf>,

  /// Fail a step that runs longer than this many seconds (0 disables)
  #[arg(long, global = true)]
  step_timeout_secs: Option<u64>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Manage pipelines
  Pipeline {
    #[command(subcommand)]
    command: PipelineCommand,
  },

  /// Check a pipeline's step graph
  Validate {
    /// Pipeline id
    pipeline: String,
  },

  /// Print the waves a pipeline would run in
  Plan {
    /// Pipeline id
    pipeline: String,
  },

  /// Manage templates
  Template {
    #[command(subcommand)]
    command: TemplateCommand,
  },

  /// Manage variables
  Var {
    #[command(subcommand)]
    command: VarCommand,
  },

  /// Manage secret references
  Secret {
    #[command(subcommand)]
    command: SecretCommand,
  },

  /// Run a pipeline, streaming status updates as JSON lines
  Run {
    /// Pipeline id
    pipeline: String,

    /// Walk the plan without executing anything
    #[arg(long)]
    dry_run: bool,

    /// Step ids the dry run reports as failed
    #[arg(long = "fail", value_name = "STEP")]
    fail: Vec<String>,
  },
}

#[derive(Subcommand)]
enum PipelineCommand {
  /// Create a pipeline, optionally with steps read from a JSON file
  Create {
    #[arg(long)]
    project: String,
    #[arg(long)]
    name: String,
    #[arg(long)]
    description: Option<String>,
    /// JSON array of steps
    #[arg(long)]
    steps: Option<PathBuf>,
  },
  /// List pipelines
  List {
    #[arg(long)]
    project: Option<String>,
  },
  /// Print a pipeline as JSON
  Show { pipeline: String },
  /// Delete a pipeline
  Delete { pipeline: String },
  /// Copy a pipeline under a new id
  Duplicate { pipeline: String },
  /// Enable a pipeline
  Enable { pipeline: String },
  /// Disable a pipeline
  Disable { pipeline: String },
}

#[derive(Subcommand)]
enum TemplateCommand {
  /// List built-in and user templates
  List,
  /// Print a template as JSON
  Show { key: String },
  /// Export a template as JSON
  Export {
    key: String,
    /// Write to a file instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
  },
  /// Import a template from an exported JSON file
  Import { file: PathBuf },
  /// Generate and save a pipeline from a template
  Generate {
    key: String,
    #[arg(long)]
    project: String,
    #[arg(long)]
    project_name: String,
    /// Pipeline name (default: "{template} - {project name}")
    #[arg(long)]
    name: Option<String>,
    /// Override a variable default, KEY=VALUE
    #[arg(long = "var", value_name = "KEY=VALUE")]
    vars: Vec<String>,
    /// Prefix for generated step ids
    #[arg(long)]
    prefix: Option<String>,
  },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct ScopeArgs {
  /// Project scope
  #[arg(long)]
  project: Option<String>,
  /// Pipeline scope
  #[arg(long)]
  pipeline: Option<String>,
}

impl ScopeArgs {
  fn scope(&self) -> Result<Scope> {
    match (&self.project, &self.pipeline) {
      (Some(project), None) => Ok(Scope::project(project)),
      (None, Some(pipeline)) => Ok(Scope::pipeline(pipeline)),
      _ => bail!("exactly one of --project or --pipeline is required"),
    }
  }
}

#[derive(Subcommand)]
enum VarCommand {
  /// Set a variable. Values "true"/"false" and numbers are typed accordingly.
  Set {
    #[command(flatten)]
    scope: ScopeArgs,
    name: String,
    value: String,
  },
  /// List variables in a scope
  List {
    #[command(flatten)]
    scope: ScopeArgs,
  },
  /// Delete a variable
  Delete {
    #[command(flatten)]
    scope: ScopeArgs,
    name: String,
  },
}

#[derive(Subcommand)]
enum SecretCommand {
  /// Attach a vault secret under a display name
  Add {
    #[command(flatten)]
    scope: ScopeArgs,
    name: String,
    /// Vault key
    secret_id: String,
  },
  /// List secret references in a scope
  List {
    #[command(flatten)]
    scope: ScopeArgs,
  },
  /// Remove a secret reference
  Remove {
    #[command(flatten)]
    scope: ScopeArgs,
    name: String,
  },
}

struct App {
  data_dir: PathBuf,
  project_root: PathBuf,
  step_timeout: Option<Duration>,
}

impl App {
  async fn store(&self) -> Result<Arc<FsStore>> {
    let root = self.data_dir.join("store");
    let store = FsStore::open(&root)
      .await
      .with_context(|| format!("failed to open store at {}", root.display()))?;
    Ok(Arc::new(store))
  }

  fn templates(&self) -> FsTemplateRegistry {
    FsTemplateRegistry::new(self.data_dir.join("templates"))
  }
}

fn main() -> Result<()> {
  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "pipewright=info".into()),
    )
    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
    .init();

  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".pipewright"),
  };
  let project_root = match cli.project_root {
    Some(root) => root,
    None => std::env::current_dir().context("could not determine current directory")?,
  };
  let step_timeout = match cli.step_timeout_secs {
    Some(0) => None,
    Some(secs) => Some(Duration::from_secs(secs)),
    None => OrchestratorConfig::default().step_timeout,
  };
  let app = App {
    data_dir,
    project_root,
    step_timeout,
  };

  let Some(command) = cli.command else {
    println!("pipewright - use --help to see available commands");
    return Ok(());
  };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async {
    match command {
      Commands::Pipeline { command } => pipeline_command(&app, command).await,
      Commands::Validate { pipeline } => validate_pipeline(&app, &pipeline).await,
      Commands::Plan { pipeline } => plan_pipeline(&app, &pipeline).await,
      Commands::Template { command } => template_command(&app, command).await,
      Commands::Var { command } => var_command(&app, command).await,
      Commands::Secret { command } => secret_command(&app, command).await,
      Commands::Run {
        pipeline,
        dry_run,
        fail,
      } => {
        if !dry_run {
          bail!("no remote executor is configured; use --dry-run");
        }
        run_dry(&app, &pipeline, fail).await
      }
    }
  })
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

async fn pipeline_command(app: &App, command: PipelineCommand) -> Result<()> {
  let store = app.store().await?;

  match command {
    PipelineCommand::Create {
      project,
      name,
      description,
      steps,
    } => {
      let mut pipeline = Pipeline::new(project, name);
      if let Some(description) = description {
        pipeline.description = description;
      }
      if let Some(path) = steps {
        pipeline.steps = read_steps(&path).await?;
      }
      let report = validate(&pipeline.steps);
      if !report.is_valid() {
        eprintln!("warning: pipeline is not runnable yet: {report}");
      }
      let pipeline = store.create(pipeline).await?;
      print_json(&pipeline)?;
    }
    PipelineCommand::List { project } => {
      for pipeline in store.list(project.as_deref()).await? {
        let state = if pipeline.enabled { "" } else { " (disabled)" };
        println!(
          "{}  {}  {} steps  {}{}",
          pipeline.id,
          pipeline.project_id,
          pipeline.steps.len(),
          pipeline.name,
          state
        );
      }
    }
    PipelineCommand::Show { pipeline } => print_json(&store.get(&pipeline).await?)?,
    PipelineCommand::Delete { pipeline } => {
      store.delete(&pipeline).await?;
      eprintln!("Deleted pipeline {pipeline}");
    }
    PipelineCommand::Duplicate { pipeline } => print_json(&store.duplicate(&pipeline).await?)?,
    PipelineCommand::Enable { pipeline } => {
      store.set_enabled(&pipeline, true).await?;
      eprintln!("Enabled pipeline {pipeline}");
    }
    PipelineCommand::Disable { pipeline } => {
      store.set_enabled(&pipeline, false).await?;
      eprintln!("Disabled pipeline {pipeline}");
    }
  }

  Ok(())
}

async fn read_steps(path: &Path) -> Result<Vec<Step>> {
  let content = tokio::fs::read_to_string(path)
    .await
    .with_context(|| format!("failed to read steps file: {}", path.display()))?;
  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse steps file: {}", path.display()))
}

async fn validate_pipeline(app: &App, pipeline_id: &str) -> Result<()> {
  let pipeline = app.store().await?.get(pipeline_id).await?;
  let report = validate(&pipeline.steps);
  if report.is_valid() {
    println!("valid");
    return Ok(());
  }
  for message in report.messages() {
    println!("{message}");
  }
  bail!("pipeline {} has {} error(s)", pipeline.id, report.errors.len())
}

async fn plan_pipeline(app: &App, pipeline_id: &str) -> Result<()> {
  let pipeline = app.store().await?.get(pipeline_id).await?;
  let report = validate(&pipeline.steps);
  if !report.is_valid() {
    bail!("cannot plan invalid pipeline: {report}");
  }
  print_json(&plan(&pipeline.steps))
}

async fn template_command(app: &App, command: TemplateCommand) -> Result<()> {
  let registry = app.templates();

  match command {
    TemplateCommand::List => {
      for template in registry.list().await? {
        let origin = if template.id.is_some() { "user" } else { "built-in" };
        println!(
          "{:<16} {:<9} {} steps  {}",
          template.key,
          origin,
          template.steps.len(),
          template.name
        );
      }
    }
    TemplateCommand::Show { key } => print_json(&registry.get(&key).await?)?,
    TemplateCommand::Export { key, output } => {
      let json = registry.export(&key).await?;
      match output {
        Some(path) => {
          tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
          eprintln!("Exported {key} to {}", path.display());
        }
        None => println!("{json}"),
      }
    }
    TemplateCommand::Import { file } => {
      let json = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
      let template = registry.import(&json).await?;
      eprintln!("Imported template {}", template.key);
    }
    TemplateCommand::Generate {
      key,
      project,
      project_name,
      name,
      vars,
      prefix,
    } => {
      let mut customizations = Customizations {
        name,
        step_id_prefix: prefix,
        ..Default::default()
      };
      for var in vars {
        let (name, value) = var
          .split_once('=')
          .with_context(|| format!("expected KEY=VALUE, got {var}"))?;
        customizations
          .variables
          .insert(name.to_string(), parse_value(value));
      }

      let pipeline = registry
        .generate(&key, &project, &project_name, &customizations)
        .await?;
      let store = app.store().await?;
      print_json(&store.create(pipeline).await?)?;
    }
  }

  Ok(())
}

fn parse_value(raw: &str) -> VariableValue {
  match raw {
    "true" => VariableValue::Boolean(true),
    "false" => VariableValue::Boolean(false),
    _ => match raw.parse::<f64>() {
      Ok(n) if n.is_finite() => VariableValue::Number(n),
      _ => VariableValue::String(raw.to_string()),
    },
  }
}

async fn var_command(app: &App, command: VarCommand) -> Result<()> {
  let store = app.store().await?;

  match command {
    VarCommand::Set { scope, name, value } => {
      let scope = scope.scope()?;
      store
        .set_variable(Variable::new(&name, parse_value(&value), scope.clone()))
        .await?;
      eprintln!("Set {name} in {scope}");
    }
    VarCommand::List { scope } => {
      for variable in store.list_variables(&scope.scope()?).await? {
        println!("{}={}", variable.name, variable.value.as_env());
      }
    }
    VarCommand::Delete { scope, name } => {
      let scope = scope.scope()?;
      store.delete_variable(&scope, &name).await?;
      eprintln!("Deleted {name} from {scope}");
    }
  }

  Ok(())
}

async fn secret_command(app: &App, command: SecretCommand) -> Result<()> {
  let store = app.store().await?;

  match command {
    SecretCommand::Add {
      scope,
      name,
      secret_id,
    } => {
      let scope = scope.scope()?;
      store
        .add_secret_reference(SecretReference::new(&secret_id, &name, scope.clone()))
        .await?;
      eprintln!("Added secret reference {name} in {scope}");
    }
    SecretCommand::List { scope } => {
      for reference in store.list_secret_references(&scope.scope()?).await? {
        println!("{} -> {}", reference.name, reference.id);
      }
    }
    SecretCommand::Remove { scope, name } => {
      let scope = scope.scope()?;
      store.remove_secret_reference(&scope, &name).await?;
      eprintln!("Removed secret reference {name} from {scope}");
    }
  }

  Ok(())
}

async fn run_dry(app: &App, pipeline_id: &str, fail: Vec<String>) -> Result<()> {
  let store = app.store().await?;
  let resolver = Arc::new(StandardResolver::new(store.clone(), Arc::new(EnvVault::default())));

  let (updates_tx, updates_rx) = mpsc::channel(256);
  let executor = Arc::new(
    DryRunExecutor::new(updates_tx)
      .with_step_delay(Duration::from_millis(200))
      .failing(fail),
  );

  let config = OrchestratorConfig {
    step_timeout: app.step_timeout,
    project_root: Some(app.project_root.clone()),
    ..Default::default()
  };
  let orchestrator = Arc::new(Orchestrator::new(store, resolver, executor, config));

  let execution = orchestrator
    .execute(pipeline_id)
    .await
    .with_context(|| format!("failed to start pipeline {pipeline_id}"))?;
  eprintln!("Execution {} started", execution.id);

  // Subscribe before the update loop starts so nothing is missed.
  let mut updates = orchestrator.subscribe(&execution.id)?;
  let cancel = CancellationToken::new();
  let listener = tokio::spawn({
    let orchestrator = orchestrator.clone();
    let cancel = cancel.clone();
    async move { orchestrator.listen(updates_rx, cancel).await }
  });

  let finished_early = execution.status.is_terminal();
  let mut interrupted = false;
  while !finished_early {
    tokio::select! {
      update = updates.recv() => {
        let Some(update) = update else { break };
        println!("{}", serde_json::to_string(&update)?);
        if update.is_final() {
          break;
        }
      }
      _ = tokio::signal::ctrl_c(), if !interrupted => {
        interrupted = true;
        eprintln!("Cancelling...");
        orchestrator.cancel(&execution.id).await?;
      }
    }
  }

  cancel.cancel();
  listener.await.context("update loop panicked")?;

  let execution = orchestrator
    .get_execution(&execution.id)
    .context("execution disappeared")?;
  eprintln!("Execution {} {}", execution.id, execution.status);
  for step in &execution.steps {
    eprintln!("  {:<24} {}", step.step_id, step.status);
  }
  Ok(())
}
