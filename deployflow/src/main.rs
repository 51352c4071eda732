use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use deployflow::config::PipelineConfig;
use deployflow::events::LoggingEventSink;
use deployflow::orchestrator::{CommitEvent, Orchestrator, ScriptedExecutor};
use deployflow::pipeline::{sample_pipeline, PipelineDefinition};
use deployflow::synth::{synthesize, write_to_dir};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "deployflow")]
#[command(author, version, about = "Source, build and deploy pipeline definitions")]
struct Cli {
    /// Path to a JSON pipeline configuration; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synthesize the pipeline template into an output directory
    Synth {
        /// Output directory
        #[arg(long, default_value = "cdk.out")]
        out: PathBuf,

        /// Print the template instead of writing files
        #[arg(long)]
        stdout: bool,
    },
    /// Validate the pipeline topology
    Validate,
    /// Print stages, actions and artifact wiring
    Graph,
    /// Simulate a run for a commit with scripted actions
    Simulate {
        /// Branch the commit was pushed to
        #[arg(long, default_value = "master")]
        branch: String,

        /// Commit id
        #[arg(long, default_value = "C1")]
        commit: String,

        /// How the reviewer answers approval requests
        #[arg(long, value_enum, default_value_t = Decision::Approve)]
        decision: Decision,

        /// Make this action fail
        #[arg(long)]
        fail_action: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Decision {
    Approve,
    Reject,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Synth { out, stdout } => {
            let definition = define(&config)?;
            let template = synthesize(&definition).context("Failed to synthesize template")?;
            if stdout {
                print!("{}", template.to_json_string()?);
            } else {
                let path = write_to_dir(&template, definition.stack_id(), &out)
                    .with_context(|| format!("Failed to write to {}", out.display()))?;
                println!("{}", path.display());
            }
        }
        Commands::Validate => {
            let definition = define(&config)?;
            println!(
                "Pipeline '{}' is valid: {}",
                definition.name(),
                definition.stage_names().join(" -> ")
            );
        }
        Commands::Graph => print_graph(&define(&config)?),
        Commands::Simulate {
            branch,
            commit,
            decision,
            fail_action,
        } => {
            let definition = define(&config)?;
            let mut executor = ScriptedExecutor::new();
            if let Some(action) = fail_action {
                executor = executor.with_failure(action, "failed by request");
            }

            let orch = Orchestrator::new(definition, Arc::new(executor))
                .with_event_sink(Arc::new(LoggingEventSink::default()));
            let gate = orch.approvals();
            let reviewer = tokio::spawn(async move {
                loop {
                    let request = gate.next_pending().await;
                    match decision {
                        Decision::Approve => gate.approve(request.id),
                        Decision::Reject => gate.reject(request.id),
                    };
                }
            });

            let report = orch.on_commit(CommitEvent::new(branch.clone(), commit)).await;
            reviewer.abort();

            let Some(report) = report else {
                bail!("Branch '{branch}' does not start a run");
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn define(config: &PipelineConfig) -> Result<PipelineDefinition> {
    sample_pipeline(config).map_err(|err| {
        let hint = err
            .error_info
            .as_ref()
            .and_then(|info| info.fix_hint.clone())
            .map(|hint| format!(" (hint: {hint})"))
            .unwrap_or_default();
        anyhow::anyhow!("{err}{hint}")
    })
}

fn print_graph(definition: &PipelineDefinition) {
    println!("{} ({})", definition.name(), definition.stack_id());
    for stage in definition.stages() {
        println!("  {}", stage.name);
        for (run_order, actions) in stage.run_order_groups() {
            for action in actions {
                let inputs: Vec<&str> = action.inputs.iter().map(|a| a.name()).collect();
                let outputs: Vec<&str> = action.outputs.iter().map(|a| a.name()).collect();
                println!(
                    "    [{run_order}] {} <{}> in: [{}] out: [{}]",
                    action.name,
                    action.category(),
                    inputs.join(", "),
                    outputs.join(", ")
                );
            }
        }
    }
    let terminal = definition.graph().terminal_artifacts();
    if !terminal.is_empty() {
        println!("  terminal artifacts: {}", terminal.join(", "));
    }
}
