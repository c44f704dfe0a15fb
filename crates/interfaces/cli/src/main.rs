//! Dev harness: run one agent pass against a post snapshot on disk.
//!
//! Not a production surface — the engine is invoked programmatically by the
//! CMS.  This binary exists to exercise a catalog + snapshot end to end
//! from a terminal and print the structured result.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use redraft_config::{AgentCatalog, AgentScope};
use redraft_content::{ContentStore, DraftTier, MemoryContentStore, PostSnapshot};
use redraft_llm::HttpCompletionClient;
use redraft_runtime::{AgentRunResult, ExecutionContext, ExecutionSession};
use redraft_tools::NullToolInvoker;

#[derive(Debug, Parser)]
#[command(
    name = "redraft",
    version,
    about = "Agent-driven content suggestions, from the terminal"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Validate an agent catalog and list its agents.
    Check {
        #[arg(long, default_value = "agents.toml")]
        catalog: PathBuf,
    },
    /// Run one agent pass against a post snapshot file.
    Run {
        #[arg(long, default_value = "agents.toml")]
        catalog: PathBuf,
        /// Agent id from the catalog.
        #[arg(long)]
        agent: String,
        /// Post snapshot JSON file.
        #[arg(long)]
        post: PathBuf,
        #[arg(long, value_enum, default_value = "dropdown")]
        scope: CliScope,
        /// Field key for field scope (e.g. `module.hero.headline`).
        #[arg(long)]
        field: Option<String>,
        /// Module instance id for field scope.
        #[arg(long)]
        module_id: Option<String>,
        /// View being edited in field scope.
        #[arg(long, value_enum)]
        view: Option<CliView>,
        /// Open-ended instruction (subject to the agent's configured limit).
        #[arg(long)]
        instruction: Option<String>,
        /// Capture raw model output into the transcript.
        #[arg(long)]
        debug_transcript: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliScope {
    Global,
    Dropdown,
    Field,
}

impl From<CliScope> for AgentScope {
    fn from(scope: CliScope) -> Self {
        match scope {
            CliScope::Global => AgentScope::Global,
            CliScope::Dropdown => AgentScope::Dropdown,
            CliScope::Field => AgentScope::Field,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliView {
    Source,
    Review,
    AiReview,
}

impl From<CliView> for DraftTier {
    fn from(view: CliView) -> Self {
        match view {
            CliView::Source => DraftTier::Source,
            CliView::Review => DraftTier::Review,
            CliView::AiReview => DraftTier::AiReview,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match Cli::parse().command {
        Commands::Check { catalog } => {
            let catalog = AgentCatalog::load_from(&catalog)
                .with_context(|| format!("loading catalog {}", catalog.display()))?;
            for agent in &catalog.agents {
                println!(
                    "{:<24} {:<32} scopes: {}",
                    agent.id,
                    agent.completion.model,
                    agent
                        .scopes
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(",")
                );
            }
            Ok(())
        }
        Commands::Run {
            catalog,
            agent,
            post,
            scope,
            field,
            module_id,
            view,
            instruction,
            debug_transcript,
        } => {
            let catalog = AgentCatalog::load_from(&catalog)
                .with_context(|| format!("loading catalog {}", catalog.display()))?;
            let raw = fs::read_to_string(&post)
                .with_context(|| format!("reading snapshot {}", post.display()))?;
            let snapshot: PostSnapshot =
                serde_json::from_str(&raw).context("parsing post snapshot")?;
            let post_id = snapshot.id.clone();

            let definition = catalog.get(&agent)?.clone();
            let client = Arc::new(HttpCompletionClient::from_settings(&definition.completion)?);

            let store = Arc::new(MemoryContentStore::new());
            store.insert(snapshot).await;

            let session = ExecutionSession::new(
                catalog,
                client,
                Arc::new(NullToolInvoker),
                store.clone(),
            );

            let mut ctx =
                ExecutionContext::new(agent.clone(), scope.into(), "cli", post_id.clone());
            if let Some(key) = field {
                ctx = ctx.with_field(key, module_id);
            }
            if let Some(view) = view {
                ctx = ctx.with_view(view.into());
            }
            if let Some(instruction) = instruction {
                ctx = ctx.with_instruction(instruction);
            }
            if debug_transcript {
                ctx = ctx.with_debug();
            }

            let result = AgentRunResult::from_run(session.run(ctx).await);
            println!("{}", serde_json::to_string_pretty(&result)?);

            // Show what the draft tiers look like after the merge.
            let updated = store.load_post(&post_id).await?;
            eprintln!("--- post after merge ---");
            eprintln!("{}", serde_json::to_string_pretty(&updated)?);
            Ok(())
        }
    }
}
