//! Terminal front-end for the loom coding agent: reads `.loom/` config from
//! the workspace and the user's home directory, wires an `Agent`, and
//! implements `UiBridge` by printing to stdout and prompting on stdin.

mod terminal_ui;

use clap::Parser;
use loom_core::config::{self, Memories, McpConfigFile, Paths, Rules, Settings};
use loom_core::mcp::McpSupervisor;
use loom_core::prompt::{self, PromptContext};
use loom_core::stream::HttpProviderClient;
use loom_core::{Agent, ApprovalGateway, AutoApprovePolicy, ConversationStore, ToolRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use terminal_ui::TerminalUi;

#[derive(Parser, Debug)]
#[command(name = "loom", about = "Interactive, workspace-scoped coding agent")]
struct Args {
    /// Workspace root. Defaults to the current directory.
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Initial prompt to enqueue non-interactively; omit to drop into a
    /// read-eval-print loop.
    prompt: Option<String>,

    /// Base URL of an OpenAI-compatible chat-completions endpoint.
    #[arg(long, env = "LOOM_PROVIDER_BASE_URL", default_value = "https://api.openai.com/v1")]
    provider_base_url: String,

    #[arg(long, env = "LOOM_API_KEY", default_value = "")]
    api_key: String,

    #[arg(long, env = "LOOM_MODEL", default_value = "gpt-4o")]
    model: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();
    let workspace = args.workspace.unwrap_or(std::env::current_dir()?);
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    let paths = Paths::new(home, workspace.clone());

    let settings: Settings = config::load_json(&paths.user_settings())?;
    let user_rules: Rules = config::load_json(&paths.user_rules())?;
    let project_rules: Rules = config::load_json(&paths.workspace_rules())?;
    let memories: Memories = config::load_json(&paths.user_memories())?;
    let mcp_config: McpConfigFile = config::load_json(&paths.workspace_mcp())?;

    let conversations = Arc::new(ConversationStore::new(paths.workspace_history_dir())?);
    let mut registry = ToolRegistry::new();
    loom_core::builtin_tools::register_builtin_tools(&mut registry)?;

    let supervisor = McpSupervisor::new();
    supervisor.reconcile(&mcp_config.mcp_servers, &mut registry).await?;

    let approvals = Arc::new(ApprovalGateway::new());
    approvals.set_policy(AutoApprovePolicy {
        shell: settings.auto_approve_shell,
        edits: settings.auto_approve_edits,
    });

    let model = settings.default_model.unwrap_or(args.model);
    let provider = Arc::new(HttpProviderClient::new(args.provider_base_url, args.api_key, model.clone()));
    let ui = Arc::new(TerminalUi::new(approvals.clone()));

    let prompt_ctx = PromptContext {
        assistant_name: settings.assistant_name.unwrap_or_else(|| "loom".to_string()),
        model_label: model,
        date: chrono::Utc::now().format("%Y-%m-%d").to_string(),
        tools: registry.schemas(),
        git_branch: prompt::discover_git_branch(&workspace),
        project_context: None,
        memories: memories.entries.into_iter().map(|m| m.text).collect(),
        user_rules: user_rules.rules,
        project_rules: project_rules.rules,
        personality: None,
    };

    let agent = Agent::new(conversations, registry, approvals.clone(), provider, ui.clone(), prompt_ctx);

    if let Some(prompt_text) = args.prompt {
        agent.enqueue(&prompt_text).await?;
    } else {
        run_repl(&agent, ui.as_ref()).await?;
    }

    supervisor.stop_all().await;
    Ok(())
}

async fn run_repl(agent: &Agent, ui: &TerminalUi) -> anyhow::Result<()> {
    use std::io::Write;
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/exit" || line == "/quit" {
            break;
        }
        if line == "/stop" {
            agent.stop();
            continue;
        }
        if let Err(e) = agent.enqueue(line).await {
            ui.print_error(&e.to_string());
        }
    }
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if loom_core::config::debug_engine_enabled() {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
