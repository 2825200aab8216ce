//! pharos - conversational gateway CLI

mod config;

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use pharos_ai::ProviderRegistry;
use pharos_gateway::{
    Error as GatewayError, ExecutorConfig, InMemoryStore, OrchestratorConfig, SessionExecutor,
    ShellBackend, TracingSink, TurnOrchestrator,
};

/// pharos - conversational agent gateway
#[derive(Parser, Debug)]
#[command(name = "pharos")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// "provider/model" route override
    #[arg(short, long)]
    model: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive chat session
    Chat,
    /// Validate and run a single script
    Run {
        /// Script text; "-" reads from stdin
        script: String,
        /// Session to run in (created if absent)
        #[arg(short, long)]
        session: Option<String>,
        /// Timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Show provider health and breaker state
    Status,
    /// List configured providers
    Providers,
    /// Initialize config file
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("pharos=debug")
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "pharos=warn".into()),
            )
            .init();
    }

    if let Command::Init = args.command {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let cfg = config::Config::load();
    let orchestrator = build_orchestrator(&cfg, args.model)?;

    match args.command {
        Command::Chat => run_chat(&orchestrator).await,
        Command::Run {
            script,
            session,
            timeout,
        } => {
            let script = if script == "-" {
                io::read_to_string(io::stdin())?
            } else {
                script
            };
            run_script(
                &orchestrator,
                &script,
                session.as_deref(),
                timeout.map(Duration::from_secs),
            )
            .await
        }
        Command::Status => show_status(&orchestrator).await,
        Command::Providers => {
            for name in orchestrator.providers() {
                println!("{}", name);
            }
            Ok(())
        }
        Command::Init => unreachable!("handled above"),
    }
}

fn build_orchestrator(
    cfg: &config::Config,
    model_override: Option<String>,
) -> anyhow::Result<TurnOrchestrator> {
    let registry = ProviderRegistry::build(&cfg.providers, &cfg.primary)?;

    let backend = ShellBackend::new(cfg.interpreter.as_deref().unwrap_or("sh"));
    let executor = SessionExecutor::new(Arc::new(backend), ExecutorConfig::default());

    let mut orchestrator_config = OrchestratorConfig {
        model: model_override.or_else(|| cfg.model.clone()),
        ..OrchestratorConfig::default()
    };
    if let Some(ref prompt) = cfg.system_prompt {
        orchestrator_config.system_prompt = prompt.clone();
    }
    if let Some(limit) = cfg.history_limit {
        orchestrator_config.history_limit = limit;
    }

    Ok(TurnOrchestrator::new(
        Arc::new(registry),
        Arc::new(executor),
        Arc::new(InMemoryStore::new()),
        Arc::new(TracingSink),
        orchestrator_config,
    ))
}

async fn run_chat(orchestrator: &TurnOrchestrator) -> anyhow::Result<()> {
    eprintln!("pharos chat (Ctrl-D to exit)");
    eprintln!();

    let mut conversation_id: Option<String> = None;

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        match orchestrator
            .process_turn(conversation_id.as_deref(), input, HashMap::new())
            .await
        {
            Ok(turn) => {
                conversation_id = Some(turn.conversation_id.clone());
                println!("{}", turn.response);
                for execution in &turn.executions {
                    let status = if execution.result.success { "ok" } else { "failed" };
                    println!("\n[script {}: {}ms]", status, execution.result.duration_ms);
                    if !execution.result.output.is_empty() {
                        println!("{}", execution.result.output);
                    }
                }
                println!(
                    "\n[tokens: {} in, {} out]",
                    turn.usage.prompt, turn.usage.completion
                );
            }
            Err(GatewayError::CircuitOpen { retry_after }) => {
                eprintln!(
                    "Provider unavailable; retry in {}s",
                    retry_after.as_secs().max(1)
                );
            }
            Err(e) => {
                eprintln!("Error: {}", e);
            }
        }
    }

    if let Some(id) = conversation_id {
        orchestrator.end_conversation(&id).await?;
    }
    Ok(())
}

async fn run_script(
    orchestrator: &TurnOrchestrator,
    script: &str,
    session: Option<&str>,
    timeout: Option<Duration>,
) -> anyhow::Result<()> {
    match orchestrator.run_script(script, session, timeout).await {
        Ok(result) => {
            if !result.output.is_empty() {
                println!("{}", result.output);
            }
            for warning in &result.validation.warnings {
                eprintln!("Warning: {}", warning);
            }
            if !result.success {
                std::process::exit(1);
            }
            Ok(())
        }
        Err(GatewayError::Validation(outcome)) => {
            eprintln!("Script rejected:");
            for error in &outcome.errors {
                eprintln!("  {}", error);
            }
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

async fn show_status(orchestrator: &TurnOrchestrator) -> anyhow::Result<()> {
    println!("Providers:");
    let health = orchestrator.provider_health().await;
    let mut names: Vec<_> = health.keys().cloned().collect();
    names.sort();
    for name in &names {
        let status = if health[name] { "healthy" } else { "unreachable" };
        println!("  {}: {}", name, status);
    }

    let stats = orchestrator.breaker_stats();
    if stats.is_empty() {
        println!("\nBreakers: none active");
    } else {
        println!("\nBreakers:");
        let mut names: Vec<_> = stats.keys().cloned().collect();
        names.sort();
        for name in &names {
            let s = &stats[name];
            print!("  {}: {:?}", name, s.state);
            if let Some(retry) = s.retry_after_ms {
                print!(" (retry in {}ms)", retry);
            }
            println!(" [{} consecutive failures]", s.consecutive_failures);
        }
    }
    Ok(())
}
