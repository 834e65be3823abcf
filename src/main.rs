// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;
mod http;
mod interaction;

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands, MemoCommands, SkillCommands, ToolsCommands};
use http::{NullTokenProvider, ReqwestHttp, TokenProvider};
use interaction::{InteractionLoop, TurnEvent, TurnOutcome};
use slop_dispatch::Dispatcher;
use slop_orchestrator::Orchestrator;
use slop_store::Store;
use slop_tools::ToolExecutor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(Commands::ShowConfig) = &cli.command {
        let config = slop_config::load(cli.config.as_deref())?;
        println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
        return Ok(());
    }
    if let Some(Commands::Completions { shell }) = &cli.command {
        cli::print_completions(*shell);
        return Ok(());
    }

    let config = slop_config::load(cli.config.as_deref())?;
    let db_path = cli.db.clone().unwrap_or_else(|| std::path::PathBuf::from(&config.agent.db_path));
    let store = Arc::new(Store::init(&db_path)?);

    match cli.command.unwrap_or(Commands::Chat { session: "default".into(), skills: Vec::new() }) {
        Commands::Chat { session, skills } => run_chat(store, config, session, skills).await,
        Commands::ServeCi { session, prompt, skills } => run_ci(store, config, session, prompt, skills).await,
        Commands::Tools { command } => run_tools_command(&store, command),
        Commands::Memo { command } => run_memo_command(&store, command),
        Commands::Skill { command } => run_skill_command(&store, command).await,
        Commands::ShowConfig | Commands::Completions { .. } => unreachable!("handled above"),
    }
}

fn build_interaction_loop(store: Arc<Store>, config: &slop_config::Config) -> InteractionLoop {
    let provider = match config.model.provider {
        slop_config::Provider::Openai => "openai",
        slop_config::Provider::Gemini => "gemini",
    };
    let base_url = if config.model.gca_mode { &config.model.gca_base_url } else { &config.model.base_url };
    let orchestrator = Orchestrator::builder()
        .with_provider(provider)
        .with_model(config.model.name.clone())
        .with_gca_mode(config.model.gca_mode)
        .with_project_id(config.model.project_id.clone().unwrap_or_default())
        .with_base_url(base_url.clone())
        .with_throttle(config.agent.throttle_seconds)
        .with_strip_reasoning(config.model.strip_reasoning)
        .build();

    let executor = Arc::new(ToolExecutor::new(store.clone()));
    let dispatcher = Dispatcher::new(config.tools.worker_count);
    let http_client: Arc<dyn http::HttpPoster> = Arc::new(ReqwestHttp::new());
    let token_provider: Arc<dyn TokenProvider> = Arc::new(NullTokenProvider);

    InteractionLoop::new(store, orchestrator, executor, dispatcher, http_client, token_provider, config.clone())
}

async fn run_chat(store: Arc<Store>, config: slop_config::Config, session: String, skills: Vec<String>) -> anyhow::Result<()> {
    if !skills.is_empty() {
        store.set_active_skills(&session, &skills)?;
    }
    let active_skills = store.get_active_skills(&session)?;
    let turn_runner = build_interaction_loop(store.clone(), &config);

    println!("slop — interactive session '{session}'. Type /exit to quit.");
    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush().ok();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/exit" || line == "/quit" {
            break;
        }

        match turn_runner.run_turn(&session, line, &active_skills, render_event).await {
            Ok(TurnOutcome::Done) => {}
            Ok(TurnOutcome::TransportError(e)) => {
                eprintln!("[slop:error] {}: {}", e.kind, e.message);
            }
            Err(e) => {
                eprintln!("[slop:error] {}: {}", e.kind, e.message);
            }
        }
    }
    Ok(())
}

async fn run_ci(
    store: Arc<Store>,
    config: slop_config::Config,
    session: String,
    prompt: Option<String>,
    skills: Vec<String>,
) -> anyhow::Result<()> {
    let prompt_text = match prompt {
        Some(p) => p,
        None => {
            use std::io::Read;
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf.trim().to_string()
        }
    };
    if prompt_text.is_empty() {
        anyhow::bail!("no prompt given: pass --prompt or pipe one via stdin");
    }

    if !skills.is_empty() {
        store.set_active_skills(&session, &skills)?;
    }
    let active_skills = store.get_active_skills(&session)?;
    let turn_runner = build_interaction_loop(store.clone(), &config);

    let mut last_text = String::new();
    let outcome = turn_runner
        .run_turn(&session, &prompt_text, &active_skills, |event| {
            if let TurnEvent::AssistantText(text) = &event {
                last_text = text.clone();
            }
            render_event(event);
        })
        .await?;

    match outcome {
        TurnOutcome::Done => {
            println!("{last_text}");
            Ok(())
        }
        TurnOutcome::TransportError(e) => {
            eprintln!("[slop:error] {}: {}", e.kind, e.message);
            std::process::exit(1);
        }
    }
}

fn render_event(event: TurnEvent) {
    match event {
        TurnEvent::AssistantText(text) => println!("\n{text}\n"),
        TurnEvent::ToolCall { name, args } => println!("  [tool call] {name}({args})"),
        TurnEvent::ToolResult { name, output } => {
            let preview: String = output.chars().take(200).collect();
            println!("  [tool result] {name}: {preview}");
        }
    }
}

fn run_tools_command(store: &Store, command: ToolsCommands) -> anyhow::Result<()> {
    match command {
        ToolsCommands::List => {
            let tools = store.get_enabled_tools()?;
            for t in &tools {
                println!("{:<20} calls={:<6} {}", t.name, t.call_count, t.description);
            }
            println!("\n{} tool(s) enabled", tools.len());
        }
    }
    Ok(())
}

fn run_memo_command(store: &Store, command: MemoCommands) -> anyhow::Result<()> {
    match command {
        MemoCommands::Add { content, tags } => {
            let tags_json = serde_json::to_string(&tags)?;
            store.add_memo(&content, &tags_json)?;
            println!("Memo saved.");
        }
        MemoCommands::Search { tags } => {
            let memos = store.get_memos_by_tags(&tags)?;
            if memos.is_empty() {
                println!("No matching memos.");
            }
            for m in &memos {
                println!("[{}] {}", m.semantic_tags, m.content);
            }
        }
    }
    Ok(())
}

async fn run_skill_command(store: &Arc<Store>, command: SkillCommands) -> anyhow::Result<()> {
    match command {
        SkillCommands::List => {
            let skills = store.get_skills()?;
            for s in &skills {
                println!("{:<20} activations={:<6} {}", s.name, s.activation_count, s.description);
            }
        }
        SkillCommands::Use { name, session, deactivate } => {
            let executor = ToolExecutor::new(store.clone());
            executor.set_session_id(&session);
            let action = if deactivate { "deactivate" } else { "activate" };
            let call = slop_tools::ToolCall {
                id: "cli".to_string(),
                name: "use_skill".to_string(),
                args: serde_json::json!({"action": action, "name": name}),
            };
            let out = executor.execute(&call, &slop_dispatch::CancellationToken::new()).await;
            println!("{out}");
        }
    }
    Ok(())
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry().with(fmt::layer().with_target(false).with_writer(std::io::stderr)).with(filter).try_init();
}
