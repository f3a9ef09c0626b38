//! `thinkloop run` and `thinkloop chat`: execute agents.

use std::io::Write;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use thinkloop_agent::{ExecutionOptions, ExecutionResult};
use thinkloop_config::{AppConfig, DEFAULT_AGENT_NAME};
use thinkloop_core::event::{DomainEvent, EventBus};

use super::{build_runtime, load_config};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub async fn run(
    agent: Option<String>,
    input: String,
    timeout: Option<u64>,
    max_iterations: Option<u32>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    require_api_key(&config)?;

    let runtime = build_runtime(&config).await?;
    let agent = agent.unwrap_or_else(|| DEFAULT_AGENT_NAME.to_string());

    let mut options = ExecutionOptions::new();
    if let Some(secs) = timeout {
        options = options.with_timeout(Duration::from_secs(secs));
    }
    if let Some(n) = max_iterations {
        options = options.with_max_iterations(n);
    }

    let progress = (!json).then(|| spawn_progress(&runtime.event_bus));
    let result = runtime.service.execute_agent_by_name(&agent, &input, options).await;
    if let Some(progress) = progress {
        progress.abort();
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    if result.success {
        Ok(())
    } else {
        Err(result
            .error
            .unwrap_or_else(|| "agent run failed".to_string())
            .into())
    }
}

pub async fn chat(agent: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    require_api_key(&config)?;

    let runtime = build_runtime(&config).await?;
    let agent = agent.unwrap_or_else(|| DEFAULT_AGENT_NAME.to_string());
    let sweeper = runtime
        .service
        .spawn_memory_sweeper(SWEEP_INTERVAL, config.inactive_threshold());

    println!();
    println!("  thinkloop chat");
    println!();
    println!("  Agent:     {agent}");
    println!("  Model:     {}", config.default_model);
    println!("  Tools:     {}", runtime.registry.names().join(", "));
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        let progress = spawn_progress(&runtime.event_bus);
        let result = runtime
            .service
            .execute_agent_by_name(&agent, line, ExecutionOptions::new())
            .await;
        progress.abort();

        println!();
        if result.success {
            for line in result.output.lines() {
                println!("  Assistant > {line}");
            }
        } else {
            eprintln!("  [Error] {}", result.error.as_deref().unwrap_or("agent run failed"));
            if !result.output.is_empty() {
                println!("  Partial > {}", result.output);
            }
        }
        println!();
    }

    sweeper.abort();
    let stats = runtime.service.stats().await;
    println!();
    println!(
        "  {} runs, {} succeeded, {:.0} ms average. Goodbye!",
        stats.executions.total,
        stats.executions.succeeded,
        stats.executions.average_elapsed_ms()
    );
    Ok(())
}

fn require_api_key(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.has_api_key() {
        return Ok(());
    }
    eprintln!();
    eprintln!("  ERROR: No API key configured!");
    eprintln!();
    eprintln!("  Set one of these environment variables:");
    eprintln!("    export THINKLOOP_API_KEY=sk-...");
    eprintln!("    export OPENAI_API_KEY=sk-...");
    eprintln!("    export OPENROUTER_API_KEY=sk-or-v1-...");
    eprintln!();
    eprintln!("  Or add it to your config file:");
    eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
    eprintln!();
    Err("No API key found. See above for setup instructions.".into())
}

/// Echo loop events to stderr until aborted.
fn spawn_progress(event_bus: &EventBus) -> JoinHandle<()> {
    let mut rx = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(line) = describe(&event) {
                        eprintln!("  {line}");
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn describe(event: &DomainEvent) -> Option<String> {
    match event {
        DomainEvent::IterationStarted { iteration, .. } => Some(format!("· thinking (step {iteration})")),
        DomainEvent::ToolExecuted {
            tool_name,
            success,
            duration_ms,
            ..
        } => {
            let mark = if *success { "✓" } else { "✗" };
            Some(format!("{mark} {tool_name} ({duration_ms} ms)"))
        }
        DomainEvent::ModelResponded { .. } | DomainEvent::RunFinished { .. } => None,
    }
}

fn print_result(result: &ExecutionResult) {
    if result.success {
        println!("{}", result.output);
    } else {
        if !result.output.is_empty() {
            println!("{}", result.output);
        }
        eprintln!();
        eprintln!("  Run stopped: {}", result.error.as_deref().unwrap_or("unknown error"));
    }
    eprintln!(
        "  ({} iterations, {} tool calls, {:.1}s)",
        result.iterations,
        result.tool_trace.len(),
        result.elapsed_seconds
    );
}
