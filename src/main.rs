use anyhow::{anyhow, Result};
use colored::*;
use std::env;
use std::sync::Arc;

use screenpilot::bridge::BridgeClient;
use screenpilot::core::state::AgentConfig;
use screenpilot::oracle::gemini::GeminiOracle;
use screenpilot::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::from_filename(".env").ok();

    let args: Vec<String> = env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("run") => {
            let task = args.get(1).ok_or_else(|| anyhow!("usage: screenpilot run \"<task>\" [timeout_secs]"))?;
            let timeout = args.get(2).and_then(|s| s.parse::<u64>().ok());
            run_task(task, timeout).await
        }
        Some("stats") => show_stats(),
        Some("reset") => reset_learning(),
        _ => {
            print_usage();
            Ok(())
        }
    }
}

async fn run_task(task: &str, timeout: Option<u64>) -> Result<()> {
    banner();

    let config = AgentConfig::load()?;
    let oracle = Arc::new(GeminiOracle::new(&config)?);
    let bridge = Arc::new(BridgeClient::from_env());

    let mut orchestrator = Orchestrator::new(bridge.clone(), oracle, bridge, config);

    // Ctrl-C flips the cancel flag; the loop notices at its next iteration.
    let cancel = orchestrator.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("{}", "\n🛑 Cancellation requested, finishing current action".yellow());
            cancel.cancel();
        }
    });

    let result = orchestrator.execute_task(task, timeout).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if result.success {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

fn show_stats() -> Result<()> {
    use screenpilot::evolution::{EvolutionStore, SelfEvolution};

    let config = AgentConfig::load()?;
    let store = match &config.store_path {
        Some(path) => EvolutionStore::new(path.clone()),
        None => EvolutionStore::new(EvolutionStore::default_path()),
    };
    let evolution = SelfEvolution::load(store, 0.0);
    println!("{}", serde_json::to_string_pretty(&evolution.stats())?);
    Ok(())
}

fn reset_learning() -> Result<()> {
    use screenpilot::evolution::{EvolutionStore, SelfEvolution};

    let config = AgentConfig::load()?;
    let store = match &config.store_path {
        Some(path) => EvolutionStore::new(path.clone()),
        None => EvolutionStore::new(EvolutionStore::default_path()),
    };
    let mut evolution = SelfEvolution::load(store, 0.0);
    evolution.reset();
    println!("{}", "🗑️  Learned state cleared".yellow());
    Ok(())
}

fn banner() {
    println!("{}", "╔═══════════════════════════════════╗".cyan());
    println!("{}", "║  🖥️  screenpilot                   ║".cyan().bold());
    println!("{}", "║  goal-driven desktop automation   ║".cyan());
    println!("{}", "╚═══════════════════════════════════╝".cyan());
}

fn print_usage() {
    println!("{}", "screenpilot".bold());
    println!("  run \"<task>\" [timeout_secs]   drive the session toward a goal");
    println!("  stats                          show learned-state statistics");
    println!("  reset                          clear all learned state");
}
