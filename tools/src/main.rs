//! coin-runner: headless host for the UTI Coins engine.
//!
//! Usage:
//!   coin-runner --db coins.db --data-dir ./data
//!   coin-runner --db coins.db --ipc-mode < commands.jsonl
//!
//! In IPC mode every stdin line is one `EngineCommand` JSON object and
//! every stdout line is the matching `CommandResponse`.

use anyhow::Result;
use coin_core::{
    clock::SystemTimeSource,
    command::{CommandResponse, EngineCommand},
    config::{load_product_catalog, load_rule_catalog, EngineConfig},
    engine::CoinEngine,
    store::CoinStore,
};
use std::collections::HashSet;
use std::env;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let skip_seed = args.iter().any(|a| a == "--no-seed");
    let db = arg_value(&args, "--db").unwrap_or(":memory:");
    let data_dir = arg_value(&args, "--data-dir").unwrap_or("./data");

    if !ipc_mode {
        println!("UTI Coins: coin-runner");
        println!("  db:        {db}");
        println!("  data_dir:  {data_dir}");
        println!();
    }

    let config = EngineConfig::load(data_dir)?;
    let store = if db == ":memory:" {
        CoinStore::in_memory_with(&config.store)?
    } else {
        CoinStore::open(db, &config.store)?
    };
    store.migrate()?;

    let engine = CoinEngine::build(Arc::new(store), config, Arc::new(SystemTimeSource))?;
    if !skip_seed {
        seed_catalog(&engine, data_dir)?;
    }

    if ipc_mode {
        run_ipc_loop(&engine)?;
    } else {
        print_summary(&engine)?;
    }
    Ok(())
}

/// Insert catalog entries that do not exist yet. Existing rules and
/// products keep whatever an administrator last wrote.
fn seed_catalog(engine: &CoinEngine, data_dir: &str) -> Result<()> {
    if Path::new(&format!("{data_dir}/rules.json")).exists() {
        let known: HashSet<String> = engine.list_rules()?.into_iter().map(|r| r.action).collect();
        let mut added = 0;
        for rule in load_rule_catalog(data_dir)? {
            if !known.contains(&rule.action) {
                engine.upsert_rule(&rule)?;
                added += 1;
            }
        }
        log::info!("seed: {added} rules added");
    }
    if Path::new(&format!("{data_dir}/products.json")).exists() {
        let mut added = 0;
        for product in load_product_catalog(data_dir)? {
            if engine.product(&product.id)?.is_none() {
                engine.upsert_product(&product)?;
                added += 1;
            }
        }
        log::info!("seed: {added} products added");
    }
    Ok(())
}

fn run_ipc_loop(engine: &CoinEngine) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        let line = buffer.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" {
            break;
        }

        let response = match serde_json::from_str::<EngineCommand>(line) {
            Ok(command) => CommandResponse::from_result(engine.dispatch(command)),
            Err(e) => CommandResponse::error(format!("bad command: {e}")),
        };
        writeln!(stdout, "{}", serde_json::to_string(&response)?)?;
        stdout.flush()?;
    }
    Ok(())
}

fn print_summary(engine: &CoinEngine) -> Result<()> {
    let rules = engine.list_rules()?;
    let report = engine.reconcile_all()?;

    let enabled = engine.is_system_enabled()?;
    println!("=== ENGINE ===");
    println!("  enabled:        {enabled}");
    let period = engine.current_period();
    println!("  reward-day:     {}", period.reward_date);
    println!("  next reset:     {}", period.next_reset());

    println!();
    println!("=== RULES ===");
    for rule in &rules {
        println!(
            "  {:<14} {:>4} coins | day cap {:<4} | month cap {:<4} | cooldown {}m{}",
            rule.action,
            rule.amount,
            rule.max_per_day.map_or("-".to_string(), |v| v.to_string()),
            rule.max_per_month.map_or("-".to_string(), |v| v.to_string()),
            rule.cooldown_minutes,
            if rule.is_active { "" } else { " (inactive)" },
        );
    }

    println!();
    println!("=== PRODUCTS ===");
    let products = if enabled { engine.list_products()? } else { Vec::new() };
    if !enabled {
        println!("  (storefront closed while the system is disabled)");
    }
    for product in products {
        println!(
            "  {:<20} {:>5} coins | stock {}",
            product.name,
            product.cost,
            product.stock.map_or("unlimited".to_string(), |s| s.to_string()),
        );
    }

    println!();
    println!("=== LEDGER ===");
    println!("  accounts:       {}", report.accounts_checked);
    println!("  coins in float: {}", report.total_balance);
    println!("  exceptions:     {}", report.exceptions.len());
    Ok(())
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
