//! dues-runner: headless runner for the dues engine.
//!
//! Usage:
//!   dues-runner --config data/engine.json
//!   dues-runner --db dues.db --once
//!   dues-runner --config data/engine.json --ipc-mode

use anyhow::Result;
use chrono::{DateTime, Utc};
use dues_core::{
    clock::SystemClock,
    config::EngineConfig,
    engine::DuesEngine,
    error::DuesError,
    obligation_registry::NewObligation,
    scheduler::{Scheduler, TickReport},
    types::{Amount, EntityRef, PaymentMethod},
};
use serde::Serialize;
use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    CreateObligation {
        obligation: NewObligation,
    },
    OpenWeeklyCollection {
        church_id: String,
        at: Option<DateTime<Utc>>,
    },
    GetObligation {
        obligation_id: String,
    },
    RecordContribution {
        obligation_id: String,
        entity: EntityRef,
        amount: Amount,
        #[serde(default = "default_method")]
        method: PaymentMethod,
    },
    ProcessDues {
        obligation_id: Option<String>,
    },
    PayDue {
        due_id: String,
        amount: Amount,
        #[serde(default = "default_method")]
        method: PaymentMethod,
    },
    DuesForEntity {
        entity: EntityRef,
    },
    Wallet {
        entity: EntityRef,
    },
    ReconcilePayments,
    Audit,
    Tick,
    Quit,
}

fn default_method() -> PaymentMethod {
    PaymentMethod::Cash
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let once = args.iter().any(|a| a == "--once");
    let config_path = args
        .windows(2)
        .find(|w| w[0] == "--config")
        .map(|w| w[1].as_str());

    let mut config = match config_path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(db) = args.windows(2).find(|w| w[0] == "--db").map(|w| w[1].clone()) {
        config.database_path = db;
    }
    config.sweep.parallelism = parse_arg(&args, "--parallelism", config.sweep.parallelism).max(1);

    if !ipc_mode {
        println!("dues-runner");
        println!("  db:          {}", config.database_path);
        println!("  parallelism: {}", config.sweep.parallelism);
        println!(
            "  sweep at:    {:02}:{:02} UTC",
            config.schedule.sweep_hour, config.schedule.sweep_minute
        );
        println!();
    }

    let engine = DuesEngine::build(config, Arc::new(SystemClock))?;
    let mut scheduler = Scheduler::build(&engine.config, engine.now());

    if ipc_mode {
        run_ipc_loop(&engine, &mut scheduler)?;
    } else if once {
        let report = scheduler.run_now(&engine)?;
        print_summary(&engine, &report)?;
    } else {
        run_schedule_loop(&engine, &mut scheduler)?;
    }

    Ok(())
}

fn run_schedule_loop(engine: &DuesEngine, scheduler: &mut Scheduler) -> Result<()> {
    let poll = Duration::from_secs(engine.config.schedule.poll_interval_secs.max(1));
    log::info!("scheduler started; first run at {}", scheduler.next_run());
    loop {
        if let Some(report) = scheduler.tick(engine)? {
            print_summary(engine, &report)?;
            log::info!("next run at {}", scheduler.next_run());
        }
        std::thread::sleep(poll);
    }
}

fn run_ipc_loop(engine: &DuesEngine, scheduler: &mut Scheduler) -> Result<()> {
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
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                let err_json = serde_json::json!({ "error": e.to_string(), "class": "validation" });
                writeln!(stdout, "{}", err_json)?;
                stdout.flush()?;
                continue;
            }
        };
        if matches!(cmd, IpcCommand::Quit) {
            break;
        }

        let reply = match handle_command(engine, scheduler, cmd) {
            Ok(value) => serde_json::json!({ "ok": value }),
            Err(e) => {
                log::debug!("ipc command failed: {e}");
                serde_json::json!({ "error": e.to_string(), "class": e.class().as_str() })
            }
        };
        writeln!(stdout, "{}", reply)?;
        stdout.flush()?;
    }
    Ok(())
}

fn handle_command(
    engine: &DuesEngine,
    scheduler: &mut Scheduler,
    cmd: IpcCommand,
) -> Result<serde_json::Value, DuesError> {
    match cmd {
        IpcCommand::CreateObligation { obligation } => to_json(&engine.create_obligation(&obligation)?),
        IpcCommand::OpenWeeklyCollection { church_id, at } => {
            let at = at.unwrap_or_else(|| engine.now());
            to_json(&engine.open_weekly_collection(&church_id, at)?)
        }
        IpcCommand::GetObligation { obligation_id } => to_json(&engine.obligation(&obligation_id)?),
        IpcCommand::RecordContribution {
            obligation_id,
            entity,
            amount,
            method,
        } => to_json(&engine.record_contribution(&obligation_id, &entity, amount, method)?),
        IpcCommand::ProcessDues { obligation_id } => {
            to_json(&engine.process_dues(obligation_id.as_deref())?)
        }
        IpcCommand::PayDue {
            due_id,
            amount,
            method,
        } => to_json(&engine.pay_due(&due_id, amount, method)?),
        IpcCommand::DuesForEntity { entity } => to_json(&engine.dues_for_entity(&entity)?),
        IpcCommand::Wallet { entity } => to_json(&engine.wallet(&entity)?),
        IpcCommand::ReconcilePayments => to_json(&engine.reconcile_payments()?),
        IpcCommand::Audit => to_json(&engine.audit()?),
        IpcCommand::Tick => to_json(&scheduler.tick(engine)?),
        IpcCommand::Quit => Ok(serde_json::Value::Null),
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, DuesError> {
    Ok(serde_json::to_value(value)?)
}

fn print_summary(engine: &DuesEngine, report: &TickReport) -> Result<()> {
    println!("=== RUN SUMMARY ===");
    println!("  ran at:   {}", report.ran_at);
    println!("  jobs:     {}", report.jobs_run.join(", "));
    for event in &report.events {
        println!("  event:    {}", serde_json::to_string(event)?);
    }
    for failure in &report.failures {
        println!("  FAILED:   {} ({})", failure.job, failure.reason);
    }

    let drift = engine.audit()?;
    if drift.is_empty() {
        println!("  audit:    consistent");
    } else {
        println!("  audit:    {} findings", drift.len());
        for d in &drift {
            println!("    {}", serde_json::to_string(d)?);
        }
    }
    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
