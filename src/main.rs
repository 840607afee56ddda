use std::{
    fs,
    io::BufReader,
    path::{Path, PathBuf},
    process::ExitCode,
    time::{SystemTime, UNIX_EPOCH},
};

use clap::{Parser, Subcommand};
use serde::Serialize;

use tranched_presale::{
    config::{ConfigError, PresaleConfig},
    primitives::{parse_amount, Amount, Timestamp},
    telemetry::{self, LoggingConfig, TelemetryError},
    HostError, PresaleHost,
};

//==================== CLI ====================//

#[derive(Debug, Parser)]
#[command(name = "presale", version, about = "Tranched lock-up presale ledger")]
struct Cli {
    /// Log filter directive, e.g. "info,tranched_presale=debug". Defaults to RUST_LOG.
    #[arg(long, global = true)]
    log_filter: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Deploy a presale from a config file into a new state file.
    Deploy {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        state: PathBuf,
        /// Deployment timestamp (unix seconds); defaults to the system clock.
        #[arg(long)]
        now: Option<Timestamp>,
    },
    /// Apply JSON-lines transactions to a state file.
    Apply {
        #[arg(long)]
        state: PathBuf,
        #[arg(long)]
        txs: PathBuf,
        /// Report rejected transactions and continue instead of stopping.
        #[arg(long)]
        keep_going: bool,
    },
    /// Print a snapshot of the state.
    Inspect {
        #[arg(long)]
        state: PathBuf,
        /// Evaluate time-dependent fields at this instant; defaults to the last transaction.
        #[arg(long)]
        at: Option<Timestamp>,
    },
    /// Print the unlock table for a credited amount under a config's schedule.
    Schedule {
        #[arg(long)]
        config: PathBuf,
        #[arg(long, value_parser = parse_amount)]
        credited: Amount,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("{path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("output encoding: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{rejected} transaction(s) rejected")]
    Rejected { rejected: usize },
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            CliError::Host(HostError::Presale(_) | HostError::ClockWentBackwards { .. })
            | CliError::Rejected { .. } => 2,
            _ => 1,
        }
    }
}

fn system_now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

//==================== Commands ====================//

fn deploy_cmd(config: &Path, state: &Path, now: Option<Timestamp>) -> Result<(), CliError> {
    let config = PresaleConfig::from_json_file(config)?;
    let host = PresaleHost::deploy(&config, now.unwrap_or_else(system_now))?;
    host.save(state)?;
    print_json(&host.snapshot(host.last_timestamp()))
}

fn apply_cmd(state: &Path, txs: &Path, keep_going: bool) -> Result<(), CliError> {
    let mut host = PresaleHost::load(state)?;
    let file = fs::File::open(txs).map_err(|source| CliError::Io {
        path: txs.display().to_string(),
        source,
    })?;

    let report = host.apply_lines(BufReader::new(file), keep_going)?;
    // everything accepted is kept, also when the replay halted
    host.save(state)?;
    for rejection in &report.rejected {
        eprintln!(
            "line {}: {} rejected: {}",
            rejection.line, rejection.call, rejection.error
        );
    }
    print_json(&report)?;
    if report.rejected.is_empty() {
        Ok(())
    } else {
        Err(CliError::Rejected {
            rejected: report.rejected.len(),
        })
    }
}

fn inspect_cmd(state: &Path, at: Option<Timestamp>) -> Result<(), CliError> {
    let host = PresaleHost::load(state)?;
    let at = at.unwrap_or_else(|| host.last_timestamp());
    print_json(&host.snapshot(at))
}

#[derive(Serialize)]
struct ScheduleRow {
    stage: usize,
    ends_at: Timestamp,
    unlocked: String,
}

fn schedule_cmd(config: &Path, credited: Amount) -> Result<(), CliError> {
    let config = PresaleConfig::from_json_file(config)?;
    let schedule = config.schedule()?;
    let rows: Vec<ScheduleRow> = schedule
        .table()
        .into_iter()
        .enumerate()
        .map(|(stage, (ends_at, allowance))| ScheduleRow {
            stage,
            ends_at,
            unlocked: allowance.min(credited).to_string(),
        })
        .collect();
    print_json(&rows)
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Deploy { config, state, now } => deploy_cmd(&config, &state, now),
        Command::Apply {
            state,
            txs,
            keep_going,
        } => apply_cmd(&state, &txs, keep_going),
        Command::Inspect { state, at } => inspect_cmd(&state, at),
        Command::Schedule { config, credited } => schedule_cmd(&config, credited),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let logging = LoggingConfig {
        env_filter: cli.log_filter.clone(),
        json: cli.log_json,
    };
    if let Err(err) = telemetry::init_logging(&logging) {
        eprintln!("error: {}", CliError::from(err));
        return ExitCode::from(1);
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "owner": "0x0000000000000000000000000000000000000001",
        "wallet": "0x0000000000000000000000000000000000000002",
        "opening_time": 1600000000,
        "closing_time": 1600604800,
        "rate": "1000",
        "lockup_end_times": [1601209600, 1601814400, 1602419200, 1603024000, 1603628800, 1604233600],
        "first_vested_lockup_amount": "4000e18",
        "graded_vested_lockup_amount": "2000e18",
        "token_supply": "100000000e18",
        "genesis_balances": [
            { "account": "0x0000000000000000000000000000000000000003", "amount": "100e18" }
        ]
    }"#;

    const INVESTOR: &str = "0x0000000000000000000000000000000000000003";
    const OWNER: &str = "0x0000000000000000000000000000000000000001";

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("presale-cli-{name}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn txs_file(dir: &Path) -> PathBuf {
        let txs = [
            format!(r#"{{"sender":"{OWNER}","timestamp":1600000000,"call":{{"type":"add_to_whitelist","account":"{INVESTOR}"}}}}"#),
            format!(r#"{{"sender":"{INVESTOR}","timestamp":1600000010,"call":{{"type":"fallback","value":"1e18"}}}}"#),
            format!(r#"{{"sender":"{INVESTOR}","timestamp":1600000020,"call":{{"type":"change_rate","new_rate":"1050","up":true}}}}"#),
            format!(r#"{{"sender":"{INVESTOR}","timestamp":1600000030,"call":{{"type":"fallback","value":"2e18"}}}}"#),
        ];
        let path = dir.join("txs.jsonl");
        fs::write(&path, txs.join("\n")).unwrap();
        path
    }

    fn deployed_state(dir: &Path) -> PathBuf {
        let config = dir.join("presale.json");
        fs::write(&config, CONFIG).unwrap();
        let state = dir.join("state.json");
        deploy_cmd(&config, &state, Some(1_599_999_000)).unwrap();
        state
    }

    #[test]
    fn halted_apply_saves_accepted_prefix() {
        let dir = scratch_dir("halt");
        let state = deployed_state(&dir);
        let err = apply_cmd(&state, &txs_file(&dir), false).unwrap_err();
        assert!(matches!(err, CliError::Rejected { rejected: 1 }));
        assert_eq!(err.exit_code(), 2);

        let host = PresaleHost::load(&state).unwrap();
        let investor: tranched_presale::Address = INVESTOR.parse().unwrap();
        assert_eq!(host.presale().balance_of(&investor), 1_000 * tranched_presale::UNIT);
        assert_eq!(host.last_timestamp(), 1_600_000_010);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn keep_going_applies_the_rest() {
        let dir = scratch_dir("keep-going");
        let state = deployed_state(&dir);
        let err = apply_cmd(&state, &txs_file(&dir), true).unwrap_err();
        assert_eq!(err.exit_code(), 2);

        let host = PresaleHost::load(&state).unwrap();
        let investor: tranched_presale::Address = INVESTOR.parse().unwrap();
        assert_eq!(host.presale().balance_of(&investor), 3_000 * tranched_presale::UNIT);
        assert_eq!(host.presale().rate(), 1_000);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn exit_codes_separate_rejections_from_failures() {
        let rejected = CliError::Host(HostError::ClockWentBackwards { last: 2, now: 1 });
        assert_eq!(rejected.exit_code(), 2);
        let missing = PresaleHost::load(Path::new("/nonexistent/presale/state.json")).unwrap_err();
        assert_eq!(CliError::from(missing).exit_code(), 1);
    }
}
