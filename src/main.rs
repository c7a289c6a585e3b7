//! repairctl - Main entry point
//!
//! Factory repair orchestrator for the handheld's internal drive: full
//! reimage, OS-only and home-only repairs, an interactive chroot, and a
//! drive-wide secure erase.

use log::{debug, error, info, warn};
use std::io::{BufRead, Write as _};

use repairctl::cli::{Cli, Commands};
use repairctl::config::{FailureAction, FinalAction, RepairConfig};
use repairctl::error::{RepairError, Result};
use repairctl::executor::{RepairPlanExecutor, RepairScope};
use repairctl::layout::LayoutSpec;
use repairctl::sanitize::{self, RealSleeper};
use repairctl::system::{SystemOps, ToolRunner};
use repairctl::{chroot, process_guard, sanity};

/// Initialize the logger with appropriate settings
fn init_logger() {
    use env_logger::Builder;

    Builder::from_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}:{}] {}",
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .parse_default_env() // Allows RUST_LOG env var to override
        .init();
}

fn main() {
    init_logger();
    info!("repairctl starting up");

    // Signal handlers terminate registered child tools (dd, sfdisk) if we
    // receive SIGINT/SIGTERM mid-run.
    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {e}");
    }
    debug!("Signal handlers initialized");

    let cli = Cli::parse_args();
    debug!("CLI arguments parsed");

    match run(cli) {
        Ok(()) => {}
        Err(e) => {
            error!("{e}");
            eprintln!("repairctl: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    sanity::run_preflight_checks()?;

    let mut config = RepairConfig::load(cli.config.as_deref())?;
    if cli.yes {
        config.assume_yes = true;
    }
    if let Some(device) = cli.device {
        config.device = device;
    }

    let mut ops = ToolRunner::new();

    let scope = match cli.command {
        Commands::Chroot => return chroot::enter(&mut ops, &config),
        Commands::Sanitize => {
            confirm_destructive(&config, "ERASE EVERY BYTE of")?;
            let mut sleeper = RealSleeper;
            let result = sanitize::run_to_completion(
                &mut ops,
                &config.device,
                &mut sleeper,
                sanitize::POLL_INTERVAL,
            );
            return finish(&mut ops, &config, result.map(|_| ()));
        }
        Commands::All => RepairScope::full(),
        Commands::System => RepairScope::system(),
        Commands::Home => RepairScope::home(),
    };

    confirm_destructive(&config, "rewrite partitions of")?;
    let executor = RepairPlanExecutor::new(&config, LayoutSpec::standard());
    let result = executor.run(&mut ops, scope);
    finish(&mut ops, &config, result)
}

/// Interactive gate in front of every destructive target.
fn confirm_destructive(config: &RepairConfig, what: &str) -> Result<()> {
    if config.assume_yes {
        return Ok(());
    }
    println!(
        "This will {what} {}. Type \"yes\" to continue:",
        config.device.display()
    );
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    if answer.trim() == "yes" {
        Ok(())
    } else {
        Err(RepairError::config("operation cancelled by operator"))
    }
}

/// Apply the configured post-run action and propagate the result.
fn finish(ops: &mut dyn SystemOps, config: &RepairConfig, result: Result<()>) -> Result<()> {
    match &result {
        Ok(()) => {
            info!(
                "Run succeeded, applying final action: {}",
                config.final_action
            );
            match config.final_action {
                FinalAction::PowerOff => ops.power_off()?,
                FinalAction::Reboot => ops.reboot()?,
            }
        }
        Err(e) => {
            error!("Run failed: {e}");
            match config.failure_action {
                // Exit and leave the rescue shell to the operator.
                FailureAction::AwaitOperator => {}
                FailureAction::PowerOff => {
                    if let Err(pe) = ops.power_off() {
                        warn!("Power-off after failure also failed: {pe}");
                    }
                }
                FailureAction::Reboot => {
                    if let Err(re) = ops.reboot() {
                        warn!("Reboot after failure also failed: {re}");
                    }
                }
            }
        }
    }
    result
}
