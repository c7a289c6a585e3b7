use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// repairctl - factory repair orchestrator for the handheld's internal drive
#[derive(Debug, Parser)]
#[command(name = "repairctl")]
#[command(about = "Re-images and repairs the device's fixed partition layout")]
#[command(version)]
pub struct Cli {
    /// Path to a JSON configuration file (defaults plus env overrides apply
    /// either way)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Skip the interactive confirmation prompt
    #[arg(short = 'y', long, global = true)]
    pub yes: bool,

    /// Target block device override (e.g. /dev/nvme0n1)
    #[arg(long, global = true)]
    pub device: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Full factory reset: partition table, both OS sets, and home
    All,
    /// Repair the OS partitions, preserving user data in home
    System,
    /// Repair the home partition, preserving the installed OS
    Home,
    /// Mount partition set A and open a shell inside it
    Chroot,
    /// Secure-erase the whole drive (block-erase sanitize, or secure
    /// format on drives without sanitize support)
    Sanitize,
}

impl Cli {
    /// Parse arguments, exiting on error.
    ///
    /// An unrecognized or missing target prints usage; when the operator is
    /// not root the usage alone is misleading (the run would fail preflight
    /// anyway), so a re-run-as-root hint is appended.
    pub fn parse_args() -> Self {
        match Self::try_parse() {
            Ok(cli) => cli,
            Err(e) => {
                let _ = e.print();
                if e.use_stderr() && !nix::unistd::geteuid().is_root() {
                    eprintln!();
                    eprintln!("repairctl must run as root; re-run with sudo.");
                }
                std::process::exit(e.exit_code());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_targets_parse() {
        for target in ["all", "system", "home", "chroot", "sanitize"] {
            let cli = Cli::try_parse_from(["repairctl", target]).unwrap();
            match (target, &cli.command) {
                ("all", Commands::All)
                | ("system", Commands::System)
                | ("home", Commands::Home)
                | ("chroot", Commands::Chroot)
                | ("sanitize", Commands::Sanitize) => {}
                other => panic!("target {target} parsed as {:?}", other.0),
            }
        }
    }

    #[test]
    fn test_missing_target_is_an_error() {
        assert!(Cli::try_parse_from(["repairctl"]).is_err());
    }

    #[test]
    fn test_unknown_target_is_an_error() {
        assert!(Cli::try_parse_from(["repairctl", "everything"]).is_err());
    }

    #[test]
    fn test_bad_invocations_get_the_privilege_hint_channel() {
        // The hint is appended only to real usage errors (stderr), never to
        // requested help/version output (stdout).
        let missing = Cli::try_parse_from(["repairctl"]).unwrap_err();
        assert!(missing.use_stderr());
        let unknown = Cli::try_parse_from(["repairctl", "everything"]).unwrap_err();
        assert!(unknown.use_stderr());
        let help = Cli::try_parse_from(["repairctl", "--help"]).unwrap_err();
        assert!(!help.use_stderr());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from([
            "repairctl",
            "system",
            "--yes",
            "--config",
            "/etc/repairctl.json",
            "--device",
            "/dev/sda",
        ])
        .unwrap();
        assert!(cli.yes);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/repairctl.json")));
        assert_eq!(cli.device, Some(PathBuf::from("/dev/sda")));
    }

    #[test]
    fn test_flags_may_precede_the_target() {
        let cli = Cli::try_parse_from(["repairctl", "-y", "home"]).unwrap();
        assert!(cli.yes);
        assert!(matches!(cli.command, Commands::Home));
    }
}
