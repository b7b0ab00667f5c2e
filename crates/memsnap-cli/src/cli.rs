use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "memsnap")]
#[command(version, about = "Typed snapshots of a live process's memory")]
pub struct Cli {
    /// Engine settings (TOML with a `[snapshot]` table)
    #[arg(short, long, global = true, default_value = "memsnap.toml", env = "MEMSNAP_CONFIG")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List the layout versions found in a directory
    Versions {
        #[arg(short, long, default_value = "layouts")]
        layouts: PathBuf,
    },
    /// Check the sample model against every layout version
    Check {
        #[arg(short, long, default_value = "layouts")]
        layouts: PathBuf,
        /// Only check the version with this label
        #[arg(long)]
        version: Option<String>,
    },
    /// Print the identity and base offset of a target
    Identity {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Take one snapshot of the sample model
    Snapshot {
        #[arg(short, long, default_value = "layouts")]
        layouts: PathBuf,
        #[command(flatten)]
        target: TargetArgs,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Take snapshots periodically until interrupted
    Watch {
        #[arg(short, long, default_value = "layouts")]
        layouts: PathBuf,
        #[command(flatten)]
        target: TargetArgs,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Delay between snapshots
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
        /// Stop after this many snapshots
        #[arg(long)]
        count: Option<usize>,
    },
}

/// Which process to inspect. With both an image and a live target, the
/// configured transport decides.
#[derive(Args, Debug, Clone, Default)]
#[group(required = true, multiple = true)]
pub struct TargetArgs {
    /// Attach to a running process
    #[arg(long, conflicts_with = "name")]
    pub pid: Option<u32>,
    /// Attach to the first process with this name
    #[arg(long)]
    pub name: Option<String>,
    /// Read a saved memory image
    #[arg(long)]
    pub image: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Tsv,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_snapshot_arguments() {
        let cli = Cli::try_parse_from([
            "memsnap", "snapshot", "--image", "world.json", "--format", "tsv",
        ])
        .unwrap();
        match cli.command {
            Command::Snapshot {
                target,
                format,
                layouts,
                output,
            } => {
                assert_eq!(target.image, Some(PathBuf::from("world.json")));
                assert_eq!(format, OutputFormat::Tsv);
                assert_eq!(layouts, PathBuf::from("layouts"));
                assert!(output.is_none());
            }
            _ => panic!("expected snapshot"),
        }
    }

    #[test]
    fn test_target_arguments() {
        assert!(Cli::try_parse_from(["memsnap", "identity"]).is_err());
        assert!(
            Cli::try_parse_from(["memsnap", "identity", "--pid", "1", "--name", "game"]).is_err()
        );

        let cli =
            Cli::try_parse_from(["memsnap", "identity", "--pid", "1", "--image", "a.json"])
                .unwrap();
        match cli.command {
            Command::Identity { target } => {
                assert_eq!(target.pid, Some(1));
                assert_eq!(target.image, Some(PathBuf::from("a.json")));
            }
            _ => panic!("expected identity"),
        }
    }
}
