use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "crashkit",
    about = "Crash report storage and the crash mover",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Raise log verbosity (-v debug, -vv trace). RUST_LOG wins when set.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// TOML file describing the store (`kind = "fs_dated_radix"`, ...).
    /// Without it a dated radix store under ./crashes is used.
    #[arg(short, long, global = true)]
    pub store: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Move new crashes from one store to another
    Move(MoveArgs),
    /// Save a crash into the store
    Save(SaveArgs),
    /// Show a stored crash
    Get(GetArgs),
    /// Delete every record of a crash
    Remove(RemoveArgs),
    /// List (and consume) the ids of new crashes
    ListNew(ListNewArgs),
    /// Mint a new crash id
    NewId(NewIdArgs),
    /// Print the effective configuration
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct MoveArgs {
    /// Mover configuration file.
    pub config: PathBuf,
    /// Override `number_of_submissions` ("forever", "all" or a count).
    #[arg(short = 'n', long)]
    pub submissions: Option<String>,
    /// Override `tasks.number_of_threads`.
    #[arg(short = 't', long)]
    pub threads: Option<usize>,
}

#[derive(Args)]
pub struct SaveArgs {
    /// Crash id. A new one is minted when omitted.
    pub id: Option<String>,
    /// JSON file with the raw metadata.
    #[arg(long)]
    pub raw: Option<PathBuf>,
    /// Dump file, optionally named: `--dump minidump.dmp` or
    /// `--dump flash1=flash.dmp`.
    #[arg(long = "dump", value_name = "[NAME=]PATH")]
    pub dumps: Vec<String>,
    /// JSON file with the processed record.
    #[arg(long)]
    pub processed: Option<PathBuf>,
}

#[derive(Args)]
pub struct GetArgs {
    pub id: String,
    /// Write this dump ("dump" for the default one) instead of the metadata.
    #[arg(long, conflicts_with_all = ["processed", "files"])]
    pub dump: Option<String>,
    /// Where `--dump` writes to. Standard output when omitted.
    #[arg(short, long, requires = "dump")]
    pub output: Option<PathBuf>,
    /// Show the processed record instead of the raw one.
    #[arg(long)]
    pub processed: bool,
    /// With `--processed`, skip redaction.
    #[arg(long, requires = "processed")]
    pub unredacted: bool,
    /// List the dump files of the crash.
    #[arg(long)]
    pub files: bool,
}

#[derive(Args)]
pub struct RemoveArgs {
    pub id: String,
}

#[derive(Args)]
pub struct ListNewArgs {
    /// Stop after this many ids. The rest stay queued.
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

#[derive(Args)]
pub struct NewIdArgs {
    /// Date to encode (YYYY-MM-DD). Defaults to today (UTC).
    #[arg(long)]
    pub date: Option<NaiveDate>,
    #[arg(long, default_value = "2")]
    pub depth: u8,
}

#[derive(Args)]
pub struct ConfigArgs {
    /// Show this mover configuration instead of the store.
    #[arg(long)]
    pub mover: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_move() {
        let cli = Cli::try_parse_from(["crashkit", "move", "mover.toml", "-n", "all"]).unwrap();
        if let Command::Move(args) = cli.command {
            assert_eq!(args.config, PathBuf::from("mover.toml"));
            assert_eq!(args.submissions.as_deref(), Some("all"));
            assert!(args.threads.is_none());
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_save_with_named_dumps() {
        let cli = Cli::try_parse_from([
            "crashkit", "save", "abc123", "--raw", "meta.json", "--dump", "a.dmp", "--dump",
            "flash1=b.dmp",
        ])
        .unwrap();
        if let Command::Save(args) = cli.command {
            assert_eq!(args.id.as_deref(), Some("abc123"));
            assert_eq!(args.dumps, vec!["a.dmp", "flash1=b.dmp"]);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_get_processed() {
        let cli = Cli::try_parse_from(["crashkit", "get", "abc123", "--processed", "--unredacted"])
            .unwrap();
        if let Command::Get(args) = cli.command {
            assert!(args.processed);
            assert!(args.unredacted);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn unredacted_needs_processed() {
        assert!(Cli::try_parse_from(["crashkit", "get", "abc123", "--unredacted"]).is_err());
    }

    #[test]
    fn dump_conflicts_with_processed() {
        assert!(
            Cli::try_parse_from(["crashkit", "get", "abc123", "--dump", "dump", "--processed"])
                .is_err()
        );
    }

    #[test]
    fn parse_new_id() {
        let cli =
            Cli::try_parse_from(["crashkit", "new-id", "--date", "2024-03-17", "--depth", "3"])
                .unwrap();
        if let Command::NewId(args) = cli.command {
            assert_eq!(args.date, NaiveDate::from_ymd_opt(2024, 3, 17));
            assert_eq!(args.depth, 3);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_global_flags() {
        let cli = Cli::try_parse_from([
            "crashkit", "-vv", "list-new", "--store", "store.toml", "--format", "json",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.store, Some(PathBuf::from("store.toml")));
        assert_eq!(cli.format, OutputFormat::Json);
    }
}
