use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

pub const INFRATEST_HELP_TEMPLATE: &str =
    "{before-help}\nUsage:\n    {usage}\n\nGlobal options:\n{options}\n";

pub const INFRATEST_BEFORE_HELP: &str = concat!(
    "infratest ",
    env!("CARGO_PKG_VERSION"),
    " – Integration tests for infrastructure modules\n\n",
    "\x1b[1;36mCommands\x1b[0m\n",
    "  run              Provision each scenario in a private workspace, check outputs, destroy.\n",
    "  list             Show the scenarios declared in infratest.toml.\n",
);

#[derive(Parser, Debug)]
#[command(
    name = "infratest",
    author,
    version,
    propagate_version = false,
    disable_help_subcommand = true,
    before_help = INFRATEST_BEFORE_HELP,
    help_template = INFRATEST_HELP_TEMPLATE
)]
#[allow(clippy::struct_excessive_bools)]
pub struct InfratestCli {
    #[arg(
        short,
        long,
        help = "Suppress human output (errors still print to stderr)",
        global = true
    )]
    pub quiet: bool,
    #[arg(
        short,
        long,
        action = ArgAction::Count,
        help = "Increase logging (-vv reaches trace)",
        global = true
    )]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q", global = true)]
    pub trace: bool,
    #[arg(
        long,
        help = "Emit {status,message,details} JSON envelopes",
        global = true
    )]
    pub json: bool,
    #[arg(long, help = "Disable colored human output", global = true)]
    pub no_color: bool,
    #[command(subcommand)]
    pub command: CommandCli,
}

#[derive(Subcommand, Debug)]
pub enum CommandCli {
    #[command(about = "Run scenarios from the manifest")]
    Run(RunArgs),
    #[command(about = "List scenarios declared in the manifest")]
    List(ListArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ManifestArgs {
    #[arg(
        long,
        value_name = "PATH",
        help = "Manifest to read (default: nearest infratest.toml)"
    )]
    pub manifest: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub manifest: ManifestArgs,
    #[arg(
        long = "only",
        value_name = "SCENARIO",
        help = "Run only the named scenario (repeatable)"
    )]
    pub only: Vec<String>,
    #[arg(
        short,
        long,
        value_name = "N",
        env = "INFRATEST_JOBS",
        help = "Scenarios to run concurrently"
    )]
    pub jobs: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    #[command(flatten)]
    pub manifest: ManifestArgs,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        InfratestCli::command().debug_assert();
    }

    #[test]
    fn run_accepts_repeated_only() {
        let cli = InfratestCli::parse_from([
            "infratest",
            "run",
            "--only",
            "complete-web",
            "--only",
            "web-proxy",
            "-j",
            "2",
            "--json",
        ]);
        assert!(cli.json);
        let CommandCli::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.only, vec!["complete-web", "web-proxy"]);
        assert_eq!(args.jobs, Some(2));
    }
}
