use atty::Stream;
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use infratest_core::{
    format_status_message, list_scenarios, run_suite, to_json_response, CommandStatus,
    ExecutionOutcome, GlobalOptions, ListRequest, RunSuiteRequest, Settings,
};

mod cli;
mod output;
mod style;

use cli::{CommandCli, InfratestCli};
use style::Style;

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = InfratestCli::parse();
    init_tracing(cli.trace, cli.verbose);

    let global = GlobalOptions {
        quiet: cli.quiet,
        verbose: cli.verbose,
        trace: cli.trace,
        json: cli.json,
    };

    let (name, outcome) = execute(&cli.command).map_err(|err| eyre!("{err:?}"))?;
    let code = emit_output(&cli, &global, name, &outcome)?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(trace: bool, verbose: u8) {
    let level = if trace {
        "trace"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = format!("infratest={level},infratest_core={level},infratest_domain={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn execute(command: &CommandCli) -> anyhow::Result<(&'static str, ExecutionOutcome)> {
    match command {
        CommandCli::Run(args) => {
            let settings = Settings::from_env();
            let request = RunSuiteRequest {
                manifest: args.manifest.manifest.clone(),
                only: args.only.clone(),
                jobs: args.jobs,
            };
            Ok(("run", run_suite(&settings, &request)?))
        }
        CommandCli::List(args) => {
            let request = ListRequest {
                manifest: args.manifest.manifest.clone(),
            };
            Ok(("list", list_scenarios(&request)?))
        }
    }
}

fn emit_output(
    cli: &InfratestCli,
    global: &GlobalOptions,
    name: &str,
    outcome: &ExecutionOutcome,
) -> Result<i32> {
    let code = outcome.status.exit_code();
    let style = Style::new(cli.no_color, atty::is(Stream::Stdout));

    if global.json {
        let payload = to_json_response(name, outcome);
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else if !global.quiet {
        let message = format_status_message(name, &outcome.message);
        println!("{}", style.status(outcome.status, &message));
        let lines = match name {
            "run" => output::run_lines(&style, &outcome.details),
            "list" => output::list_lines(&style, &outcome.details),
            _ => Vec::new(),
        };
        for line in lines {
            println!("{line}");
        }
        if let Some(hint) = output::hint_from_details(&outcome.details) {
            println!("{}", style.info(&format!("Hint: {hint}")));
        }
    } else if outcome.status != CommandStatus::Ok {
        eprintln!("{}", format_status_message(name, &outcome.message));
    }

    Ok(code)
}
