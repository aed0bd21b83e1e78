use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

use ppr_refresh::pipeline::EXIT_HARD_FAILURE;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    match try_main().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(EXIT_HARD_FAILURE)
        }
    }
}

async fn try_main() -> anyhow::Result<ExitCode> {
    ppr_refresh::logging::init().context("init logging")?;

    let cli = ppr_refresh::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        ppr_refresh::cli::Command::Run(args) => {
            let outcome = ppr_refresh::pipeline::run(args).await.context("run")?;
            Ok(ExitCode::from(outcome.exit_code()))
        }
        ppr_refresh::cli::Command::Extract(args) => {
            ppr_refresh::extract::run(args).context("extract")?;
            Ok(ExitCode::SUCCESS)
        }
        ppr_refresh::cli::Command::Check(args) => {
            ppr_refresh::publish::check(args).context("check")?;
            Ok(ExitCode::SUCCESS)
        }
        ppr_refresh::cli::Command::Schedule(args) => {
            ppr_refresh::release::schedule(args).context("schedule")?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
