use std::process::ExitCode;
use std::time::Instant;

use console::style;
use kiln::cli::{self, CliArgs};
use kiln::{Config, KilnError, Report, as_overhead, logging, theme};

fn main() -> ExitCode {
    let args = cli::parse();

    if let Err(e) = logging::init_logging(args.log_level) {
        eprintln!("kiln: couldn't set up logging: {e:#}");
        return ExitCode::from(2);
    }

    match run(args) {
        Ok(None) => ExitCode::SUCCESS,
        Ok(Some(report)) if report.is_success() => ExitCode::SUCCESS,
        Ok(Some(report)) => {
            for cause in report.root_causes() {
                tracing::error!(
                    "{}: {}",
                    KilnError::TaskFailed(cause.label.clone()),
                    cause.error.as_deref().unwrap_or("unknown error")
                );
            }
            ExitCode::from(1)
        }
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::from(2)
        }
    }
}

/// `Ok(None)` when there was nothing to run.
fn run(args: CliArgs) -> Result<Option<Report>, KilnError> {
    let s = Instant::now();

    let mut config = Config::load(&args.config)?;
    if let Some(policy) = args.on_error {
        config.on_error = policy;
    }

    let orchestrator = theme::orchestrator(config)?;

    if args.list {
        for name in orchestrator.names() {
            println!("{name}");
        }
        return Ok(None);
    }

    if !orchestrator.contains(&args.task) {
        return Err(KilnError::TaskNotFound(args.task));
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(KilnError::RuntimeBuild)?;

    tracing::info!("{} {}", style("kiln").bold(), style(&args.task).cyan());

    let report = runtime.block_on(async {
        let handle = orchestrator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutting down, press Ctrl-C again to force");
                handle.shutdown();
            }
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        });

        orchestrator.run(args.task.as_str()).await
    });

    tracing::info!("done {}", as_overhead(s));
    Ok(Some(report))
}
