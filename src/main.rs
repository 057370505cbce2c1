use clap::{Arg, ArgAction, Command};
use std::process::ExitCode;
use tracing::error;
use turtle_devtools::logging::{self, Verbosity};
use turtle_devtools::{tasks, Task};

fn cli() -> Command {
    Command::new("turtle-devtools")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Build a website tree and deploy it over FTP(S) or SFTP")
        .arg(
            Arg::new("task")
                .long("task")
                .short('t')
                .value_name("TASK")
                .required(true)
                .help("Task to run: build, deploy or watch"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .action(ArgAction::SetTrue)
                .help("Log protocol details"),
        )
        .arg(
            Arg::new("quiet")
                .long("quiet")
                .short('q')
                .action(ArgAction::SetTrue)
                .conflicts_with("verbose")
                .help("Only log warnings and errors"),
        )
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = match cli().try_get_matches() {
        Ok(m) => m,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() { ExitCode::FAILURE } else { ExitCode::SUCCESS };
        }
    };

    logging::init(Verbosity::from_flags(matches.get_flag("verbose"), matches.get_flag("quiet")));

    let name = matches.get_one::<String>("task").map(String::as_str).unwrap_or_default();
    let task = match name.parse::<Task>() {
        Ok(task) => task,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match tasks::run(task).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{} failed: {}", task, e);
            ExitCode::FAILURE
        }
    }
}
