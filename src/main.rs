//! ferropi - Distributed Monte Carlo estimation of pi

use std::io::{self, Write};
use std::process::ExitCode;

use tracing::{error, info};

use ferropi::Universe;
use ferropi::config::{self, Cli, ParseExit};
use ferropi::logging;
use ferropi::run::{Launch, Worker};
use ferropi::slurm;

fn main() -> ExitCode {
    let cli = match config::parse_from(std::env::args_os()) {
        Ok(cli) => cli,
        Err(ParseExit::Help(e)) => e.exit(),
        Err(ParseExit::Usage(text)) => {
            print!("{text}");
            return ExitCode::SUCCESS;
        }
    };

    logging::init(cli.verbose);
    if let Some(job) = slurm::job_id() {
        info!(%job, "running inside SLURM allocation");
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "run failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> ferropi::Result<()> {
    let workers = cli.worker_count();
    let mut universe = Universe::new(workers)?;
    if let Some(timeout) = cli.timeout() {
        universe = universe.with_timeout(timeout);
    }
    info!(workers, "launching universe");

    let launch = Launch::new(cli.samples.as_deref(), cli.run_options());
    let outcomes = universe.run(|world| {
        let worker = Worker::new(world);
        if worker.role().is_coordinator() {
            worker.run(&launch, &mut io::stdout().lock())
        } else {
            worker.run(&launch, &mut io::sink())
        }
    })?;

    if let Some(text) = config::rejection_usage(&outcomes) {
        info!("input rejected, no run");
        let mut stdout = io::stdout().lock();
        write!(stdout, "{text}")?;
        stdout.flush()?;
    }
    Ok(())
}
