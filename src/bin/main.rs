//! Entry point of the `fmount` command line tool.

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{info, warn};
use std::process::ExitCode;
use std::time::Duration;

use fmount::commands::{Cli, Command, MountArgs};
use fmount::config::Config;
use fmount::relation::SymlinkTracker;
use fmount::system::CommandRunner;
use fmount::traits::{ProgressSink, StdoutSink};
use fmount::{Fmount, archive, checksum};

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = stderrlog::new()
        .module("fmount")
        .quiet(cli.quiet)
        .verbosity(usize::from(cli.verbose) + 1)
        .init()
    {
        eprintln!("fmount: cannot initialise logging: {err}");
    }

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("fmount: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::default()
        .with_slot(cli.slot)
        .with_relation_root(cli.relations)
        .with_timeout(Duration::from_secs(cli.timeout));
    let runner = CommandRunner::new(config.timeout()).with_grace(config.grace());
    let store = SymlinkTracker::new(config.relation_root());
    let fmount = Fmount::new(&runner, &store, &config).with_progress(&StdoutSink);

    match cli.command {
        Command::Mount(args) => mount(&fmount, args),
        Command::Unmount { image } => {
            let report = fmount
                .unmount(&image)?
                .into_result()
                .with_context(|| format!("teardown of {} incomplete", image.display()))?;
            info!(
                "{} unmounted, {} detached",
                report.unmounted().len(),
                report.detached().len()
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Keys { image, attach_args } => {
            let report = fmount
                .key_ids(&image, &attach_args)
                .with_context(|| format!("cannot read key protectors of {}", image.display()))?;
            if report.ids().is_empty() {
                warn!("no key protector found in {}", image.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Extract { archive: source } => {
            let image = archive::extract(&source)?;
            StdoutSink.progress(&image.to_string_lossy())?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Verify {
            image,
            algorithm,
            digest,
        } => {
            if checksum::verify(&image, algorithm, &digest)? {
                StdoutSink.progress("OK")?;
                Ok(ExitCode::SUCCESS)
            } else {
                StdoutSink.progress("MISMATCH")?;
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Status { image } => {
            for relation in fmount.status(&image)? {
                StdoutSink.progress(&relation.to_string())?;
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn mount(fmount: &Fmount, args: MountArgs) -> Result<ExitCode> {
    let mut image = args.image.clone();

    if let Some(expected) = &args.verify {
        let matches = checksum::verify(&image, expected.algorithm, &expected.digest)?;
        if !matches {
            bail!("{} digest of {} does not match", expected.algorithm, image.display());
        }
        info!("{} digest of {} verified", expected.algorithm, image.display());
    }

    if args.extract {
        image = archive::extract(&image)?;
    }

    let mount_root = args.mount_root_for(&image);
    let report = fmount
        .mount(&image, &mount_root, &args.key, args.bootable, &args.attach_args)
        .with_context(|| format!("cannot mount {}", image.display()))?;

    if report.mounted().is_empty() {
        warn!("no partition of {} could be mounted", image.display());
    }
    for locked in report.locked() {
        warn!("{} stays locked, no key given", locked.display());
    }
    Ok(ExitCode::SUCCESS)
}
