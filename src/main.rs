use std::io::IsTerminal;
use std::process::ExitCode;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::Level;

use arfx::cli::Args;
use arfx::data::DataType;
use arfx::formats::FormatRegistry;
use arfx::ops::Dispatcher;
use arfx::ArfxError;

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::WARN })
        .with_target(false)
        .init();

    if args.help_datatypes {
        print!("{}", DataType::doc());
        return ExitCode::SUCCESS;
    }

    match run(&args) {
        Ok(true)  => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err((target, e)) => {
            eprintln!("arfx: {target}: {}: {e}", e.kind());
            ExitCode::from(2)
        }
    }
}

/// Run the selected operation.  `Ok(false)` when some items failed; fatal
/// errors come back with the path they concern.
fn run(args: &Args) -> Result<bool, (String, ArfxError)> {
    let usage = |msg: &str| ("arfx".to_owned(), ArfxError::InvalidArgument(msg.to_owned()));
    let op = args.operation().ok_or_else(|| usage("specify one of -A -c -r -t -x -d -U --write-attr --read-attr"))?;
    let file = args.file.clone().ok_or_else(|| usage("specify a container with -f FILE"))?;
    let target = file.display().to_string();

    let options = args.to_options().map_err(|e| ("arfx".to_owned(), e))?;
    let registry = FormatRegistry::builtin().map_err(|e| ("arfx".to_owned(), e))?;

    let progress = if options.verbose || !std::io::stderr().is_terminal() {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar
    };

    let mut dispatcher = Dispatcher::new(registry, options).with_progress(progress);
    let report = dispatcher.run(op, &file, &args.items).map_err(|e| (target, e))?;

    for line in &report.output {
        println!("{line}");
    }
    if args.verbose || !report.is_success() {
        eprintln!("arfx: {op}: {}", report.summary());
    }
    Ok(report.is_success())
}
