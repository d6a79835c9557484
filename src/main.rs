use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pagesnap::core::{print_error_message, print_warning_message};
use pagesnap::env::{self, EnvVar};
use pagesnap::jobs::{JobEvent, JobState};
use pagesnap::utils::{LocalFileSystem, RandomIds};
use pagesnap::{ArchiveReader, MhtmlLayout, OutputFormat, SnapshotOptions, SnapshotReport, Snapshotter};

/// Saves web pages as MHTML archives or folder bundles.
#[derive(Debug, Parser)]
#[command(name = "pagesnap", version)]
#[command(about = "Snapshot web pages into MHTML archives or folder bundles", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Save a page and everything it needs.
    Save {
        /// URL or path of a local file.
        target: String,

        /// Where to write the archive or the root document.
        #[arg(short, long, value_name = "PATH")]
        output: PathBuf,

        #[arg(long, value_enum, default_value = "mhtml")]
        format: OutputFormat,

        /// Keep the folder layout inside the MHTML container.
        #[arg(long)]
        grouped: bool,

        /// Leave audio and video as absolute links.
        #[arg(long)]
        no_media: bool,

        /// Leave images as absolute links.
        #[arg(long)]
        no_images: bool,

        /// Drop style rules that match nothing in their document.
        #[arg(long)]
        remove_unused_styles: bool,

        /// Keep on* attributes.
        #[arg(long)]
        keep_event_handlers: bool,

        /// Acquire up to N resources at once.
        #[arg(short = 'j', long, value_name = "N")]
        jobs: Option<usize>,

        #[arg(short = 'u', long, value_name = "UA")]
        user_agent: Option<String>,

        /// Per-request timeout in seconds, 0 for none.
        #[arg(short = 't', long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Wait up to this many milliseconds for pending page activity.
        #[arg(long, value_name = "MS")]
        settle: Option<u64>,

        /// Print nothing but errors.
        #[arg(short = 's', long)]
        silent: bool,

        /// Print the run report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Unpack an MHTML archive into a folder.
    Extract {
        archive: PathBuf,

        #[arg(short, long, value_name = "DIR")]
        output: PathBuf,

        /// Additional resource folder suffixes to recognize.
        #[arg(long = "files-suffix", value_name = "SUFFIX")]
        files_suffixes: Vec<String>,
    },

    /// List the environment variables that configure pagesnap.
    Env,
}

fn init_logging() {
    let level = env::core::LogLevel::get_or_default("warn".to_string());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pagesnap={}", level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

fn use_color() -> bool {
    !env::core::NoColor::get_or_default(false) && atty::is(atty::Stream::Stderr)
}

fn print_report(report: &SnapshotReport, silent: bool, json: bool) {
    let color = use_color();

    if json {
        match serde_json::to_string_pretty(report) {
            Ok(text) => println!("{}", text),
            Err(error) => print_error_message(&error.to_string(), color),
        }
        return;
    }

    if !silent {
        for warning in &report.warnings {
            print_warning_message(warning, color);
        }
    }
    for error in &report.errors {
        print_error_message(error, color);
    }
    if !silent {
        if let Some(archive) = &report.archive {
            let saved = archive.resources.iter().filter(|r| r.saved).count();
            println!("{} ({} resources)", archive.path, saved);
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_logging();

    match cli.command {
        CliCommand::Save {
            target,
            output,
            format,
            grouped,
            no_media,
            no_images,
            remove_unused_styles,
            keep_event_handlers,
            jobs,
            user_agent,
            timeout,
            settle,
            silent,
            json,
        } => {
            let mut options = SnapshotOptions::from_env();
            options.format = format;
            if grouped {
                options.mhtml_layout = MhtmlLayout::Grouped;
            }
            options.save_media = !no_media;
            options.save_images = !no_images;
            options.remove_unused_styles = remove_unused_styles;
            options.strip_event_handlers = !keep_event_handlers;
            if let Some(jobs) = jobs {
                options.max_concurrent = jobs.max(1);
            }
            if user_agent.is_some() {
                options.user_agent = user_agent;
            }
            if let Some(timeout) = timeout {
                options.timeout = Duration::from_secs(timeout);
            }
            options.pending_events_wait = settle.map(Duration::from_millis);

            let snapshotter = match Snapshotter::with_http(options) {
                Ok(snapshotter) => snapshotter,
                Err(error) => {
                    print_error_message(&error.to_string(), use_color());
                    process::exit(1);
                }
            };

            let mut failed_jobs = 0usize;
            let mut listener = |event: &JobEvent| {
                if let JobEvent::Finished { job, state } = event {
                    if *state == JobState::Failed {
                        failed_jobs += 1;
                    }
                    tracing::debug!("{} finished: {:?}", job, state);
                }
            };
            let report = snapshotter.save_url(&target, &output, &mut listener).await;
            tracing::debug!("{} jobs failed", failed_jobs);

            print_report(&report, silent, json);
            if !report.success {
                process::exit(1);
            }
        }
        CliCommand::Extract {
            archive,
            output,
            files_suffixes,
        } => {
            let mut options = SnapshotOptions::from_env();
            options.extra_files_suffixes.extend(files_suffixes);
            let reader =
                ArchiveReader::from_options(&options, std::rc::Rc::new(LocalFileSystem), std::rc::Rc::new(RandomIds));

            match reader.extract_file(&archive, &output).await {
                Ok(extracted) => println!("{}", extracted.root.display()),
                Err(error) => {
                    print_error_message(&error.to_string(), use_color());
                    process::exit(1);
                }
            }
        }
        CliCommand::Env => print!("{}", env::generate_env_docs()),
    }
}
