use std::{fs, path::PathBuf, process::ExitCode};

use clap::Parser;
use regex::Regex;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

use objcdump::{dump, list_arches, DumpOptions};

/// Prints the Objective-C declarations recorded in a Mach-O file.
#[derive(Parser, Debug)]
#[command(name = "objcdump")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Thin or fat Mach-O file
    file: PathBuf,

    /// Show instance variable offsets
    #[arg(short = 'a')]
    ivar_offsets: bool,

    /// Show method implementation addresses
    #[arg(short = 'A')]
    method_addresses: bool,

    /// Sort classes, protocols and categories by name
    #[arg(short = 's')]
    sort_classes: bool,

    /// Sort classes so superclasses come before their subclasses
    #[arg(short = 'I')]
    sort_by_inheritance: bool,

    /// Sort methods by selector
    #[arg(short = 'S')]
    sort_methods: bool,

    /// Leave out the C++ ivar constructor method .cxx_construct
    #[arg(long)]
    strip_ctor: bool,

    /// Leave out the C++ ivar destructor method .cxx_destruct
    #[arg(long)]
    strip_dtor: bool,

    /// Leave out methods implied by a declared property
    #[arg(long)]
    hide_accessors: bool,

    /// Only dump classes, protocols and categories matching this regex
    #[arg(short = 'C', value_name = "REGEX")]
    class_filter: Option<Regex>,

    /// Only dump this architecture (e.g. "x86_64", "arm64e")
    #[arg(long)]
    arch: Option<String>,

    /// Levels of named structs written out inside struct definitions
    #[arg(long, default_value_t = 1)]
    expand_depth: usize,

    /// Drop truncated method, ivar and property lists instead of salvaging them
    #[arg(long)]
    strict: bool,

    /// Omit the header comment
    #[arg(short = 'H')]
    no_header: bool,

    /// Log verbosity (-v warnings, -vv info, -vvv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// List the architectures in the file and exit
    #[arg(long)]
    list_arches: bool,
}

impl Cli {
    fn options(&self) -> DumpOptions {
        let mut options = DumpOptions::new()
            .show_ivar_offsets(self.ivar_offsets)
            .show_method_addresses(self.method_addresses)
            .sort_classes(self.sort_classes)
            .sort_by_inheritance(self.sort_by_inheritance)
            .sort_methods(self.sort_methods)
            .strip_ctor(self.strip_ctor)
            .strip_dtor(self.strip_dtor)
            .hide_property_accessors(self.hide_accessors)
            .show_header(!self.no_header)
            .expand_depth(self.expand_depth)
            .strict_lists(self.strict);
        if let Some(arch) = &self.arch {
            options = options.arch(arch.clone());
        }
        if let Some(filter) = &self.class_filter {
            options = options.class_filter(filter.clone());
        }
        options
    }
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        _ => Level::DEBUG,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).ok();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let bytes = match fs::read(&cli.file) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!("failed to read {}: {err}", cli.file.display());
            eprintln!("objcdump: {}: {err}", cli.file.display());
            return ExitCode::FAILURE;
        }
    };

    if cli.list_arches {
        return match list_arches(&bytes) {
            Ok(arches) => {
                arches.iter().for_each(|arch| println!("{arch}"));
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("objcdump: {err}");
                ExitCode::FAILURE
            }
        };
    }

    let dumps = match dump(&bytes, &cli.options()) {
        Ok(dumps) => dumps,
        Err(err) => {
            eprintln!("objcdump: {err}");
            return ExitCode::FAILURE;
        }
    };

    let banner = dumps.len() > 1;
    let mut failed = false;
    for dump in dumps {
        if banner {
            println!("// ---- {} ----\n", dump.arch);
        }
        match dump.result {
            Ok((text, _)) => print!("{text}"),
            Err(err) => {
                failed = true;
                eprintln!("objcdump: {}: {err}", dump.arch);
            }
        }
        if banner {
            println!();
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
