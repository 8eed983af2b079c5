//! # Xmd
//!
//! This binary processes a single Markdown file through the XMD directive
//! pipeline and writes the rendered result to stdout or a file.

use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use log::info;
use xmd::capabilities::{
    AllowAllPolicy, NativeFileSystem, NativeModuleLoader, NativeShellRunner, OutputFormatter,
    PassthroughFormatter,
};
use xmd::processor::ContentProcessor;
use xmd::store::VariableStore;

/// Struct containing the CLI configuration for Xmd.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// The path to the Markdown source file.
    #[arg(index = 1)]
    pub file: PathBuf,

    /// Where to write the rendered output. Defaults to stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Additional directory to search for `import`ed modules. Repeatable.
    #[arg(long = "search-path")]
    pub search_paths: Vec<PathBuf>,

    /// Specify the log level of the processor.
    #[arg(value_enum, short, long, default_value_t = LogLevel::default())]
    pub verbosity: LogLevel,
}

impl Cli {
    pub fn init() -> Self {
        Cli::parse()
    }
}

/// Enum for specifying the log level of Xmd.
#[derive(ValueEnum, Clone, Default, Debug)]
pub enum LogLevel {
    /// The default log level. Only critical errors will be logged.
    #[default]
    #[value(alias("0"))]
    Error,

    /// Also log warnings, e.g. an unresolved import.
    #[value(alias("1"))]
    Warn,

    /// Also log which file is being processed and which modules are loaded.
    #[value(alias("2"))]
    Info,

    /// Log every directive dispatch and shell invocation.
    #[value(alias("3"))]
    Debug,

    /// Log everything, including per-token lexer output.
    #[value(alias("4"))]
    Trace,
}

impl From<&LogLevel> for log::Level {
    fn from(value: &LogLevel) -> Self {
        match value {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::init();

    simple_logger::init_with_level((&args.verbosity).into())?;

    let file = fs::canonicalize(&args.file)?;
    info!("processing {}", file.display());

    let source = fs::read_to_string(&file)?;

    let mut search_paths = args.search_paths;
    if let Some(parent) = file.parent() {
        search_paths.push(parent.to_path_buf());
    }

    let mut store = VariableStore::new();
    let filename: std::rc::Rc<str> = file.to_string_lossy().into_owned().into();
    let mut modules = NativeModuleLoader::new(search_paths);
    let mut processor = ContentProcessor::new(
        &mut store,
        Some(filename),
        &NativeShellRunner,
        &NativeFileSystem,
        &AllowAllPolicy,
        &mut modules,
    );

    let rendered = PassthroughFormatter.format(&processor.process(&source)?);

    match args.output {
        Some(path) => fs::write(path, rendered)?,
        None => print!("{rendered}"),
    }

    Ok(())
}
