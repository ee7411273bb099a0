pub mod audit;
pub mod classify;
pub mod cli;
pub mod columns;
pub mod compare;
pub mod date_format;
pub mod engine;
pub mod error;
pub mod io_utils;
pub mod metadata;
pub mod probe;
pub mod report;
pub mod source;
pub mod target;

use std::{env, sync::OnceLock};

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

use crate::{
    cli::{Cli, Commands},
    date_format::DateFormat,
    error::AuditError,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("row_audit", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Audit(args) => audit::execute(&args).map(|_| ()),
        Commands::Probe(args) => probe::execute(&args),
        Commands::DateFormat(args) => handle_date_format(&args),
    }
}

fn handle_date_format(args: &cli::DateFormatArgs) -> Result<()> {
    let hint = match &args.hint {
        Some(pattern) => Some(DateFormat::new(pattern.as_str()).ok_or_else(|| {
            AuditError::configuration(format!("Invalid date format hint '{pattern}'"))
        })?),
        None => None,
    };
    for sample in &args.samples {
        match date_format::resolve(sample.trim(), hint.as_ref()) {
            Some(format) => println!("{sample}\t{}", format.pattern()),
            None => println!("{sample}\tunrecognised"),
        }
    }
    Ok(())
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        other => (other as char).to_string(),
    }
}
