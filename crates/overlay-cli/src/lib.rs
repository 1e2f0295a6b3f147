//! # overlay
//!
//! Inspects declaration files: compiled class layouts and the call plan of
//! every overload.
//!
//! Logging goes through `tracing`; set `RUST_LOG` or pass `--log-level`.
use clap::{Parser, Subcommand};
use overlay_runtime::{Declarations, Loaded, NativeRuntime, RuntimeConfig, RuntimeError};
use overlay_value::ClassLayout;
use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspects native overlay declarations")]
pub struct Args {
    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, value_name = "FILTER", default_value = "warn")]
    pub log_level: String,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the compiled layout of every declared class.
    Layout {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Print the call plan of every declared overload.
    Plan {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

pub fn run_cli() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let file = match &args.command {
        Command::Layout { file } | Command::Plan { file } => file,
    };
    match load(file) {
        Ok(loaded) => {
            match args.command {
                Command::Layout { .. } => print_layouts(&loaded),
                Command::Plan { .. } => print_plans(&loaded),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error loading {}: {}", file.display(), e);
            ExitCode::from(1)
        }
    }
}

fn load(file: &Path) -> Result<Loaded, RuntimeError> {
    let declarations = Declarations::from_path(file)?;
    // Only layouts and plans are computed, so no library is needed.
    let config = RuntimeConfig {
        library: None,
        ..RuntimeConfig::from_env()?
    };
    let runtime = NativeRuntime::new(config)?;
    tracing::debug!(
        classes = declarations.classes.len(),
        functions = declarations.functions.len(),
        "loading declarations"
    );
    declarations.load_into(&runtime)
}

fn print_layouts(loaded: &Loaded) {
    for layout in &loaded.classes {
        println!("{}", describe_layout(layout));
    }
}

fn print_plans(loaded: &Loaded) {
    for function in &loaded.functions {
        println!("{}", function.name());
        for overload in function.overloads() {
            println!("  {} at {}", overload.signature(), overload.entry());
            for line in overload.plan().to_string().lines() {
                println!("    {line}");
            }
        }
    }
}

pub fn describe_layout(layout: &ClassLayout) -> String {
    let mut out = match layout.base() {
        Some(base) => format!("{} : {}", layout.name(), base.name()),
        None => layout.name().to_string(),
    };
    if layout.is_open() {
        out.push_str(" (open)");
    } else {
        out.push_str(&format!(" ({} bytes, align {})", layout.size(), layout.alignment()));
    }
    for field in layout.fields() {
        let ghost = if field.ghost { " ghost" } else { "" };
        out.push_str(&format!(
            "\n  {:>#6x} {:<16} {}{}",
            field.offset.0, field.name, field.ty, ghost
        ));
        if field.owner.as_ref() != layout.name() {
            out.push_str(&format!(" (from {})", field.owner));
        }
    }
    out
}
