//! CLI argument parsing using clap.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Layered resource resolution
#[derive(Parser)]
#[command(
    name = "strata",
    version = env!("CARGO_PKG_VERSION"),
    about = "Resolve resources across layered providers",
    long_about = "Resolve logical resource paths across weighted providers and watch them for visible changes.",
    next_line_help = true,
    styles = clap_cargo_style()
)]
pub struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Initialize project
    #[command(about = "Set up .strata directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration settings
    #[command(about = "Display active settings from .strata/settings.toml")]
    Config,

    /// Show which provider serves a path
    #[command(
        about = "Show the provider a read or write of a path resolves to",
        after_help = "Examples:\n  strata resolve config app.toml\n  strata resolve config app.toml --write"
    )]
    Resolve {
        /// Namespace name
        namespace: String,

        /// Logical path
        path: String,

        /// Resolve for writing instead of reading
        #[arg(short, long)]
        write: bool,
    },

    /// Print the content of a resource
    #[command(about = "Print the resource content the namespace serves")]
    Cat {
        /// Namespace name
        namespace: String,

        /// Logical path
        path: String,
    },

    /// List resources of a namespace
    #[command(
        about = "List resource paths merged across all providers",
        after_help = "Examples:\n  strata list config\n  strata list config '*.toml' --recursive\n  strata list app --dir conf"
    )]
    List {
        /// Namespace name
        namespace: String,

        /// Glob pattern; matches file names unless it contains '/'
        pattern: Option<String>,

        /// Directory to list, relative to the namespace context
        #[arg(short, long, default_value = "")]
        dir: String,

        /// Descend into subdirectories
        #[arg(short, long)]
        recursive: bool,
    },

    /// Watch resources for visible changes
    #[command(
        about = "Print resource names whenever their served content changes",
        after_help = "Examples:\n  strata watch config app.toml logging.toml\n  strata watch config app.toml --once --interval 500"
    )]
    Watch {
        /// Namespace name
        namespace: String,

        /// Resource names to watch
        #[arg(required = true, value_name = "NAME")]
        names: Vec<String>,

        /// Exit after the first change
        #[arg(long)]
        once: bool,

        /// Poll interval in milliseconds (overrides config)
        #[arg(short, long)]
        interval: Option<u64>,
    },
}
