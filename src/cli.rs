use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "classpath-scanner")]
#[command(about = "Resolve classpath entries and read nested jar archives")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, value_name = "N")]
    pub threads: Option<usize>,

    /// Keep jars that belong to the JRE/JDK itself in the resolved output.
    #[arg(long)]
    pub keep_system_jars: bool,

    /// Refuse to open jars nested inside other jars.
    #[arg(long)]
    pub no_nested_jars: bool,

    /// Allow http(s) classpath roots to be downloaded and scanned.
    #[arg(long)]
    pub remote_jars: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Resolve a raw classpath string into an ordered, deduplicated list.
    Resolve {
        /// Separator-delimited classpath (':' on unix, ';' on windows).
        classpath: String,
    },
    /// List the entries of a possibly nested archive path (outer!inner).
    Entries { path: String },
    /// Print one entry of a possibly nested archive path.
    Cat {
        path: String,
        entry: String,

        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}
