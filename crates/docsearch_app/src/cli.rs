use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::LevelFilter;

/// Command-line client for the document search backend.
#[derive(Debug, Parser)]
#[command(name = "docsearch", author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to ./docsearch.ron when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Backend origin, overriding the configuration file
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Owner identifier sent with every call
    #[arg(long, global = true)]
    pub user_id: Option<u64>,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn", value_parser = parse_level)]
    pub log_level: LevelFilter,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Uploaded documents
    Files {
        #[command(subcommand)]
        action: FilesCommand,
    },

    /// Conversation sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsCommand,
    },

    /// Ask a question and print the answer as it streams in
    Ask(QuestionArgs),

    /// Ask a question and print the complete answer
    Query(QuestionArgs),

    /// Query suggestions for a partial keyword
    Suggest {
        keyword: String,

        #[arg(long, default_value_t = 5)]
        limit: u32,
    },

    /// Search usage statistics
    Analytics {
        /// Number of days to cover
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
}

#[derive(Debug, clap::Args)]
pub struct QuestionArgs {
    /// Session to ask in
    pub session: u64,

    pub question: String,

    /// Restrict the search to these file ids
    #[arg(long = "file", value_delimiter = ',')]
    pub files: Vec<u64>,
}

#[derive(Debug, Subcommand)]
pub enum FilesCommand {
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 20)]
        page_size: u32,
    },

    Search {
        keyword: String,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 20)]
        page_size: u32,
    },

    Info {
        file_id: u64,
    },

    /// Current processing status
    Status {
        file_id: u64,
    },

    Upload {
        path: PathBuf,

        /// Wait until the backend has finished processing the file
        #[arg(long)]
        watch: bool,
    },

    Delete {
        file_id: u64,
    },

    BatchDelete {
        #[arg(required = true)]
        file_ids: Vec<u64>,
    },

    Rename {
        file_id: u64,
        new_name: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum SessionsCommand {
    Create {
        name: String,
    },

    List,

    History {
        session_id: u64,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 50)]
        page_size: u32,
    },

    Delete {
        session_id: u64,
    },

    Rename {
        session_id: u64,
        new_name: String,
    },
}

fn parse_level(value: &str) -> Result<LevelFilter, String> {
    value
        .parse()
        .map_err(|_| format!("unknown log level {value:?}"))
}
