use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use precedent::config::PipelineOverrides;

#[derive(Debug, Parser)]
#[command(
    name = "precedent",
    about = "Find court decisions relevant to a legal question"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Search for decisions relevant to a question
    Search(SearchArgs),
    /// Inspect or change stored settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Start MCP server for AI agent integration
    Mcp,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The legal question, in natural language
    pub question: String,

    /// Number of results to return
    #[arg(short = 'n', long)]
    pub top_k: Option<usize>,

    /// Number of search queries to generate
    #[arg(long)]
    pub queries: Option<usize>,

    /// Candidates fetched per generated query
    #[arg(long)]
    pub per_query: Option<usize>,

    /// Search the question directly without generating queries
    #[arg(long)]
    pub single_query: bool,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

impl SearchArgs {
    pub fn overrides(&self) -> PipelineOverrides {
        PipelineOverrides {
            num_queries: self.queries,
            results_per_query: self.per_query,
            final_top_k: self.top_k,
            multi_query: self.single_query.then_some(false),
        }
    }
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show every setting with its effective value
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a setting in config.redb
    Set {
        /// Setting name (see `config show`)
        key: String,
        value: String,
    },
    /// Clear a stored setting (revert to default)
    Unset { key: String },
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "precedent",
            &mut std::io::stdout(),
        );
    }
}
