//! CLI parser and dispatch to command-specific modules.

mod fragment;
mod images;
mod ingest;
mod init;
mod runs;
mod schema_cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "qrchoice")]
#[command(about = "QR-code choice collection and reconciliation")]
#[command(version)]
pub struct Cli {
    /// Database file
    #[arg(short, long, global = true, env = "QRCHOICE_DB", default_value = "qrchoice.db")]
    database: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a schema file and create the database
    Init {
        /// Schema DSL file
        config: PathBuf,
    },

    /// Print the schema stored in the database
    Schema {
        /// Print SQL DDL instead of the DSL form
        #[arg(long)]
        ddl: bool,
    },

    /// List detection runs
    Runs,

    /// Ingest decoded images from a detections JSON file
    Ingest {
        /// JSON file: [{"path", "name"?, "detections": [{"text", "bounds"}]}]
        detections: PathBuf,
        /// Run constraint, `Table:field=value:...`; repeatable, order is
        /// the template matching order
        #[arg(short, long = "constrain")]
        constrain: Vec<String>,
    },

    /// List the images of a run
    Images {
        /// Run id
        run: i64,
    },

    /// Exclude an image from matching (or include it back)
    Ignore {
        /// Image id
        image: i64,
        /// Clear the flag instead of setting it
        #[arg(long)]
        clear: bool,
    },

    /// Re-run dispatch for one image
    Redispatch {
        /// Image id
        image: i64,
    },

    /// Manage fragments by hand
    Fragment {
        #[command(subcommand)]
        command: FragmentCommands,
    },
}

#[derive(Subcommand)]
enum FragmentCommands {
    /// Add a fragment to an image
    Add {
        /// Image id
        image: i64,
        /// Decoded text; omit for a box drawn but not yet read
        #[arg(short, long)]
        text: Option<String>,
        /// Polygon as four `x,y` pairs
        #[arg(short, long, num_args = 4)]
        bounds: Vec<String>,
    },
    /// Remove a fragment and re-dispatch its image
    Rm {
        /// Fragment id
        fragment: i64,
    },
}

/// Run the CLI.
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let db = &cli.database;

    match cli.command {
        Commands::Init { config } => init::cmd_init(db, &config),
        Commands::Schema { ddl } => schema_cmd::cmd_schema(db, ddl),
        Commands::Runs => runs::cmd_runs(db),
        Commands::Ingest {
            detections,
            constrain,
        } => ingest::cmd_ingest(db, &detections, &constrain),
        Commands::Images { run } => images::cmd_images(db, run),
        Commands::Ignore { image, clear } => images::cmd_ignore(db, image, !clear),
        Commands::Redispatch { image } => images::cmd_redispatch(db, image),
        Commands::Fragment { command } => match command {
            FragmentCommands::Add {
                image,
                text,
                bounds,
            } => fragment::cmd_add(db, image, text.as_deref(), &bounds),
            FragmentCommands::Rm { fragment } => fragment::cmd_rm(db, fragment),
        },
    }
}
