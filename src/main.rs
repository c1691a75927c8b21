use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::Parser;
use tilewho::{
    config::{MaskPolicyKind, PipelineConfig},
    pipeline::{Pipeline, PipelineError},
    utils::DiffAlgorithm,
};
use tracing::level_filters::LevelFilter;

#[derive(Debug, clap::Parser)]
#[command(version, about)]
struct CommandLine {
    /// JSON configuration file. Command line flags override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Column holding the JSON parameters.
    #[arg(long, global = true)]
    json_column: Option<String>,
    /// Column holding the event type.
    #[arg(long, global = true)]
    event_column: Option<String>,
    /// Column holding the tile id.
    #[arg(long, global = true)]
    tile_column: Option<String>,
    /// JSON key whose subtree is never text-mined. Repeatable; replaces the configured keys.
    #[arg(long = "opaque-key", global = true)]
    opaque_keys: Vec<String>,
    #[arg(long, global = true)]
    diff_algorithm: Option<DiffAlgorithm>,
    /// More output on stderr. Repeat for more detail.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Append combinedText, copiedText and selfAuthoredText columns to a log.
    Provenance {
        input: PathBuf,
        /// Output file, stdout if omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Write one row per pair of text edit and copy event on the same tile.
    Pairs {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replace identifying columns with opaque tokens.
    Mask {
        input: PathBuf,
        /// Column to mask. Repeatable; replaces the configured columns.
        #[arg(short, long = "field")]
        fields: Vec<String>,
        #[arg(long)]
        policy: Option<MaskPolicyKind>,
        /// Regex for the pattern policy.
        #[arg(long)]
        pattern: Option<String>,
        /// Secret keying content-derived tokens.
        #[arg(long)]
        secret: Option<String>,
        /// Mapping file to preload and update.
        #[arg(long)]
        mapping: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl CommandLine {
    fn pipeline_config(&self) -> Result<PipelineConfig, PipelineError> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };

        if let Some(column) = &self.json_column {
            config.json_column = column.clone();
        }
        if let Some(column) = &self.event_column {
            config.event_column = column.clone();
        }
        if let Some(column) = &self.tile_column {
            config.tile_column = Some(column.clone());
        }
        if !self.opaque_keys.is_empty() {
            config.opaque_keys = self.opaque_keys.clone();
        }
        if let Some(algorithm) = self.diff_algorithm {
            config.diff_algorithm = algorithm;
        }

        if let Command::Mask {
            fields,
            policy,
            pattern,
            secret,
            mapping,
            ..
        } = &self.command
        {
            let masking = &mut config.masking;
            if !fields.is_empty() {
                masking.columns = fields.clone();
            }
            if let Some(policy) = policy {
                masking.policy = *policy;
            }
            if pattern.is_some() {
                masking.pattern = pattern.clone();
            }
            if secret.is_some() {
                masking.secret = secret.clone();
            }
            if mapping.is_some() {
                masking.mapping_path = mapping.clone();
            }
        }

        Ok(config)
    }
}

fn open_input(path: &Path) -> io::Result<BufReader<File>> {
    File::open(path).map(BufReader::new)
}

fn create_output(path: Option<&Path>) -> io::Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    })
}

fn run(args: &CommandLine) -> Result<(), PipelineError> {
    let pipeline = Pipeline::new(args.pipeline_config()?);

    match &args.command {
        Command::Provenance { input, output } => {
            let output = create_output(output.as_deref())?;
            pipeline.annotate_provenance(|| open_input(input), output)?;
        }
        Command::Pairs { input, output } => {
            let output = create_output(output.as_deref())?;
            pipeline.audit_pairs(|| open_input(input), output)?;
        }
        Command::Mask { input, output, .. } => {
            let mut pseudonymizer = pipeline.pseudonymizer()?;
            let output = create_output(output.as_deref())?;
            pipeline.mask_columns(open_input(input)?, output, &mut pseudonymizer)?;
            pipeline.save_mapping(&pseudonymizer)?;
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    let args = CommandLine::parse();

    let level = match args.verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let mut message = err.to_string();
            let mut source = std::error::Error::source(&err);
            while let Some(cause) = source {
                message.push_str(": ");
                message.push_str(&cause.to_string());
                source = cause.source();
            }
            tracing::error!(message = message.as_str(), structural = err.is_structural());
            ExitCode::FAILURE
        }
    }
}
