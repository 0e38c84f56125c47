//! rest-reref
//!
//! Re-references EEG recordings to the Reference Electrode Standardization
//! Technique (REST) using a three-shell spherical head model.
//!
//! # Usage
//!
//! ```bash
//! # Re-reference a recording (recorded data, alpha = 0.05)
//! rest-reref --dipoles dipoles.txt --input rec.json --output rest.json
//!
//! # Simulated data: no truncation of the pseudoinverse
//! rest-reref --dipoles dipoles.txt --input sim.json --output rest.json --simulated
//!
//! # Only compute the lead field for the recording's electrodes
//! rest-reref leadfield --dipoles dipoles.txt --input rec.json --output g.txt
//! ```
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};

use rest_reref::io::{read_recording, write_recording, write_table};
use rest_reref::rest::FileDipoles;
use rest_reref::{DataProvenance, RestConfig, RestPipeline};

#[derive(Parser, Debug)]
#[command(name = "rest-reref")]
#[command(author, version, about = "Re-reference EEG recordings to REST", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Canonical dipole table (3000 rows of x y z)
    #[arg(short, long)]
    dipoles: Option<PathBuf>,

    /// Recording in JSON form
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use electrode coordinates as given instead of scaling them onto the scalp
    #[arg(long)]
    no_scale_electrodes: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Where to write the re-referenced recording
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Truncation level of the pseudoinverse
    #[arg(long, conflicts_with = "simulated")]
    alpha: Option<f64>,

    /// Data is noise-free simulation (alpha = 0)
    #[arg(long)]
    simulated: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the lead field matrix for the recording's electrodes
    Leadfield {
        #[command(flatten)]
        common: CommonArgs,

        /// Where to write the matrix (one row per electrode)
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn load_config(common: &CommonArgs) -> Result<RestConfig> {
    let mut config = match &common.config {
        Some(path) => RestConfig::from_json_file(path)?,
        None => RestConfig::default(),
    };
    if common.no_scale_electrodes {
        config.scale_electrodes = false;
    }
    if let Some(path) = &common.dipoles {
        config.dipole_file = Some(path.clone());
    }
    Ok(config)
}

fn build_pipeline(config: RestConfig) -> Result<RestPipeline<FileDipoles>> {
    let Some(path) = config.dipole_file.clone() else {
        bail!("no dipole table given (use --dipoles or 'dipole_file' in the config)");
    };
    RestPipeline::new(FileDipoles::new(path), config).context("invalid configuration")
}

fn run(args: RunArgs) -> Result<()> {
    let Some(input) = args.common.input.clone() else {
        bail!("--input is required");
    };
    let Some(output) = args.output else {
        bail!("--output is required");
    };
    let mut config = load_config(&args.common)?;
    if args.simulated {
        config.regularization = DataProvenance::Simulated.regularization();
    } else if let Some(alpha) = args.alpha {
        config.regularization = alpha;
    }

    let mut recording = read_recording(&input)?;
    info!(
        "loaded {} channels, {:.1} s from {}",
        recording.num_channels(),
        recording.duration_seconds(),
        input.display()
    );
    let mut pipeline = build_pipeline(config)?;
    info!("alpha = {}", pipeline.config().regularization);
    let report = pipeline
        .rereference(&mut recording)
        .with_context(|| format!("re-referencing {}", input.display()))?;
    if report.diagnostics.is_ill_conditioned() {
        warn!(
            "lead field is ill-conditioned (condition number {:.3e})",
            report.diagnostics.condition_number
        );
    }
    write_recording(&output, &recording)?;
    info!("wrote {}", output.display());
    Ok(())
}

fn leadfield(common: CommonArgs, output: PathBuf) -> Result<()> {
    let Some(input) = common.input.clone() else {
        bail!("--input is required");
    };
    let config = load_config(&common)?;
    let recording = read_recording(&input)?;
    let mut pipeline = build_pipeline(config)?;
    let electrodes = pipeline.model_electrodes(&recording)?;
    let (g, _) = pipeline.leadfield(&electrodes)?;
    write_table(&output, &g)?;
    info!("wrote {}x{} lead field to {}", g.nrows(), g.ncols(), output.display());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Leadfield { common, output }) => leadfield(common, output),
        None => run(cli.run),
    }
}
