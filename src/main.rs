//! SpikeGen - Spiking neural network code generator
//!
//! Main command-line interface for the generator.

use spikegen::codegen::{Preferences, ReferenceBackend};
use spikegen::merge::merge_model;
use spikegen::model::NetworkModel;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "spikegen")]
#[command(author = "SpikeGen Team")]
#[command(version)]
#[command(about = "Compile spiking neural network models to SIMT accelerator code")]
#[command(long_about = r#"
SpikeGen compiles an in-memory model of a spiking neural network into
device kernels and a host runner for a SIMT accelerator. It performs:

  - Structural group merging so one kernel body serves many populations
  - Emission of the update, initialisation and custom-update kernels
  - Emission of the host runner (allocation, transfer, stepTime)

Example usage:
  spikegen generate model.json -o generated/
  spikegen inspect model.json
"#)]
struct Cli {
    /// Verbose log output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate device and runner sources from a JSON model description
    Generate {
        /// Input model description (JSON)
        input: PathBuf,

        /// Output directory for generated sources
        #[arg(short, long, default_value = "generated")]
        output: PathBuf,

        /// Generation preferences (JSON); defaults apply when omitted
        #[arg(short, long)]
        preferences: Option<PathBuf>,
    },

    /// Print the merged-group plan for a model
    Inspect {
        /// Input model description (JSON)
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    match cli.command {
        Commands::Generate { input, output, preferences } => cmd_generate(input, output, preferences),
        Commands::Inspect { input } => cmd_inspect(input),
    }
}

fn load_model(input: &PathBuf) -> Result<NetworkModel> {
    let source = fs::read_to_string(input)
        .with_context(|| format!("Failed to read model description {}", input.display()))?;
    let model: NetworkModel =
        serde_json::from_str(&source).context("Failed to parse model description")?;
    model.validate().context("Model graph is inconsistent")?;
    Ok(model)
}

fn cmd_generate(input: PathBuf, output: PathBuf, preferences: Option<PathBuf>) -> Result<()> {
    let model = load_model(&input)?;

    let preferences = match preferences {
        Some(path) => {
            let source = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read preferences {}", path.display()))?;
            serde_json::from_str(&source).context("Failed to parse preferences")?
        }
        None => Preferences::default(),
    };
    let backend = ReferenceBackend::new(preferences);

    let sources = spikegen::generate(&model, &backend).context("Code generation failed")?;

    fs::create_dir_all(&output)
        .with_context(|| format!("Failed to create output directory {}", output.display()))?;
    for (name, content) in sources.files() {
        let path = output.join(name);
        fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("wrote {}", path.display());
    }
    Ok(())
}

fn cmd_inspect(input: PathBuf) -> Result<()> {
    let model = load_model(&input)?;
    let backend = ReferenceBackend::default();
    let merged = merge_model(&model, &backend).context("Group merging failed")?;

    println!("model '{}': dt = {}, batch size = {}", model.name, model.dt, model.batch_size);
    println!(
        "  {} neuron groups, {} synapse groups, {} current sources, {} custom updates",
        model.neuron_groups.len(),
        model.synapse_groups.len(),
        model.current_sources.len(),
        model.custom_updates.len() + model.custom_wu_updates.len()
    );
    println!();

    let print_groups = |purpose: &str, counts: Vec<(usize, Vec<String>)>| {
        if counts.is_empty() {
            return;
        }
        println!("{}:", purpose);
        for (index, members) in counts {
            println!("  merged{}: {}", index, members.join(", "));
        }
    };

    print_groups(
        "neuron update",
        merged
            .neuron_update
            .iter()
            .map(|g| (g.base.index, g.base.groups.iter().map(|m| m.name.clone()).collect()))
            .collect(),
    );
    print_groups(
        "presynaptic update",
        merged
            .presynaptic_update
            .iter()
            .map(|g| (g.base.index, g.base.groups.iter().map(|m| m.name.clone()).collect()))
            .collect(),
    );
    print_groups(
        "postsynaptic update",
        merged
            .postsynaptic_update
            .iter()
            .map(|g| (g.base.index, g.base.groups.iter().map(|m| m.name.clone()).collect()))
            .collect(),
    );
    print_groups(
        "synapse dynamics",
        merged
            .synapse_dynamics
            .iter()
            .map(|g| (g.base.index, g.base.groups.iter().map(|m| m.name.clone()).collect()))
            .collect(),
    );
    print_groups(
        "neuron init",
        merged
            .neuron_init
            .iter()
            .map(|g| (g.base.index, g.base.groups.iter().map(|m| m.name.clone()).collect()))
            .collect(),
    );
    print_groups(
        "sparse init",
        merged
            .sparse_init
            .iter()
            .map(|g| (g.base.index, g.base.groups.iter().map(|m| m.name.clone()).collect()))
            .collect(),
    );
    print_groups(
        "custom update",
        merged
            .custom_update
            .iter()
            .map(|g| (g.base.index, g.base.groups.iter().map(|m| m.name.clone()).collect()))
            .collect(),
    );
    Ok(())
}
