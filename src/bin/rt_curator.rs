use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use rt_curator::app::{App, PrepareResult};
use rt_curator::config::ConfigLoader;
use rt_curator::domain::{DataObjectRecord, DatasetName, MappingLevel, PatientId, RTSTRUCT};
use rt_curator::error::{CuratorError, ErrorKind};
use rt_curator::output::{
    JsonOutput, MappingResult, OutputMode, StderrProgress, StructuresResult,
};
use rt_curator::preparation::{PrepareOptions, PreparationSource};
use rt_curator::store::Store;
use rt_curator::structures::{StructureMapping, StructureSet, discover_mapping};
use rt_curator::volume::NiftiReader;

#[derive(Parser)]
#[command(name = "rt-curator")]
#[command(about = "Curate symlinked datasets from a converted radiotherapy imaging pool")]
#[command(version, author)]
struct Cli {
    /// Working root holding the converted pool and dataset directories.
    #[arg(long, global = true, default_value = ".")]
    root: Utf8PathBuf,

    #[arg(long, global = true)]
    config: Option<Utf8PathBuf>,

    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Filter the pool and merge the selection into a dataset")]
    Prepare(PrepareArgs),
    #[command(about = "List dataset directories")]
    Datasets,
    #[command(about = "List the structures of a structure set directory")]
    Structures(StructuresArgs),
    #[command(about = "Write a structure name mapping next to a structure set")]
    Map(MapArgs),
}

#[derive(Args)]
struct PrepareArgs {
    dataset: String,

    #[arg(long, default_value = "all")]
    function: String,

    #[arg(long = "patient")]
    patients: Vec<String>,

    /// Passed through to the preparation function, as key=value.
    #[arg(long = "option")]
    options: Vec<String>,
}

#[derive(Args)]
struct StructuresArgs {
    /// Structure set directory, relative to the working root or absolute.
    path: Utf8PathBuf,

    /// Mapping document; when omitted one is looked up next to the set.
    #[arg(long)]
    mapping: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct MapArgs {
    path: Utf8PathBuf,

    #[arg(long)]
    mapping: Utf8PathBuf,

    #[arg(long, value_enum, default_value_t = MappingLevel::Project)]
    level: MappingLevel,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<CuratorError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CuratorError) -> u8 {
    match error.kind() {
        ErrorKind::Configuration => 2,
        ErrorKind::Integrity => 3,
        ErrorKind::Io => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    let config = ConfigLoader::resolve(&cli.root, cli.config.as_deref())?;
    let store = Store::new(&cli.root, config)?;

    match cli.command {
        Commands::Prepare(args) => run_prepare(args, App::new(store), output_mode),
        Commands::Datasets => run_datasets(App::new(store), output_mode),
        Commands::Structures(args) => run_structures(args, &store, output_mode),
        Commands::Map(args) => run_map(args, &store, output_mode),
    }
}

fn run_prepare(args: PrepareArgs, app: App, output_mode: OutputMode) -> miette::Result<()> {
    let dataset: DatasetName = args.dataset.parse()?;
    let preparation = PreparationSource::named(&args.function)?;
    let options = PrepareOptions::from_pairs(&args.options)?;
    let patients = args
        .patients
        .iter()
        .map(|p| p.parse::<PatientId>())
        .collect::<Result<Vec<_>, _>>()?;
    let patients = (!patients.is_empty()).then_some(patients.as_slice());

    let result = match output_mode {
        OutputMode::Json => app.prepare(&dataset, preparation, patients, &options, &JsonOutput)?,
        OutputMode::Text => {
            app.prepare(&dataset, preparation, patients, &options, &StderrProgress)?
        }
    };

    match output_mode {
        OutputMode::Json => JsonOutput::print_prepare(&result).into_diagnostic(),
        OutputMode::Text => {
            print_prepare_summary(&result);
            Ok(())
        }
    }
}

fn run_datasets(app: App, output_mode: OutputMode) -> miette::Result<()> {
    let result = app.list_datasets()?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_datasets(&result).into_diagnostic(),
        OutputMode::Text => {
            for name in &result.datasets {
                println!("{name}");
            }
            Ok(())
        }
    }
}

fn open_structure_set(
    path: &Utf8PathBuf,
    store: &Store,
    mapping: Option<StructureMapping>,
) -> miette::Result<StructureSet<NiftiReader>> {
    let relative = store.relativize(path.as_str())?;
    let row = DataObjectRecord::new("", "", RTSTRUCT, relative.as_str());
    Ok(StructureSet::new(
        &row,
        store.root(),
        store.config(),
        mapping,
        NiftiReader,
    )?)
}

fn run_structures(
    args: StructuresArgs,
    store: &Store,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let absolute = store.root().join(store.relativize(args.path.as_str())?);
    let mapping = match &args.mapping {
        Some(path) => Some(StructureMapping::load(path)?),
        None => discover_mapping(&absolute, store.config())?,
    };
    let structure_set = open_structure_set(&args.path, store, mapping)?;
    let result = StructuresResult {
        path: structure_set.path().to_string(),
        structures: structure_set.keys().iter().cloned().collect(),
    };
    match output_mode {
        OutputMode::Json => JsonOutput::print_structures(&result).into_diagnostic(),
        OutputMode::Text => {
            for name in &result.structures {
                println!("{name}");
            }
            Ok(())
        }
    }
}

fn run_map(args: MapArgs, store: &Store, output_mode: OutputMode) -> miette::Result<()> {
    let mapping = StructureMapping::load(&args.mapping)?;
    let structure_set = open_structure_set(&args.path, store, Some(mapping.clone()))?;
    structure_set.create_mapping_json(&mapping, args.level)?;
    let result = MappingResult {
        level: args.level.to_string(),
        path: structure_set.mapping_path(args.level)?.to_string(),
    };
    match output_mode {
        OutputMode::Json => JsonOutput::print_mapping(&result).into_diagnostic(),
        OutputMode::Text => {
            println!("wrote {} mapping to {}", result.level, result.path);
            Ok(())
        }
    }
}

fn print_prepare_summary(result: &PrepareResult) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!(
        "{cyan}dataset {} prepared with {}{reset}",
        result.dataset, result.function
    );
    let new_rows = result.placed.iter().filter(|p| p.row_added).count();
    println!(
        "{green}placed {} objects ({new_rows} new){reset}",
        result.placed.len()
    );
    for item in &result.skipped {
        println!(
            "{yellow}skipped {} {}: {}{reset}",
            item.patient_id, item.hashed_uid, item.reason
        );
    }
}
