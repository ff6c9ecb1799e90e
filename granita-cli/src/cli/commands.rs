//! Command implementations and argument parsing for the granita CLI.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use ndarray::{ArrayD, Axis, Dimension, IxDyn};
use thiserror::Error;
use tracing::{info, instrument};

use granita_core::{
    FitConfig, LabelingMode, LearnError, LearningConfig, LearningMode, LogisticModel,
    PriorityMode, RagBuilder, RagError, feature_manager_by_name, learn_agglomerate,
};
use granita_providers_volume::{
    VolumeProviderError, read_labels, read_probabilities, write_training_set,
};

use crate::logging::{LogFormat, LogOptions};

const DEFAULT_FEATURE_MANAGER: &str = "moments-histogram";

/// Top-level CLI options parsed by [`clap`].
#[derive(Debug, Parser, Clone)]
#[command(name = "granita", about = "Agglomerative segmentation training driver.")]
pub struct Cli {
    /// Diagnostic output format.
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Human, global = true)]
    pub log_format: LogFormat,

    /// Raise diagnostic verbosity for the granita crates (repeatable).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Command to execute.
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Logging choices for the bootstrap, available before any command runs.
    #[must_use]
    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            format: self.log_format,
            verbosity: self.verbose,
        }
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Collect labelled merge examples against a gold standard and train a
    /// merge classifier.
    Train(TrainCommand),
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Train(_) => "train",
        }
    }
}

/// Options accepted by the `train` command.
#[derive(Debug, Args, Clone)]
pub struct TrainCommand {
    /// Unique experiment name; becomes the output file stem.
    #[arg(long = "experiment-name", short = 'n')]
    pub experiment_name: String,

    /// Boundary probability map.
    pub prob_map: PathBuf,

    /// Gold-standard segmentation.
    pub ground_truth: PathBuf,

    /// Whether refused merges are executed anyway.
    #[arg(long = "learning-mode", value_enum, default_value_t = LearningModeArg::Strict)]
    pub learning_mode: LearningModeArg,

    /// How the ground truth labels each proposal.
    #[arg(long = "labeling-mode", value_enum, default_value_t = LabelingModeArg::Assignment)]
    pub labeling_mode: LabelingModeArg,

    /// How the next merge proposal is chosen.
    #[arg(long = "priority-mode", value_enum, default_value_t = PriorityModeArg::BoundaryMedian)]
    pub priority_mode: PriorityModeArg,

    /// Minimum number of learning epochs.
    #[arg(long = "num-epochs", default_value_t = 5)]
    pub num_epochs: usize,

    /// Hard cap on learning epochs.
    #[arg(long = "max-num-epochs", default_value_t = 20)]
    pub max_num_epochs: usize,

    /// Keep running until at least this many examples were collected.
    #[arg(long = "min-num-examples", default_value_t = 0)]
    pub min_num_examples: usize,

    /// Cap the final dataset by seeded subsampling.
    #[arg(long = "num-examples")]
    pub num_examples: Option<usize>,

    /// Do not keep per-epoch datasets.
    #[arg(long = "no-memory")]
    pub no_memory: bool,

    /// Keep duplicate feature vectors instead of deduplicating.
    #[arg(long = "no-unique")]
    pub no_unique: bool,

    /// Skip the flat-graph warm start in active mode.
    #[arg(long = "no-learn-flat")]
    pub no_learn_flat: bool,

    /// Feature manager registry name with optional key=value options.
    #[arg(long = "feature-manager", default_value = DEFAULT_FEATURE_MANAGER)]
    pub feature_manager: String,

    /// Use the expected-VI priority in active mode.
    #[arg(long = "active-vi")]
    pub active_vi: bool,

    /// False-merge weight for the expected-VI priority.
    #[arg(long = "active-vi-beta", default_value_t = 1.0)]
    pub active_vi_beta: f64,

    /// Collapse a trailing channel axis to its first channel.
    #[arg(long = "single-channel")]
    pub single_channel: bool,

    /// Compute features from the boundary channel only.
    #[arg(long = "no-channel-data")]
    pub no_channel_data: bool,

    /// Remove fully enclosed regions before learning.
    #[arg(long = "remove-inclusions")]
    pub remove_inclusions: bool,

    /// Treat label 0 as an ordinary region instead of the boundary class.
    #[arg(long = "nozeros")]
    pub nozeros: bool,

    /// Initial over-segmentation (required at runtime).
    #[arg(long = "watershed-file")]
    pub watershed_file: Option<PathBuf>,

    /// Exclusion-tag volume; tagged regions never merge with one another.
    #[arg(long = "synapse-file")]
    pub synapse_file: Option<PathBuf>,

    /// Dilate the exclusion tags by this many face-connected steps.
    #[arg(long = "synapse-dilation", default_value_t = 0)]
    pub synapse_dilation: usize,

    /// Pre-merge regions smaller than this before learning.
    #[arg(long = "seed-cc-threshold", default_value_t = 0)]
    pub seed_cc_threshold: usize,

    /// Directory receiving the training data and classifier.
    #[arg(long = "output-dir", default_value = ".")]
    pub output_dir: PathBuf,

    /// File extension for the training dataset.
    #[arg(long = "training-data-extension", default_value = ".parquet")]
    pub training_data_extension: String,

    /// File extension for the trained classifier.
    #[arg(long = "classifier-extension", default_value = ".json")]
    pub classifier_extension: String,

    /// Seed for every stochastic choice.
    #[arg(long = "seed", default_value_t = 0)]
    pub seed: u64,
}

/// CLI face of [`LearningMode`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LearningModeArg {
    /// Only execute merges the ground truth approves.
    Strict,
    /// Execute every proposal.
    Loose,
}

impl From<LearningModeArg> for LearningMode {
    fn from(value: LearningModeArg) -> Self {
        match value {
            LearningModeArg::Strict => LearningMode::Strict,
            LearningModeArg::Loose => LearningMode::Loose,
        }
    }
}

/// CLI face of [`LabelingMode`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LabelingModeArg {
    /// Same best-overlap truth region on both sides.
    Assignment,
    /// The merge lowers variation of information.
    #[value(name = "voi-sign")]
    VoiSign,
    /// The merge raises the Rand index.
    #[value(name = "rand-sign")]
    RandSign,
}

impl From<LabelingModeArg> for LabelingMode {
    fn from(value: LabelingModeArg) -> Self {
        match value {
            LabelingModeArg::Assignment => LabelingMode::Assignment,
            LabelingModeArg::VoiSign => LabelingMode::ViSign,
            LabelingModeArg::RandSign => LabelingMode::RandSign,
        }
    }
}

/// CLI face of [`PriorityMode`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum PriorityModeArg {
    /// Uniformly random proposals.
    Random,
    /// Cheapest boundary median first.
    #[value(name = "boundary_median")]
    BoundaryMedian,
    /// Proposals driven by the provisional classifier.
    Active,
}

impl From<PriorityModeArg> for PriorityMode {
    fn from(value: PriorityModeArg) -> Self {
        match value {
            PriorityModeArg::Random => PriorityMode::Random,
            PriorityModeArg::BoundaryMedian => PriorityMode::BoundaryMedian,
            PriorityModeArg::Active => PriorityMode::Active,
        }
    }
}

/// Errors surfaced while executing CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The experiment name cannot be used as a file stem.
    #[error("experiment name `{name}` must not be empty or contain path separators")]
    InvalidExperimentName {
        /// The rejected name.
        name: String,
    },
    /// A required input file does not exist.
    #[error("required input `{path}` does not exist")]
    MissingInput {
        /// The missing path.
        path: PathBuf,
    },
    /// Training needs an initial over-segmentation.
    #[error("a watershed volume is required; pass --watershed-file")]
    WatershedRequired,
    /// Writing an output file failed.
    #[error("failed to write `{path}`: {source}")]
    Io {
        /// Path that triggered the failure.
        path: PathBuf,
        /// Underlying operating system error.
        #[source]
        source: io::Error,
    },
    /// Volume or dataset persistence failed.
    #[error(transparent)]
    Provider(#[from] VolumeProviderError),
    /// Graph construction or agglomeration failed.
    #[error(transparent)]
    Core(#[from] RagError),
    /// The learning engine failed.
    #[error(transparent)]
    Learn(#[from] LearnError),
    /// The classifier could not be serialised.
    #[error("failed to serialise classifier: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Maps the error onto the documented process exit codes: `2` for
    /// missing inputs, `1` for everything else.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::MissingInput { .. } | Self::WatershedRequired => 2,
            Self::Provider(VolumeProviderError::Io(_)) => 2,
            _ => 1,
        }
    }
}

/// Summarises the outcome of a training run.
#[derive(Debug, Clone)]
pub struct TrainSummary {
    /// The experiment name.
    pub experiment: String,
    /// Number of examples in the final dataset.
    pub examples: usize,
    /// Feature width of the dataset.
    pub dim: usize,
    /// Number of epochs that ran.
    pub epochs: usize,
    /// Whether the run stabilised before the epoch cap.
    pub converged: bool,
    /// Where the training data landed.
    pub training_path: PathBuf,
    /// Where the classifier landed.
    pub classifier_path: PathBuf,
}

/// Executes the CLI command represented by `cli`.
///
/// # Errors
/// Returns [`CliError`] when validation, loading, learning, or persistence
/// fails.
#[instrument(name = "cli.run", err, skip(cli), fields(command = %cli.command.name()))]
pub fn run_cli(cli: Cli) -> Result<TrainSummary, CliError> {
    match cli.command {
        Command::Train(train) => train_command(train),
    }
}

#[instrument(
    name = "cli.train",
    err,
    skip(command),
    fields(
        experiment = %command.experiment_name,
        learning_mode = ?command.learning_mode,
        labeling_mode = ?command.labeling_mode,
        priority_mode = ?command.priority_mode,
    ),
)]
pub(super) fn train_command(command: TrainCommand) -> Result<TrainSummary, CliError> {
    validate_experiment_name(&command.experiment_name)?;
    let watershed_path = command
        .watershed_file
        .clone()
        .ok_or(CliError::WatershedRequired)?;
    for path in [&command.prob_map, &command.ground_truth, &watershed_path] {
        require_file(path)?;
    }
    if let Some(synapse) = &command.synapse_file {
        require_file(synapse)?;
    }

    let mut watershed = read_labels(&watershed_path)?;
    let ground_truth = read_labels(&command.ground_truth)?;
    let mut probabilities = read_probabilities(&command.prob_map)?;

    let spatial_ndim = watershed.ndim();
    if command.single_channel && probabilities.ndim() == spatial_ndim + 1 {
        probabilities = probabilities.index_axis(Axis(spatial_ndim), 0).to_owned();
    }
    let channels = if probabilities.ndim() == spatial_ndim + 1 && !command.no_channel_data {
        *probabilities
            .shape()
            .last()
            .expect("a channelled map has at least one axis")
    } else {
        1
    };
    let feature_manager = feature_manager_by_name(&command.feature_manager, channels)?;

    let mut builder = RagBuilder::new()
        .with_nozeros(!command.nozeros)
        .with_feature_manager(feature_manager);
    if let Some(synapse) = &command.synapse_file {
        let tags = dilate_tags(read_labels(synapse)?, command.synapse_dilation);
        builder = builder.with_exclusions(tags);
    }

    if command.seed_cc_threshold > 0 || command.remove_inclusions {
        let mut rag = builder.build(&watershed, &probabilities)?;
        if command.seed_cc_threshold > 0 {
            rag.agglomerate_ladder(command.seed_cc_threshold)?;
        }
        if command.remove_inclusions {
            rag.remove_inclusions()?;
        }
        watershed = rag.get_segmentation();
    }

    let config = LearningConfig {
        learning_mode: command.learning_mode.into(),
        labeling_mode: command.labeling_mode.into(),
        priority_mode: command.priority_mode.into(),
        min_epochs: command.num_epochs,
        max_epochs: command.max_num_epochs,
        min_examples: command.min_num_examples,
        sample_cap: command.num_examples,
        memory: !command.no_memory,
        unique: !command.no_unique,
        learn_flat: !command.no_learn_flat,
        active_vi: command.active_vi,
        beta: command.active_vi_beta,
        seed: command.seed,
    };
    let output = learn_agglomerate(&builder, &watershed, &probabilities, &ground_truth, &config)?;

    let classifier = LogisticModel::fit(
        output.dataset.features(),
        output.dataset.dim(),
        &output.dataset.authoritative_labels(),
        output.dataset.weights(),
        &FitConfig::default(),
    )?;

    fs::create_dir_all(&command.output_dir).map_err(|source| CliError::Io {
        path: command.output_dir.clone(),
        source,
    })?;
    let training_path = output_file(
        &command.output_dir,
        &command.experiment_name,
        &command.training_data_extension,
    );
    write_training_set(&training_path, &output.dataset)?;
    let classifier_path = output_file(
        &command.output_dir,
        &command.experiment_name,
        &command.classifier_extension,
    );
    let file = File::create(&classifier_path).map_err(|source| CliError::Io {
        path: classifier_path.clone(),
        source,
    })?;
    serde_json::to_writer_pretty(file, &classifier)?;

    info!(
        examples = output.dataset.len(),
        epochs = output.epoch_count,
        converged = output.converged,
        "training finished"
    );
    Ok(TrainSummary {
        experiment: command.experiment_name,
        examples: output.dataset.len(),
        dim: output.dataset.dim(),
        epochs: output.epoch_count,
        converged: output.converged,
        training_path,
        classifier_path,
    })
}

pub(super) fn validate_experiment_name(name: &str) -> Result<(), CliError> {
    if name.is_empty() || name.contains('/') || name.contains('\\') {
        return Err(CliError::InvalidExperimentName {
            name: name.to_owned(),
        });
    }
    Ok(())
}

fn require_file(path: &Path) -> Result<(), CliError> {
    if !path.is_file() {
        return Err(CliError::MissingInput {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

fn output_file(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    dir.join(format!("{stem}{extension}"))
}

/// Grows every nonzero tag outward by `steps` face-connected layers. On
/// contested voxels the smallest tag wins, keeping the result independent
/// of sweep order.
pub(super) fn dilate_tags(mut tags: ArrayD<u32>, steps: usize) -> ArrayD<u32> {
    let shape = tags.shape().to_vec();
    for _ in 0..steps {
        let source = tags.clone();
        for (index, slot) in tags.indexed_iter_mut() {
            if *slot != 0 {
                continue;
            }
            let coords = index.slice();
            let mut winner = 0_u32;
            for axis in 0..shape.len() {
                for direction in [-1_isize, 1] {
                    let shifted = coords[axis] as isize + direction;
                    if shifted < 0 || shifted as usize >= shape[axis] {
                        continue;
                    }
                    let mut neighbour = coords.to_vec();
                    neighbour[axis] = shifted as usize;
                    let tag = source[IxDyn(&neighbour)];
                    if tag != 0 && (winner == 0 || tag < winner) {
                        winner = tag;
                    }
                }
            }
            *slot = winner;
        }
    }
    tags
}

/// Renders `summary` to `writer` in a human-readable text format.
///
/// # Errors
/// Returns [`io::Error`] if writing to the supplied writer fails.
pub fn render_summary(summary: &TrainSummary, mut writer: impl Write) -> io::Result<()> {
    writeln!(writer, "experiment: {}", summary.experiment)?;
    writeln!(
        writer,
        "examples: {} ({} features)",
        summary.examples, summary.dim
    )?;
    writeln!(
        writer,
        "epochs: {} (converged: {})",
        summary.epochs, summary.converged
    )?;
    writeln!(writer, "training data: {}", summary.training_path.display())?;
    writeln!(writer, "classifier: {}", summary.classifier_path.display())?;
    Ok(())
}
