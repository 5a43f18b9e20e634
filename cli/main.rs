#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process;

use prognos::classifiers::ProbabilisticClassifier;
use prognos::data::normalize_column_name;
use prognos::progress::{TrainingObserver, TrainingStage};
use prognos::scorer::predict_batch;
use prognos::trainer::ModelTrainer;
use prognos::{
    Disease, FeatureValue, LabeledDataset, ModelStore, PatientRecord, PipelineConfig, StoreError,
};

#[derive(Parser)]
#[command(name = "prognos", about = "Chronic-disease risk models", version)]
pub struct Cli {
    /// Pipeline configuration file (TOML). Built-in defaults apply when omitted.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory holding saved model bundles; overrides the configuration
    #[arg(long, global = true, value_name = "DIR")]
    pub model_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Args)]
pub struct TrainArgs {
    /// Labeled CSV file with a header row
    pub training_data: PathBuf,

    /// Disease whose label column and profile are used
    #[arg(long)]
    pub disease: Disease,

    /// Seed for the split and every model fit; overrides the configuration
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Args)]
pub struct PredictArgs {
    /// JSON object mapping feature names to numbers, strings or null
    pub record: PathBuf,

    /// Diseases to score; all diseases when omitted
    #[arg(long = "disease", value_name = "DISEASE")]
    pub diseases: Vec<Disease>,

    /// Print the assessments as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train, select and save the model for one disease
    #[command(about = "Train a disease model (outputs: <prefix>_<disease>.json.gz)")]
    Train(TrainArgs),

    /// Score one patient record against the saved models
    #[command(about = "Score a patient record against saved models")]
    Predict(PredictArgs),

    /// Describe every saved model bundle
    #[command(about = "Summarize saved model bundles")]
    Summary,
}

/// Renders training stages as an indicatif bar on stderr.
struct BarObserver {
    bar: Option<ProgressBar>,
}

impl BarObserver {
    fn new() -> Self {
        Self { bar: None }
    }
}

fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    let style = ProgressStyle::with_template(
        "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    )
    .map(|s| s.progress_chars("█▉▊▋▌▍▎▏  "))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb
}

impl TrainingObserver for BarObserver {
    fn on_stage_start(&mut self, stage: TrainingStage, total_steps: usize) {
        self.bar = Some(create_progress_bar(total_steps as u64, &stage.describe()));
    }

    fn on_stage_advance(&mut self, stage: TrainingStage, completed_steps: usize) {
        if let Some(bar) = &self.bar {
            bar.set_message(stage.describe());
            bar.set_position(completed_steps as u64);
        }
    }

    fn on_stage_finish(&mut self, stage: TrainingStage) {
        if let Some(bar) = self.bar.take() {
            bar.finish_with_message(format!("{stage} done"));
        }
    }
}

fn load_config(cli_config: Option<&Path>, model_dir: Option<PathBuf>) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    let mut config = match cli_config {
        Some(path) => PipelineConfig::from_toml_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(dir) = model_dir {
        config.model_dir = dir;
    }
    Ok(config)
}

pub fn train(args: TrainArgs, mut config: PipelineConfig) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    let profile = config.profile_for(args.disease);

    println!("Loading training data from: {}", args.training_data.display());
    let dataset = LabeledDataset::from_csv_path(&args.training_data, &profile)?;
    println!(
        "Loaded {} rows ({} positive) with {} feature columns; label column '{}'",
        dataset.n_rows(),
        dataset.positives(),
        dataset.features.n_columns(),
        dataset.target_column
    );

    let (training, holdout) = dataset.stratified_split(config.holdout_fraction, config.seed)?;
    println!(
        "Split into {} training and {} holdout rows",
        training.n_rows(),
        holdout.n_rows()
    );

    let trainer = ModelTrainer::new(config.training_options());
    let mut observer = BarObserver::new();
    let bundle = trainer.train_with_progress(&training, &holdout, &profile, &mut observer)?;

    println!(
        "Selected {} for {}: holdout accuracy {:.4}, auc {:.4}",
        bundle.metadata.model_type, bundle.disease, bundle.metadata.accuracy, bundle.metadata.auc_score
    );
    println!("{}", bundle.metadata.holdout_report);

    let path = ModelStore::from_config(&config).save(&bundle)?;
    println!("Model saved to: {}", path.display());
    Ok(())
}

fn read_record(path: &Path) -> Result<PatientRecord, Box<dyn std::error::Error>> {
    let file = std::fs::File::open(path)?;
    let raw: HashMap<String, FeatureValue> = serde_json::from_reader(std::io::BufReader::new(file))?;
    Ok(raw
        .into_iter()
        .map(|(name, value)| (normalize_column_name(&name), value))
        .collect())
}

pub fn predict(args: PredictArgs, config: PipelineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let record = read_record(&args.record)?;
    let diseases = if args.diseases.is_empty() {
        Disease::ALL.to_vec()
    } else {
        args.diseases
    };

    let store = ModelStore::from_config(&config);
    let (registry, load_failures) = store.load_registry(&diseases);
    for (disease, error) in &load_failures {
        if !matches!(error, StoreError::ModelNotFound { .. }) {
            eprintln!("Warning: {disease}: {error}");
        }
    }

    let batch = predict_batch(&record, &registry, &diseases);
    if args.json {
        let assessments: Vec<_> = batch.ranked();
        println!("{}", serde_json::to_string_pretty(&assessments)?);
    } else {
        println!("{:<16} {:>8} {:<16} {:>10}", "disease", "risk", "category", "confidence");
        for assessment in batch.ranked() {
            println!(
                "{:<16} {:>7.1}% {:<16} {:>10.2}",
                assessment.disease.to_string(),
                assessment.percentage(),
                assessment.category.to_string(),
                assessment.confidence
            );
        }
    }
    for (disease, error) in &batch.failures {
        eprintln!("{disease}: not scored ({error})");
    }

    if batch.assessments.is_empty() {
        return Err("no disease could be scored".into());
    }
    Ok(())
}

pub fn summary(config: PipelineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = ModelStore::from_config(&config);
    println!("Model directory: {}", store.directory().display());
    let (registry, failures) = store.load_registry(&Disease::ALL);
    let trained: Vec<String> = registry.diseases().iter().map(Disease::to_string).collect();
    println!("Trained diseases: {}", trained.join(", "));

    for bundle in registry.iter() {
        let meta = &bundle.metadata;
        println!();
        println!("{}", bundle.disease);
        println!("  model:            {}", meta.model_type);
        println!("  holdout accuracy: {:.4}", meta.accuracy);
        println!("  holdout auc:      {:.4}", meta.auc_score);
        println!(
            "  ensemble:         [{}] auc {:.4}",
            meta.ensemble_members.join(", "),
            meta.ensemble_auc
        );
        println!(
            "  samples:          {} training, {} holdout",
            meta.training_samples, meta.holdout_samples
        );
        println!("  trained:          {}", meta.training_date.format("%Y-%m-%d %H:%M:%S UTC"));
        println!("  features (anova f):");
        let scores = bundle.artifact.scores();
        for (name, &index) in bundle.selected_features.iter().zip(bundle.artifact.selected_indices()) {
            println!("    {name:<24} {:.2}", scores.get(index).copied().unwrap_or(0.0));
        }
        if let Some(mut importances) = bundle.feature_importances() {
            importances.sort_by(|a, b| b.1.total_cmp(&a.1));
            for (name, value) in importances.iter().take(5) {
                println!("    {name:<24} {value:.4}");
            }
        }
        if let Some(model) = &bundle.final_model {
            let baseline = model.predict_probability(ndarray::Array1::zeros(bundle.selected_features.len()).view());
            println!("  risk at training means: {:.1}%", baseline * 100.0);
        }
    }
    for (disease, error) in &failures {
        println!();
        println!("{disease}: {error}");
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Cli {
        config,
        model_dir,
        command,
    } = cli;

    let result = match command {
        Some(command) => load_config(config.as_deref(), model_dir).and_then(|config| match command {
            Commands::Train(args) => train(args, config),
            Commands::Predict(args) => predict(args, config),
            Commands::Summary => summary(config),
        }),
        None => {
            let printed = Cli::command().print_help();
            println!();
            printed.map_err(Into::into)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
