#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use itertools::Itertools;
use std::path::{Path, PathBuf};
use std::process;

use glmpath::data::{load_training_data, response_for};
use glmpath::{
    DesignMatrix, Distribution, GlmConfig, RegLambda, RegularizationPath, ScoreMetric,
    SolverKind, fit_path,
};

#[derive(Clone, Copy, ValueEnum)]
pub enum DistrCli {
    Gaussian,
    Binomial,
    Poisson,
    Softplus,
    Multinomial,
}

impl From<DistrCli> for Distribution {
    fn from(value: DistrCli) -> Self {
        match value {
            DistrCli::Gaussian => Distribution::Gaussian,
            DistrCli::Binomial => Distribution::Binomial,
            DistrCli::Poisson => Distribution::Poisson,
            DistrCli::Softplus => Distribution::Softplus,
            DistrCli::Multinomial => Distribution::Multinomial,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SolverCli {
    BatchGradient,
    Cdfast,
}

impl From<SolverCli> for SolverKind {
    fn from(value: SolverCli) -> Self {
        match value {
            SolverCli::BatchGradient => SolverKind::BatchGradient,
            SolverCli::Cdfast => SolverKind::Cdfast,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ScoreCli {
    Deviance,
    PseudoR2,
    Accuracy,
}

impl From<ScoreCli> for ScoreMetric {
    fn from(value: ScoreCli) -> Self {
        match value {
            ScoreCli::Deviance => ScoreMetric::Deviance,
            ScoreCli::PseudoR2 => ScoreMetric::PseudoR2,
            ScoreCli::Accuracy => ScoreMetric::Accuracy,
        }
    }
}

#[derive(Args)]
pub struct FitArgs {
    /// Path to a CSV file with a header row; every column except the response is a feature
    pub training_data: PathBuf,

    /// Name of the response column
    #[arg(long, default_value = "y")]
    pub response: String,

    /// TOML file with fitting options; command-line flags override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Response distribution
    #[arg(long, value_enum)]
    pub distr: Option<DistrCli>,

    /// Optimizer used for every path entry
    #[arg(long, value_enum)]
    pub solver: Option<SolverCli>,

    /// Elastic-net mix in [0, 1]; 1 is pure L1
    #[arg(long)]
    pub alpha: Option<f64>,

    /// Explicit regularization strengths, fitted in the given order
    #[arg(long, value_delimiter = ',')]
    pub reg_lambda: Option<Vec<f64>>,

    /// Group id per feature for the group lasso (0 is unpenalized)
    #[arg(long, value_delimiter = ',')]
    pub group: Option<Vec<usize>>,

    /// Maximum number of iterations (batch) or sweeps (cdfast) per entry
    #[arg(long)]
    pub max_iter: Option<usize>,

    /// Convergence tolerance
    #[arg(long)]
    pub tol: Option<f64>,

    /// Metric reported for every path entry on the training data
    #[arg(long, value_enum, default_value_t = ScoreCli::Deviance)]
    pub score: ScoreCli,

    /// Write the fitted coefficients of every entry to this CSV file
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Parser)]
#[command(
    name = "glmpath",
    about = "Elastic-net regularization paths for generalized linear models"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a full regularization path and print one line per strength
    Fit(FitArgs),
    /// Print the default configuration as TOML, or write it to a file
    Config {
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Fit(args)) => fit(args),
        Some(Commands::Config { output }) => write_default_config(output.as_deref()),
        None => Cli::command().print_help().map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn fit(args: FitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = resolve_config(&args)?;
    let data = load_training_data(&args.training_data, &args.response)?;
    println!(
        "Loaded {} samples with {} features from {}",
        data.y.len(),
        data.x.ncols(),
        args.training_data.display()
    );

    let y = response_for(config.distr, &data.y)?;
    let x = DesignMatrix::Dense(data.x);
    let path = fit_path(&x, &y, &config, None)?;

    let metric = ScoreMetric::from(args.score);
    let scores = path.score(&x, &y, metric)?;
    println!(
        "{:>12}  {:>22}  {:>10}  {:>9}  {:>12}",
        "lambda",
        "status",
        "iterations",
        "nonzeros",
        metric.to_string()
    );
    for (model, score) in path.iter().zip(&scores) {
        println!(
            "{:>12.4e}  {:>22}  {:>10}  {:>9}  {:>12.6}",
            model.reg_lambda,
            format!("{:?}", model.status),
            model.iterations,
            model.n_nonzero(),
            score
        );
    }

    if let Some(output) = &args.output {
        write_coefficients(output, &path, &data.feature_names)?;
        println!("Coefficients written to {}", output.display());
    }
    Ok(())
}

fn resolve_config(args: &FitArgs) -> Result<GlmConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => GlmConfig::load(path)?,
        None => GlmConfig::default(),
    };
    if let Some(distr) = args.distr {
        config.distr = distr.into();
    }
    if let Some(solver) = args.solver {
        config.solver = solver.into();
    }
    if let Some(alpha) = args.alpha {
        config.alpha = alpha;
    }
    if let Some(values) = &args.reg_lambda {
        config.reg_lambda = RegLambda::Explicit(values.clone());
    }
    if let Some(group) = &args.group {
        config.group = Some(group.clone());
    }
    if let Some(max_iter) = args.max_iter {
        config.max_iter = max_iter;
    }
    if let Some(tol) = args.tol {
        config.tol = tol;
    }
    log::info!(
        "Regularization strengths: {}",
        config
            .reg_lambda
            .values()
            .iter()
            .map(|l| format!("{l:.4e}"))
            .join(", ")
    );
    Ok(config)
}

fn write_coefficients(
    output: &Path,
    path: &RegularizationPath,
    feature_names: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = csv::Writer::from_path(output)?;
    let header = ["lambda", "output", "status", "intercept"]
        .into_iter()
        .map(str::to_string)
        .chain(feature_names.iter().cloned())
        .collect_vec();
    writer.write_record(&header)?;
    for model in path.iter() {
        for (output_index, column) in model.beta.columns().into_iter().enumerate() {
            let record = [
                model.reg_lambda.to_string(),
                output_index.to_string(),
                format!("{:?}", model.status),
            ]
            .into_iter()
            .chain(column.iter().map(f64::to_string))
            .collect_vec();
            writer.write_record(&record)?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn write_default_config(output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = GlmConfig::default();
    match output {
        Some(path) => {
            config.save(path)?;
            println!("Default configuration written to {}", path.display());
        }
        None => print!("{}", config.to_toml_string()?),
    }
    Ok(())
}
