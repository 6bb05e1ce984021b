#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::fs;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;

use copula_risk::config::StudyConfig;
use copula_risk::copula::CopulaFamily;
use copula_risk::estimate::BootstrapProgressObserver;
use copula_risk::pipeline::{
    StudyError, bootstrap_joint, estimate_joint, fit_margins, run_study, simulate_dataset,
};
use copula_risk::report::{
    format_estimates, format_fit_table, read_dataset, write_bootstrap, write_dataset,
};
use copula_risk::simulate::Dataset;

#[derive(Clone, Copy, ValueEnum)]
pub enum CopulaFamilyCli {
    Frank,
    Clayton,
}

impl From<CopulaFamilyCli> for CopulaFamily {
    fn from(value: CopulaFamilyCli) -> Self {
        match value {
            CopulaFamilyCli::Frank => CopulaFamily::Frank,
            CopulaFamilyCli::Clayton => CopulaFamily::Clayton,
        }
    }
}

/// Settings shared by every study command. Flags override the config file.
#[derive(Args)]
pub struct StudyArgs {
    /// TOML study configuration; defaults are used when omitted
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Copula family of the data-generating process
    #[arg(long, value_enum)]
    pub copula: Option<CopulaFamilyCli>,

    /// Dependence parameter of the data-generating copula
    #[arg(long, allow_hyphen_values = true)]
    pub theta: Option<f64>,

    /// Number of simulated observations
    #[arg(long, value_name = "N")]
    pub n: Option<usize>,

    /// Seed for the simulation
    #[arg(long)]
    pub seed: Option<u64>,

    /// Number of bootstrap replicates
    #[arg(long, value_name = "B")]
    pub replicates: Option<usize>,

    /// Size of every bootstrap resample
    #[arg(long, value_name = "M")]
    pub resample_size: Option<usize>,

    /// Seed for the bootstrap replicates
    #[arg(long)]
    pub bootstrap_seed: Option<u64>,
}

impl StudyArgs {
    fn resolve(&self) -> Result<StudyConfig, StudyError> {
        let mut config = match &self.config {
            Some(path) => StudyConfig::load(path)?,
            None => StudyConfig::default(),
        };
        if let Some(copula) = self.copula {
            config.simulation.copula = copula.into();
        }
        if let Some(theta) = self.theta {
            config.simulation.theta = theta;
        }
        if let Some(n) = self.n {
            config.simulation.n = n;
        }
        if let Some(seed) = self.seed {
            config.simulation.seed = seed;
        }
        if let Some(replicates) = self.replicates {
            config.bootstrap.replicates = replicates;
        }
        if let Some(resample_size) = self.resample_size {
            config.bootstrap.resample_size = resample_size;
        }
        if let Some(seed) = self.bootstrap_seed {
            config.bootstrap.seed = seed;
        }
        Ok(config)
    }
}

/// A dataset is read from CSV when given, otherwise simulated from the configuration.
#[derive(Args)]
pub struct DataArgs {
    #[command(flatten)]
    pub study: StudyArgs,

    /// Existing dataset CSV with closure_time,cause columns
    #[arg(long, value_name = "PATH")]
    pub dataset: Option<PathBuf>,
}

impl DataArgs {
    fn load(&self) -> Result<(StudyConfig, Dataset), StudyError> {
        let config = self.study.resolve()?;
        let dataset = match &self.dataset {
            Some(path) => read_dataset(path)?,
            None => simulate_dataset(&config)?,
        };
        Ok((config, dataset))
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Simulate a competing-risks dataset and write it as CSV
    Simulate {
        #[command(flatten)]
        study: StudyArgs,
        /// Output CSV path
        #[arg(long, default_value = "dataset.csv")]
        out: PathBuf,
    },
    /// Fit the candidate marginal families to each cause and print the AIC tables
    FitMargins(DataArgs),
    /// Estimate the copula and both margins jointly by maximum likelihood
    Estimate(DataArgs),
    /// Bootstrap the joint estimate and write the kept replicates as CSV
    Bootstrap {
        #[command(flatten)]
        data: DataArgs,
        /// Output CSV path for the replicates
        #[arg(long, default_value = "bootstrap.csv")]
        out: PathBuf,
    },
    /// Run the full study and write dataset, replicates and report to a directory
    Run {
        #[command(flatten)]
        study: StudyArgs,
        /// Output directory
        #[arg(long, default_value = "study-output")]
        out_dir: PathBuf,
        /// Skip the bootstrap stage
        #[arg(long)]
        no_bootstrap: bool,
    },
    /// Write the default configuration as TOML
    InitConfig {
        /// Output path
        #[arg(default_value = "study.toml")]
        path: PathBuf,
    },
}

#[derive(Parser)]
#[command(name = "copula-risk", version, about = "Dependent competing risks under bivariate copulas")]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new() -> Self {
        let draw_target = if std::io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(20)
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(None, draw_target);
        if let Ok(style) = ProgressStyle::with_template(
            "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} replicates ({eta}) {msg}",
        ) {
            bar.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
        }
        Self { bar }
    }
}

impl BootstrapProgressObserver for BarProgress {
    fn on_start(&self, total_replicates: usize) {
        self.bar.set_length(total_replicates as u64);
    }

    fn on_replicate_finished(&self, index: usize, converged: bool) {
        if !converged {
            log::debug!("Replicate {index} did not converge.");
            self.bar.set_message("some replicates dropped");
        }
        self.bar.inc(1);
    }

    fn on_finish(&self, kept: usize, dropped: usize) {
        self.bar
            .finish_with_message(format!("kept {kept}, dropped {dropped}"));
    }
}

fn init_logging(verbose: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if verbose && std::env::var_os("RUST_LOG").is_none() {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();
}

fn run_simulate(study: StudyArgs, out: PathBuf) -> Result<(), StudyError> {
    let config = study.resolve()?;
    let dataset = simulate_dataset(&config)?;
    write_dataset(&out, &dataset)?;
    println!(
        "Wrote {} observations to {}",
        dataset.len(),
        out.display()
    );
    Ok(())
}

fn run_fit_margins(args: DataArgs) -> Result<(), StudyError> {
    let (config, dataset) = args.load()?;
    for cause_fit in fit_margins(&dataset, &config)? {
        println!("{}\n", format_fit_table(cause_fit.cause, &cause_fit.fit));
    }
    Ok(())
}

fn run_estimate(args: DataArgs) -> Result<(), StudyError> {
    let (config, dataset) = args.load()?;
    let mle = estimate_joint(&dataset, &config)?;
    println!("{}", format_estimates(&mle, &[]));
    Ok(())
}

fn run_bootstrap_command(data: DataArgs, out: PathBuf) -> Result<(), StudyError> {
    let (config, dataset) = data.load()?;
    let mle = estimate_joint(&dataset, &config)?;
    let sample = bootstrap_joint(&dataset, &config, &mle, &BarProgress::new())?;
    write_bootstrap(&out, &sample)?;
    println!("{}", format_estimates(&mle, &sample.summaries()));
    println!(
        "{} of {} replicates kept; written to {}",
        sample.kept(),
        sample.attempted,
        out.display()
    );
    Ok(())
}

fn run_full(study: StudyArgs, out_dir: PathBuf, no_bootstrap: bool) -> Result<(), StudyError> {
    let config = study.resolve()?;
    fs::create_dir_all(&out_dir).map_err(copula_risk::report::ReportError::from)?;
    let outcome = run_study(&config, !no_bootstrap, &BarProgress::new())?;

    write_dataset(&out_dir.join("dataset.csv"), &outcome.dataset)?;
    if let Some(sample) = &outcome.bootstrap {
        write_bootstrap(&out_dir.join("bootstrap.csv"), sample)?;
    }
    outcome.report.save_json(&out_dir.join("report.json"))?;
    config.save(&out_dir.join("study.toml"))?;

    for cause_fit in &outcome.report.marginal_fits {
        println!("{}\n", format_fit_table(cause_fit.cause, &cause_fit.fit));
    }
    let summaries = outcome
        .report
        .bootstrap
        .as_ref()
        .map(|b| b.summaries.clone())
        .unwrap_or_default();
    println!("{}", format_estimates(&outcome.report.mle, &summaries));
    println!("Results written to {}", out_dir.display());
    Ok(())
}

fn main() {
    let Cli { verbose, command } = Cli::parse();
    init_logging(verbose);

    let result = match command {
        Some(Commands::Simulate { study, out }) => run_simulate(study, out),
        Some(Commands::FitMargins(args)) => run_fit_margins(args),
        Some(Commands::Estimate(args)) => run_estimate(args),
        Some(Commands::Bootstrap { data, out }) => run_bootstrap_command(data, out),
        Some(Commands::Run {
            study,
            out_dir,
            no_bootstrap,
        }) => run_full(study, out_dir, no_bootstrap),
        Some(Commands::InitConfig { path }) => StudyConfig::default()
            .save(&path)
            .map(|()| println!("Wrote default configuration to {}", path.display()))
            .map_err(StudyError::from),
        None => {
            let _ = Cli::command().print_help();
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
