//! tcid50 - TCID50 titer estimation CLI
//!
//! Command-line interface for estimating endpoint titers from CPE assays.

use clap::{Parser, Subcommand, ValueEnum};
use std::io::Read;
use std::path::{Path, PathBuf};
use tcid50::analysis::{Analysis, AnalysisConfig};
use tcid50::data::{DecimalSeparator, InputSource, SampleSheet, TiterResultSet};
use tcid50::error::{Result, TiterError};
use tcid50::model::FitMethod;
use tcid50::plot::{dose_response_chart, titer_chart, ChartSpec};
use tracing_subscriber::EnvFilter;

/// CLI-friendly fit method enum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliMethod {
    /// Least squares on the continuity-corrected logit
    Logit,
    /// Binomial GLM on the raw counts
    Binomial,
}

impl From<CliMethod> for FitMethod {
    fn from(method: CliMethod) -> Self {
        match method {
            CliMethod::Logit => FitMethod::Logit,
            CliMethod::Binomial => FitMethod::BinomialGlm,
        }
    }
}

/// TCID50 endpoint titer estimation
#[derive(Parser)]
#[command(name = "tcid50")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate titers from an assay file or pasted text
    Run {
        /// Assay file (.csv, .tsv or .xlsx)
        input: Option<PathBuf>,

        /// Tab separated assay text ("-" reads stdin)
        #[arg(long)]
        text: Option<String>,

        /// Inoculum volume per well in µL (default: 10)
        #[arg(short, long)]
        volume: Option<f64>,

        /// Decimal separator: "." or ","
        #[arg(short, long)]
        decimal: Option<String>,

        /// Regression model
        #[arg(short, long, value_enum)]
        method: Option<CliMethod>,

        /// Analysis configuration YAML
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output path for results CSV (default: <input>_out.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Directory for SVG charts
        #[arg(long)]
        plots: Option<PathBuf>,

        /// Also write chart specifications as JSON
        #[arg(long)]
        json: bool,

        /// Sample sheet (.csv or .tsv) keyed by ID
        #[arg(long)]
        sample_sheet: Option<PathBuf>,

        /// Sample sheet column attached to each result
        #[arg(long)]
        group_column: Option<String>,
    },

    /// Print a summary of an exported results CSV
    Show {
        /// Results CSV written by `run`
        results: PathBuf,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Generate an example analysis configuration
    Example {
        /// Output path for the example YAML
        #[arg(short, long, default_value = "tcid50.yaml")]
        output: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            input,
            text,
            volume,
            decimal,
            method,
            config,
            output,
            plots,
            json,
            sample_sheet,
            group_column,
        } => RunArgs {
            input,
            text,
            volume,
            decimal,
            method,
            config,
            output,
            plots,
            json,
            sample_sheet,
            group_column,
        }
        .execute(),

        Commands::Show { results, format } => cmd_show(&results, &format),

        Commands::Example { output } => cmd_example(&output),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

struct RunArgs {
    input: Option<PathBuf>,
    text: Option<String>,
    volume: Option<f64>,
    decimal: Option<String>,
    method: Option<CliMethod>,
    config: Option<PathBuf>,
    output: Option<PathBuf>,
    plots: Option<PathBuf>,
    json: bool,
    sample_sheet: Option<PathBuf>,
    group_column: Option<String>,
}

impl RunArgs {
    /// Merge flags over the configuration file.
    fn config(&self) -> Result<AnalysisConfig> {
        let mut config = match &self.config {
            Some(path) => {
                eprintln!("Loading configuration from {:?}...", path);
                AnalysisConfig::from_yaml(&std::fs::read_to_string(path)?)?
            }
            None => AnalysisConfig::default(),
        };
        if let Some(v) = self.volume {
            config.volume_ul = v;
        }
        if let Some(d) = &self.decimal {
            config.decimal = DecimalSeparator::from_symbol(d).ok_or_else(|| {
                TiterError::InvalidParameter(format!(
                    "Decimal separator must be \".\" or \",\", got {:?}",
                    d
                ))
            })?;
        }
        if let Some(m) = self.method {
            config.method = m.into();
        }
        if let Some(g) = &self.group_column {
            config.group_column = Some(g.clone());
        }
        Ok(config)
    }

    fn text(&self) -> Result<Option<String>> {
        match self.text.as_deref() {
            Some("-") => {
                let mut buf = String::new();
                std::io::stdin().read_to_string(&mut buf)?;
                Ok(Some(buf))
            }
            other => Ok(other.map(String::from)),
        }
    }

    fn execute(self) -> Result<()> {
        let config = self.config()?;
        let source = InputSource::resolve(self.text()?, self.input.clone())?;
        let sheet = match &self.sample_sheet {
            Some(path) => Some(SampleSheet::from_path(path)?),
            None => None,
        };

        let output = Analysis::from_config(&config).run_source(&source, sheet.as_ref())?;

        let output_path = self.output.clone().unwrap_or_else(|| source.default_output());
        eprintln!("Writing results to {:?}...", output_path);
        output.results.to_csv(&output_path)?;

        if let Some(dir) = &self.plots {
            std::fs::create_dir_all(dir)?;
            let stem = source.output_stem();
            let charts = [
                ("dose_response", dose_response_chart(&output.results, &output.curves)),
                ("titer", titer_chart(&output.results)),
            ];
            for (kind, chart) in &charts {
                write_chart(chart, dir, &stem, kind, self.json)?;
            }
        }

        eprintln!("Done! {} samples analysed", output.results.len());
        eprint!("{}", output.results.summary());
        Ok(())
    }
}

fn write_chart(chart: &ChartSpec, dir: &Path, stem: &str, kind: &str, json: bool) -> Result<()> {
    let svg = dir.join(format!("{}_{}.svg", stem, kind));
    chart.render_svg(&svg)?;
    eprintln!("Wrote {:?}", svg);
    if json {
        let path = dir.join(format!("{}_{}.json", stem, kind));
        std::fs::write(&path, chart.to_json()?)?;
        eprintln!("Wrote {:?}", path);
    }
    Ok(())
}

/// Reload an exported result set and print it
fn cmd_show(path: &PathBuf, format: &str) -> Result<()> {
    let results = TiterResultSet::from_csv(path)?;

    match format {
        "json" => println!("{}", results.to_json()?),
        _ => {
            println!("Titer results ({})", results.method);
            println!("====================");
            println!();
            println!(
                "{:<16} {:>14} {:>10} {:>19}  {}",
                "ID", "TCID50/mL", "log10", "95% CI", "status"
            );
            for r in results.iter() {
                let titer = r
                    .tcid50_per_ml
                    .map_or_else(|| "-".to_string(), |t| format!("{:.3e}", t));
                let log10 = r.log10_tcid50.map_or_else(|| "-".to_string(), |t| format!("{:.2}", t));
                let ci = match (r.ci_low, r.ci_high) {
                    (Some(lo), Some(hi)) => format!("[{:.2}, {:.2}]", lo, hi),
                    _ => "-".to_string(),
                };
                println!(
                    "{:<16} {:>14} {:>10} {:>19}  {}",
                    r.sample_id, titer, log10, ci, r.status
                );
            }
            println!();
            print!("{}", results.summary());
        }
    }

    Ok(())
}

/// Write an example configuration
fn cmd_example(output_path: &PathBuf) -> Result<()> {
    let analysis = Analysis::new()
        .name("example-plate")
        .volume_ul(10.0)
        .method(FitMethod::Logit)
        .decimal(DecimalSeparator::Dot);

    let config = analysis.to_config(Some(
        "Example TCID50 analysis: 10 µL per well, logit regression",
    ));
    let yaml = config.to_yaml()?;

    std::fs::write(output_path, &yaml)?;
    eprintln!("Wrote example configuration to {:?}", output_path);
    eprintln!();
    eprintln!("Contents:");
    println!("{}", yaml);

    Ok(())
}
