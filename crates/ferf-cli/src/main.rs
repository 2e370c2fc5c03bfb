//! `ferf`: compute a rupture forecast from a dataset file and print a JSON
//! summary.
//!
//! ```text
//! ferf --dataset ruptures.json [--config forecast.toml] [--duration 5]
//!      [--model time-independent|time-dependent|blend]
//!      [--region MIN_LAT,MAX_LAT,MIN_LON,MAX_LON] [--sources] [--pretty]
//! ```
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

use std::ffi::OsString;
use std::io::{self, Write as _};
use std::path::PathBuf;
use std::sync::Arc;

use ferf_core::{
    DatasetSource, ForecastEngine, RecomputeMetricsSnapshot, RecomputeRingBuffer, SkippedRupture,
};
use ferf_error::{ForecastError, Result};
use ferf_types::{Cx, ForecastConfig, ProbabilityModelKind, Region};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();
    let exit_code = run_cli(std::env::args_os());
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

#[derive(Debug, Default)]
struct Options {
    dataset: Option<PathBuf>,
    config: Option<PathBuf>,
    duration: Option<f64>,
    model: Option<ProbabilityModelKind>,
    region: Option<Region>,
    list_sources: bool,
    pretty: bool,
}

#[derive(Debug, Serialize)]
struct SourceLine {
    index: usize,
    name: String,
    ruptures: usize,
    total_probability: f64,
}

#[derive(Debug, Serialize)]
struct Summary {
    generation: u64,
    fingerprint: String,
    source_count: usize,
    fault_source_count: usize,
    background_source_count: usize,
    rupture_count: usize,
    skipped_ruptures: Vec<SkippedRupture>,
    underflow_fallbacks: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ruptures_in_region: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sources: Vec<SourceLine>,
    config: ForecastConfig,
    metrics: RecomputeMetricsSnapshot,
    events: usize,
}

fn run_cli<I>(os_args: I) -> i32
where
    I: IntoIterator<Item = OsString>,
{
    let raw: Vec<String> = os_args
        .into_iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();

    let tail = if raw.len() > 1 { &raw[1..] } else { &[] };

    if tail.is_empty() || tail.iter().any(|a| a == "-h" || a == "--help") {
        print_help();
        return 0;
    }

    let options = match parse_options(tail) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("error: {message}");
            return 2;
        }
    };

    match run(&options) {
        Ok(summary) => {
            let encoded = if options.pretty {
                serde_json::to_string_pretty(&summary)
            } else {
                serde_json::to_string(&summary)
            };
            match encoded {
                Ok(text) => {
                    let mut out = io::stdout().lock();
                    if writeln!(out, "{text}").is_err() {
                        return 1;
                    }
                    0
                }
                Err(e) => {
                    eprintln!("error: JSON serialization failed: {e}");
                    1
                }
            }
        }
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    }
}

fn parse_options(tail: &[String]) -> std::result::Result<Options, String> {
    let mut options = Options::default();
    let mut i = 0;
    while i < tail.len() {
        let flag = tail[i].as_str();
        let mut value = || {
            i += 1;
            tail.get(i)
                .cloned()
                .ok_or_else(|| format!("{flag} requires an argument"))
        };
        match flag {
            "--dataset" => options.dataset = Some(PathBuf::from(value()?)),
            "--config" => options.config = Some(PathBuf::from(value()?)),
            "--duration" => {
                let v = value()?;
                options.duration = Some(
                    v.parse()
                        .map_err(|_| format!("--duration expects years, got `{v}`"))?,
                );
            }
            "--model" => options.model = Some(parse_model(&value()?)?),
            "--region" => options.region = Some(parse_region(&value()?)?),
            "--sources" => options.list_sources = true,
            "--pretty" => options.pretty = true,
            other => return Err(format!("unknown option `{other}`")),
        }
        i += 1;
    }
    if options.dataset.is_none() {
        return Err("--dataset is required".to_owned());
    }
    Ok(options)
}

fn parse_model(text: &str) -> std::result::Result<ProbabilityModelKind, String> {
    match text {
        "time-independent" | "poisson" => Ok(ProbabilityModelKind::TimeIndependent),
        "time-dependent" | "bpt" => Ok(ProbabilityModelKind::TimeDependent),
        "blend" => Ok(ProbabilityModelKind::Blend),
        other => Err(format!("unknown probability model `{other}`")),
    }
}

fn parse_region(text: &str) -> std::result::Result<Region, String> {
    let bounds: Vec<f64> = text
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| format!("--region expects four numbers, got `{text}`"))?;
    match bounds.as_slice() {
        &[min_lat, max_lat, min_lon, max_lon] => {
            Ok(Region::rectangle(min_lat, max_lat, min_lon, max_lon))
        }
        _ => Err(format!("--region expects four numbers, got `{text}`")),
    }
}

fn run(options: &Options) -> Result<Summary> {
    let mut config = match &options.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            ForecastConfig::from_toml_str(&text)?
        }
        None => ForecastConfig::default(),
    };
    if let Some(kind) = options.model {
        config.probability_model = kind;
    }
    if let Some(years) = options.duration {
        config.time_window.duration_years = years;
    }
    let dataset = options
        .dataset
        .clone()
        .ok_or_else(|| ForecastError::invalid_config("dataset", "missing"))?;

    let ring = Arc::new(RecomputeRingBuffer::new(1024));
    let engine = ForecastEngine::new(DatasetSource::Path(dataset), config)?
        .with_observer(ring.clone());
    let snapshot = engine.recompute(&Cx::new())?;
    info!(
        target: "ferf.cli",
        generation = snapshot.generation(),
        sources = snapshot.source_count(),
        ruptures = snapshot.rupture_count(),
        "forecast ready"
    );

    let ruptures_in_region = match &options.region {
        Some(region) => {
            let mut inside = 0;
            for rupture in snapshot.dataset().ruptures() {
                if snapshot.source_for_rupture(rupture.id)?.is_some()
                    && snapshot.is_rupture_inside(region, rupture.id)?
                {
                    inside += 1;
                }
            }
            Some(inside)
        }
        None => None,
    };

    let sources = if options.list_sources {
        snapshot
            .sources()
            .enumerate()
            .map(|(index, s)| SourceLine {
                index,
                name: s.name.clone(),
                ruptures: s.rupture_count(),
                total_probability: s.total_probability(),
            })
            .collect()
    } else {
        Vec::new()
    };

    Ok(Summary {
        generation: snapshot.generation(),
        fingerprint: format!("{:016x}", snapshot.fingerprint()),
        source_count: snapshot.source_count(),
        fault_source_count: snapshot.fault_source_count(),
        background_source_count: snapshot.background_source_count(),
        rupture_count: snapshot.rupture_count(),
        skipped_ruptures: snapshot.skipped_ruptures().to_vec(),
        underflow_fallbacks: snapshot.underflow_fallbacks().to_vec(),
        ruptures_in_region,
        sources,
        config: snapshot.config().clone(),
        metrics: engine.metrics(),
        events: ring.len(),
    })
}

fn print_help() {
    println!(
        "ferf: long-term rupture forecast\n\
         \n\
         USAGE:\n    \
         ferf --dataset <FILE> [OPTIONS]\n\
         \n\
         OPTIONS:\n    \
         --dataset <FILE>        JSON rupture dataset (required)\n    \
         --config <FILE>         TOML forecast configuration\n    \
         --duration <YEARS>      Override the forecast duration\n    \
         --model <KIND>          time-independent | time-dependent | blend\n    \
         --region <BOUNDS>       MIN_LAT,MAX_LAT,MIN_LON,MAX_LON; count ruptures inside\n    \
         --sources               List every source in the output\n    \
         --pretty                Pretty-print the JSON summary\n    \
         -h, --help              Show this help\n\
         \n\
         Set RUST_LOG to control log verbosity (default: info)."
    );
}
