//! RSS CLI - Command-line interface for transit-rss
//!
//! Commands:
//! - score: run the scoring pipeline over four NDJSON input tables
//! - validate: validate input records without scoring
//! - schema: print input/output schema information

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use transit_rss::records::{
    parse_ndjson, InputTables, RestrictionRecord, RidershipRecord, SurveyRecord, TravelTimeRecord,
};
use transit_rss::{ScoreConfig, ScoreError, PRODUCER_NAME, RSS_VERSION};

/// transit-rss - Rider Satisfaction Score compute engine
#[derive(Parser)]
#[command(name = "rss")]
#[command(version = RSS_VERSION)]
#[command(about = "Fuse transit datasets into Rider Satisfaction Scores", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scoring pipeline over the four input tables
    Score {
        /// Survey records, NDJSON (use - for stdin)
        #[arg(long)]
        survey: PathBuf,

        /// Travel-time records, NDJSON
        #[arg(long)]
        travel_times: PathBuf,

        /// Ridership records, NDJSON
        #[arg(long)]
        ridership: PathBuf,

        /// Speed-restriction records, NDJSON
        #[arg(long)]
        restrictions: PathBuf,

        /// Configuration JSON file; defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Validate input records and report problems without scoring
    Validate {
        /// Which table the input belongs to
        #[arg(value_enum)]
        table: Table,

        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Print schema information
    Schema {
        /// Schema to print
        #[arg(value_enum)]
        schema_type: SchemaType,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[derive(Clone, Copy, ValueEnum)]
enum Table {
    Survey,
    TravelTimes,
    Ridership,
    Restrictions,
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// The four input tables
    Input,
    /// The run output envelope
    Output,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliErrorBody::from(e))
                    .unwrap_or_else(|_| "unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Score {
            survey,
            travel_times,
            ridership,
            restrictions,
            config,
            output,
            output_format,
        } => cmd_score(
            &survey,
            &travel_times,
            &ridership,
            &restrictions,
            config.as_deref(),
            &output,
            output_format,
        ),
        Commands::Validate { table, input } => cmd_validate(table, &input),
        Commands::Schema { schema_type } => {
            cmd_schema(schema_type);
            Ok(())
        }
    }
}

fn cmd_score(
    survey: &Path,
    travel_times: &Path,
    ridership: &Path,
    restrictions: &Path,
    config: Option<&Path>,
    output: &Path,
    output_format: OutputFormat,
) -> Result<(), CliError> {
    let inputs = InputTables {
        survey: parse_ndjson(&read_input(survey)?)?,
        travel_times: parse_ndjson(&read_input(travel_times)?)?,
        ridership: parse_ndjson(&read_input(ridership)?)?,
        restrictions: parse_ndjson(&read_input(restrictions)?)?,
    };

    let config = match config {
        Some(path) => serde_json::from_str::<ScoreConfig>(&fs::read_to_string(path)?)?,
        None => ScoreConfig::default(),
    };

    let run = transit_rss::run(&inputs, &config)?;

    let rendered = match output_format {
        OutputFormat::Json => serde_json::to_string(&run)?,
        OutputFormat::JsonPretty => serde_json::to_string_pretty(&run)?,
    };
    if output.to_string_lossy() == "-" {
        println!("{}", rendered);
    } else {
        fs::write(output, rendered)?;
    }
    Ok(())
}

fn cmd_validate(table: Table, input: &Path) -> Result<(), CliError> {
    let data = read_input(input)?;

    let (total, errors) = match table {
        Table::Survey => validate_table(&data, SurveyRecord::validate),
        Table::TravelTimes => validate_table(&data, TravelTimeRecord::validate),
        Table::Ridership => validate_table(&data, RidershipRecord::validate),
        Table::Restrictions => validate_table(&data, RestrictionRecord::validate),
    };

    println!("Validation Report");
    println!("=================");
    println!("Total records:   {}", total);
    println!("Invalid records: {}", errors.len());
    for (line, message) in &errors {
        println!("  - line {}: {}", line, message);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(CliError::ValidationFailed(errors.len()))
    }
}

fn validate_table<T: serde::de::DeserializeOwned>(
    data: &str,
    check: impl Fn(&T) -> Result<(), ScoreError>,
) -> (usize, Vec<(usize, String)>) {
    let mut total = 0;
    let mut errors = Vec::new();
    for (idx, line) in data.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        total += 1;
        match serde_json::from_str::<T>(trimmed) {
            Ok(record) => {
                if let Err(e) = check(&record) {
                    errors.push((idx + 1, e.to_string()));
                }
            }
            Err(e) => errors.push((idx + 1, e.to_string())),
        }
    }
    (total, errors)
}

fn cmd_schema(schema_type: SchemaType) {
    match schema_type {
        SchemaType::Input => {
            println!("Input tables (NDJSON, one record per line)");
            println!();
            println!("1. survey - passenger survey aggregates");
            println!("   aggregation_level, route_or_line, reporting_group,");
            println!("   measure_group, measure, category, weighted_percent");
            println!();
            println!("2. travel_times - origin-destination samples");
            println!("   service_date, dep_time, route_id, direction_id,");
            println!("   from/to stop ids, parent stations, names, travel_time_sec");
            println!();
            println!("3. ridership - boardings at SDP period grain");
            println!("   route_id, time_period_name, day_type_name, parent_station,");
            println!("   total_ons, average_ons, number_service_days");
            println!();
            println!("4. restrictions - speed restriction log");
            println!("   route_id, from/to station, speed_mph, effective_date,");
            println!("   cleared_date, restriction_length_miles, total_route_miles");
        }
        SchemaType::Output => {
            println!("Output envelope (JSON)");
            println!();
            println!("- metadata: run id, timestamps, config echo, join summary,");
            println!("  normalization parameters, service span");
            println!("- records: RSS records (scope, scope_id, time_period, score,");
            println!("  exposure_weight_sum, n_observations, zero_exposure)");
            println!("- weight_audit: selection, weights, prior, fit diagnostics");
            println!("- statistics: ANOVA, bootstrap CIs, equity findings");
            println!();
            println!("Producer: {} {}", PRODUCER_NAME, RSS_VERSION);
        }
    }
}

fn read_input(path: &Path) -> Result<String, CliError> {
    if path.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

// Error types

#[derive(Debug)]
enum CliError {
    Io(io::Error),
    Score(ScoreError),
    Json(serde_json::Error),
    ValidationFailed(usize),
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        CliError::Io(e)
    }
}

impl From<ScoreError> for CliError {
    fn from(e: ScoreError) -> Self {
        CliError::Score(e)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliErrorBody {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<CliError> for CliErrorBody {
    fn from(e: CliError) -> Self {
        match e {
            CliError::Io(e) => CliErrorBody {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            CliError::Score(e) => CliErrorBody {
                code: match e {
                    ScoreError::UnknownRoute(_) => "UNKNOWN_ROUTE".to_string(),
                    ScoreError::InvalidConfig(_) => "INVALID_CONFIG".to_string(),
                    _ => "SCORE_ERROR".to_string(),
                },
                message: e.to_string(),
                hint: Some("Run 'rss validate' on each input table".to_string()),
            },
            CliError::Json(e) => CliErrorBody {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            CliError::ValidationFailed(count) => CliErrorBody {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} records failed validation", count),
                hint: Some("Fix the listed records and retry".to_string()),
            },
        }
    }
}
