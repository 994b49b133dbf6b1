//! RFM CLI - Command-line interface for RFM Segments
//!
//! Commands:
//! - segment: Score and segment every customer in a transaction export
//! - roster: Export the customer ids of one segment
//! - validate: Check an export's schema and count rows that would be dropped
//! - rules: Print or check a segment rule table
//! - doctor: Diagnose configuration

use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use rfm_segments::aggregator::RecencyAnchor;
use rfm_segments::report::{write_customers_csv, write_roster_csv, CustomerRow, RfmReport};
use rfm_segments::sanitizer::{DropReason, EventSanitizer, SanitizeReport};
use rfm_segments::schema::{parse_timestamp, Column, RawTransactionAdapter, RawTransactions};
use rfm_segments::{
    customers_in_segment, RfmConfig, RfmProcessor, Segment, SegmentRules, PRODUCER_NAME,
    RFM_VERSION,
};

/// Maximum number of row issues listed by `validate`
const MAX_LISTED_ISSUES: usize = 20;

/// RFM - Customer segmentation from retail transactions
#[derive(Parser)]
#[command(name = "rfm")]
#[command(version = RFM_VERSION)]
#[command(about = "Score customers by recency, frequency and monetary value", long_about = None)]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score and segment every customer
    Segment {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long)]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "csv")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "csv")]
        output_format: OutputFormat,

        /// Reference date for recency (YYYY-MM-DD or full timestamp)
        #[arg(long, value_parser = parse_as_of)]
        as_of: NaiveDateTime,

        /// Segment rule table (JSON)
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Invoice recency is measured from
        #[arg(long, default_value = "last")]
        recency_anchor: AnchorArg,
    },

    /// Export the customer ids of one segment
    Roster {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long)]
        output: PathBuf,

        /// Segment to export (e.g. loyal_customers)
        #[arg(long, value_parser = parse_segment)]
        segment: Segment,

        /// Input format
        #[arg(long, default_value = "csv")]
        input_format: InputFormat,

        /// Roster format
        #[arg(long, default_value = "csv")]
        format: RosterFormat,

        /// Reference date for recency (YYYY-MM-DD or full timestamp)
        #[arg(long, value_parser = parse_as_of)]
        as_of: NaiveDateTime,

        /// Segment rule table (JSON)
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Invoice recency is measured from
        #[arg(long, default_value = "last")]
        recency_anchor: AnchorArg,
    },

    /// Check an export's schema and rows
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "csv")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the default rule table, or check a rule table file
    Rules {
        /// Rule table to check
        #[arg(long)]
        check: Option<PathBuf>,
    },

    /// Diagnose configuration
    Doctor {
        /// Check a rule table file
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum InputFormat {
    /// Comma-separated values with a header row
    Csv,
    /// Newline-delimited JSON (one row object per line)
    Ndjson,
    /// JSON array of row objects
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// customer_id,recency,frequency,monetary,segment
    Csv,
    /// Newline-delimited JSON (one customer per line)
    Ndjson,
    /// JSON array of customers
    Json,
    /// Full report with producer metadata and segment summary
    Report,
}

#[derive(Clone, Copy, ValueEnum)]
enum RosterFormat {
    Csv,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum AnchorArg {
    /// Most recent invoice
    Last,
    /// Earliest invoice
    First,
}

impl From<AnchorArg> for RecencyAnchor {
    fn from(arg: AnchorArg) -> Self {
        match arg {
            AnchorArg::Last => RecencyAnchor::LastPurchase,
            AnchorArg::First => RecencyAnchor::FirstPurchase,
        }
    }
}

fn parse_as_of(raw: &str) -> Result<NaiveDateTime, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .or_else(|| parse_timestamp(raw))
        .ok_or_else(|| format!("invalid reference date: {}", raw))
}

fn parse_segment(raw: &str) -> Result<Segment, String> {
    raw.parse().map_err(|e: rfm_segments::RfmError| e.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .target(env_logger::Target::Stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), RfmCliError> {
    match cli.command {
        Commands::Segment {
            input,
            output,
            input_format,
            output_format,
            as_of,
            rules,
            recency_anchor,
        } => cmd_segment(
            &input,
            &output,
            input_format,
            output_format,
            as_of,
            rules.as_deref(),
            recency_anchor.into(),
        ),

        Commands::Roster {
            input,
            output,
            segment,
            input_format,
            format,
            as_of,
            rules,
            recency_anchor,
        } => cmd_roster(
            &input,
            &output,
            segment,
            input_format,
            format,
            as_of,
            rules.as_deref(),
            recency_anchor.into(),
        ),

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Rules { check } => cmd_rules(check.as_deref()),

        Commands::Doctor { rules, json } => cmd_doctor(rules.as_deref(), json),
    }
}

fn cmd_segment(
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    as_of: NaiveDateTime,
    rules: Option<&Path>,
    recency_anchor: RecencyAnchor,
) -> Result<(), RfmCliError> {
    let table = read_table(input, input_format)?;
    let processor = build_processor(rules, recency_anchor)?;

    let (segments, sanitize_report) = processor.process_with_report(&table, as_of)?;

    let rows: Vec<CustomerRow> = segments.iter().map(CustomerRow::from).collect();
    let mut sink = open_output(output)?;

    match output_format {
        OutputFormat::Csv => write_customers_csv(&mut sink, &rows)?,
        OutputFormat::Ndjson => {
            for row in &rows {
                writeln!(sink, "{}", serde_json::to_string(row)?)?;
            }
        }
        OutputFormat::Json => {
            writeln!(sink, "{}", serde_json::to_string(&rows)?)?;
        }
        OutputFormat::Report => {
            let report = RfmReport::new(
                &segments,
                &processor.config().rules.segments(),
                sanitize_report,
                as_of,
            );
            writeln!(sink, "{}", serde_json::to_string_pretty(&report)?)?;
        }
    }
    sink.flush()?;

    log::info!("Wrote {} customers", rows.len());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_roster(
    input: &Path,
    output: &Path,
    segment: Segment,
    input_format: InputFormat,
    format: RosterFormat,
    as_of: NaiveDateTime,
    rules: Option<&Path>,
    recency_anchor: RecencyAnchor,
) -> Result<(), RfmCliError> {
    let table = read_table(input, input_format)?;
    let processor = build_processor(rules, recency_anchor)?;

    let segments = processor.process(&table, as_of)?;
    let roster = customers_in_segment(&segments, segment);
    if roster.is_empty() {
        log::warn!("No customers in segment {}", segment);
    }

    let mut sink = open_output(output)?;
    match format {
        RosterFormat::Csv => write_roster_csv(&mut sink, &roster)?,
        RosterFormat::Json => {
            let payload = serde_json::json!({
                "segment": segment,
                "customer_ids": roster,
            });
            writeln!(sink, "{}", serde_json::to_string_pretty(&payload)?)?;
        }
    }
    sink.flush()?;

    Ok(())
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), RfmCliError> {
    let table = read_table(input, input_format)?;

    let missing_columns: Vec<Column> = Column::REQUIRED
        .iter()
        .copied()
        .filter(|c| !table.has_column(*c))
        .collect();

    let (sanitize, issues) = if missing_columns.is_empty() {
        let (_, report) = EventSanitizer::sanitize_with_report(&table)?;
        let issues = table
            .rows
            .iter()
            .enumerate()
            .filter_map(|(index, row)| {
                EventSanitizer::clean_row(row)
                    .err()
                    .map(|reason| RowIssue {
                        index,
                        invoice_id: row.invoice_id.clone(),
                        reason,
                    })
            })
            .take(MAX_LISTED_ISSUES)
            .collect();
        (Some(report), issues)
    } else {
        (None, Vec::new())
    };

    let report = ValidationReport {
        columns: table.columns.iter().copied().collect(),
        missing_columns,
        sanitize,
        issues,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        let columns: Vec<&str> = report.columns.iter().map(Column::as_str).collect();
        println!("Columns:        {}", columns.join(", "));

        if !report.missing_columns.is_empty() {
            let missing: Vec<&str> = report.missing_columns.iter().map(Column::as_str).collect();
            println!("Missing:        {}", missing.join(", "));
        }

        if let Some(counts) = &report.sanitize {
            println!("Rows read:      {}", counts.rows_read);
            println!("Rows kept:      {}", counts.kept);
            println!("Missing values: {}", counts.missing_values);
            println!("Cancelled:      {}", counts.cancelled);
            println!("Non-finite:     {}", counts.non_finite);
        }

        if !report.issues.is_empty() {
            println!("\nDropped rows (first {}):", MAX_LISTED_ISSUES);
            for issue in &report.issues {
                println!(
                    "  - Row {} (invoice {}): {}",
                    issue.index,
                    issue.invoice_id.as_deref().unwrap_or("unknown"),
                    issue.reason
                );
            }
        }
    }

    if !report.missing_columns.is_empty() {
        return Err(RfmCliError::SchemaFailed(report.missing_columns.len()));
    }
    Ok(())
}

fn cmd_rules(check: Option<&Path>) -> Result<(), RfmCliError> {
    match check {
        Some(path) => {
            let rules = SegmentRules::from_json(&fs::read_to_string(path)?)?;
            println!(
                "Rule table valid: {} rules covering all rf_codes",
                rules.rules().len()
            );
        }
        None => println!("{}", SegmentRules::default().to_json()?),
    }
    Ok(())
}

fn cmd_doctor(rules: Option<&Path>, json: bool) -> Result<(), RfmCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("{} version {}", PRODUCER_NAME, RFM_VERSION),
    });

    let default_rules = SegmentRules::default();
    checks.push(match default_rules.validate() {
        Ok(()) => DoctorCheck {
            name: "default_rules".to_string(),
            status: CheckStatus::Ok,
            message: format!("{} rules, all rf_codes mapped", default_rules.rules().len()),
        },
        Err(e) => DoctorCheck {
            name: "default_rules".to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        },
    });

    if let Some(rules_path) = rules {
        let check = if !rules_path.exists() {
            DoctorCheck {
                name: "rules".to_string(),
                status: CheckStatus::Warning,
                message: "Rule table file does not exist".to_string(),
            }
        } else {
            match fs::read_to_string(rules_path) {
                Ok(content) => match SegmentRules::from_json(&content) {
                    Ok(table) => DoctorCheck {
                        name: "rules".to_string(),
                        status: CheckStatus::Ok,
                        message: format!("Rule table valid ({} rules)", table.rules().len()),
                    },
                    Err(e) => DoctorCheck {
                        name: "rules".to_string(),
                        status: CheckStatus::Error,
                        message: format!("Invalid rule table: {}", e),
                    },
                },
                Err(e) => DoctorCheck {
                    name: "rules".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Cannot read rule table: {}", e),
                },
            }
        };
        checks.push(check);
    }

    checks.push(if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass input files with --input)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (--input - ready)".to_string(),
        }
    });

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: RFM_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("RFM Doctor Report");
        println!("=================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(RfmCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn read_table(input: &Path, format: InputFormat) -> Result<RawTransactions, RfmCliError> {
    let input_data = if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    let table = match format {
        InputFormat::Csv => RawTransactionAdapter::parse_csv(input_data.as_bytes())?,
        InputFormat::Ndjson => RawTransactionAdapter::parse_ndjson(&input_data)?,
        InputFormat::Json => RawTransactionAdapter::parse_array(&input_data)?,
    };

    if table.is_empty() {
        return Err(RfmCliError::NoRows);
    }
    Ok(table)
}

fn build_processor(
    rules: Option<&Path>,
    recency_anchor: RecencyAnchor,
) -> Result<RfmProcessor, RfmCliError> {
    let mut processor = RfmProcessor::with_config(RfmConfig {
        recency_anchor,
        ..Default::default()
    });

    if let Some(rules_path) = rules {
        let rules_json = fs::read_to_string(rules_path)?;
        processor.load_rules(&rules_json)?;
        log::debug!("Loaded rule table from {}", rules_path.display());
    }

    Ok(processor)
}

fn open_output(output: &Path) -> Result<Box<dyn Write>, RfmCliError> {
    if output.to_string_lossy() == "-" {
        Ok(Box::new(io::stdout().lock()))
    } else {
        Ok(Box::new(io::BufWriter::new(fs::File::create(output)?)))
    }
}

// Error types

#[derive(Debug)]
enum RfmCliError {
    Io(io::Error),
    Pipeline(rfm_segments::RfmError),
    Json(serde_json::Error),
    NoRows,
    SchemaFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for RfmCliError {
    fn from(e: io::Error) -> Self {
        RfmCliError::Io(e)
    }
}

impl From<rfm_segments::RfmError> for RfmCliError {
    fn from(e: rfm_segments::RfmError) -> Self {
        RfmCliError::Pipeline(e)
    }
}

impl From<serde_json::Error> for RfmCliError {
    fn from(e: serde_json::Error) -> Self {
        RfmCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<RfmCliError> for CliError {
    fn from(e: RfmCliError) -> Self {
        match e {
            RfmCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            RfmCliError::Pipeline(e) => {
                let (code, hint) = pipeline_error_hint(&e);
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            RfmCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            RfmCliError::NoRows => CliError {
                code: "NO_ROWS".to_string(),
                message: "No rows found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            RfmCliError::SchemaFailed(count) => CliError {
                code: "SCHEMA_FAILED".to_string(),
                message: format!("{} required columns missing", count),
                hint: Some("Rename headers to one of the accepted spellings".to_string()),
            },
            RfmCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

fn pipeline_error_hint(e: &rfm_segments::RfmError) -> (&'static str, &'static str) {
    use rfm_segments::RfmError;

    match e {
        RfmError::Schema { .. } => (
            "SCHEMA_ERROR",
            "Run 'rfm validate' to list the columns found",
        ),
        RfmError::DataIntegrity(_) => (
            "DATA_INTEGRITY_ERROR",
            "Check that --as-of is after the last invoice",
        ),
        RfmError::InsufficientData { .. } => (
            "INSUFFICIENT_DATA",
            "Quintile scoring needs at least 5 customers with distinct values per metric; \
             run 'rfm validate' to see why rows were dropped",
        ),
        RfmError::CollidingCutPoints { .. } => (
            "INSUFFICIENT_DATA",
            "Too many customers share one value to form 5 quantile buckets",
        ),
        RfmError::UnmappedSegment(_) | RfmError::InvalidRules(_) => (
            "RULES_ERROR",
            "Run 'rfm rules --check' on the rule table",
        ),
        _ => ("PARSE_ERROR", "Check the input format and cell values"),
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    columns: Vec<Column>,
    missing_columns: Vec<Column>,
    sanitize: Option<SanitizeReport>,
    issues: Vec<RowIssue>,
}

#[derive(serde::Serialize)]
struct RowIssue {
    index: usize,
    invoice_id: Option<String>,
    reason: DropReason,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
