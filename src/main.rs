//! dmarcview - DMARC aggregate report viewer
//!
//! Reads a DMARC aggregate report (plain XML, GZIP or ZIP), parses it and prints the
//! reporting organization, the published DMARC policy and every evaluated source IP.
//!
//! The tool outputs results in one of four formats: Table, CSV, JSON, or XML.

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use dmarcview::models::{Dkim, Feedback, Record, Spf};
use dmarcview::{load_feedback, Config};
use prettytable::{row, Cell, Row, Table};
use serde::Serialize;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

/// CLI arguments for dmarcview.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "DMARC aggregate report viewer",
    long_about = "dmarcview parses a DMARC aggregate report (XML, GZIP or ZIP) and displays \
                  the reporting organization, the published DMARC policy and the per-source \
                  SPF/DKIM evaluation.\n\n\
                  USAGE:\n  dmarcview <FILE> [--output <table|csv|json|xml>] [--verbose]",
    override_usage = "dmarcview <FILE> [OPTIONS]"
)]
struct Cli {
    /// Path to the DMARC report
    #[arg(value_parser)]
    file: PathBuf,

    /// Output format: table, csv, json, xml
    #[arg(short, long, default_value = "table")]
    output: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Supported output formats.
#[derive(Debug, Clone)]
enum OutputFormat {
    Table,
    Csv,
    Json,
    Xml,
}

impl FromStr for OutputFormat {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "csv" => Ok(OutputFormat::Csv),
            "json" => Ok(OutputFormat::Json),
            "xml" => Ok(OutputFormat::Xml),
            _ => Err(format!("Invalid output format: {}", s)),
        }
    }
}

/// One CSV line per evaluated record.
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    org_name: &'a str,
    report_id: &'a str,
    begin: i64,
    end: i64,
    domain: &'a str,
    source_ip: &'a str,
    count: u64,
    disposition: &'a str,
    dkim: &'a str,
    spf: &'a str,
    header_from: &'a str,
    spf_result: String,
    dkim_results: String,
}

/// Formats a DKIM result into a clear, human-readable string.
/// If no signature is present, returns "No signature".
fn format_dkim(d: &Dkim) -> String {
    if d.domain.trim().is_empty() {
        "No signature".to_string()
    } else if d.selector.trim().is_empty() {
        format!("{}:{}", d.domain, d.result)
    } else {
        format!("{} (selector: {}): {}", d.domain, d.selector, d.result)
    }
}

/// Formats an SPF result into a clear, human-readable string.
/// If no SPF record is present, returns "No SPF record".
fn format_spf(spf: &Spf) -> String {
    if spf.domain.trim().is_empty() {
        "No SPF record".to_string()
    } else {
        format!("{}:{}", spf.domain, spf.result)
    }
}

fn format_dkim_results(record: &Record) -> String {
    let results: Vec<String> = record.auth_results.dkim.iter().map(format_dkim).collect();
    if results.is_empty() {
        "No DKIM signature".to_string()
    } else {
        results.join(", ")
    }
}

/// Shows the typed reading of a policy value, or the raw value when it is not one of
/// the known keywords.
fn describe<T: Display>(parsed: Option<T>, raw: &str) -> String {
    match parsed {
        Some(value) => value.to_string(),
        None if raw.is_empty() => "-".to_string(),
        None => raw.to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity.
    env_logger::Builder::from_env(env_logger::Env::default())
        .filter_level(if cli.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info })
        .init();

    let config = Config::new().context("Failed to load configuration")?;

    log::info!("Processing file: {}", cli.file.display());
    let path = cli.file.clone();
    let loading = tokio::task::spawn_blocking(move || load_feedback(&path, &config));

    if matches!(cli.output, OutputFormat::Table) {
        println!(
            "{}\n{}\n",
            "dmarcview - DMARC Aggregate Report Viewer".bold().green(),
            "Parsing & displaying DMARC aggregate data".dimmed()
        );
    }

    let reports = loading
        .await
        .context("Report loading task failed")?
        .with_context(|| format!("Failed to read DMARC report {}", cli.file.display()))?;

    match cli.output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        OutputFormat::Xml => {
            for report in &reports {
                print!("{}", report.to_xml());
            }
        }
        OutputFormat::Csv => {
            let mut wtr = csv::Writer::from_writer(std::io::stdout());
            for report in &reports {
                for record in &report.records {
                    wtr.serialize(csv_row(report, record))?;
                }
            }
            wtr.flush()?;
        }
        OutputFormat::Table => {
            for report in &reports {
                print_report(report);
            }
        }
    }

    log::info!("{}", "Analysis complete!".bold().cyan());
    Ok(())
}

fn csv_row<'a>(report: &'a Feedback, record: &'a Record) -> CsvRow<'a> {
    let metadata = &report.report_metadata;
    let evaluated = &record.row.policy_evaluated;
    CsvRow {
        org_name: &metadata.org_name,
        report_id: &metadata.report_id,
        begin: metadata.date_range.begin,
        end: metadata.date_range.end,
        domain: &report.policy_published.domain,
        source_ip: &record.row.source_ip,
        count: record.row.count,
        disposition: &evaluated.disposition,
        dkim: &evaluated.dkim,
        spf: &evaluated.spf,
        header_from: &record.identifiers.header_from,
        spf_result: format_spf(&record.auth_results.spf),
        dkim_results: format_dkim_results(record),
    }
}

fn print_report(report: &Feedback) {
    let metadata = &report.report_metadata;
    println!("{}", "Report".bold().blue());
    println!("{}", "----------------------------".dimmed());
    println!("{}: {}", "Organization".bold(), metadata.org_name);
    println!("{}: {}", "Contact".bold(), metadata.email);
    if !metadata.extra_contact_info.is_empty() {
        println!("{}: {}", "Extra Contact".bold(), metadata.extra_contact_info);
    }
    println!("{}: {}", "Report ID".bold(), metadata.report_id);
    println!("{}: {}", "Period".bold(), metadata.date_range.formatted_period());
    if !metadata.date_range.is_ordered() {
        log::warn!("Report {} ends before it begins", metadata.report_id);
    }
    println!();

    let policy = &report.policy_published;
    println!("{}", "DMARC Policy Information".bold().blue());
    println!("{}", "----------------------------".dimmed());
    println!("{}: {}", "Domain".bold(), policy.domain);
    println!("{}: {}", "DKIM Alignment".bold(), describe(policy.dkim_alignment(), &policy.adkim));
    println!("{}: {}", "SPF Alignment".bold(), describe(policy.spf_alignment(), &policy.aspf));
    println!("{}: {}", "Policy".bold(), describe(policy.policy(), &policy.p));
    println!("{}: {}", "Subdomain Policy".bold(), describe(policy.subdomain_policy(), &policy.sp));
    println!("{}: {}\n", "Percentage Applied".bold(), policy.pct);

    if report.records.is_empty() {
        println!("{}\n", "No DMARC records found.".yellow());
        return;
    }

    let mut table = Table::new();
    table.add_row(row!["Source IP", "Count", "Disposition", "Header From", "SPF", "DKIM"]);
    for record in &report.records {
        let evaluated = &record.row.policy_evaluated;
        let disposition = match &evaluated.reason {
            Some(reason) => format!("{} ({})", evaluated.disposition, reason.kind),
            None => evaluated.disposition.clone(),
        };
        table.add_row(Row::new(vec![
            Cell::new(&record.row.source_ip),
            Cell::new(&record.row.count.to_string()),
            Cell::new(&disposition),
            Cell::new(&record.identifiers.header_from),
            Cell::new(&format_spf(&record.auth_results.spf)),
            Cell::new(&format_dkim_results(record)),
        ]));
    }
    table.printstd();
    println!(
        "{}: {}\n",
        "Total messages".bold(),
        report.total_messages()
    );
}
