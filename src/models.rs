//! Data Models Module
//!
//! This module defines the tree a DMARC aggregate report parses into. The tree
//! mirrors the report XML: one `Feedback` owns its metadata, the published policy
//! and the evaluated records. Policy values are kept as the raw strings found in
//! the report; `AlignmentMode` and `PolicyType` offer typed views over them.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Root of an aggregate report.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Feedback {
    pub report_metadata: ReportMetadata,
    pub policy_published: PolicyPublished,
    pub records: Vec<Record>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct ReportMetadata {
    pub org_name: String,
    pub email: String,
    pub extra_contact_info: String,
    pub report_id: String,
    pub date_range: DateRange,
}

/// Reporting period in seconds since the epoch.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateRange {
    pub begin: i64,
    pub end: i64,
}

/// The DMARC record the reported domain published.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct PolicyPublished {
    pub domain: String,
    pub adkim: String,
    pub aspf: String,
    pub p: String,
    pub sp: String,
    pub pct: u8,
}

/// One evaluated source IP.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Record {
    pub row: Row,
    pub identifiers: Identifiers,
    pub auth_results: AuthResults,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Row {
    pub source_ip: String,
    pub count: u64,
    pub policy_evaluated: PolicyEvaluated,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct PolicyEvaluated {
    pub disposition: String,
    pub dkim: String,
    pub spf: String,
    pub reason: Option<Reason>,
}

/// Why the receiver overrode the published policy.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Reason {
    #[serde(rename = "type")]
    pub kind: String,
    pub comment: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Identifiers {
    pub header_from: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct AuthResults {
    pub spf: Spf,
    pub dkim: Vec<Dkim>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Spf {
    pub domain: String,
    pub result: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Dkim {
    pub domain: String,
    pub result: String,
    pub selector: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlignmentMode {
    #[default]
    Relaxed,
    Strict,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolicyType {
    #[default]
    None,
    Quarantine,
    Reject,
}

impl Feedback {
    /// Total number of messages covered by the report.
    pub fn total_messages(&self) -> u64 {
        self.records.iter().map(|r| r.row.count).sum()
    }
}

impl DateRange {
    /// Whether the range begins no later than it ends. Parsing does not enforce this.
    pub fn is_ordered(&self) -> bool {
        self.begin <= self.end
    }

    pub fn begin_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.begin, 0)
    }

    pub fn end_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.end, 0)
    }

    /// Formats the beginning of the range as `02 Jan, 2006`.
    /// Timestamps chrono cannot represent are printed as raw seconds.
    pub fn formatted_date(&self) -> String {
        format_timestamp(self.begin, self.begin_utc())
    }

    /// Formats the whole range as `01 Jan, 2024 - 02 Jan, 2024`.
    pub fn formatted_period(&self) -> String {
        format!(
            "{} - {}",
            self.formatted_date(),
            format_timestamp(self.end, self.end_utc())
        )
    }
}

fn format_timestamp(raw: i64, at: Option<DateTime<Utc>>) -> String {
    match at {
        Some(at) => at.format("%d %b, %Y").to_string(),
        None => raw.to_string(),
    }
}

impl PolicyPublished {
    pub fn dkim_alignment(&self) -> Option<AlignmentMode> {
        self.adkim.parse().ok()
    }

    pub fn spf_alignment(&self) -> Option<AlignmentMode> {
        self.aspf.parse().ok()
    }

    pub fn policy(&self) -> Option<PolicyType> {
        self.p.parse().ok()
    }

    pub fn subdomain_policy(&self) -> Option<PolicyType> {
        self.sp.parse().ok()
    }
}

impl fmt::Display for AlignmentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlignmentMode::Relaxed => write!(f, "relaxed"),
            AlignmentMode::Strict => write!(f, "strict"),
        }
    }
}

impl fmt::Display for PolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyType::None => write!(f, "none"),
            PolicyType::Quarantine => write!(f, "quarantine"),
            PolicyType::Reject => write!(f, "reject"),
        }
    }
}

impl FromStr for AlignmentMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "r" | "relaxed" => Ok(AlignmentMode::Relaxed),
            "s" | "strict" => Ok(AlignmentMode::Strict),
            _ => Err(format!("Invalid alignment mode: {}", s)),
        }
    }
}

impl FromStr for PolicyType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(PolicyType::None),
            "quarantine" => Ok(PolicyType::Quarantine),
            "reject" => Ok(PolicyType::Reject),
            _ => Err(format!("Invalid policy type: {}", s)),
        }
    }
}
