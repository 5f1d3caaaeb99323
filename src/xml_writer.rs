//! XML Writer Module
//!
//! Serializes a [`Feedback`] back into the aggregate report layout the parser
//! reads, so a parsed report can be normalized or stored again.

use crate::models::{Feedback, Record};
use quick_xml::escape::escape;
use std::fmt::Display;

impl Feedback {
    /// Serializes the report. Text is escaped; `reason` is written only when present.
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str("<feedback>\n");

        let metadata = &self.report_metadata;
        xml.push_str("  <report_metadata>\n");
        text(&mut xml, 4, "org_name", &metadata.org_name);
        text(&mut xml, 4, "email", &metadata.email);
        text(&mut xml, 4, "extra_contact_info", &metadata.extra_contact_info);
        text(&mut xml, 4, "report_id", &metadata.report_id);
        xml.push_str("    <date_range>\n");
        element(&mut xml, 6, "begin", metadata.date_range.begin);
        element(&mut xml, 6, "end", metadata.date_range.end);
        xml.push_str("    </date_range>\n");
        xml.push_str("  </report_metadata>\n");

        let policy = &self.policy_published;
        xml.push_str("  <policy_published>\n");
        text(&mut xml, 4, "domain", &policy.domain);
        text(&mut xml, 4, "adkim", &policy.adkim);
        text(&mut xml, 4, "aspf", &policy.aspf);
        text(&mut xml, 4, "p", &policy.p);
        text(&mut xml, 4, "sp", &policy.sp);
        element(&mut xml, 4, "pct", policy.pct);
        xml.push_str("  </policy_published>\n");

        for record in &self.records {
            write_record(&mut xml, record);
        }

        xml.push_str("</feedback>\n");
        xml
    }
}

fn write_record(xml: &mut String, record: &Record) {
    let row = &record.row;
    let evaluated = &row.policy_evaluated;
    xml.push_str("  <record>\n");
    xml.push_str("    <row>\n");
    text(xml, 6, "source_ip", &row.source_ip);
    element(xml, 6, "count", row.count);
    xml.push_str("      <policy_evaluated>\n");
    text(xml, 8, "disposition", &evaluated.disposition);
    text(xml, 8, "dkim", &evaluated.dkim);
    text(xml, 8, "spf", &evaluated.spf);
    if let Some(reason) = &evaluated.reason {
        xml.push_str("        <reason>\n");
        text(xml, 10, "type", &reason.kind);
        text(xml, 10, "comment", &reason.comment);
        xml.push_str("        </reason>\n");
    }
    xml.push_str("      </policy_evaluated>\n");
    xml.push_str("    </row>\n");

    xml.push_str("    <identifiers>\n");
    text(xml, 6, "header_from", &record.identifiers.header_from);
    xml.push_str("    </identifiers>\n");

    let results = &record.auth_results;
    xml.push_str("    <auth_results>\n");
    for dkim in &results.dkim {
        xml.push_str("      <dkim>\n");
        text(xml, 8, "domain", &dkim.domain);
        text(xml, 8, "result", &dkim.result);
        text(xml, 8, "selector", &dkim.selector);
        xml.push_str("      </dkim>\n");
    }
    xml.push_str("      <spf>\n");
    text(xml, 8, "domain", &results.spf.domain);
    text(xml, 8, "result", &results.spf.result);
    xml.push_str("      </spf>\n");
    xml.push_str("    </auth_results>\n");
    xml.push_str("  </record>\n");
}

fn text(xml: &mut String, indent: usize, name: &str, value: &str) {
    element(xml, indent, name, escape(value));
}

fn element(xml: &mut String, indent: usize, name: &str, value: impl Display) {
    xml.push_str(&format!("{:indent$}<{name}>{value}</{name}>\n", ""));
}
