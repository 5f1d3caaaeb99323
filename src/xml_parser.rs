//! XML Parser Module
//!
//! This module turns a DMARC aggregate report into a [`Feedback`] tree. Elements are
//! matched by their local name; unknown elements are skipped together with their
//! children and missing elements leave the default value in place. Integer fields
//! are never coerced: an empty or non-numeric value is an error. String fields keep
//! their character data verbatim; only integers have surrounding whitespace trimmed.
//!
//! Custom entities are never expanded. A DOCTYPE that declares two or more entities
//! is rejected outright (Billion Laughs), references to any other entity fail while
//! unescaping, and element nesting is capped to keep hostile input cheap to refuse.

use crate::error::{DmarcError, Result};
use crate::models::{
    AuthResults, DateRange, Dkim, Feedback, Identifiers, PolicyEvaluated, PolicyPublished,
    Reason, Record, ReportMetadata, Row, Spf,
};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::io::Read;
use std::str::FromStr;

const MAX_DEPTH: usize = 20;

/// Parses a DMARC aggregate report from raw bytes.
///
/// The encoding is UTF-8 unless the XML declaration says otherwise.
///
/// # Errors
///
/// Returns an error of kind [`ErrorKind::Parse`](crate::error::ErrorKind::Parse) if the
/// document is not well-formed, declares recursive entities, nests too deeply, or
/// holds a non-numeric value in an integer field.
pub fn parse_feedback(bytes: &[u8]) -> Result<Feedback> {
    let feedback = FeedbackParser::new(bytes).document()?;
    log::debug!(
        "Parsed report {:?} from {:?} with {} records",
        feedback.report_metadata.report_id,
        feedback.report_metadata.org_name,
        feedback.records.len()
    );
    Ok(feedback)
}

/// Reads `source` to the end and parses it. Read failures surface as
/// [`DmarcError::Io`].
pub fn read_feedback<R: Read>(mut source: R) -> Result<Feedback> {
    let mut bytes = Vec::new();
    source.read_to_end(&mut bytes)?;
    parse_feedback(&bytes)
}

struct FeedbackParser<'a> {
    reader: Reader<&'a [u8]>,
    depth: usize,
}

impl<'a> FeedbackParser<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        let mut reader = Reader::from_reader(bytes);
        reader.config_mut().expand_empty_elements = true;
        Self { reader, depth: 0 }
    }

    fn document(&mut self) -> Result<Feedback> {
        loop {
            match self.reader.read_event()? {
                Event::DocType(doctype) => reject_entity_definitions(&doctype)?,
                Event::Start(e) => {
                    if e.local_name().as_ref() != b"feedback" {
                        log::warn!(
                            "Unexpected root element <{}>, reading it as <feedback>",
                            String::from_utf8_lossy(e.local_name().as_ref())
                        );
                    }
                    self.enter()?;
                    return self.feedback();
                }
                Event::Eof => {
                    return Err(DmarcError::Format("Document has no root element".into()))
                }
                _ => {}
            }
        }
    }

    fn feedback(&mut self) -> Result<Feedback> {
        let mut feedback = Feedback::default();
        while let Some(name) = self.next_child()? {
            match name.as_slice() {
                b"report_metadata" => feedback.report_metadata = self.report_metadata()?,
                b"policy_published" => feedback.policy_published = self.policy_published()?,
                b"record" => feedback.records.push(self.record()?),
                _ => self.skip()?,
            }
        }
        Ok(feedback)
    }

    fn report_metadata(&mut self) -> Result<ReportMetadata> {
        let mut metadata = ReportMetadata::default();
        while let Some(name) = self.next_child()? {
            match name.as_slice() {
                b"org_name" => metadata.org_name = self.text()?,
                b"email" => metadata.email = self.text()?,
                b"extra_contact_info" => metadata.extra_contact_info = self.text()?,
                b"report_id" => metadata.report_id = self.text()?,
                b"date_range" => metadata.date_range = self.date_range()?,
                _ => self.skip()?,
            }
        }
        Ok(metadata)
    }

    fn date_range(&mut self) -> Result<DateRange> {
        let mut range = DateRange::default();
        while let Some(name) = self.next_child()? {
            match name.as_slice() {
                b"begin" => range.begin = self.integer("begin")?,
                b"end" => range.end = self.integer("end")?,
                _ => self.skip()?,
            }
        }
        Ok(range)
    }

    fn policy_published(&mut self) -> Result<PolicyPublished> {
        let mut policy = PolicyPublished::default();
        while let Some(name) = self.next_child()? {
            match name.as_slice() {
                b"domain" => policy.domain = self.text()?,
                b"adkim" => policy.adkim = self.text()?,
                b"aspf" => policy.aspf = self.text()?,
                b"p" => policy.p = self.text()?,
                b"sp" => policy.sp = self.text()?,
                b"pct" => policy.pct = self.integer("pct")?,
                _ => self.skip()?,
            }
        }
        Ok(policy)
    }

    fn record(&mut self) -> Result<Record> {
        let mut record = Record::default();
        while let Some(name) = self.next_child()? {
            match name.as_slice() {
                b"row" => record.row = self.row()?,
                b"identifiers" => record.identifiers = self.identifiers()?,
                b"auth_results" => record.auth_results = self.auth_results()?,
                _ => self.skip()?,
            }
        }
        Ok(record)
    }

    fn row(&mut self) -> Result<Row> {
        let mut row = Row::default();
        while let Some(name) = self.next_child()? {
            match name.as_slice() {
                b"source_ip" => row.source_ip = self.text()?,
                b"count" => row.count = self.integer("count")?,
                b"policy_evaluated" => row.policy_evaluated = self.policy_evaluated()?,
                _ => self.skip()?,
            }
        }
        Ok(row)
    }

    fn policy_evaluated(&mut self) -> Result<PolicyEvaluated> {
        let mut evaluated = PolicyEvaluated::default();
        while let Some(name) = self.next_child()? {
            match name.as_slice() {
                b"disposition" => evaluated.disposition = self.text()?,
                b"dkim" => evaluated.dkim = self.text()?,
                b"spf" => evaluated.spf = self.text()?,
                b"reason" => evaluated.reason = Some(self.reason()?),
                _ => self.skip()?,
            }
        }
        Ok(evaluated)
    }

    fn reason(&mut self) -> Result<Reason> {
        let mut reason = Reason::default();
        while let Some(name) = self.next_child()? {
            match name.as_slice() {
                b"type" => reason.kind = self.text()?,
                b"comment" => reason.comment = self.text()?,
                _ => self.skip()?,
            }
        }
        Ok(reason)
    }

    fn identifiers(&mut self) -> Result<Identifiers> {
        let mut identifiers = Identifiers::default();
        while let Some(name) = self.next_child()? {
            match name.as_slice() {
                b"header_from" => identifiers.header_from = self.text()?,
                _ => self.skip()?,
            }
        }
        Ok(identifiers)
    }

    fn auth_results(&mut self) -> Result<AuthResults> {
        let mut results = AuthResults::default();
        while let Some(name) = self.next_child()? {
            match name.as_slice() {
                b"spf" => results.spf = self.spf()?,
                b"dkim" => results.dkim.push(self.dkim()?),
                _ => self.skip()?,
            }
        }
        Ok(results)
    }

    fn spf(&mut self) -> Result<Spf> {
        let mut spf = Spf::default();
        while let Some(name) = self.next_child()? {
            match name.as_slice() {
                b"domain" => spf.domain = self.text()?,
                b"result" => spf.result = self.text()?,
                _ => self.skip()?,
            }
        }
        Ok(spf)
    }

    fn dkim(&mut self) -> Result<Dkim> {
        let mut dkim = Dkim::default();
        while let Some(name) = self.next_child()? {
            match name.as_slice() {
                b"domain" => dkim.domain = self.text()?,
                b"result" => dkim.result = self.text()?,
                b"selector" => dkim.selector = self.text()?,
                _ => self.skip()?,
            }
        }
        Ok(dkim)
    }

    /// Advances to the next child of the current element and returns its local name,
    /// or `None` once the current element is closed. The caller must consume the
    /// returned child up to and including its end tag.
    fn next_child(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            match self.reader.read_event()? {
                Event::Start(e) => {
                    self.enter()?;
                    return Ok(Some(e.local_name().as_ref().to_vec()));
                }
                Event::End(_) => {
                    self.leave();
                    return Ok(None);
                }
                Event::Eof => return Err(unexpected_eof()),
                _ => {}
            }
        }
    }

    /// Collects the text of the current element exactly as written, ignoring any
    /// nested elements.
    fn text(&mut self) -> Result<String> {
        let level = self.depth;
        let mut text = String::new();
        loop {
            match self.reader.read_event()? {
                Event::Text(t) if self.depth == level => text.push_str(&t.unescape()?),
                Event::CData(c) if self.depth == level => {
                    let decoded = self.reader.decoder().decode(&c).map_err(quick_xml::Error::from)?;
                    text.push_str(&decoded);
                }
                Event::Start(_) => self.enter()?,
                Event::End(_) => {
                    self.leave();
                    if self.depth < level {
                        break;
                    }
                }
                Event::Eof => return Err(unexpected_eof()),
                _ => {}
            }
        }
        Ok(text)
    }

    fn integer<T: FromStr>(&mut self, field: &'static str) -> Result<T> {
        let value = self.text()?;
        match value.trim().parse() {
            Ok(number) => Ok(number),
            Err(_) => Err(DmarcError::MalformedInteger { field, value }),
        }
    }

    /// Consumes the current element and everything inside it.
    fn skip(&mut self) -> Result<()> {
        let level = self.depth;
        loop {
            match self.reader.read_event()? {
                Event::Start(_) => self.enter()?,
                Event::End(_) => {
                    self.leave();
                    if self.depth < level {
                        return Ok(());
                    }
                }
                Event::Eof => return Err(unexpected_eof()),
                _ => {}
            }
        }
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(DmarcError::Format("XML nesting depth limit exceeded".into()));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }
}

fn reject_entity_definitions(doctype: &[u8]) -> Result<()> {
    let declaration = String::from_utf8_lossy(doctype);
    if declaration.matches("<!ENTITY").count() >= 2 {
        return Err(DmarcError::Format("Recursive entities detected".into()));
    }
    Ok(())
}

fn unexpected_eof() -> DmarcError {
    DmarcError::Format("Unexpected end of document".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feedback>
  <report_metadata>
    <org_name>google.com</org_name>
    <email>noreply-dmarc-support@google.com</email>
    <extra_contact_info>https://support.google.com/a/answer/2466580</extra_contact_info>
    <report_id>5717107811868587391</report_id>
    <date_range>
      <begin>1</begin>
      <end>2</end>
    </date_range>
  </report_metadata>
  <policy_published>
    <domain>example.com</domain>
    <adkim>r</adkim>
    <aspf>r</aspf>
    <p>reject</p>
    <sp>reject</sp>
    <pct>100</pct>
  </policy_published>
  <record>
    <row>
      <source_ip>203.0.113.1</source_ip>
      <count>5</count>
      <policy_evaluated>
        <disposition>none</disposition>
        <dkim>pass</dkim>
        <spf>pass</spf>
      </policy_evaluated>
    </row>
    <identifiers>
      <header_from>example.com</header_from>
    </identifiers>
    <auth_results>
      <dkim>
        <domain>example.com</domain>
        <result>pass</result>
        <selector>google</selector>
      </dkim>
      <spf>
        <domain>example.com</domain>
        <result>pass</result>
      </spf>
    </auth_results>
  </record>
</feedback>
"#;

    fn with_policy_field(field: &str) -> String {
        format!(
            "<feedback><policy_published><domain>example.com</domain>{}</policy_published></feedback>",
            field
        )
    }

    #[test]
    fn test_end_to_end_sample() {
        let feedback = parse_feedback(SAMPLE.as_bytes()).unwrap();
        let policy = &feedback.policy_published;
        assert_eq!(policy.domain, "example.com");
        assert_eq!(policy.adkim, "r");
        assert_eq!(policy.aspf, "r");
        assert_eq!(policy.p, "reject");
        assert_eq!(policy.sp, "reject");
        assert_eq!(policy.pct, 100);

        assert_eq!(feedback.records.len(), 1);
        let record = &feedback.records[0];
        assert_eq!(record.row.source_ip, "203.0.113.1");
        assert_eq!(record.row.count, 5);
        assert_eq!(record.row.policy_evaluated.disposition, "none");
        assert_eq!(record.row.policy_evaluated.reason, None);
        assert_eq!(record.identifiers.header_from, "example.com");
        assert_eq!(record.auth_results.spf.result, "pass");
        assert_eq!(record.auth_results.dkim[0].selector, "google");
    }

    #[test]
    fn test_date_range_is_kept_verbatim() {
        let feedback = parse_feedback(SAMPLE.as_bytes()).unwrap();
        assert_eq!(feedback.report_metadata.date_range, DateRange { begin: 1, end: 2 });
    }

    #[test]
    fn test_missing_extra_contact_info_is_empty() {
        let xml = "<feedback><report_metadata><org_name>acme</org_name></report_metadata></feedback>";
        let feedback = parse_feedback(xml.as_bytes()).unwrap();
        assert_eq!(feedback.report_metadata.org_name, "acme");
        assert_eq!(feedback.report_metadata.extra_contact_info, "");
        assert!(feedback.records.is_empty());
    }

    #[test]
    fn test_non_numeric_pct_fails() {
        let err = parse_feedback(with_policy_field("<pct>abc</pct>").as_bytes()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert!(matches!(
            err,
            DmarcError::MalformedInteger { field: "pct", ref value } if value == "abc"
        ));
    }

    #[test]
    fn test_empty_integer_element_fails() {
        let xml = "<feedback><record><row><count/></row></record></feedback>";
        let err = parse_feedback(xml.as_bytes()).unwrap_err();
        assert!(matches!(err, DmarcError::MalformedInteger { field: "count", .. }));
    }

    #[test]
    fn test_out_of_range_pct_fails() {
        let err = parse_feedback(with_policy_field("<pct>1000</pct>").as_bytes()).unwrap_err();
        assert!(matches!(err, DmarcError::MalformedInteger { field: "pct", .. }));
    }

    #[test]
    fn test_count_beyond_32_bits() {
        let xml = "<feedback><record><row><count>5000000000</count></row></record></feedback>";
        let feedback = parse_feedback(xml.as_bytes()).unwrap();
        assert_eq!(feedback.records[0].row.count, 5_000_000_000);
    }

    #[test]
    fn test_string_whitespace_is_kept_and_integer_whitespace_trimmed() {
        let xml = "<feedback><report_metadata><org_name>\n  Acme Mail\n</org_name>\
            <date_range><begin> 10 </begin><end>\n20\n</end></date_range></report_metadata>\
            <record><row><source_ip>\t192.0.2.1 </source_ip></row></record></feedback>";
        let feedback = parse_feedback(xml.as_bytes()).unwrap();
        assert_eq!(feedback.report_metadata.org_name, "\n  Acme Mail\n");
        assert_eq!(feedback.report_metadata.date_range, DateRange { begin: 10, end: 20 });
        assert_eq!(feedback.records[0].row.source_ip, "\t192.0.2.1 ");
    }

    #[test]
    fn test_missing_integer_defaults_to_zero() {
        let feedback = parse_feedback(with_policy_field("").as_bytes()).unwrap();
        assert_eq!(feedback.policy_published.pct, 0);
    }

    #[test]
    fn test_zero_dkim_results() {
        let xml = r#"<feedback><record>
            <auth_results><spf><domain>example.com</domain><result>fail</result></spf></auth_results>
        </record></feedback>"#;
        let feedback = parse_feedback(xml.as_bytes()).unwrap();
        let results = &feedback.records[0].auth_results;
        assert!(results.dkim.is_empty());
        assert_eq!(results.spf.result, "fail");
    }

    #[test]
    fn test_repeating_elements_keep_document_order() {
        let xml = r#"<feedback>
            <record><row><source_ip>192.0.2.1</source_ip></row>
              <auth_results>
                <dkim><domain>a.example</domain><result>pass</result></dkim>
                <dkim><domain>b.example</domain><result>fail</result></dkim>
                <dkim><domain>c.example</domain><result>none</result></dkim>
              </auth_results>
            </record>
            <record><row><source_ip>192.0.2.2</source_ip></row></record>
            <record><row><source_ip>192.0.2.3</source_ip></row></record>
        </feedback>"#;
        let feedback = parse_feedback(xml.as_bytes()).unwrap();
        let ips: Vec<&str> = feedback.records.iter().map(|r| r.row.source_ip.as_str()).collect();
        assert_eq!(ips, ["192.0.2.1", "192.0.2.2", "192.0.2.3"]);
        let domains: Vec<&str> = feedback.records[0]
            .auth_results
            .dkim
            .iter()
            .map(|d| d.domain.as_str())
            .collect();
        assert_eq!(domains, ["a.example", "b.example", "c.example"]);
    }

    #[test]
    fn test_reason_is_parsed() {
        let xml = r#"<feedback><record><row><policy_evaluated>
            <disposition>none</disposition>
            <reason><type>forwarded</type><comment>looks like a list</comment></reason>
        </policy_evaluated></row></record></feedback>"#;
        let feedback = parse_feedback(xml.as_bytes()).unwrap();
        let reason = feedback.records[0].row.policy_evaluated.reason.clone().unwrap();
        assert_eq!(reason.kind, "forwarded");
        assert_eq!(reason.comment, "looks like a list");
    }

    #[test]
    fn test_unknown_elements_are_ignored() {
        let xml = r#"<feedback>
            <version>1.0</version>
            <report_metadata><org_name>acme</org_name><error><nested>x</nested></error></report_metadata>
            <record><row><source_ip>192.0.2.9</source_ip><extra/></row></record>
        </feedback>"#;
        let feedback = parse_feedback(xml.as_bytes()).unwrap();
        assert_eq!(feedback.report_metadata.org_name, "acme");
        assert_eq!(feedback.records[0].row.source_ip, "192.0.2.9");
    }

    #[test]
    fn test_escaped_text_and_cdata() {
        let xml = r#"<feedback><report_metadata>
            <org_name>Smith &amp; Sons</org_name>
            <extra_contact_info><![CDATA[<mailto:dmarc@example.com>]]></extra_contact_info>
        </report_metadata></feedback>"#;
        let feedback = parse_feedback(xml.as_bytes()).unwrap();
        assert_eq!(feedback.report_metadata.org_name, "Smith & Sons");
        assert_eq!(feedback.report_metadata.extra_contact_info, "<mailto:dmarc@example.com>");
    }

    #[test]
    fn test_namespaced_document() {
        let xml = r#"<dmarc:feedback xmlns:dmarc="urn:ietf:params:xml:ns:dmarc-2.0">
            <dmarc:policy_published><dmarc:domain>example.org</dmarc:domain></dmarc:policy_published>
        </dmarc:feedback>"#;
        let feedback = parse_feedback(xml.as_bytes()).unwrap();
        assert_eq!(feedback.policy_published.domain, "example.org");
    }

    #[test]
    fn test_malformed_documents_fail() {
        let cases: [&[u8]; 4] = [
            b"",
            b"not xml at all",
            b"<feedback><report_metadata></feedback>",
            b"<feedback><report_metadata><org_name>acme</org_name>",
        ];
        for case in cases {
            let err = parse_feedback(case).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Parse, "input {:?}", String::from_utf8_lossy(case));
        }
    }

    #[test]
    fn test_undefined_entity_fails() {
        let xml = "<feedback><report_metadata><org_name>&bogus;</org_name></report_metadata></feedback>";
        let err = parse_feedback(xml.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_nesting_limit() {
        let xml = format!("<feedback>{}{}</feedback>", "<x>".repeat(40), "</x>".repeat(40));
        let err = parse_feedback(xml.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("depth"));
    }

    #[test]
    fn test_read_feedback_reports_io_errors() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "disk went away"))
            }
        }
        let err = read_feedback(Broken).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("disk went away"));
    }

    #[test]
    fn test_read_feedback_from_reader() {
        let feedback = read_feedback(SAMPLE.as_bytes()).unwrap();
        assert_eq!(feedback.records.len(), 1);
    }
}
