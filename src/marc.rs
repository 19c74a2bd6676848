//! MARCXML parsing and record extraction
//!
//! A page of search results (or an input file) is parsed into a `Batch`
//! up front so that malformed documents fail before anything is resolved.
//! `extract` then turns the batch into `RawRecord`s lazily.
//!
//! Field 001 holds the catalog record number; field 856 subfield `u`
//! holds the embedded URLs.

use crate::error::{Result, TurfError};
use crate::schema::RawRecord;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

const ID_TAG: &str = "001";
const LINK_TAG: &str = "856";
const LINK_CODE: &str = "u";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Field {
    Control { tag: String, value: String },
    Data { tag: String, subfields: Vec<Subfield> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Subfield {
    code: String,
    value: String,
}

/// One `<record>` element with its fields in document order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarcRecord {
    fields: Vec<Field>,
}

impl MarcRecord {
    fn into_raw(self) -> Option<RawRecord> {
        let mut id: Option<String> = None;
        let mut urls = Vec::new();

        for field in self.fields {
            match field {
                Field::Control { tag, value } if tag == ID_TAG => {
                    let value = value.trim();
                    if id.is_none() && !value.is_empty() {
                        id = Some(value.to_string());
                    }
                }
                Field::Data { tag, subfields } if tag == LINK_TAG => {
                    urls.extend(
                        subfields
                            .into_iter()
                            .filter(|sf| sf.code == LINK_CODE)
                            .map(|sf| sf.value.trim().to_string())
                            .filter(|url| !url.is_empty()),
                    );
                }
                _ => {}
            }
        }

        id.map(|id| RawRecord { id, urls })
    }
}

/// A parsed page of records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    records: Vec<MarcRecord>,
}

impl Batch {
    /// Number of `<record>` elements, including ones without an id.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Lazy sequence of `RawRecord`s drawn from a consumed `Batch`.
/// Records without an identifier are skipped.
#[derive(Debug)]
pub struct Records {
    inner: std::vec::IntoIter<MarcRecord>,
}

impl Iterator for Records {
    type Item = RawRecord;

    fn next(&mut self) -> Option<RawRecord> {
        self.inner.by_ref().find_map(MarcRecord::into_raw)
    }
}

pub fn extract(batch: Batch) -> Records {
    Records {
        inner: batch.records.into_iter(),
    }
}

#[derive(Default)]
struct FieldBuilder {
    tag: String,
    control: bool,
    text: String,
    subfields: Vec<Subfield>,
    subfield: Option<Subfield>,
}

impl FieldBuilder {
    fn finish(mut self) -> Field {
        if let Some(sf) = self.subfield.take() {
            self.subfields.push(sf);
        }
        if self.control {
            Field::Control {
                tag: self.tag,
                value: self.text,
            }
        } else {
            Field::Data {
                tag: self.tag,
                subfields: self.subfields,
            }
        }
    }

    fn push_text(&mut self, text: &str) {
        if let Some(sf) = self.subfield.as_mut() {
            sf.value.push_str(text);
        } else if self.control {
            self.text.push_str(text);
        }
    }
}

/// Parse a MARCXML document (a `<collection>` or a single `<record>`).
pub fn parse_batch(xml: &str) -> Result<Batch> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut records = Vec::new();
    let mut record: Option<MarcRecord> = None;
    let mut field: Option<FieldBuilder> = None;
    let mut depth = 0usize;
    let mut saw_root = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                depth += 1;
                saw_root = true;
                match e.local_name().as_ref() {
                    b"record" => record = Some(MarcRecord::default()),
                    b"controlfield" | b"datafield" if record.is_some() => {
                        field = Some(start_field(&e)?);
                    }
                    b"subfield" => {
                        if let Some(f) = field.as_mut() {
                            f.subfield = Some(Subfield {
                                code: attr(&e, b"code")?.unwrap_or_default(),
                                value: String::new(),
                            });
                        }
                    }
                    _ => {}
                }
            }
            Event::Empty(e) => {
                saw_root = true;
                match e.local_name().as_ref() {
                    b"record" if record.is_none() => records.push(MarcRecord::default()),
                    b"controlfield" | b"datafield" => {
                        if let Some(r) = record.as_mut() {
                            r.fields.push(start_field(&e)?.finish());
                        }
                    }
                    _ => {}
                }
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                match e.local_name().as_ref() {
                    b"record" => {
                        if let Some(r) = record.take() {
                            records.push(r);
                        }
                    }
                    b"controlfield" | b"datafield" => {
                        if let (Some(r), Some(f)) = (record.as_mut(), field.take()) {
                            r.fields.push(f.finish());
                        }
                    }
                    b"subfield" => {
                        if let Some(f) = field.as_mut() {
                            if let Some(sf) = f.subfield.take() {
                                f.subfields.push(sf);
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(t) => {
                if let Some(f) = field.as_mut() {
                    f.push_text(&t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let Some(f) = field.as_mut() {
                    f.push_text(&String::from_utf8_lossy(&c));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(TurfError::MalformedDocument(
            "document has no root element".to_string(),
        ));
    }
    if depth != 0 {
        return Err(TurfError::MalformedDocument(
            "document ended before all elements were closed".to_string(),
        ));
    }

    Ok(Batch { records })
}

fn start_field(e: &BytesStart<'_>) -> Result<FieldBuilder> {
    Ok(FieldBuilder {
        tag: attr(e, b"tag")?.unwrap_or_default(),
        control: e.local_name().as_ref() == b"controlfield",
        ..FieldBuilder::default()
    })
}

fn attr(e: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>> {
    match e.try_get_attribute(name)? {
        Some(a) => Ok(Some(a.unescape_value()?.into_owned())),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<collection xmlns="http://www.loc.gov/MARC21/slim">
  <record>
    <controlfield tag="001">100</controlfield>
    <controlfield tag="005">20180101000000.0</controlfield>
  </record>
  <record>
    <controlfield tag="001"> 101 </controlfield>
    <datafield tag="856" ind1="4" ind2="0">
      <subfield code="u">https://a.example.org/one</subfield>
      <subfield code="z">Online access</subfield>
    </datafield>
    <datafield tag="856" ind1="4" ind2="0">
      <subfield code="u"> https://b.example.org/two?x=1&amp;y=2 </subfield>
    </datafield>
  </record>
  <record>
    <datafield tag="856" ind1="4" ind2="0">
      <subfield code="u">https://orphan.example.org</subfield>
    </datafield>
  </record>
</collection>"#;

    #[test]
    fn test_extract_records() {
        let batch = parse_batch(SAMPLE).unwrap();
        assert_eq!(batch.len(), 3);

        let records: Vec<RawRecord> = extract(batch).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "100");
        assert!(records[0].urls.is_empty());
        assert_eq!(records[1].id, "101");
        assert_eq!(
            records[1].urls,
            vec![
                "https://a.example.org/one".to_string(),
                "https://b.example.org/two?x=1&y=2".to_string(),
            ]
        );
    }

    #[test]
    fn test_first_identifier_wins() {
        let xml = r#"<collection>
            <record>
              <controlfield tag="001">1</controlfield>
              <controlfield tag="001">2</controlfield>
            </record>
        </collection>"#;
        let records: Vec<_> = extract(parse_batch(xml).unwrap()).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "1");
    }

    #[test]
    fn test_multiple_u_subfields_in_one_field() {
        let xml = r#"<record>
            <controlfield tag="001">7</controlfield>
            <datafield tag="856">
              <subfield code="u">http://one.test</subfield>
              <subfield code="u">http://two.test</subfield>
              <subfield code="u"></subfield>
            </datafield>
            <datafield tag="500"><subfield code="u">http://not-a-link.test</subfield></datafield>
        </record>"#;
        let records: Vec<_> = extract(parse_batch(xml).unwrap()).collect();
        assert_eq!(records[0].urls, vec!["http://one.test", "http://two.test"]);
    }

    #[test]
    fn test_prefixed_namespace() {
        let xml = r#"<marc:collection xmlns:marc="http://www.loc.gov/MARC21/slim">
            <marc:record>
              <marc:controlfield tag="001">42</marc:controlfield>
              <marc:datafield tag="856"><marc:subfield code="u">http://x.test</marc:subfield></marc:datafield>
            </marc:record>
        </marc:collection>"#;
        let records: Vec<_> = extract(parse_batch(xml).unwrap()).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].urls, vec!["http://x.test"]);
    }

    #[test]
    fn test_empty_collection() {
        let batch = parse_batch("<collection/>").unwrap();
        assert!(batch.is_empty());
        let batch = parse_batch("<collection></collection>").unwrap();
        assert_eq!(extract(batch).count(), 0);
    }

    #[test]
    fn test_nested_empty_record_not_counted() {
        let xml = r#"<collection>
            <record>
              <controlfield tag="001">1</controlfield>
              <record/>
            </record>
            <record/>
        </collection>"#;
        let batch = parse_batch(xml).unwrap();
        assert_eq!(batch.len(), 2);
        let records: Vec<_> = extract(batch).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "1");
    }

    #[test]
    fn test_malformed_documents() {
        assert!(parse_batch("").is_err());
        assert!(parse_batch("not xml at all").is_err());
        assert!(parse_batch("<collection><record>").is_err());
        assert!(parse_batch("<collection><record></collection>").is_err());
    }
}
