use std::io::BufRead;

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::debug;

use super::SourceError;
use crate::models::Record;

/// Reassembles records from a stream of sibling elements named after the fields.
///
/// Field elements may arrive in any order and at any depth. A record is emitted as soon
/// as every field has a value; if a field repeats before that, the partial record is
/// discarded and assembly restarts with the repeated field.
struct Assembler<'a> {
    fields: &'a [String],
    slots: Vec<Option<String>>,
    filled: usize,
    dropped: usize,
}

impl<'a> Assembler<'a> {
    fn new(fields: &'a [String]) -> Self {
        Self {
            fields,
            slots: vec![None; fields.len()],
            filled: 0,
            dropped: 0,
        }
    }

    fn reset(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.filled = 0;
    }

    fn push(&mut self, index: usize, value: String) -> Option<Record> {
        if self.slots[index].is_some() {
            self.dropped += 1;
            self.reset();
        }
        self.slots[index] = Some(value);
        self.filled += 1;

        if self.filled < self.fields.len() {
            return None;
        }
        let record = Record::from_pairs(
            self.fields
                .iter()
                .cloned()
                .zip(self.slots.iter_mut().map(|s| s.take().unwrap_or_default())),
        );
        self.filled = 0;
        Some(record)
    }
}

pub(super) fn read_records<R: BufRead>(input: R, fields: &[String]) -> Result<Vec<Record>, SourceError> {
    let mut reader = Reader::from_reader(input);
    reader.config_mut().trim_text(true);

    let mut assembler = Assembler::new(fields);
    let mut records = Vec::new();
    let mut buf = Vec::new();
    // (field index, nesting depth inside that field, accumulated text)
    let mut open: Option<(usize, usize, Vec<String>)> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                if let Some((_, depth, _)) = open.as_mut() {
                    *depth += 1;
                } else if let Some(index) = field_index(fields, e.local_name().as_ref()) {
                    open = Some((index, 0, Vec::new()));
                }
            }
            Event::Empty(e) => {
                if open.is_none() {
                    if let Some(index) = field_index(fields, e.local_name().as_ref()) {
                        if let Some(record) = assembler.push(index, String::new()) {
                            records.push(record);
                        }
                    }
                }
            }
            Event::Text(t) => {
                if let Some((_, _, parts)) = open.as_mut() {
                    let text = t
                        .unescape()
                        .map(|c| c.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(&t).into_owned());
                    parts.push(text);
                }
            }
            Event::CData(c) => {
                if let Some((_, _, parts)) = open.as_mut() {
                    parts.push(String::from_utf8_lossy(&c.into_inner()).into_owned());
                }
            }
            Event::End(_) => {
                if let Some((index, depth, parts)) = open.take() {
                    if depth > 0 {
                        open = Some((index, depth - 1, parts));
                    } else if let Some(record) = assembler.push(index, parts.join(" ")) {
                        records.push(record);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if assembler.dropped > 0 {
        debug!(dropped = assembler.dropped, "discarded incomplete XML records");
    }
    Ok(records)
}

fn field_index(fields: &[String], name: &[u8]) -> Option<usize> {
    fields.iter().position(|f| f.as_bytes() == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn reassembles_interleaved_fields_positionally() {
        let xml = r#"<root>
            <entry><body>first text</body><id>1</id></entry>
            <entry><id>2</id><body>second &amp; more</body></entry>
        </root>"#;

        let records = read_records(xml.as_bytes(), &fields(&["id", "body"])).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("id"), Some("1"));
        assert_eq!(records[0].get("body"), Some("first text"));
        assert_eq!(records[1].get("body"), Some("second & more"));
        assert_eq!(records[1].fields()[0].0, "id");
    }

    #[test]
    fn nested_markup_inside_field_is_flattened() {
        let xml = "<r><id>9</id><body>a <b>bold</b> claim</body></r>";
        let records = read_records(xml.as_bytes(), &fields(&["id", "body"])).unwrap();
        assert_eq!(records[0].get("body"), Some("a bold claim"));
    }

    #[test]
    fn incomplete_record_is_dropped_on_repeat() {
        let xml = "<r><id>1</id><id>2</id><body>text</body></r>";
        let records = read_records(xml.as_bytes(), &fields(&["id", "body"])).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("id"), Some("2"));
    }

    #[test]
    fn cdata_and_empty_elements() {
        let xml = "<r><id>3</id><body><![CDATA[<p>raw</p>]]></body><id/><body>x</body></r>";
        let records = read_records(xml.as_bytes(), &fields(&["id", "body"])).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("body"), Some("<p>raw</p>"));
        assert_eq!(records[1].get("id"), Some(""));
    }
}
