use std::io::Read;
use std::path::Path;

use tracing::warn;

use super::SourceError;
use crate::models::Record;

fn reader<R: Read>(input: R, delimiter: u8) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(input)
}

/// Resolves the header positions of `fields`, failing on any absent one.
fn column_positions(
    path: &Path,
    header: &csv::StringRecord,
    fields: &[String],
) -> Result<Vec<usize>, SourceError> {
    let mut positions = Vec::with_capacity(fields.len());
    let mut missing = Vec::new();
    for field in fields {
        match header.iter().position(|h| h.trim() == field) {
            Some(position) => positions.push(position),
            None => missing.push(field.clone()),
        }
    }
    if missing.is_empty() {
        Ok(positions)
    } else {
        Err(SourceError::MissingColumns {
            path: path.to_path_buf(),
            missing,
        })
    }
}

pub(super) fn check_header<R: Read>(
    path: &Path,
    input: R,
    delimiter: u8,
    fields: &[String],
) -> Result<(), SourceError> {
    let mut csv_reader = reader(input, delimiter);
    let header = csv_reader.headers()?.clone();
    column_positions(path, &header, fields).map(|_| ())
}

pub(super) fn read_records<R: Read>(
    path: &Path,
    input: R,
    delimiter: u8,
    fields: &[String],
) -> Result<Vec<Record>, SourceError> {
    let mut csv_reader = reader(input, delimiter);
    let header = csv_reader.headers()?.clone();
    let positions = column_positions(path, &header, fields)?;

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for row in csv_reader.records() {
        let Ok(row) = row else {
            skipped += 1;
            continue;
        };
        let values: Option<Vec<&str>> = positions.iter().map(|&p| row.get(p)).collect();
        let Some(values) = values else {
            skipped += 1;
            continue;
        };
        records.push(Record::from_pairs(fields.iter().cloned().zip(values)));
    }

    if skipped > 0 {
        warn!(file = %path.display(), skipped, "omitted malformed rows");
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn reads_requested_fields_in_schema_order() {
        let input = "body|id|extra\nhello|1|x\nworld|2|y\n";
        let records =
            read_records(Path::new("t.csv"), input.as_bytes(), b'|', &fields(&["id", "body"]))
                .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].fields()[0], ("id".to_string(), "1".to_string()));
        assert_eq!(records[1].get("body"), Some("world"));
    }

    #[test]
    fn short_rows_are_omitted() {
        let input = "id,body\n1,ok\n2\n3,fine\n";
        let records =
            read_records(Path::new("t.csv"), input.as_bytes(), b',', &fields(&["id", "body"]))
                .unwrap();

        let ids: Vec<&str> = records.iter().filter_map(|r| r.get("id")).collect();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[test]
    fn quoted_cells_keep_delimiters_and_newlines() {
        let input = "id,body\n1,\"a, b\nc\"\n";
        let records =
            read_records(Path::new("t.csv"), input.as_bytes(), b',', &fields(&["id", "body"]))
                .unwrap();
        assert_eq!(records[0].get("body"), Some("a, b\nc"));
    }
}
