//! Comma-separated output of field records and per-field samples

use crate::core::sampling::FieldBandSample;
use crate::types::{FieldError, FieldRecord, FieldResult};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

pub const FIELD_RECORD_HEADER: &str =
    "label,area,centroid_row,centroid_col,nw_row,nw_col,se_row,se_col";

pub const SAMPLE_HEADER: &str = "label,band,scene_id,acquired,pixels,mean,variance";

pub fn format_record(record: &FieldRecord) -> String {
    format!(
        "{},{},{:.3},{:.3},{},{},{},{}",
        record.label,
        record.area,
        record.centroid_row,
        record.centroid_col,
        record.nw_row,
        record.nw_col,
        record.se_row,
        record.se_col
    )
}

pub fn format_sample(sample: &FieldBandSample) -> String {
    let t = &sample.acquisition;
    format!(
        "{},{},{},{:04}-{:02}-{:02}T{:02}:{:02},{},{:.6},{:.6}",
        sample.label,
        sample.band,
        sample.scene_id,
        t.year,
        t.month,
        t.day,
        t.hour,
        t.minute,
        sample.pixels,
        sample.mean,
        sample.variance
    )
}

fn write_lines<W, I>(mut writer: W, header: &str, lines: I) -> FieldResult<()>
where
    W: Write,
    I: IntoIterator<Item = String>,
{
    writeln!(writer, "{}", header)?;
    for line in lines {
        writeln!(writer, "{}", line)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_records<W: Write>(writer: W, records: &[FieldRecord]) -> FieldResult<()> {
    write_lines(writer, FIELD_RECORD_HEADER, records.iter().map(format_record))
}

pub fn write_records_csv<P: AsRef<Path>>(path: P, records: &[FieldRecord]) -> FieldResult<()> {
    let file = File::create(path.as_ref())?;
    write_records(BufWriter::new(file), records)?;
    log::info!(
        "Wrote {} field records: {}",
        records.len(),
        path.as_ref().display()
    );
    Ok(())
}

pub fn write_samples_csv<P: AsRef<Path>>(path: P, samples: &[FieldBandSample]) -> FieldResult<()> {
    let file = File::create(path.as_ref())?;
    write_lines(
        BufWriter::new(file),
        SAMPLE_HEADER,
        samples.iter().map(format_sample),
    )?;
    log::info!(
        "Wrote {} field samples: {}",
        samples.len(),
        path.as_ref().display()
    );
    Ok(())
}

fn parse_field<T: std::str::FromStr>(value: Option<&str>, line_no: usize) -> FieldResult<T> {
    value
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| FieldError::Processing(format!("Malformed field record on line {}", line_no)))
}

/// Read records written by [`write_records_csv`]
pub fn read_records_csv<P: AsRef<Path>>(path: P) -> FieldResult<Vec<FieldRecord>> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let mut records = Vec::new();

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if i == 0 || line.trim().is_empty() {
            continue;
        }
        let mut cols = line.split(',');
        let line_no = i + 1;
        records.push(FieldRecord {
            label: parse_field(cols.next(), line_no)?,
            area: parse_field(cols.next(), line_no)?,
            centroid_row: parse_field(cols.next(), line_no)?,
            centroid_col: parse_field(cols.next(), line_no)?,
            nw_row: parse_field(cols.next(), line_no)?,
            nw_col: parse_field(cols.next(), line_no)?,
            se_row: parse_field(cols.next(), line_no)?,
            se_col: parse_field(cols.next(), line_no)?,
        });
    }
    Ok(records)
}
