//! CSV encoding of download records and the compressed job artifact
//!
//! Everything here is blocking file I/O; async callers run it through
//! `tokio::task::spawn_blocking`.

use crate::error::{Error, Result};
use crate::types::{DownloadRecord, FailedPoint};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Column names of every job output file, in order
pub const COLUMNS: [&str; 9] = [
    "query_lat",
    "query_lon",
    "query_timestamp",
    "pano_lat",
    "pano_lon",
    "pano_id",
    "capture_date",
    "copyright_info",
    "status",
];

/// Column names of the failed-points file
pub const FAILED_POINT_COLUMNS: [&str; 4] = ["lat", "lon", "i", "j"];

/// Header line (with trailing newline) of job output files
pub fn header_line() -> String {
    let mut line = COLUMNS.join(",");
    line.push('\n');
    line
}

/// Encode records as CSV rows without a header.
///
/// Floats use shortest round-trip formatting, so a coordinate parsed back from
/// the output has the same bits as the one that was written.
pub fn encode_rows(records: &[DownloadRecord]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::with_capacity(records.len() * 128));
    for record in records {
        writer.serialize(record)?;
    }
    writer
        .into_inner()
        .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))
}

/// Decode records from a CSV stream with a header row.
///
/// Rows that do not parse (a torn tail left by a killed process) are skipped
/// with a warning.
pub fn decode_records<R: Read>(reader: R, source: &Path) -> Result<Vec<DownloadRecord>> {
    let mut records = Vec::new();
    let skipped = visit_records(reader, source, |record| records.push(record))?;

    if skipped > 0 {
        tracing::warn!(
            path = %source.display(),
            skipped = skipped,
            kept = records.len(),
            "Output file contained malformed rows"
        );
    }
    Ok(records)
}

/// Hand every well-formed record of a CSV stream with a header row to `visit`
/// and return how many rows were skipped.
///
/// This is the single definition of a valid row: resume detection counts a
/// point as done only if its row would also survive loading the artifact.
pub fn visit_records<R: Read>(
    reader: R,
    source: &Path,
    mut visit: impl FnMut(DownloadRecord),
) -> Result<usize> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let mut skipped = 0usize;
    for row in reader.deserialize::<DownloadRecord>() {
        match row {
            Ok(record) => visit(record),
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                skipped += 1;
                tracing::debug!(path = %source.display(), error = %e, "Skipping malformed row");
            }
        }
    }
    Ok(skipped)
}

/// Gzip `source` into `destination`.
///
/// The data is written to `{destination}.tmp`, synced and then renamed, so
/// `destination` only ever exists complete.
pub fn compress(source: &Path, destination: &Path) -> Result<()> {
    let tmp = tmp_path(destination);

    let result = (|| {
        let input = File::open(source).map_err(|e| Error::fs("open", source, e))?;
        let output = File::create(&tmp).map_err(|e| Error::fs("create", &tmp, e))?;

        let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());
        std::io::copy(&mut BufReader::new(input), &mut encoder)
            .map_err(|e| Error::fs("compress into", &tmp, e))?;

        let output = encoder
            .finish()
            .and_then(|w| w.into_inner().map_err(|e| e.into_error()))
            .map_err(|e| Error::fs("compress into", &tmp, e))?;
        output.sync_all().map_err(|e| Error::fs("sync", &tmp, e))?;

        std::fs::rename(&tmp, destination).map_err(|e| Error::fs("rename", &tmp, e))
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

/// Load every record of a compressed artifact.
pub fn read_artifact(path: &Path) -> Result<Vec<DownloadRecord>> {
    let file = File::open(path).map_err(|e| Error::fs("open", path, e))?;
    decode_records(GzDecoder::new(BufReader::new(file)), path)
}

/// Write the failed-points file, replacing any previous one.
pub fn write_failed_points(path: &Path, points: &[FailedPoint]) -> Result<()> {
    let file = File::create(path).map_err(|e| Error::fs("create", path, e))?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));

    writer.write_record(FAILED_POINT_COLUMNS)?;
    for failed in points {
        let p = &failed.point;
        writer.serialize((p.latitude, p.longitude, p.row_index, p.col_index))?;
    }

    let mut inner = writer
        .into_inner()
        .map_err(|e| Error::fs("write", path, std::io::Error::other(e.to_string())))?;
    inner.flush().map_err(|e| Error::fs("write", path, e))?;
    Ok(())
}

/// Remove a file if it exists.
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::fs("remove", path, e)),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GridPoint, PanoStatus};
    use tempfile::TempDir;

    fn found(lat: f64, lon: f64) -> DownloadRecord {
        DownloadRecord {
            query_lat: lat,
            query_lon: lon,
            query_timestamp: "2024-03-01T12:00:00+01:00".to_string(),
            pano_lat: Some(lat + 0.0001),
            pano_lon: Some(lon - 0.0001),
            pano_id: Some("CAoSLEFGMVFpcE".to_string()),
            capture_date: Some("2019-05".to_string()),
            copyright_info: Some("© Google, with \"quotes\"".to_string()),
            status: PanoStatus::Ok,
        }
    }

    fn empty(lat: f64, lon: f64) -> DownloadRecord {
        DownloadRecord {
            query_lat: lat,
            query_lon: lon,
            query_timestamp: "2024-03-01T12:00:00+01:00".to_string(),
            pano_lat: None,
            pano_lon: None,
            pano_id: None,
            capture_date: None,
            copyright_info: None,
            status: PanoStatus::ZeroResults,
        }
    }

    fn file_with_header(rows: &[u8]) -> Vec<u8> {
        let mut data = header_line().into_bytes();
        data.extend_from_slice(rows);
        data
    }

    #[test]
    fn header_matches_columns() {
        assert_eq!(
            header_line(),
            "query_lat,query_lon,query_timestamp,pano_lat,pano_lon,pano_id,capture_date,copyright_info,status\n"
        );
    }

    #[test]
    fn missing_pano_fields_are_empty_columns() {
        let rows = encode_rows(&[empty(1.5, -2.25)]).unwrap();
        assert_eq!(
            String::from_utf8(rows).unwrap(),
            "1.5,-2.25,2024-03-01T12:00:00+01:00,,,,,,ZERO_RESULTS\n"
        );
    }

    #[test]
    fn coordinates_survive_encoding_bit_exactly() {
        let lat = 48.856_613_999_999_99_f64;
        let lon = 2.352_221_900_000_001_f64;
        let data = file_with_header(&encode_rows(&[found(lat, lon)]).unwrap());

        let records = decode_records(data.as_slice(), Path::new("mem")).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].query_lat.to_bits(), lat.to_bits());
        assert_eq!(records[0].query_lon.to_bits(), lon.to_bits());
        assert_eq!(records[0], found(lat, lon));
    }

    #[test]
    fn torn_tail_row_is_skipped() {
        let mut rows = encode_rows(&[found(1.0, 2.0), empty(3.0, 4.0)]).unwrap();
        rows.extend_from_slice(b"5.0,6.0,2024-03-01T1");
        let data = file_with_header(&rows);

        let records = decode_records(data.as_slice(), Path::new("mem")).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].status, PanoStatus::ZeroResults);
    }

    #[test]
    fn compressed_artifact_round_trips() {
        let dir = TempDir::new().unwrap();
        let csv_path = dir.path().join("job.csv");
        let gz_path = dir.path().join("job.csv.gz");
        let records = vec![found(10.0, 20.0), empty(10.5, 20.5)];
        std::fs::write(&csv_path, file_with_header(&encode_rows(&records).unwrap())).unwrap();

        compress(&csv_path, &gz_path).unwrap();

        assert!(gz_path.exists());
        assert!(!dir.path().join("job.csv.gz.tmp").exists());
        assert_eq!(read_artifact(&gz_path).unwrap(), records);
    }

    #[test]
    fn compress_missing_source_leaves_no_output() {
        let dir = TempDir::new().unwrap();
        let gz_path = dir.path().join("job.csv.gz");

        let err = compress(&dir.path().join("missing.csv"), &gz_path).unwrap_err();

        assert!(matches!(err, Error::FileSystem { operation: "open", .. }));
        assert!(!gz_path.exists());
    }

    #[test]
    fn failed_points_file_lists_indices() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("job_failed_points.csv");
        let failed = vec![FailedPoint {
            point: GridPoint {
                latitude: 0.5,
                longitude: -0.25,
                row_index: -1,
                col_index: 2,
            },
            last_error: "timeout".to_string(),
        }];

        write_failed_points(&path, &failed).unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "lat,lon,i,j\n0.5,-0.25,-1,2\n"
        );
    }

    #[test]
    fn remove_if_exists_ignores_missing_file() {
        let dir = TempDir::new().unwrap();
        remove_if_exists(&dir.path().join("nothing")).unwrap();
    }
}
