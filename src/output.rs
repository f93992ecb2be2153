//! CSV tables written by a batch run.

use crate::error::{Error, Result};
use crate::measure::{RegionRecord, REGION_COLUMNS};
use crate::stats::{ImageSummary, SUMMARY_COLUMNS};
use log::debug;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Summary table shared by the workers of a batch.
///
/// Every row is serialized on the calling thread and written with a single `write_all` under
/// the lock, so concurrent images never interleave and a cancelled run leaves whole rows.
pub struct SummaryWriter {
    path: PathBuf,
    file: Mutex<File>,
}

/// First record of an existing table, `None` for an empty file.
fn read_header(path: &Path) -> Result<Option<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut record = csv::StringRecord::new();
    if !reader.read_record(&mut record)? {
        return Ok(None);
    }
    Ok(Some(record.iter().map(str::to_owned).collect()))
}

impl SummaryWriter {
    /// Opens the summary table at `path`.
    ///
    /// Without `append` the file is truncated and a header is written. With `append`, rows go
    /// after the existing content; a non-empty file must start with exactly the header this
    /// writer produces, otherwise [`Error::SchemaMismatch`] is returned before anything is
    /// written.
    pub fn create(path: &Path, append: bool) -> Result<Self> {
        let existing = if append && path.exists() {
            read_header(path)?
        } else {
            None
        };
        let file = match existing {
            Some(found) => {
                if found != SUMMARY_COLUMNS {
                    return Err(Error::SchemaMismatch {
                        path: path.to_path_buf(),
                        found: found.join(","),
                        expected: SUMMARY_COLUMNS.join(","),
                    });
                }
                debug!("appending to {}", path.display());
                OpenOptions::new().append(true).open(path)?
            }
            None => {
                let mut file = if append {
                    OpenOptions::new().create(true).append(true).open(path)?
                } else {
                    File::create(path)?
                };
                let mut header = csv::Writer::from_writer(Vec::new());
                header.write_record(SUMMARY_COLUMNS)?;
                file.write_all(&header.into_inner().map_err(|e| e.into_error())?)?;
                file.flush()?;
                file
            }
        };
        Ok(SummaryWriter {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one row.
    pub fn write(&self, summary: &ImageSummary) -> Result<()> {
        let mut row = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        row.serialize(summary)?;
        let bytes = row.into_inner().map_err(|e| e.into_error())?;
        let mut file = self.file.lock();
        file.write_all(&bytes)?;
        file.flush()?;
        Ok(())
    }
}

/// `<dir>/<image stem>_regions.csv`
pub fn region_table_path(dir: &Path, image: &Path) -> PathBuf {
    let stem = image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_owned());
    dir.join(format!("{stem}_regions.csv"))
}

/// Writes one row per region. An empty region list still gets a header.
pub fn write_region_table(path: &Path, regions: &[RegionRecord]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    writer.write_record(REGION_COLUMNS)?;
    for region in regions {
        writer.serialize(region)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{region_table_path, write_region_table, SummaryWriter};
    use crate::clump::Resolution;
    use crate::error::Error;
    use crate::filter::tests::record;
    use crate::measure::REGION_COLUMNS;
    use crate::stats::{summarize, SUMMARY_COLUMNS};
    use std::path::Path;

    fn read_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn new_table_has_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.csv");
        let writer = SummaryWriter::create(&path, false).unwrap();
        writer
            .write(&summarize("a.tif", 1200.0, 0.3, &Resolution::empty()))
            .unwrap();
        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], SUMMARY_COLUMNS.join(","));
        assert!(lines[1].starts_with("a.tif,1200.0,"));
    }

    #[test]
    fn append_keeps_single_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.csv");
        for name in ["a.tif", "b.tif"] {
            let writer = SummaryWriter::create(&path, true).unwrap();
            writer
                .write(&summarize(name, 1200.0, 0.3, &Resolution::empty()))
                .unwrap();
        }
        let lines = read_lines(&path);
        assert_eq!(lines.len(), 3);
        assert!(lines[2].starts_with("b.tif,"));
    }

    #[test]
    fn append_rejects_foreign_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.csv");
        std::fs::write(&path, "File,Count,Mean\nx.tif,3,0.2\n").unwrap();
        let err = SummaryWriter::create(&path, true).err().unwrap();
        assert!(matches!(err, Error::SchemaMismatch { .. }));
        assert!(!err.is_input_error());
        // untouched
        assert_eq!(read_lines(&path).len(), 2);
    }

    #[test]
    fn append_to_empty_file_writes_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.csv");
        std::fs::write(&path, "").unwrap();
        SummaryWriter::create(&path, true).unwrap();
        assert_eq!(read_lines(&path), vec![SUMMARY_COLUMNS.join(",")]);
    }

    #[test]
    fn concurrent_rows_stay_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.csv");
        let writer = SummaryWriter::create(&path, false).unwrap();
        let resolution = Resolution {
            regions: vec![record(1, 0.5), record(2, 0.7)],
            clumps: Vec::new(),
            corrected_count: 2,
            mixed_mean_area_mm2: Some(0.6),
            single_mean_area_mm2: Some(0.6),
        };
        rayon::scope(|s| {
            for i in 0..16 {
                let (writer, resolution) = (&writer, &resolution);
                s.spawn(move |_| {
                    let name = format!("scan_{i}.tif");
                    writer
                        .write(&summarize(&name, 1200.0, 0.3, resolution))
                        .unwrap();
                });
            }
        });
        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 16);
        assert!(rows.iter().all(|r| r.len() == SUMMARY_COLUMNS.len()));
    }

    #[test]
    fn region_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = region_table_path(dir.path(), Path::new("/scans/tray_01.tif"));
        assert_eq!(path.file_name().unwrap(), "tray_01_regions.csv");
        write_region_table(&path, &[record(1, 0.5), record(2, 0.6)]).unwrap();
        let lines = read_lines(&path);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], REGION_COLUMNS.join(","));

        write_region_table(&path, &[]).unwrap();
        assert_eq!(read_lines(&path), vec![REGION_COLUMNS.join(",")]);
    }
}
