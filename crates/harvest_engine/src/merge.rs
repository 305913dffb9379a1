use std::fs;
use std::path::{Path, PathBuf};

use csv::{ByteRecord, ReaderBuilder, StringRecord, WriterBuilder};
use harvest_core::RegionId;
use harvest_log::{harvest_info, harvest_warn};
use thiserror::Error;

use crate::persist::{write_atomic, PersistError};

/// Column of the platform export holding the case number.
pub const CASE_NUMBER_COLUMN: &str = "Número";
/// Column of the platform export holding the person's name.
pub const PERSON_NAME_COLUMN: &str = "Nome";

const UF_ID_COLUMN: &str = "uf_id";
const UF_SIGLA_COLUMN: &str = "uf_sigla";

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("no per-state exports found in {0:?}")]
    NoInputs(PathBuf),
    #[error("failed to read {path:?}: {reason}")]
    Read { path: PathBuf, reason: String },
    #[error("{path:?} has no {column:?} column")]
    MissingColumn { path: PathBuf, column: &'static str },
    #[error("failed to encode merged csv: {0}")]
    Encode(String),
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),
}

/// A per-state export found on disk, identified by its file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCsv {
    pub path: PathBuf,
    pub state_id: RegionId,
    pub state_abbrev: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeWarning {
    pub file: PathBuf,
    pub line: Option<u64>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub files: usize,
    pub rows: u64,
    pub output: PathBuf,
    pub warnings: Vec<MergeWarning>,
    /// Exports left out entirely: unreadable, empty or off-schema.
    pub skipped: Vec<SourceCsv>,
}

/// One row of the merged case list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseRow {
    pub case_number: String,
    pub person_name: String,
    pub uf_id: String,
    pub uf_sigla: String,
    /// Every other column, in file order.
    pub extra: Vec<(String, String)>,
}

/// Per-state exports in `csv_dir`, ordered by state id.
pub fn discover_exports(csv_dir: &Path) -> Result<Vec<SourceCsv>, MergeError> {
    let entries = fs::read_dir(csv_dir).map_err(|err| MergeError::Read {
        path: csv_dir.to_path_buf(),
        reason: err.to_string(),
    })?;

    let mut sources: Vec<SourceCsv> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter_map(|path| {
            let (state_id, state_abbrev) = parse_export_name(&path)?;
            Some(SourceCsv {
                path,
                state_id,
                state_abbrev,
            })
        })
        .collect();
    sources.sort_by(|a, b| {
        (a.state_id, &a.state_abbrev).cmp(&(b.state_id, &b.state_abbrev))
    });
    Ok(sources)
}

/// `uf_{id}_{abbrev}.csv` -> `(id, abbrev)`.
fn parse_export_name(path: &Path) -> Option<(RegionId, String)> {
    if path.extension().and_then(|ext| ext.to_str()) != Some("csv") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let (id, abbrev) = stem.strip_prefix("uf_")?.split_once('_')?;
    let id = id.parse().ok()?;
    if abbrev.is_empty() {
        return None;
    }
    Some((id, abbrev.to_string()))
}

/// Concatenate every per-state export into `output`, prefixing each row with
/// its state's id and abbreviation. The first export's header is the schema.
/// Re-running replaces the previous output.
pub fn merge_exports(csv_dir: &Path, output: &Path) -> Result<MergeReport, MergeError> {
    let sources = discover_exports(csv_dir)?;
    if sources.is_empty() {
        return Err(MergeError::NoInputs(csv_dir.to_path_buf()));
    }
    harvest_info!("Merging {} exports from {:?}", sources.len(), csv_dir);

    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    let mut schema_len: Option<usize> = None;
    let mut warnings = Vec::new();
    let mut skipped = Vec::new();
    let mut files = 0;
    let mut rows = 0;

    for source in &sources {
        let mut warn = |line: Option<u64>, reason: String| {
            harvest_warn!("{:?} line {:?}: {}", source.path, line, reason);
            warnings.push(MergeWarning {
                file: source.path.clone(),
                line,
                reason,
            });
        };

        let mut reader = match ReaderBuilder::new().flexible(true).from_path(&source.path) {
            Ok(reader) => reader,
            Err(err) => {
                warn(None, err.to_string());
                skipped.push(source.clone());
                continue;
            }
        };
        let header = match reader.byte_headers() {
            Ok(header) if !header.is_empty() => header.clone(),
            Ok(_) => {
                warn(None, "empty file".to_string());
                skipped.push(source.clone());
                continue;
            }
            Err(err) => {
                warn(None, err.to_string());
                skipped.push(source.clone());
                continue;
            }
        };
        match schema_len {
            None => {
                let mut leading = ByteRecord::new();
                leading.push_field(UF_ID_COLUMN.as_bytes());
                leading.push_field(UF_SIGLA_COLUMN.as_bytes());
                leading.extend(header.iter());
                writer
                    .write_byte_record(&leading)
                    .map_err(|err| MergeError::Encode(err.to_string()))?;
                schema_len = Some(header.len());
            }
            Some(expected) if expected != header.len() => {
                warn(
                    Some(1),
                    format!("header has {} columns, expected {}", header.len(), expected),
                );
                skipped.push(source.clone());
                continue;
            }
            Some(_) => {}
        }
        files += 1;

        let uf_id = source.state_id.to_string();
        let mut record = ByteRecord::new();
        loop {
            match reader.read_byte_record(&mut record) {
                Ok(false) => break,
                Ok(true) => {
                    let line = record.position().map(|pos| pos.line());
                    if record.len() != header.len() {
                        warn(
                            line,
                            format!("{} fields, expected {}", record.len(), header.len()),
                        );
                        continue;
                    }
                    if record.iter().any(|field| std::str::from_utf8(field).is_err()) {
                        warn(line, "invalid utf-8".to_string());
                        continue;
                    }
                    let mut merged = ByteRecord::new();
                    merged.push_field(uf_id.as_bytes());
                    merged.push_field(source.state_abbrev.as_bytes());
                    merged.extend(record.iter());
                    writer
                        .write_byte_record(&merged)
                        .map_err(|err| MergeError::Encode(err.to_string()))?;
                    rows += 1;
                }
                Err(err) => {
                    // The reader cannot resynchronise after an io error.
                    warn(err.position().map(|pos| pos.line()), err.to_string());
                    break;
                }
            }
        }
    }

    let bytes = writer
        .into_inner()
        .map_err(|err| MergeError::Encode(err.to_string()))?;
    write_atomic(output, &bytes)?;
    harvest_info!(
        "Merged {} rows from {} files into {:?} ({} warnings)",
        rows,
        files,
        output,
        warnings.len()
    );

    Ok(MergeReport {
        files,
        rows,
        output: output.to_path_buf(),
        warnings,
        skipped,
    })
}

/// Rows of a merged case list. A row that cannot be decoded is kept as an
/// empty placeholder so row indices stay stable across runs.
pub fn read_case_rows(path: &Path) -> Result<Vec<CaseRow>, MergeError> {
    let read_err = |err: csv::Error| MergeError::Read {
        path: path.to_path_buf(),
        reason: err.to_string(),
    };
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(read_err)?;
    let headers = reader.headers().map_err(read_err)?.clone();
    let column = |name: &str| headers.iter().position(|header| header.trim() == name);
    let case_column = column(CASE_NUMBER_COLUMN).ok_or(MergeError::MissingColumn {
        path: path.to_path_buf(),
        column: CASE_NUMBER_COLUMN,
    })?;
    let name_column = column(PERSON_NAME_COLUMN);
    let uf_id_column = column(UF_ID_COLUMN);
    let uf_sigla_column = column(UF_SIGLA_COLUMN);

    let mut rows = Vec::new();
    let mut record = StringRecord::new();
    loop {
        match reader.read_record(&mut record) {
            Ok(false) => break,
            Ok(true) => {
                let field = |index: Option<usize>| {
                    index
                        .and_then(|index| record.get(index))
                        .unwrap_or_default()
                        .trim()
                        .to_string()
                };
                let extra = headers
                    .iter()
                    .enumerate()
                    .filter(|(index, _)| {
                        ![Some(case_column), name_column, uf_id_column, uf_sigla_column]
                            .contains(&Some(*index))
                    })
                    .map(|(index, header)| {
                        (header.to_string(), record.get(index).unwrap_or_default().to_string())
                    })
                    .collect();
                rows.push(CaseRow {
                    case_number: field(Some(case_column)),
                    person_name: field(name_column),
                    uf_id: field(uf_id_column),
                    uf_sigla: field(uf_sigla_column),
                    extra,
                });
            }
            Err(err) if matches!(err.kind(), csv::ErrorKind::Io(_)) => return Err(read_err(err)),
            Err(err) => {
                harvest_warn!("{:?} row {}: {}", path, rows.len(), err);
                rows.push(CaseRow::default());
            }
        }
    }
    harvest_info!("Read {} case rows from {:?}", rows.len(), path);
    Ok(rows)
}
