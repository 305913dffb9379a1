use std::fs;
use std::path::Path;

use harvest_engine::{discover_exports, merge_exports, read_case_rows, MergeError};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn write_export(dir: &Path, name: &str, body: &str) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(name), body).unwrap();
}

#[test]
fn exports_are_ordered_by_numeric_state_id() {
    let temp = TempDir::new().unwrap();
    let csvs = temp.path().join("csvs");
    write_export(&csvs, "uf_10_DF.csv", "a\n");
    write_export(&csvs, "uf_2_AL.csv", "a\n");
    write_export(&csvs, "uf_1_AC.csv", "a\n");
    write_export(&csvs, "notes.csv", "a\n");
    write_export(&csvs, "uf_x_XX.csv", "a\n");

    let sources = discover_exports(&csvs).unwrap();
    let order: Vec<_> = sources
        .iter()
        .map(|source| (source.state_id, source.state_abbrev.as_str()))
        .collect();
    assert_eq!(order, vec![(1, "AC"), (2, "AL"), (10, "DF")]);
}

#[test]
fn merged_rows_lead_with_their_state() {
    let temp = TempDir::new().unwrap();
    let csvs = temp.path().join("csvs");
    write_export(&csvs, "uf_2_AL.csv", "Número,Nome\n222,Bia\n");
    write_export(&csvs, "uf_1_AC.csv", "Número,Nome\n111,Ana\n\"112\",\"Silva, Ana\"\n");
    let output = temp.path().join("csvs_merged.csv");

    let report = merge_exports(&csvs, &output).unwrap();

    assert_eq!((report.files, report.rows), (2, 3));
    assert!(report.warnings.is_empty());
    assert!(report.skipped.is_empty());
    assert_eq!(
        fs::read_to_string(&output).unwrap(),
        "uf_id,uf_sigla,Número,Nome\n1,AC,111,Ana\n1,AC,112,\"Silva, Ana\"\n2,AL,222,Bia\n"
    );
}

#[test]
fn malformed_lines_are_skipped_with_warnings() {
    let temp = TempDir::new().unwrap();
    let csvs = temp.path().join("csvs");
    write_export(&csvs, "uf_1_AC.csv", "Número,Nome\n111,Ana\n112,Ana,extra\n113,Bea\n");
    let mut invalid = "Número,Nome\n".as_bytes().to_vec();
    invalid.extend_from_slice(b"211,\xff\xfe\n212,Caio\n");
    fs::write(csvs.join("uf_2_AL.csv"), invalid).unwrap();
    write_export(&csvs, "uf_3_AM.csv", "Only\none\n");
    let output = temp.path().join("csvs_merged.csv");

    let report = merge_exports(&csvs, &output).unwrap();

    assert_eq!((report.files, report.rows), (2, 3));
    let lines: Vec<_> = report
        .warnings
        .iter()
        .map(|warning| {
            (
                warning.file.file_name().unwrap().to_str().unwrap().to_string(),
                warning.line,
            )
        })
        .collect();
    assert_eq!(
        lines,
        vec![
            ("uf_1_AC.csv".to_string(), Some(3)),
            ("uf_2_AL.csv".to_string(), Some(2)),
            ("uf_3_AM.csv".to_string(), Some(1)),
        ]
    );
    let skipped: Vec<_> = report
        .skipped
        .iter()
        .map(|source| (source.state_id, source.state_abbrev.as_str()))
        .collect();
    assert_eq!(skipped, vec![(3, "AM")]);
    let merged = fs::read_to_string(&output).unwrap();
    assert!(merged.contains("1,AC,113,Bea\n"));
    assert!(merged.contains("2,AL,212,Caio\n"));
}

#[test]
fn rerunning_the_merge_is_byte_identical() {
    let temp = TempDir::new().unwrap();
    let csvs = temp.path().join("csvs");
    write_export(&csvs, "uf_1_AC.csv", "Número,Nome\n111,Ana\n");
    write_export(&csvs, "uf_2_AL.csv", "Número,Nome\n222,Bia\n");
    let output = temp.path().join("csvs_merged.csv");

    merge_exports(&csvs, &output).unwrap();
    let first = fs::read(&output).unwrap();
    merge_exports(&csvs, &output).unwrap();
    let second = fs::read(&output).unwrap();

    assert_eq!(first, second);
}

#[test]
fn empty_directory_has_nothing_to_merge() {
    let temp = TempDir::new().unwrap();
    let csvs = temp.path().join("csvs");
    fs::create_dir_all(&csvs).unwrap();

    let result = merge_exports(&csvs, &temp.path().join("out.csv"));
    assert!(matches!(result, Err(MergeError::NoInputs(_))));
}

#[test]
fn case_rows_read_back_from_the_merged_list() {
    let temp = TempDir::new().unwrap();
    let csvs = temp.path().join("csvs");
    write_export(&csvs, "uf_1_AC.csv", "Número,Nome,Órgão\n0001070-63.2015.8.10.0001,Ana,TJAC\n");
    let output = temp.path().join("csvs_merged.csv");
    merge_exports(&csvs, &output).unwrap();

    let rows = read_case_rows(&output).unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].case_number, "0001070-63.2015.8.10.0001");
    assert_eq!(rows[0].person_name, "Ana");
    assert_eq!((rows[0].uf_id.as_str(), rows[0].uf_sigla.as_str()), ("1", "AC"));
    assert_eq!(rows[0].extra, vec![("Órgão".to_string(), "TJAC".to_string())]);
}

#[test]
fn case_list_without_case_numbers_is_rejected() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("list.csv");
    fs::write(&path, "Nome\nAna\n").unwrap();

    assert!(matches!(
        read_case_rows(&path),
        Err(MergeError::MissingColumn { .. })
    ));
}
