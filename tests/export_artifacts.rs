
use serde_json::json;
use sha2::{Digest, Sha256};
use std::io::Read;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

fn capitals_quiz() -> serde_json::Value {
    json!({
        "title": "Capitals",
        "exam_id": "EX1",
        "questions": [
            {
                "question_text": "Capital of France?",
                "question_type": "multiple-choice",
                "choices": [
                    { "choice_text": "Paris", "is_correct": true },
                    { "choice_text": "London", "is_correct": false }
                ]
            },
            {
                "question_text": "Capital of Italy?",
                "question_type": "multiple-choice",
                "choices": [
                    { "choice_text": "Madrid", "is_correct": false },
                    { "choice_text": "Rome", "is_correct": true }
                ]
            }
        ]
    })
}

fn record(name: &str, cin: &str, options: serde_json::Value) -> serde_json::Value {
    json!({
        "student_info": { "Name": name, "Class": "2A", "CIN": cin },
        "checked_options": options,
        "exam_info": { "exam_id": "EX1" }
    })
}

fn grade_fixture(
    stdin: &mut std::process::ChildStdin,
    reader: &mut std::io::BufReader<std::process::ChildStdout>,
) {
    let _ = request_ok(
        stdin,
        reader,
        "setup",
        "grading.gradeBatch",
        json!({
            "quiz": capitals_quiz(),
            "extraction": { "extractedData": [
                record("Doe, Jane", "00123", json!({ "Q1": "A", "Q2": "A" })),
                record("Ayman", "00456", json!({ "Q1": "B", "Q2": "B" })),
                // Duplicate sheet for Jane; first scan wins.
                record("Doe, Jane", "00123", json!({ "Q1": "B", "Q2": "A" })),
            ]},
        }),
    );
}

#[test]
fn row_layouts_follow_the_export_mode() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    grade_fixture(&mut stdin, &mut reader);

    let per_student = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "export.rows",
        json!({ "examId": "EX1", "mode": "per_student" }),
    );
    assert_eq!(per_student["mode"], "per_student");
    let rows = per_student["rows"].as_array().expect("rows");
    // Header plus one row per surviving student; the duplicate is gone.
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0][0], "Name");
    assert_eq!(rows[1][0], "Doe, Jane");
    assert_eq!(rows[1][2], "00123");
    assert_eq!(rows[1][3], "10.00");
    assert_eq!(rows[2][0], "Ayman");

    let detailed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "export.rows",
        json!({ "examId": "EX1", "mode": "detailed" }),
    );
    let rows = detailed["rows"].as_array().expect("rows");
    // Two blocks of (identity header, identity, answer header, 2 answers)
    // separated by one blank row.
    assert_eq!(rows.len(), 11);
    assert_eq!(rows[3][1], "Paris");
    assert_eq!(rows[3][3], "correct");
    assert_eq!(rows[4][1], "Madrid");
    assert_eq!(rows[4][3], "incorrect");
    assert!(rows[5].as_array().expect("separator").is_empty());
    assert_eq!(rows[6][0], "Name");

    let error = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "export.rows",
        json!({ "examId": "EX1", "mode": "pivot" }),
    );
    assert_eq!(error["code"], "bad_params");
}

#[test]
fn csv_export_writes_quoted_rows_and_a_digest() {
    let out_dir = temp_dir("qcmark-export-csv");
    let out_path = out_dir.join("results.csv");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    grade_fixture(&mut stdin, &mut reader);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "export.csv",
        json!({
            "examId": "EX1",
            "mode": "per_student",
            "outPath": out_path.to_string_lossy(),
        }),
    );
    assert_eq!(result["rows"], 3);

    let written = std::fs::read(&out_path).expect("read exported csv");
    let text = String::from_utf8(written.clone()).expect("utf8 csv");
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("Name,Class,CIN,Score"));
    // The comma in the name forces quoting; the CIN keeps its zeros.
    assert_eq!(lines.next(), Some("\"Doe, Jane\",2A,00123,10.00"));
    assert_eq!(lines.next(), Some("Ayman,2A,00456,10.00"));

    let mut hasher = Sha256::new();
    hasher.update(&written);
    let digest = format!("{:x}", hasher.finalize());
    assert_eq!(result["sha256"].as_str(), Some(digest.as_str()));

    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn xlsx_export_is_a_readable_workbook() {
    let out_dir = temp_dir("qcmark-export-xlsx");
    let out_path = out_dir.join("results.xlsx");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    grade_fixture(&mut stdin, &mut reader);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "export.xlsx",
        json!({
            "examId": "EX1",
            "mode": "per_student",
            "outPath": out_path.to_string_lossy(),
        }),
    );
    assert_eq!(result["rows"], 3);
    assert!(!result["sha256"].as_str().expect("sha256").is_empty());

    let bytes = std::fs::read(&out_path).expect("read workbook");
    assert_eq!(&bytes[0..4], &[0x50, 0x4B, 0x03, 0x04]);

    let f = std::fs::File::open(&out_path).expect("open workbook");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut sheet = String::new();
    archive
        .by_name("xl/worksheets/sheet1.xml")
        .expect("sheet entry")
        .read_to_string(&mut sheet)
        .expect("read sheet");
    // Inline strings keep the zero-padded CIN intact.
    assert!(sheet.contains("<is><t>00123</t></is>"));
    assert!(sheet.contains("<is><t>Doe, Jane</t></is>"));

    let mut workbook = String::new();
    archive
        .by_name("xl/workbook.xml")
        .expect("workbook entry")
        .read_to_string(&mut workbook)
        .expect("read workbook xml");
    assert!(workbook.contains("name=\"Capitals\""));
    archive
        .by_name("[Content_Types].xml")
        .expect("content types entry");

    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn export_failures_surface_as_errors() {
    let out_dir = temp_dir("qcmark-export-fail");
    let blocker = out_dir.join("taken");
    std::fs::write(&blocker, b"plain file").expect("write blocker");
    let out_path = blocker.join("out.csv");

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    grade_fixture(&mut stdin, &mut reader);

    let error = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "export.csv",
        json!({
            "examId": "EX1",
            "outPath": out_path.to_string_lossy(),
        }),
    );
    assert_eq!(error["code"], "export_failed");

    let error = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "export.csv",
        json!({ "examId": "NOPE", "outPath": "anywhere.csv" }),
    );
    assert_eq!(error["code"], "unknown_exam");

    let _ = std::fs::remove_dir_all(out_dir);
}
