use std::io::{Cursor, Write};
use std::path::Path;

use anyhow::Context;
use sha2::{Digest, Sha256};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::stats::ExamAggregate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportMode {
    Detailed,
    PerStudent,
}

impl ExportMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportMode::Detailed => "detailed",
            ExportMode::PerStudent => "per_student",
        }
    }

    pub fn parse(s: &str) -> Option<ExportMode> {
        match s.to_ascii_lowercase().as_str() {
            "detailed" => Some(ExportMode::Detailed),
            "per_student" => Some(ExportMode::PerStudent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub rows: usize,
    pub sha256: String,
}

const IDENTITY_HEADER: [&str; 4] = ["Name", "Class", "CIN", "Score"];
const ANSWER_HEADER: [&str; 4] = ["Question", "Selected", "Correct", "Result"];

fn format_score(score: f64) -> String {
    format!("{:.2}", score)
}

/// Serializes the aggregate to spreadsheet rows. The aggregate is already
/// deduplicated, so the export can never disagree with the on-screen view
/// about which records survived.
///
/// Detailed mode emits one block per student: an identity row, the
/// per-question rows, then a blank separator. Per-student mode is one row
/// per student under a single header.
pub fn spreadsheet_rows(aggregate: &ExamAggregate, mode: ExportMode) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    match mode {
        ExportMode::PerStudent => {
            rows.push(IDENTITY_HEADER.iter().map(|s| s.to_string()).collect());
            for student in &aggregate.students {
                rows.push(vec![
                    student.student_identity.name.clone(),
                    student.student_identity.class_name.clone(),
                    student.student_identity.cin.clone(),
                    format_score(student.score),
                ]);
            }
        }
        ExportMode::Detailed => {
            for (i, student) in aggregate.students.iter().enumerate() {
                if i > 0 {
                    rows.push(Vec::new());
                }
                rows.push(IDENTITY_HEADER.iter().map(|s| s.to_string()).collect());
                rows.push(vec![
                    student.student_identity.name.clone(),
                    student.student_identity.class_name.clone(),
                    student.student_identity.cin.clone(),
                    format_score(student.score),
                ]);
                rows.push(ANSWER_HEADER.iter().map(|s| s.to_string()).collect());
                for answer in &student.answers {
                    rows.push(vec![
                        answer.question_number.to_string(),
                        answer.selected_choice_texts.join("; "),
                        answer.correct_choice_texts.join("; "),
                        if answer.is_correct { "correct" } else { "incorrect" }.to_string(),
                    ]);
                }
            }
        }
    }
    rows
}

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub fn rows_to_csv(rows: &[Vec<String>]) -> String {
    let mut csv = String::new();
    for row in rows {
        let line = row
            .iter()
            .map(|field| csv_quote(field))
            .collect::<Vec<_>>()
            .join(",");
        csv.push_str(&line);
        csv.push('\n');
    }
    csv
}

fn write_artifact(path: &Path, bytes: &[u8], rows: usize) -> anyhow::Result<ExportSummary> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create directory {}", parent.to_string_lossy())
            })?;
        }
    }
    std::fs::write(path, bytes)
        .with_context(|| format!("failed to write {}", path.to_string_lossy()))?;

    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Ok(ExportSummary {
        rows,
        sha256: format!("{:x}", hasher.finalize()),
    })
}

pub fn write_csv(path: &Path, rows: &[Vec<String>]) -> anyhow::Result<ExportSummary> {
    let csv = rows_to_csv(rows);
    write_artifact(path, csv.as_bytes(), rows.len())
}

pub fn write_xlsx(path: &Path, rows: &[Vec<String>], sheet_name: &str) -> anyhow::Result<ExportSummary> {
    let bytes = xlsx_bytes(rows, sheet_name)?;
    write_artifact(path, &bytes, rows.len())
}

/// Worksheet names reject several characters and cap at 31 chars.
pub fn sanitize_sheet_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '[' | ']' | ':' | '*' | '?' | '/' | '\\' => ' ',
            other => other,
        })
        .take(31)
        .collect();
    let cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() {
        "Results".to_string()
    } else {
        cleaned
    }
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

/// Spreadsheet column label for a zero-based index (0 -> A, 26 -> AA).
fn column_ref(index: usize) -> String {
    let mut n = index + 1;
    let mut label = String::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        label.insert(0, (b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    label
}

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
<Default Extension="xml" ContentType="application/xml"/>
<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>
<Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>
</Types>"#;

const ROOT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>
</Relationships>"#;

const WORKBOOK_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>
</Relationships>"#;

fn workbook_xml(sheet_name: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
<sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets>
</workbook>"#,
        xml_escape(sheet_name)
    )
}

fn worksheet_xml(rows: &[Vec<String>]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
<sheetData>"#,
    );
    for (r, row) in rows.iter().enumerate() {
        if row.is_empty() {
            xml.push_str(&format!("<row r=\"{}\"/>", r + 1));
            continue;
        }
        xml.push_str(&format!("<row r=\"{}\">", r + 1));
        for (c, cell) in row.iter().enumerate() {
            if cell.is_empty() {
                continue;
            }
            // Everything is written as an inline string so values like CINs
            // with leading zeros survive a spreadsheet round trip.
            xml.push_str(&format!(
                "<c r=\"{}{}\" t=\"inlineStr\"><is><t>{}</t></is></c>",
                column_ref(c),
                r + 1,
                xml_escape(cell)
            ));
        }
        xml.push_str("</row>");
    }
    xml.push_str("</sheetData></worksheet>");
    xml
}

pub fn xlsx_bytes(rows: &[Vec<String>], sheet_name: &str) -> anyhow::Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut zip = ZipWriter::new(&mut cursor);
        let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

        let entries: [(&str, String); 5] = [
            ("[Content_Types].xml", CONTENT_TYPES_XML.to_string()),
            ("_rels/.rels", ROOT_RELS_XML.to_string()),
            ("xl/workbook.xml", workbook_xml(sheet_name)),
            ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS_XML.to_string()),
            ("xl/worksheets/sheet1.xml", worksheet_xml(rows)),
        ];
        for (name, body) in &entries {
            zip.start_file(*name, opts)
                .with_context(|| format!("failed to start workbook entry {}", name))?;
            zip.write_all(body.as_bytes())
                .with_context(|| format!("failed to write workbook entry {}", name))?;
        }
        zip.finish().context("failed to finalize workbook")?;
    }
    Ok(cursor.into_inner())
}
