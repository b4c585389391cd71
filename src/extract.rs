use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::grade::GradeError;

/// Raw OMR extraction payload as the backend proxies it. Field names follow
/// the sheet-reader output, hence the capitalized identity keys.
#[derive(Debug, Deserialize)]
struct ExtractionWire {
    #[serde(rename = "extractedData")]
    extracted_data: Vec<RecordWire>,
}

#[derive(Debug, Deserialize)]
struct RecordWire {
    #[serde(default)]
    student_info: StudentInfoWire,
    #[serde(default)]
    checked_options: Map<String, Value>,
    #[serde(default)]
    exam_info: ExamInfoWire,
}

#[derive(Debug, Default, Deserialize)]
struct StudentInfoWire {
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Class", default)]
    class: String,
    #[serde(rename = "CIN", default)]
    cin: String,
}

/// The sheet header block also carries exam_title / prof_name /
/// university_name; only the exam id matters here.
#[derive(Debug, Default, Deserialize)]
struct ExamInfoWire {
    #[serde(default)]
    exam_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentIdentity {
    pub name: String,
    pub class_name: String,
    pub cin: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedAnswer {
    pub question_number: u32,
    pub selected_letters: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedSubmission {
    pub identity: StudentIdentity,
    pub exam_id: String,
    pub answers: Vec<NormalizedAnswer>,
}

#[derive(Debug, Clone)]
pub struct NormalizedBatch {
    pub exam_id: String,
    pub submissions: Vec<NormalizedSubmission>,
    pub warnings: Vec<Value>,
}

/// Parses a `"Q<n>"` option key into its 1-based question number.
fn parse_question_key(key: &str) -> Option<u32> {
    let t = key.trim();
    let digits = t.strip_prefix('Q').or_else(|| t.strip_prefix('q'))?;
    let n: u32 = digits.parse().ok()?;
    if n == 0 {
        None
    } else {
        Some(n)
    }
}

/// Normalizes one raw extraction batch.
///
/// Every record must name the same exam: a record with no exam id fails the
/// whole batch (`missing_exam_id`), and a record for a different exam than
/// `expected_exam_id` is skipped with a warning so a mixed scan pile is
/// never graded against the wrong key. Malformed option keys cost that
/// answer only, never the student or the batch.
pub fn normalize_batch(
    extraction: &Value,
    expected_exam_id: Option<&str>,
) -> Result<NormalizedBatch, GradeError> {
    let wire: ExtractionWire = serde_json::from_value(extraction.clone()).map_err(|e| {
        GradeError::new("bad_params", format!("invalid extraction payload: {}", e))
    })?;

    // Establish the batch's exam before touching any answers.
    let mut batch_exam: Option<String> = expected_exam_id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    for (i, record) in wire.extracted_data.iter().enumerate() {
        let exam_id = record
            .exam_info
            .exam_id
            .as_deref()
            .map(str::trim)
            .unwrap_or("");
        if exam_id.is_empty() {
            return Err(GradeError::new(
                "missing_exam_id",
                "raw extraction record has no exam identifier",
            )
            .with_details(json!({
                "record": i,
                "name": record.student_info.name.trim(),
            })));
        }
        if batch_exam.is_none() {
            batch_exam = Some(exam_id.to_string());
        }
    }
    let Some(batch_exam) = batch_exam else {
        return Err(GradeError::new(
            "missing_exam_id",
            "extraction batch is empty and no exam id was supplied",
        ));
    };

    let mut submissions = Vec::with_capacity(wire.extracted_data.len());
    let mut warnings = Vec::new();
    for record in wire.extracted_data {
        let identity = StudentIdentity {
            name: record.student_info.name.trim().to_string(),
            class_name: record.student_info.class.trim().to_string(),
            cin: record.student_info.cin.trim().to_string(),
        };
        let record_exam = record
            .exam_info
            .exam_id
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        if record_exam != batch_exam {
            warnings.push(json!({
                "code": "exam_mismatch",
                "message": "record belongs to a different exam and was skipped",
                "cin": identity.cin,
                "name": identity.name,
                "examId": record_exam,
            }));
            continue;
        }

        let mut answers = Vec::with_capacity(record.checked_options.len());
        for (raw_key, raw_value) in &record.checked_options {
            let Some(question_number) = parse_question_key(raw_key) else {
                warnings.push(json!({
                    "code": "malformed_key",
                    "message": "option key does not parse to a question number",
                    "cin": identity.cin,
                    "key": raw_key,
                }));
                continue;
            };
            let Some(letter) = raw_value.as_str() else {
                warnings.push(json!({
                    "code": "malformed_key",
                    "message": "option value is not a string",
                    "cin": identity.cin,
                    "key": raw_key,
                }));
                continue;
            };
            // The source format carries exactly one letter per question;
            // a blank cell means the question was left unanswered.
            let letter = letter.trim();
            let selected_letters = if letter.is_empty() {
                Vec::new()
            } else {
                vec![letter.to_string()]
            };
            answers.push(NormalizedAnswer {
                question_number,
                selected_letters,
            });
        }
        answers.sort_by_key(|a| a.question_number);

        submissions.push(NormalizedSubmission {
            identity,
            exam_id: record_exam,
            answers,
        });
    }

    Ok(NormalizedBatch {
        exam_id: batch_exam,
        submissions,
        warnings,
    })
}
