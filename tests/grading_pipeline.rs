
use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar};

fn capitals_quiz() -> serde_json::Value {
    json!({
        "id": 7,
        "title": "Capitals",
        "exam_id": "EX1",
        "questions": [
            {
                "question_text": "Capital of France?",
                "question_type": "multiple-choice",
                "choices": [
                    { "choice_text": "Paris", "is_correct": true },
                    { "choice_text": "London", "is_correct": false },
                    { "choice_text": "Berlin", "is_correct": false },
                    { "choice_text": "Rome", "is_correct": false }
                ]
            },
            {
                "question_text": "Capital of Italy?",
                "question_type": "multiple-choice",
                "choices": [
                    { "choice_text": "Madrid", "is_correct": false },
                    { "choice_text": "Rome", "is_correct": true },
                    { "choice_text": "Athens", "is_correct": false }
                ]
            }
        ]
    })
}

fn record(name: &str, cin: &str, exam: &str, options: serde_json::Value) -> serde_json::Value {
    json!({
        "student_info": { "Name": name, "Class": "2A", "CIN": cin },
        "checked_options": options,
        "exam_info": { "exam_id": exam }
    })
}

fn extraction(records: Vec<serde_json::Value>) -> serde_json::Value {
    json!({ "extractedData": records })
}

#[test]
fn grade_batch_maps_letters_and_scales_scores() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grading.gradeBatch",
        json!({
            "quiz": capitals_quiz(),
            "extraction": extraction(vec![
                record("Amel", "111", "EX1", json!({ "Q1": "A", "Q2": "A" }))
            ]),
        }),
    );

    assert_eq!(result["examId"], "EX1");
    assert_eq!(result["maxScore"].as_f64(), Some(20.0));
    assert_eq!(result["recordsScanned"], 1);
    assert_eq!(result["studentsGraded"], 1);
    assert_eq!(result["studentsKept"], 1);
    assert!(!result["batchId"].as_str().expect("batchId").is_empty());
    assert!(!result["gradedAt"].as_str().expect("gradedAt").is_empty());

    let student = &result["aggregate"]["students"][0];
    assert_eq!(student["studentIdentity"]["name"], "Amel");
    assert_eq!(student["studentIdentity"]["cin"], "111");
    assert_eq!(student["correctCount"], 1);
    assert_eq!(student["answeredCount"], 2);
    // 1 of 2 correct out of 20.
    assert_eq!(student["score"].as_f64(), Some(10.0));

    let q1 = &student["answers"][0];
    assert_eq!(q1["questionNumber"], 1);
    assert_eq!(q1["selectedChoiceTexts"][0], "Paris");
    assert_eq!(q1["correctChoiceTexts"][0], "Paris");
    assert_eq!(q1["isCorrect"], true);
    let q2 = &student["answers"][1];
    assert_eq!(q2["selectedChoiceTexts"][0], "Madrid");
    assert_eq!(q2["correctChoiceTexts"][0], "Rome");
    assert_eq!(q2["isCorrect"], false);

    assert_eq!(result["aggregate"]["examInfo"]["title"], "Capitals");
    assert_eq!(result["aggregate"]["examInfo"]["maxScore"].as_f64(), Some(20.0));
}

#[test]
fn duplicate_cin_keeps_the_first_scan() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grading.gradeBatch",
        json!({
            "quiz": capitals_quiz(),
            "extraction": extraction(vec![
                record("Amel", "111", "EX1", json!({ "Q1": "A", "Q2": "B" })),
                record("Amel Again", "111", "EX1", json!({ "Q1": "B", "Q2": "A" })),
                record("Badis", "222", "EX1", json!({ "Q1": "B", "Q2": "B" })),
            ]),
        }),
    );

    assert_eq!(result["studentsGraded"], 3);
    assert_eq!(result["studentsKept"], 2);
    let students = result["aggregate"]["students"].as_array().expect("students");
    assert_eq!(students.len(), 2);
    assert_eq!(students[0]["studentIdentity"]["name"], "Amel");
    assert_eq!(students[0]["score"].as_f64(), Some(20.0));
    assert_eq!(students[1]["studentIdentity"]["cin"], "222");
}

#[test]
fn regrading_the_same_batch_is_idempotent() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let params = json!({
        "quiz": capitals_quiz(),
        "extraction": extraction(vec![
            record("Amel", "111", "EX1", json!({ "Q1": "A", "Q2": "A" })),
            record("Badis", "222", "EX1", json!({ "Q1": "B", "Q2": "B" })),
        ]),
    });
    let first = request_ok(&mut stdin, &mut reader, "1", "grading.gradeBatch", params.clone());
    let second = request_ok(&mut stdin, &mut reader, "2", "grading.gradeBatch", params);

    // Batch metadata is fresh every run; the graded data is not.
    assert_ne!(first["batchId"], second["batchId"]);
    assert_eq!(first["aggregate"], second["aggregate"]);
    assert_eq!(first["warnings"], second["warnings"]);
}

#[test]
fn rescore_rescales_stored_results_without_rematching() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let questions: Vec<serde_json::Value> = (1..=10)
        .map(|i| {
            json!({
                "question_text": format!("Question {}", i),
                "question_type": "multiple-choice",
                "choices": [
                    { "choice_text": "right", "is_correct": true },
                    { "choice_text": "wrong", "is_correct": false }
                ]
            })
        })
        .collect();
    let quiz = json!({ "title": "Ten", "exam_id": "EX-TEN", "questions": questions });
    let mut options = serde_json::Map::new();
    for i in 1..=10u32 {
        let letter = if i <= 7 { "A" } else { "B" };
        options.insert(format!("Q{}", i), json!(letter));
    }
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grading.gradeBatch",
        json!({
            "quiz": quiz,
            "extraction": extraction(vec![record("Amel", "111", "EX-TEN", json!(options))]),
        }),
    );
    assert_eq!(
        result["aggregate"]["students"][0]["score"].as_f64(),
        Some(14.0)
    );

    let rescored = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grading.rescore",
        json!({ "examId": "EX-TEN", "maxScore": 10.0 }),
    );
    let student = &rescored["aggregate"]["students"][0];
    assert_eq!(student["score"].as_f64(), Some(7.0));
    assert_eq!(student["correctCount"], 7);
    assert_eq!(rescored["aggregate"]["examInfo"]["maxScore"].as_f64(), Some(10.0));

    let back = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grading.rescore",
        json!({ "examId": "EX-TEN", "maxScore": 20.0 }),
    );
    assert_eq!(
        back["aggregate"]["students"][0]["score"].as_f64(),
        Some(14.0)
    );

    let error = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "grading.rescore",
        json!({ "examId": "NOPE", "maxScore": 10.0 }),
    );
    assert_eq!(error["code"], "unknown_exam");
}

#[test]
fn unreadable_marks_never_abort_the_batch() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grading.gradeBatch",
        json!({
            "quiz": capitals_quiz(),
            // "Z" addresses no choice; Q9 addresses no question.
            "extraction": extraction(vec![
                record("Amel", "111", "EX1", json!({ "Q1": "Z", "Q9": "A" }))
            ]),
        }),
    );

    let student = &result["aggregate"]["students"][0];
    assert_eq!(student["answers"][0]["selectedChoiceTexts"][0], "Z");
    assert_eq!(student["answers"][0]["isCorrect"], false);
    assert_eq!(student["answers"][1]["questionNumber"], 9);
    assert_eq!(student["answers"][1]["selectedChoiceTexts"][0], "A");
    assert_eq!(
        student["answers"][1]["correctChoiceTexts"]
            .as_array()
            .expect("correct texts")
            .len(),
        0
    );
    assert_eq!(student["score"].as_f64(), Some(0.0));
}

#[test]
fn record_without_exam_id_fails_the_whole_batch() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let error = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "grading.gradeBatch",
        json!({
            "quiz": capitals_quiz(),
            "extraction": extraction(vec![
                record("Amel", "111", "EX1", json!({ "Q1": "A" })),
                json!({
                    "student_info": { "Name": "Lost", "Class": "2A", "CIN": "999" },
                    "checked_options": { "Q1": "A" },
                    "exam_info": {}
                }),
            ]),
        }),
    );
    assert_eq!(error["code"], "missing_exam_id");
    assert_eq!(error["details"]["name"], "Lost");
}

#[test]
fn malformed_option_keys_warn_but_grade_the_rest() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grading.gradeBatch",
        json!({
            "quiz": capitals_quiz(),
            "extraction": extraction(vec![
                record("Amel", "111", "EX1", json!({ "Q1": "A", "Qx": "B", "7": "C" }))
            ]),
        }),
    );

    let warnings = result["warnings"].as_array().expect("warnings");
    let malformed: Vec<_> = warnings
        .iter()
        .filter(|w| w["code"] == "malformed_key")
        .collect();
    assert_eq!(malformed.len(), 2);
    assert!(malformed.iter().all(|w| w["cin"] == "111"));

    let student = &result["aggregate"]["students"][0];
    assert_eq!(student["answeredCount"], 1);
    assert_eq!(student["score"].as_f64(), Some(20.0));
}

#[test]
fn empty_sheets_are_reported_and_excluded() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grading.gradeBatch",
        json!({
            "quiz": capitals_quiz(),
            "extraction": extraction(vec![
                record("Blank", "333", "EX1", json!({})),
                record("Amel", "111", "EX1", json!({ "Q1": "A" })),
            ]),
        }),
    );

    assert_eq!(result["recordsScanned"], 2);
    assert_eq!(result["studentsGraded"], 1);
    assert_eq!(result["studentsKept"], 1);
    let warnings = result["warnings"].as_array().expect("warnings");
    let empty: Vec<_> = warnings
        .iter()
        .filter(|w| w["code"] == "empty_submission")
        .collect();
    assert_eq!(empty.len(), 1);
    assert_eq!(empty[0]["cin"], "333");
    assert_eq!(
        result["aggregate"]["students"][0]["studentIdentity"]["cin"],
        "111"
    );
}

#[test]
fn key_build_and_normalize_are_exposed_standalone() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let built = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "key.build",
        json!({ "quiz": capitals_quiz() }),
    );
    assert_eq!(built["questionCount"], 2);
    assert_eq!(built["answerKey"]["examId"], "EX1");
    assert_eq!(
        built["answerKey"]["questions"][0]["choices"][0]["text"],
        "Paris"
    );

    let normalized = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "submissions.normalize",
        json!({
            "extraction": extraction(vec![
                record(" Amel ", " 111 ", "EX1", json!({ "Q2": "B", "Q1": " C " }))
            ]),
        }),
    );
    assert_eq!(normalized["examId"], "EX1");
    assert_eq!(normalized["studentCount"], 1);
    let student = &normalized["students"][0];
    assert_eq!(student["identity"]["name"], "Amel");
    assert_eq!(student["identity"]["cin"], "111");
    // Answers come back ordered by question number with trimmed letters.
    assert_eq!(student["answers"][0]["questionNumber"], 1);
    assert_eq!(student["answers"][0]["selectedLetters"][0], "C");
    assert_eq!(student["answers"][1]["questionNumber"], 2);
}
