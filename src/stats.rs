use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;
use serde_json::{json, Value};

use crate::grade::{round_off_2_decimals, GradedStudentResult};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamInfo {
    pub title: String,
    pub exam_id: String,
    pub max_score: f64,
}

/// The deduplicated view of one graded batch. Replaced wholesale when the
/// exam is graded again; never patched in place.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamAggregate {
    pub exam_info: ExamInfo,
    pub students: Vec<GradedStudentResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupPolicy {
    FirstScan,
    LastScan,
    HighestScore,
}

impl DedupPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            DedupPolicy::FirstScan => "first_scan",
            DedupPolicy::LastScan => "last_scan",
            DedupPolicy::HighestScore => "highest_score",
        }
    }

    pub fn parse(s: &str) -> Option<DedupPolicy> {
        match s.to_ascii_lowercase().as_str() {
            "first_scan" => Some(DedupPolicy::FirstScan),
            "last_scan" => Some(DedupPolicy::LastScan),
            "highest_score" => Some(DedupPolicy::HighestScore),
            _ => None,
        }
    }
}

/// Collapses repeated CINs to one record each, preserving the order in
/// which students first appeared. Under `first_scan` later duplicates are
/// discarded; the other policies keep the first slot but swap in the later
/// or better-scoring record. Blank CINs carry no identity, so those records
/// always survive, each with a warning.
pub fn dedupe(
    students: Vec<GradedStudentResult>,
    policy: DedupPolicy,
) -> (Vec<GradedStudentResult>, Vec<Value>) {
    let mut kept: Vec<GradedStudentResult> = Vec::with_capacity(students.len());
    let mut slot_by_cin: HashMap<String, usize> = HashMap::new();
    let mut warnings = Vec::new();

    for student in students {
        let cin = student.student_identity.cin.clone();
        if cin.is_empty() {
            warnings.push(json!({
                "code": "blank_cin",
                "message": "record has no CIN and cannot be deduplicated",
                "name": student.student_identity.name,
            }));
            kept.push(student);
            continue;
        }
        match slot_by_cin.get(&cin) {
            None => {
                slot_by_cin.insert(cin, kept.len());
                kept.push(student);
            }
            Some(&slot) => match policy {
                DedupPolicy::FirstScan => {}
                DedupPolicy::LastScan => kept[slot] = student,
                DedupPolicy::HighestScore => {
                    if student.score > kept[slot].score {
                        kept[slot] = student;
                    }
                }
            },
        }
    }

    (kept, warnings)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopStudent {
    pub name: String,
    pub cin: String,
    pub score: f64,
}

/// Top K by score descending; equal scores keep their roster order.
pub fn top_students(students: &[GradedStudentResult], k: usize) -> Vec<TopStudent> {
    let mut ranked: Vec<&GradedStudentResult> = students.iter().collect();
    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    ranked
        .into_iter()
        .take(k)
        .map(|s| TopStudent {
            name: s.student_identity.name.clone(),
            cin: s.student_identity.cin.clone(),
            score: s.score,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassFail {
    pub passed: usize,
    pub failed: usize,
    pub threshold: f64,
}

/// Pass/fail partition at half the maximum score, inclusive pass.
pub fn pass_fail(students: &[GradedStudentResult], max_score: f64) -> PassFail {
    let threshold = max_score / 2.0;
    let passed = students.iter().filter(|s| s.score >= threshold).count();
    PassFail {
        passed,
        failed: students.len() - passed,
        threshold,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDifficulty {
    pub question_number: u32,
    pub incorrect_count: usize,
    pub incorrect_rate: f64,
}

/// Per-question difficulty: how many students answered each question
/// incorrectly, hardest first (ties by question number).
pub fn question_difficulty(students: &[GradedStudentResult]) -> Vec<QuestionDifficulty> {
    let mut incorrect: HashMap<u32, usize> = HashMap::new();
    for student in students {
        for answer in &student.answers {
            let entry = incorrect.entry(answer.question_number).or_insert(0);
            if !answer.is_correct {
                *entry += 1;
            }
        }
    }
    let total = students.len();
    let mut rows: Vec<QuestionDifficulty> = incorrect
        .into_iter()
        .map(|(question_number, count)| QuestionDifficulty {
            question_number,
            incorrect_count: count,
            incorrect_rate: if total > 0 {
                count as f64 / total as f64
            } else {
                0.0
            },
        })
        .collect();
    rows.sort_by(|a, b| {
        b.incorrect_count
            .cmp(&a.incorrect_count)
            .then(a.question_number.cmp(&b.question_number))
    });
    rows
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AnswerTotals {
    pub correct: usize,
    pub incorrect: usize,
}

pub fn answer_totals(students: &[GradedStudentResult]) -> AnswerTotals {
    let mut totals = AnswerTotals {
        correct: 0,
        incorrect: 0,
    };
    for student in students {
        totals.correct += student.correct_count;
        totals.incorrect += student.answered_count - student.correct_count;
    }
    totals
}

pub fn mean_score(students: &[GradedStudentResult]) -> f64 {
    if students.is_empty() {
        return 0.0;
    }
    let sum: f64 = students.iter().map(|s| s.score).sum();
    round_off_2_decimals(sum / students.len() as f64)
}

/// Scores in roster order, for the distribution chart.
pub fn score_distribution(students: &[GradedStudentResult]) -> Vec<f64> {
    students.iter().map(|s| s.score).collect()
}
