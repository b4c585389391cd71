use serde::Serialize;
use serde_json::{json, Value};

use crate::extract::{NormalizedSubmission, StudentIdentity};
use crate::key::AnswerKey;

/// Scores are scaled out of 20 unless the request says otherwise.
pub const DEFAULT_MAX_SCORE: f64 = 20.0;

#[derive(Debug, Clone, Serialize)]
pub struct GradeError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl GradeError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Half-up 2-decimal rounding used for every displayed score:
/// `floor(100*x + 0.5) / 100`.
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradedAnswer {
    pub question_number: u32,
    pub selected_choice_texts: Vec<String>,
    pub correct_choice_texts: Vec<String>,
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradedStudentResult {
    pub student_identity: StudentIdentity,
    pub answers: Vec<GradedAnswer>,
    pub correct_count: usize,
    pub answered_count: usize,
    pub score: f64,
}

fn multiset_eq(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a2 = a.to_vec();
    let mut b2 = b.to_vec();
    a2.sort();
    b2.sort();
    a2 == b2
}

/// Grades one normalized submission against the answer key.
///
/// Question numbers address the key positionally (question n is
/// `questions[n-1]`); a number past the end of the key is graded incorrect
/// with an empty correct set rather than failing the student. A submission
/// with zero answered questions has no defined score and is rejected with
/// `empty_submission`.
pub fn grade_submission(
    submission: &NormalizedSubmission,
    key: &AnswerKey,
    max_score: f64,
) -> Result<GradedStudentResult, GradeError> {
    if submission.answers.is_empty() {
        return Err(GradeError::new(
            "empty_submission",
            "student has no answered questions",
        )
        .with_details(json!({
            "cin": submission.identity.cin,
            "name": submission.identity.name,
        })));
    }

    let mut answers = Vec::with_capacity(submission.answers.len());
    let mut correct_count = 0usize;
    for ans in &submission.answers {
        let graded = match key.question(ans.question_number) {
            Some(q) => {
                let selected: Vec<String> = ans
                    .selected_letters
                    .iter()
                    .map(|l| q.text_for_letter(l))
                    .collect();
                let correct = q.correct_texts();
                let is_correct = multiset_eq(&selected, &correct);
                GradedAnswer {
                    question_number: ans.question_number,
                    selected_choice_texts: selected,
                    correct_choice_texts: correct,
                    is_correct,
                }
            }
            // Question number beyond the key: recorded, never matched.
            None => GradedAnswer {
                question_number: ans.question_number,
                selected_choice_texts: ans.selected_letters.clone(),
                correct_choice_texts: Vec::new(),
                is_correct: false,
            },
        };
        if graded.is_correct {
            correct_count += 1;
        }
        answers.push(graded);
    }

    let answered_count = answers.len();
    let score = scaled_score(correct_count, answered_count, max_score);
    Ok(GradedStudentResult {
        student_identity: submission.identity.clone(),
        answers,
        correct_count,
        answered_count,
        score,
    })
}

fn scaled_score(correct: usize, answered: usize, max_score: f64) -> f64 {
    if answered == 0 {
        return 0.0;
    }
    round_off_2_decimals(correct as f64 / answered as f64 * max_score)
}

/// Re-derives the score for a new maximum without re-running letter
/// matching. Score is purely a function of (correct, answered, maxScore).
pub fn rescore(result: &mut GradedStudentResult, max_score: f64) {
    result.score = scaled_score(result.correct_count, result.answered_count, max_score);
}
