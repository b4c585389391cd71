use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::grade::GradeError;

/// Wire shape of a quiz as the backend serves it. Parsed strictly so that
/// malformed payloads are rejected before they reach grading.
#[derive(Debug, Deserialize)]
struct QuizWire {
    #[serde(default)]
    title: String,
    exam_id: String,
    questions: Vec<QuestionWire>,
}

#[derive(Debug, Deserialize)]
struct QuestionWire {
    question_text: String,
    #[serde(default)]
    question_type: Option<String>,
    #[serde(default)]
    choices: Vec<ChoiceWire>,
}

#[derive(Debug, Deserialize)]
struct ChoiceWire {
    choice_text: String,
    is_correct: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionKind {
    MultipleChoice,
    ShortAnswer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Choice {
    pub text: String,
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub text: String,
    pub kind: QuestionKind,
    pub choices: Vec<Choice>,
}

/// Canonical, position-indexed correct-answer table for one exam.
/// The i-th entry of `questions` is question i, 1-indexed; choice position
/// maps to the letter label (index 0 = A, 1 = B, ...).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerKey {
    pub exam_id: String,
    pub title: String,
    pub questions: Vec<Question>,
}

impl AnswerKey {
    /// Looks up a question by its 1-indexed number.
    pub fn question(&self, number: u32) -> Option<&Question> {
        if number == 0 {
            return None;
        }
        self.questions.get((number - 1) as usize)
    }
}

impl Question {
    pub fn correct_texts(&self) -> Vec<String> {
        self.choices
            .iter()
            .filter(|c| c.is_correct)
            .map(|c| c.text.clone())
            .collect()
    }

    /// Maps a letter label to the choice text it addresses. Letters outside
    /// the choice range come back verbatim so a stray mark never aborts
    /// grading; it just fails the comparison.
    pub fn text_for_letter(&self, letter: &str) -> String {
        match letter_index(letter) {
            Some(i) if i < self.choices.len() => self.choices[i].text.clone(),
            _ => letter.to_string(),
        }
    }
}

/// Zero-based choice index for a single letter label (`A` -> 0, `B` -> 1).
pub fn letter_index(letter: &str) -> Option<usize> {
    let t = letter.trim();
    let mut chars = t.chars();
    let c = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    if !c.is_ascii_alphabetic() {
        return None;
    }
    Some((c.to_ascii_uppercase() as u8 - b'A') as usize)
}

fn parse_kind(raw: Option<&str>) -> QuestionKind {
    match raw {
        Some(s) if s.eq_ignore_ascii_case("short-answer") => QuestionKind::ShortAnswer,
        _ => QuestionKind::MultipleChoice,
    }
}

/// Builds the canonical answer key from backend quiz JSON. Multiple-choice
/// questions with no correct choice are a data defect upstream; they are
/// reported as warnings, never a failure.
pub fn build_answer_key(quiz: &Value) -> Result<(AnswerKey, Vec<Value>), GradeError> {
    let wire: QuizWire = serde_json::from_value(quiz.clone()).map_err(|e| {
        GradeError::new("bad_params", format!("invalid quiz payload: {}", e))
    })?;
    if wire.exam_id.trim().is_empty() {
        return Err(GradeError::new("bad_params", "quiz has empty exam_id"));
    }

    let mut warnings = Vec::new();
    let mut questions = Vec::with_capacity(wire.questions.len());
    for (i, q) in wire.questions.into_iter().enumerate() {
        let kind = parse_kind(q.question_type.as_deref());
        let choices: Vec<Choice> = q
            .choices
            .into_iter()
            .map(|c| Choice {
                text: c.choice_text,
                is_correct: c.is_correct,
            })
            .collect();
        if kind == QuestionKind::MultipleChoice && !choices.iter().any(|c| c.is_correct) {
            warnings.push(json!({
                "code": "no_correct_choices",
                "message": "multiple-choice question has no correct choice configured",
                "questionNumber": i + 1,
            }));
        }
        questions.push(Question {
            text: q.question_text,
            kind,
            choices,
        });
    }

    Ok((
        AnswerKey {
            exam_id: wire.exam_id.trim().to_string(),
            title: wire.title.trim().to_string(),
            questions,
        },
        warnings,
    ))
}
