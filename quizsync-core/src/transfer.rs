//! Export and import of user data as JSON files.
//!
//! Imports never trust incoming identifiers: every subject, test, question,
//! option, and result gets a fresh id, and references between them are
//! remapped. The correct option is remapped by its position in the option
//! list.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::types::{new_id, now_millis};
use crate::{Error, Question, QuestionOption, Result, Test, UserData};

/// What an export file contains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind<'a> {
    /// The whole document
    UserData,
    /// A single test, named after its title
    Test(&'a str),
}

/// Pretty-printed JSON of the whole document.
pub fn export_user_data(data: &UserData) -> Result<String> {
    Ok(serde_json::to_string_pretty(data)?)
}

/// Pretty-printed JSON of a single test.
pub fn export_test(test: &Test) -> Result<String> {
    Ok(serde_json::to_string_pretty(test)?)
}

/// File name for an export, suffixed with the ISO date.
pub fn export_file_name(kind: ExportKind<'_>, date: NaiveDate) -> String {
    let date = date.format("%Y-%m-%d");
    match kind {
        ExportKind::UserData => format!("quiz-data-{}.json", date),
        ExportKind::Test(title) => format!("test-{}-{}.json", slugify(title), date),
    }
}

fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug.to_string()
    }
}

/// Parse an exported document, regenerating every identifier.
///
/// Requires at least `subjects` and `tests` arrays. Any shape error rejects
/// the whole file.
pub fn import_user_data(json: &str) -> Result<UserData> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| Error::InvalidFormat(format!("not valid JSON: {}", e)))?;

    for field in ["subjects", "tests"] {
        if !value.get(field).map_or(false, Value::is_array) {
            return Err(Error::InvalidFormat(format!(
                "missing required '{}' array",
                field
            )));
        }
    }

    let data: UserData = serde_json::from_value(value)
        .map_err(|e| Error::InvalidFormat(e.to_string()))?;

    Ok(regenerate_ids(data))
}

/// Parse a single test (typically AI-generated) and attach it to a subject.
///
/// Requires a `title` and a `questions` array. Options may be objects with
/// `id` and `text`, or plain strings.
pub fn import_test(json: &str, subject_id: &str) -> Result<Test> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| Error::InvalidFormat(format!("not valid JSON: {}", e)))?;

    if !value.get("title").map_or(false, Value::is_string) {
        return Err(Error::InvalidFormat("missing required 'title'".to_string()));
    }
    if !value.get("questions").map_or(false, Value::is_array) {
        return Err(Error::InvalidFormat(
            "missing required 'questions' array".to_string(),
        ));
    }

    let incoming: IncomingTest = serde_json::from_value(value)
        .map_err(|e| Error::InvalidFormat(e.to_string()))?;

    let questions = incoming
        .questions
        .into_iter()
        .map(|q| {
            let options: Vec<QuestionOption> = q
                .options
                .into_iter()
                .enumerate()
                .map(|(i, o)| o.into_option(i))
                .collect();
            let question = Question {
                id: q.id.unwrap_or_default(),
                text: q.text,
                correct_option_id: q.correct_option_id.unwrap_or_default(),
                options,
                explanation: q.explanation.unwrap_or_default(),
            };
            regenerate_question(question).0
        })
        .collect();

    let test = Test {
        id: new_id(),
        subject_id: subject_id.to_string(),
        title: incoming.title,
        description: incoming.description,
        questions,
        created_at: now_millis(),
        updated_at: None,
    };
    debug!(test_id = %test.id, questions = test.questions.len(), "imported test");
    Ok(test)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomingTest {
    title: String,
    #[serde(default)]
    description: Option<String>,
    questions: Vec<IncomingQuestion>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomingQuestion {
    #[serde(default)]
    id: Option<String>,
    #[serde(alias = "question")]
    text: String,
    #[serde(default)]
    options: Vec<IncomingOption>,
    #[serde(default)]
    correct_option_id: Option<String>,
    #[serde(default)]
    explanation: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IncomingOption {
    Full {
        #[serde(default)]
        id: Option<String>,
        text: String,
    },
    Text(String),
}

impl IncomingOption {
    fn into_option(self, index: usize) -> QuestionOption {
        match self {
            IncomingOption::Full { id, text } => QuestionOption {
                id: id.unwrap_or_else(|| index.to_string()),
                text,
            },
            IncomingOption::Text(text) => QuestionOption {
                id: index.to_string(),
                text,
            },
        }
    }
}

/// Old option id -> new option id for one question.
type OptionMap = HashMap<String, String>;

/// Give a question and its options fresh ids, remapping the correct option
/// by position.
fn regenerate_question(question: Question) -> (Question, OptionMap) {
    let correct_index = question
        .options
        .iter()
        .position(|o| o.id == question.correct_option_id);

    let mut option_map = OptionMap::new();
    let options: Vec<QuestionOption> = question
        .options
        .into_iter()
        .map(|o| {
            let id = new_id();
            option_map.insert(o.id, id.clone());
            QuestionOption { id, text: o.text }
        })
        .collect();

    let correct_option_id = match correct_index {
        Some(index) => options[index].id.clone(),
        None => {
            // Unresolvable reference: degrade to the first option.
            warn!(
                question = %question.text,
                correct_option_id = %question.correct_option_id,
                "correct option not found among options, using first option"
            );
            options.first().map(|o| o.id.clone()).unwrap_or_default()
        }
    };

    let regenerated = Question {
        id: new_id(),
        text: question.text,
        options,
        correct_option_id,
        explanation: question.explanation,
    };
    (regenerated, option_map)
}

fn regenerate_ids(data: UserData) -> UserData {
    let mut subject_ids: HashMap<String, String> = HashMap::new();
    let mut test_ids: HashMap<String, String> = HashMap::new();
    let mut question_ids: HashMap<String, (String, OptionMap)> = HashMap::new();

    let subjects = data
        .subjects
        .into_iter()
        .map(|mut s| {
            let id = new_id();
            subject_ids.insert(std::mem::replace(&mut s.id, id.clone()), id);
            s
        })
        .collect();

    let tests = data
        .tests
        .into_iter()
        .map(|mut t| {
            let id = new_id();
            test_ids.insert(std::mem::replace(&mut t.id, id.clone()), id);
            if let Some(new_subject) = subject_ids.get(&t.subject_id) {
                t.subject_id = new_subject.clone();
            }
            t.questions = std::mem::take(&mut t.questions)
                .into_iter()
                .map(|q| {
                    let old_id = q.id.clone();
                    let (q, options) = regenerate_question(q);
                    question_ids.insert(old_id, (q.id.clone(), options));
                    q
                })
                .collect();
            t
        })
        .collect();

    let results = data
        .results
        .into_iter()
        .map(|mut r| {
            r.id = new_id();
            if let Some(new_test) = test_ids.get(&r.test_id) {
                r.test_id = new_test.clone();
            }
            if let Some(new_subject) = subject_ids.get(&r.subject_id) {
                r.subject_id = new_subject.clone();
            }
            for answer in &mut r.answers {
                if let Some((new_question, options)) = question_ids.get(&answer.question_id) {
                    answer.question_id = new_question.clone();
                    answer.selected_option_id = answer
                        .selected_option_id
                        .as_ref()
                        .and_then(|old| options.get(old).cloned());
                }
            }
            r
        })
        .collect();

    let remap_set = |ids: Vec<String>| -> Vec<String> {
        ids.into_iter()
            .filter_map(|old| question_ids.get(&old).map(|(new, _)| new.clone()))
            .collect()
    };

    UserData {
        subjects,
        tests,
        results,
        failed_question_ids: remap_set(data.failed_question_ids),
        bookmarked_question_ids: remap_set(data.bookmarked_question_ids),
    }
}
