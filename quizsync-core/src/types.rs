use serde::{Deserialize, Serialize};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Fresh random identifier for any document entity.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A subject groups related tests (e.g. "Biology").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub created_at: i64,
}

/// One answer choice of a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub text: String,
    pub options: Vec<QuestionOption>,
    pub correct_option_id: String,
    #[serde(default)]
    pub explanation: String,
}

impl Question {
    /// The option `correct_option_id` points at, if it resolves.
    pub fn correct_option(&self) -> Option<&QuestionOption> {
        self.options.iter().find(|o| o.id == self.correct_option_id)
    }
}

/// A multiple-choice test owned by a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Test {
    pub id: String,
    pub subject_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

/// How a quiz attempt was run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuizMode {
    /// Immediate feedback after every question
    Practice,
    /// Feedback only at the end
    Exam,
    /// Replaying previously failed questions
    Review,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    pub question_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_option_id: Option<String>,
    pub correct: bool,
}

/// One completed quiz attempt. Results are append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub id: String,
    pub test_id: String,
    pub subject_id: String,
    pub mode: QuizMode,
    #[serde(default)]
    pub answers: Vec<AnswerRecord>,
    pub score: u32,
    pub total_questions: u32,
    pub started_at: i64,
    pub completed_at: i64,
}

impl TestResult {
    /// Build a result from the recorded answers, deriving score and totals.
    pub fn from_answers(
        test: &Test,
        mode: QuizMode,
        answers: Vec<AnswerRecord>,
        started_at: i64,
    ) -> Self {
        let score = answers.iter().filter(|a| a.correct).count() as u32;
        Self {
            id: new_id(),
            test_id: test.id.clone(),
            subject_id: test.subject_id.clone(),
            mode,
            total_questions: answers.len() as u32,
            answers,
            score,
            started_at,
            completed_at: now_millis(),
        }
    }

    /// Score as a percentage in `0.0..=100.0`.
    pub fn percentage(&self) -> f64 {
        if self.total_questions == 0 {
            0.0
        } else {
            self.score as f64 * 100.0 / self.total_questions as f64
        }
    }
}

/// The whole application state, always read and written as one snapshot.
///
/// Every field defaults when missing so documents saved by older versions
/// load as a shallow merge over the empty shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserData {
    pub subjects: Vec<Subject>,
    pub tests: Vec<Test>,
    pub results: Vec<TestResult>,
    pub failed_question_ids: Vec<String>,
    pub bookmarked_question_ids: Vec<String>,
}

/// Per-collection counts shown when comparing two snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    pub subjects: usize,
    pub tests: usize,
    pub questions: usize,
    pub results: usize,
    pub failed_questions: usize,
    pub bookmarked_questions: usize,
}

impl UserData {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if the document holds anything worth protecting in a conflict.
    ///
    /// Failed and bookmarked ids alone do not count: without the tests they
    /// point into they carry no user content.
    pub fn has_content(&self) -> bool {
        !self.subjects.is_empty() || !self.tests.is_empty() || !self.results.is_empty()
    }

    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            subjects: self.subjects.len(),
            tests: self.tests.len(),
            questions: self.tests.iter().map(|t| t.questions.len()).sum(),
            results: self.results.len(),
            failed_questions: self.failed_question_ids.len(),
            bookmarked_questions: self.bookmarked_question_ids.len(),
        }
    }

    pub fn subject(&self, id: &str) -> Option<&Subject> {
        self.subjects.iter().find(|s| s.id == id)
    }

    pub fn test(&self, id: &str) -> Option<&Test> {
        self.tests.iter().find(|t| t.id == id)
    }

    pub fn tests_for_subject<'a>(&'a self, subject_id: &'a str) -> impl Iterator<Item = &'a Test> {
        self.tests.iter().filter(move |t| t.subject_id == subject_id)
    }

    pub fn results_for_test<'a>(&'a self, test_id: &'a str) -> impl Iterator<Item = &'a TestResult> {
        self.results.iter().filter(move |r| r.test_id == test_id)
    }

    pub fn add_subject(
        &mut self,
        name: impl Into<String>,
        description: Option<String>,
        color: Option<String>,
    ) -> Subject {
        let subject = Subject {
            id: new_id(),
            name: name.into(),
            description,
            color,
            created_at: now_millis(),
        };
        self.subjects.push(subject.clone());
        subject
    }

    /// Remove a subject together with its tests and their results.
    pub fn remove_subject(&mut self, id: &str) -> bool {
        let before = self.subjects.len();
        self.subjects.retain(|s| s.id != id);
        if self.subjects.len() == before {
            return false;
        }

        let test_ids: Vec<String> = self
            .tests_for_subject(id)
            .map(|t| t.id.clone())
            .collect();
        for test_id in test_ids {
            self.remove_test(&test_id);
        }
        self.results.retain(|r| r.subject_id != id);
        true
    }

    /// Replace the test with the same id, or append it.
    pub fn upsert_test(&mut self, mut test: Test) {
        match self.tests.iter_mut().find(|t| t.id == test.id) {
            Some(existing) => {
                test.updated_at = Some(now_millis());
                *existing = test;
            }
            None => self.tests.push(test),
        }
    }

    /// Remove a test, its results, and every id-set entry for its questions.
    pub fn remove_test(&mut self, id: &str) -> bool {
        let Some(pos) = self.tests.iter().position(|t| t.id == id) else {
            return false;
        };
        let test = self.tests.remove(pos);
        self.results.retain(|r| r.test_id != id);

        let question_ids: Vec<&str> = test.questions.iter().map(|q| q.id.as_str()).collect();
        self.failed_question_ids
            .retain(|q| !question_ids.contains(&q.as_str()));
        self.bookmarked_question_ids
            .retain(|q| !question_ids.contains(&q.as_str()));
        true
    }

    /// Append a quiz attempt and update the failed-question set from it.
    pub fn record_result(&mut self, result: TestResult) {
        for answer in &result.answers {
            if answer.correct {
                self.failed_question_ids.retain(|q| q != &answer.question_id);
            } else if !self.failed_question_ids.contains(&answer.question_id) {
                self.failed_question_ids.push(answer.question_id.clone());
            }
        }
        self.results.push(result);
    }

    /// Flip the bookmark on a question, returning the new state.
    pub fn toggle_bookmark(&mut self, question_id: &str) -> bool {
        if let Some(pos) = self
            .bookmarked_question_ids
            .iter()
            .position(|q| q == question_id)
        {
            self.bookmarked_question_ids.remove(pos);
            false
        } else {
            self.bookmarked_question_ids.push(question_id.to_string());
            true
        }
    }

    pub fn clear_failed(&mut self) {
        self.failed_question_ids.clear();
    }

    /// Append another document's collections, skipping ids already present.
    pub fn merge(&mut self, other: UserData) {
        for subject in other.subjects {
            if self.subject(&subject.id).is_none() {
                self.subjects.push(subject);
            }
        }
        for test in other.tests {
            if self.test(&test.id).is_none() {
                self.tests.push(test);
            }
        }
        for result in other.results {
            if !self.results.iter().any(|r| r.id == result.id) {
                self.results.push(result);
            }
        }
        for id in other.failed_question_ids {
            if !self.failed_question_ids.contains(&id) {
                self.failed_question_ids.push(id);
            }
        }
        for id in other.bookmarked_question_ids {
            if !self.bookmarked_question_ids.contains(&id) {
                self.bookmarked_question_ids.push(id);
            }
        }
    }
}
