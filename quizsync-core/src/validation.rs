//! Authoring-time validation of tests and document integrity audits.
//!
//! The authoring form rejects tests that fail `validate_test`. Whole
//! documents are never rejected; `integrity_issues` only reports what a
//! hand-edited or imported document got wrong.

use std::collections::HashSet;

use crate::{Error, Result, Test, UserData};

/// Minimum number of options a multiple-choice question needs.
pub const MIN_OPTIONS: usize = 2;

/// Validate a test as the authoring form would before saving it.
pub fn validate_test(test: &Test) -> Result<()> {
    if test.title.trim().is_empty() {
        return Err(Error::Validation("test title cannot be empty".to_string()));
    }
    if test.questions.is_empty() {
        return Err(Error::Validation(format!(
            "test '{}' has no questions",
            test.title
        )));
    }

    for (index, question) in test.questions.iter().enumerate() {
        let number = index + 1;
        if question.text.trim().is_empty() {
            return Err(Error::Validation(format!("question {} has no text", number)));
        }
        if question.options.len() < MIN_OPTIONS {
            return Err(Error::Validation(format!(
                "question {} needs at least {} options",
                number, MIN_OPTIONS
            )));
        }

        let mut seen = HashSet::new();
        for option in &question.options {
            if option.text.trim().is_empty() {
                return Err(Error::Validation(format!(
                    "question {} has an empty option",
                    number
                )));
            }
            if !seen.insert(option.id.as_str()) {
                return Err(Error::Validation(format!(
                    "question {} has duplicate option id '{}'",
                    number, option.id
                )));
            }
        }

        if question.correct_option().is_none() {
            return Err(Error::Validation(format!(
                "question {} has no valid correct option",
                number
            )));
        }
    }

    Ok(())
}

/// A standing-invariant violation found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityIssue {
    /// `correct_option_id` does not name any of the question's options
    DanglingCorrectOption { test_id: String, question_id: String },
    /// A test points at a subject that does not exist
    OrphanTest { test_id: String, subject_id: String },
    /// A result points at a test that does not exist
    OrphanResult { result_id: String, test_id: String },
}

/// Audit a document without modifying it.
pub fn integrity_issues(data: &UserData) -> Vec<IntegrityIssue> {
    let mut issues = Vec::new();

    for test in &data.tests {
        if data.subject(&test.subject_id).is_none() {
            issues.push(IntegrityIssue::OrphanTest {
                test_id: test.id.clone(),
                subject_id: test.subject_id.clone(),
            });
        }
        for question in &test.questions {
            if question.correct_option().is_none() {
                issues.push(IntegrityIssue::DanglingCorrectOption {
                    test_id: test.id.clone(),
                    question_id: question.id.clone(),
                });
            }
        }
    }

    for result in &data.results {
        if data.test(&result.test_id).is_none() {
            issues.push(IntegrityIssue::OrphanResult {
                result_id: result.id.clone(),
                test_id: result.test_id.clone(),
            });
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Question, QuestionOption};

    fn valid_test() -> Test {
        Test {
            id: "t1".into(),
            subject_id: "s1".into(),
            title: "Capitals".into(),
            description: None,
            questions: vec![Question {
                id: "q1".into(),
                text: "Capital of France?".into(),
                options: vec![
                    QuestionOption { id: "a".into(), text: "Paris".into() },
                    QuestionOption { id: "b".into(), text: "Lyon".into() },
                ],
                correct_option_id: "a".into(),
                explanation: "Paris has been the capital since 987.".into(),
            }],
            created_at: 0,
            updated_at: None,
        }
    }

    #[test]
    fn test_valid_test_passes() {
        assert!(validate_test(&valid_test()).is_ok());
    }

    #[test]
    fn test_rejects_dangling_correct_option() {
        let mut test = valid_test();
        test.questions[0].correct_option_id = "zzz".into();
        let err = validate_test(&test).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_FAILED");
    }

    #[test]
    fn test_rejects_single_option() {
        let mut test = valid_test();
        test.questions[0].options.truncate(1);
        assert!(validate_test(&test).is_err());
    }

    #[test]
    fn test_rejects_duplicate_option_ids() {
        let mut test = valid_test();
        test.questions[0].options[1].id = "a".into();
        assert!(validate_test(&test).is_err());
    }

    #[test]
    fn test_rejects_blank_title() {
        let mut test = valid_test();
        test.title = "   ".into();
        assert!(validate_test(&test).is_err());
    }

    #[test]
    fn test_integrity_issues_reported() {
        let mut data = UserData::new();
        let mut test = valid_test();
        test.questions[0].correct_option_id = "missing".into();
        data.tests.push(test);

        let issues = integrity_issues(&data);
        assert_eq!(issues.len(), 2);
        assert!(issues.contains(&IntegrityIssue::OrphanTest {
            test_id: "t1".into(),
            subject_id: "s1".into(),
        }));
        assert!(issues.contains(&IntegrityIssue::DanglingCorrectOption {
            test_id: "t1".into(),
            question_id: "q1".into(),
        }));
    }
}
