use anyhow::Result;
use quizsync_core::transfer::{export_test, export_user_data, import_test, import_user_data};
use quizsync_core::validation::{integrity_issues, validate_test};
use quizsync_core::{Error, UserData};
use quizsync_test_utils::*;
use std::collections::HashSet;

fn all_ids(data: &UserData) -> HashSet<String> {
    let mut ids = HashSet::new();
    ids.extend(data.subjects.iter().map(|s| s.id.clone()));
    for test in &data.tests {
        ids.insert(test.id.clone());
        for question in &test.questions {
            ids.insert(question.id.clone());
            ids.extend(question.options.iter().map(|o| o.id.clone()));
        }
    }
    ids.extend(data.results.iter().map(|r| r.id.clone()));
    ids
}

#[test]
fn test_export_import_round_trip() -> Result<()> {
    let original = populated(2, 3, 4);
    let json = export_user_data(&original)?;
    let imported = import_user_data(&json)?;

    assert_eq!(imported.summary(), original.summary());
    assert!(all_ids(&imported).is_disjoint(&all_ids(&original)));
    assert!(integrity_issues(&imported).is_empty());

    for (before, after) in original.tests.iter().zip(&imported.tests) {
        assert_eq!(before.title, after.title);
        validate_test(after)?;
        for (q_before, q_after) in before.questions.iter().zip(&after.questions) {
            assert_eq!(q_before.text, q_after.text);
            let correct_before = q_before.correct_option().unwrap();
            let correct_after = q_after.correct_option().expect("correct option resolves");
            assert_eq!(correct_before.text, correct_after.text);
        }
    }

    // Subject references follow the remapped ids.
    for (before, after) in original.tests.iter().zip(&imported.tests) {
        let subject_before = original.subject(&before.subject_id).unwrap();
        let subject_after = imported.subject(&after.subject_id).unwrap();
        assert_eq!(subject_before.name, subject_after.name);
    }
    Ok(())
}

#[test]
fn test_round_trip_remaps_results_and_id_sets() -> Result<()> {
    let original = populated(1, 2, 2);
    assert!(!original.failed_question_ids.is_empty());
    let imported = import_user_data(&export_user_data(&original)?)?;

    let question_ids: HashSet<&str> = imported
        .tests
        .iter()
        .flat_map(|t| t.questions.iter().map(|q| q.id.as_str()))
        .collect();

    assert_eq!(
        imported.failed_question_ids.len(),
        original.failed_question_ids.len()
    );
    assert!(imported
        .failed_question_ids
        .iter()
        .all(|id| question_ids.contains(id.as_str())));
    assert!(imported
        .bookmarked_question_ids
        .iter()
        .all(|id| question_ids.contains(id.as_str())));

    for result in &imported.results {
        let test = imported.test(&result.test_id).expect("result test remapped");
        for answer in &result.answers {
            let question = test
                .questions
                .iter()
                .find(|q| q.id == answer.question_id)
                .expect("answer question remapped");
            let selected = answer.selected_option_id.as_deref().unwrap();
            assert!(question.options.iter().any(|o| o.id == selected));
        }
    }
    Ok(())
}

#[test]
fn test_import_rejects_missing_collections() {
    let err = import_user_data(r#"{"subjects": []}"#).unwrap_err();
    assert!(matches!(err, Error::InvalidFormat(_)));

    let err = import_user_data("not json").unwrap_err();
    assert_eq!(err.code(), "INVALID_FORMAT");
}

#[test]
fn test_import_tolerates_older_documents() -> Result<()> {
    let json = r#"{
        "subjects": [{"id": "s", "name": "History"}],
        "tests": []
    }"#;
    let imported = import_user_data(json)?;
    assert_eq!(imported.subjects.len(), 1);
    assert!(imported.results.is_empty());
    assert!(imported.bookmarked_question_ids.is_empty());
    Ok(())
}

#[test]
fn test_single_test_round_trip_into_new_subject() -> Result<()> {
    let test = sample_test("t", "s-old", "Rivers", 4);
    let imported = import_test(&export_test(&test)?, "s-new")?;

    assert_eq!(imported.subject_id, "s-new");
    assert_ne!(imported.id, test.id);
    assert_eq!(imported.questions.len(), 4);
    validate_test(&imported)?;
    for question in &imported.questions {
        assert_eq!(question.correct_option().unwrap().text, "Option B");
    }
    Ok(())
}

#[test]
fn test_generated_test_with_string_options() -> Result<()> {
    let json = r#"{
        "title": "Planets",
        "questions": [
            {
                "question": "Largest planet?",
                "options": ["Mars", "Jupiter", "Venus"],
                "correctOptionId": "1",
                "explanation": "By mass and volume."
            },
            {
                "text": "Closest to the sun?",
                "options": [{"text": "Mercury"}, {"text": "Earth"}],
                "correctOptionId": "missing"
            }
        ]
    }"#;
    let imported = import_test(json, "astro")?;

    let first = &imported.questions[0];
    assert_eq!(first.text, "Largest planet?");
    assert_eq!(first.correct_option().unwrap().text, "Jupiter");
    assert_eq!(first.explanation, "By mass and volume.");

    // A dangling reference falls back to the first option.
    let second = &imported.questions[1];
    assert_eq!(second.correct_option().unwrap().text, "Mercury");
    Ok(())
}

#[test]
fn test_generated_test_requires_title_and_questions() {
    assert!(import_test(r#"{"questions": []}"#, "s").is_err());
    assert!(import_test(r#"{"title": "No questions"}"#, "s").is_err());
    assert!(import_test(r#"{"title": 5, "questions": []}"#, "s").is_err());
}
