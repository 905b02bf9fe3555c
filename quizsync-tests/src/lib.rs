//! Test utilities and helpers for QuizSync testing
//!
//! Document fixtures plus a simulated device wired to a shared in-memory
//! gateway, so scenario tests read as setup, act, assert.

use quizsync_core::{
    AnswerRecord, KeyValueStore, MemoryKvStore, Question, QuestionOption, QuizMode, Subject, Test,
    TestResult, UserData,
};
use quizsync_sync::{
    Credentials, LocalMirror, MemoryGateway, RetryPolicy, SyncConfig, SyncEvent, Synchronizer,
    UserIdentity,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

pub const EMAIL: &str = "student@example.com";
pub const PASSWORD: &str = "correct-horse";

/// Fixed creation time so identical fixtures produce identical checksums
pub const FIXED_TIME: i64 = 1_700_000_000_000;

/// Timings short enough for tests
pub fn fast_config() -> SyncConfig {
    SyncConfig::new()
        .with_debounce(Duration::from_millis(40))
        .with_download_retry(RetryPolicy::fixed(1, Duration::from_millis(10)))
        .with_logout_settle(Duration::from_millis(20))
}

pub fn subject(id: &str, name: &str) -> Subject {
    Subject {
        id: id.to_string(),
        name: name.to_string(),
        description: None,
        color: None,
        created_at: FIXED_TIME,
    }
}

/// A valid test with `questions` three-option questions; the second option
/// of each is correct.
pub fn sample_test(id: &str, subject_id: &str, title: &str, questions: usize) -> Test {
    let questions = (0..questions)
        .map(|q| {
            let options: Vec<QuestionOption> = ["A", "B", "C"]
                .iter()
                .map(|label| QuestionOption {
                    id: format!("{}-q{}-{}", id, q, label.to_lowercase()),
                    text: format!("Option {}", label),
                })
                .collect();
            Question {
                id: format!("{}-q{}", id, q),
                text: format!("{} question {}", title, q + 1),
                correct_option_id: options[1].id.clone(),
                options,
                explanation: String::new(),
            }
        })
        .collect();

    Test {
        id: id.to_string(),
        subject_id: subject_id.to_string(),
        title: title.to_string(),
        description: None,
        questions,
        created_at: FIXED_TIME,
        updated_at: None,
    }
}

/// A completed attempt answering every question, missing the first one.
pub fn sample_result(id: &str, test: &Test) -> TestResult {
    let answers = test
        .questions
        .iter()
        .enumerate()
        .map(|(i, q)| {
            let selected = if i == 0 { &q.options[0] } else { &q.options[1] };
            AnswerRecord {
                question_id: q.id.clone(),
                selected_option_id: Some(selected.id.clone()),
                correct: i != 0,
            }
        })
        .collect::<Vec<_>>();

    TestResult {
        id: id.to_string(),
        test_id: test.id.clone(),
        subject_id: test.subject_id.clone(),
        mode: QuizMode::Practice,
        score: answers.iter().filter(|a| a.correct).count() as u32,
        total_questions: answers.len() as u32,
        answers,
        started_at: FIXED_TIME,
        completed_at: FIXED_TIME + 60_000,
    }
}

/// A document with the given counts. Tests are spread across subjects and
/// results across tests; the first question of every test is bookmarked.
pub fn populated(subjects: usize, tests: usize, results: usize) -> UserData {
    let mut data = UserData::new();
    for s in 0..subjects {
        data.subjects
            .push(subject(&format!("s{}", s), &format!("Subject {}", s + 1)));
    }
    for t in 0..tests {
        let subject_id = format!("s{}", t % subjects.max(1));
        data.tests.push(sample_test(
            &format!("t{}", t),
            &subject_id,
            &format!("Test {}", t + 1),
            3,
        ));
    }
    for r in 0..results {
        if data.tests.is_empty() {
            break;
        }
        let test = data.tests[r % data.tests.len()].clone();
        data.record_result(sample_result(&format!("r{}", r), &test));
    }
    let first_questions: Vec<String> = data
        .tests
        .iter()
        .filter_map(|t| t.questions.first().map(|q| q.id.clone()))
        .collect();
    for id in first_questions {
        data.toggle_bookmark(&id);
    }
    data
}

/// One subject and nothing else
pub fn single_subject(id: &str, name: &str) -> UserData {
    let mut data = UserData::new();
    data.subjects.push(subject(id, name));
    data
}

/// Register the default account on `gateway`.
pub fn account(gateway: &MemoryGateway) -> UserIdentity {
    gateway.register(EMAIL, PASSWORD)
}

pub fn credentials() -> Credentials {
    Credentials::new(EMAIL, PASSWORD)
}

/// A simulated device: its own on-device store, a shared gateway
pub struct TestDevice {
    pub sync: Synchronizer,
    pub gateway: Arc<MemoryGateway>,
    pub store: Arc<MemoryKvStore>,
    pub mirror: LocalMirror,
    pub events: UnboundedReceiver<SyncEvent>,
    config: SyncConfig,
}

impl TestDevice {
    /// Fresh device with nothing stored
    pub fn new(gateway: Arc<MemoryGateway>) -> Self {
        Self::with_config(gateway, fast_config())
    }

    /// Fresh device with custom timings
    pub fn with_config(gateway: Arc<MemoryGateway>, config: SyncConfig) -> Self {
        Self::boot(gateway, Arc::new(MemoryKvStore::new()), config)
    }

    /// Device whose store already holds `data`, as if edited while signed out
    pub fn with_local_data(gateway: Arc<MemoryGateway>, data: &UserData) -> Self {
        let store = Arc::new(MemoryKvStore::new());
        LocalMirror::new(store.clone())
            .save_data(data)
            .expect("Failed to seed local data");
        Self::boot(gateway, store, fast_config())
    }

    /// Simulate an app restart on the same device
    pub fn restart(self) -> Self {
        Self::boot(self.gateway, self.store, self.config)
    }

    fn boot(gateway: Arc<MemoryGateway>, store: Arc<MemoryKvStore>, config: SyncConfig) -> Self {
        let sync = Synchronizer::new(gateway.clone(), store.clone(), config.clone())
            .expect("Failed to create synchronizer");
        sync.start().expect("Failed to start synchronizer");
        let events = sync.subscribe().expect("Event stream already taken");
        let mirror = LocalMirror::new(store.clone());

        Self {
            sync,
            gateway,
            store,
            mirror,
            events,
            config,
        }
    }

    /// Sign in with the default account, running the initial sync.
    pub async fn sign_in(&self) -> anyhow::Result<UserIdentity> {
        Ok(self.sync.sign_in(&credentials()).await?)
    }

    /// Everything emitted so far
    pub fn drain_events(&mut self) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Raw on-device value for `key`
    pub fn stored(&self, key: &str) -> Option<String> {
        self.store.get(key).expect("Failed to read store")
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
