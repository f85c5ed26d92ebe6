// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use crate::api::{LoginGrant, RawReply};
use crate::config::Credentials;
use crate::error::{AuthError, Error};
use crate::session::SessionState;
use crate::types::{ClassGroup, CoursePaper, ExaminationId, OutcomeKind, SchoolId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// What the fake answer-sheet endpoint does for one call
#[derive(Clone, Debug)]
enum Reply {
    Raw(u16, String),
    TransportError,
    Hang,
    Panic,
}

fn sheet<S: AsRef<str>>(urls: &[S]) -> Reply {
    let joined = urls
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<&str>>()
        .join("@##@");
    Reply::Raw(
        200,
        serde_json::json!({ "code": "SUCCESS", "data": { "stuAnswerImgurls": joined } })
            .to_string(),
    )
}

fn no_data() -> Reply {
    Reply::Raw(200, r#"{"code":"SUCCESS","data":null}"#.to_string())
}

fn too_many_requests() -> Reply {
    Reply::Raw(429, String::new())
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Call {
    Start(StudentId),
    Finish(StudentId),
}

type Behavior = dyn Fn(&StudentId, u32, &SessionState) -> Reply + Send + Sync;

/// In-memory platform: scripted answer-sheet replies, counted logins
struct FakeApi {
    behavior: Box<Behavior>,
    latency: Duration,
    logins: AtomicU32,
    fail_logins: AtomicBool,
    attempts: Mutex<HashMap<StudentId, u32>>,
    call_times: Mutex<Vec<(StudentId, Instant)>>,
    log: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeApi {
    fn new(
        behavior: impl Fn(&StudentId, u32, &SessionState) -> Reply + Send + Sync + 'static,
    ) -> Self {
        Self {
            behavior: Box::new(behavior),
            latency: Duration::ZERO,
            logins: AtomicU32::new(0),
            fail_logins: AtomicBool::new(false),
            attempts: Mutex::new(HashMap::new()),
            call_times: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn logins(&self) -> u32 {
        self.logins.load(Ordering::SeqCst)
    }

    fn attempts(&self, student: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(&StudentId::from(student))
            .copied()
            .unwrap_or(0)
    }

    fn call_times(&self, student: &str) -> Vec<Instant> {
        let id = StudentId::from(student);
        self.call_times
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == id)
            .map(|(_, at)| *at)
            .collect()
    }
}

#[async_trait::async_trait]
impl ExamApi for FakeApi {
    async fn login(&self, _credentials: &Credentials) -> Result<LoginGrant> {
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_logins.load(Ordering::SeqCst) {
            return Err(AuthError::LoginRejected("account locked".into()).into());
        }
        Ok(LoginGrant {
            token: format!("tok-{n}"),
            school_id: SchoolId::from(7),
        })
    }

    async fn switch_school(&self, _: &SessionState, _: &SchoolId) -> Result<()> {
        Ok(())
    }

    async fn exam_papers(&self, _: &SessionState, _: &ExaminationId) -> Result<Vec<CoursePaper>> {
        Ok(Vec::new())
    }

    async fn exam_schools(&self, _: &SessionState, _: &ExaminationId) -> Result<Vec<SchoolId>> {
        Ok(Vec::new())
    }

    async fn roster(&self, _: &SessionState, _: &PaperId, _: &SchoolId) -> Result<Vec<ClassGroup>> {
        Ok(Vec::new())
    }

    async fn fetch_answer_sheet(
        &self,
        session: &SessionState,
        _paper: &PaperId,
        student: &StudentId,
    ) -> Result<RawReply> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(student.clone()).or_insert(0);
            *count += 1;
            *count
        };
        self.call_times
            .lock()
            .unwrap()
            .push((student.clone(), Instant::now()));

        let reply = (self.behavior)(student, attempt, session);
        match reply {
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!("request timeout fires first");
            }
            Reply::Panic => panic!("worker exploded for {student}"),
            _ => {}
        }

        self.log.lock().unwrap().push(Call::Start(student.clone()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(Call::Finish(student.clone()));

        match reply {
            Reply::Raw(status, body) => Ok(RawReply { status, body }),
            Reply::TransportError => Err(Error::Other("connection reset by peer".into())),
            Reply::Hang | Reply::Panic => unreachable!(),
        }
    }
}

fn test_config() -> Config {
    let mut config = Config {
        credentials: Credentials {
            environment: "test".into(),
            school_id: SchoolId::from(7),
            username: "teacher".into(),
            password: "secret".into(),
        },
        ..Default::default()
    };
    config.fetch.request_timeout = Duration::from_secs(60);
    config
}

async fn logged_in_fetcher(api: Arc<FakeApi>, config: &Config) -> SheetFetcher {
    let session = SessionHandle::new(config.credentials.clone());
    let (event_tx, _) = broadcast::channel(1024);
    let coordinator = Arc::new(ReauthCoordinator::new(
        api.clone(),
        session,
        config.rate_limit.cooldown,
        event_tx,
    ));
    coordinator.authenticate().await.unwrap();
    SheetFetcher::new(api, coordinator, config).unwrap()
}

fn roster(n: usize) -> Vec<Student> {
    (1..=n)
        .map(|i| Student {
            id: StudentId::from(format!("s{i}")),
            uploaded: true,
        })
        .collect()
}

fn paper() -> PaperId {
    PaperId::from(88)
}

#[tokio::test(start_paused = true)]
async fn outcome_sets_partition_the_roster() {
    // s1, s4, ... succeed; s2, s5, ... have no sheet; s3, s6, ... never answer
    let api = Arc::new(FakeApi::new(|student, _, _| {
        let n: u32 = student.as_str()[1..].parse().unwrap();
        match n % 3 {
            1 => sheet(&[
                format!("https://img/{student}-1.jpg"),
                format!("https://img/{student}-2.jpg"),
            ]),
            2 => no_data(),
            _ => Reply::TransportError,
        }
    }));
    let config = test_config();
    let fetcher = logged_in_fetcher(api, &config).await;
    let students = roster(23);

    let report = fetcher
        .gather_urls_in_batches(&paper(), &students, 4)
        .await
        .unwrap();

    let succeeded: HashSet<_> = report.succeeded.iter().cloned().collect();
    let no_data: HashSet<_> = report.no_data.iter().cloned().collect();
    let failed: HashSet<_> = report.failed.iter().map(|f| f.id.clone()).collect();

    assert!(succeeded.is_disjoint(&no_data));
    assert!(succeeded.is_disjoint(&failed));
    assert!(no_data.is_disjoint(&failed));

    let union: HashSet<_> = succeeded.union(&no_data).chain(failed.iter()).cloned().collect();
    let expected: HashSet<_> = students.iter().map(|s| s.id.clone()).collect();
    assert_eq!(union, expected);
    assert_eq!(report.total(), 23);

    assert_eq!(succeeded.len(), 8);
    assert_eq!(no_data.len(), 8);
    assert_eq!(failed.len(), 7);
    assert_eq!(report.urls.len(), 16);
    assert!(report.failed.iter().all(|f| f.error.contains("connection reset")));
}

#[tokio::test(start_paused = true)]
async fn simultaneous_rate_limits_cause_one_login() {
    // Every request made with the first session is throttled
    let api = Arc::new(
        FakeApi::new(|student, _, session| {
            if session.generation < 2 {
                too_many_requests()
            } else {
                sheet(&[format!("https://img/{student}.jpg")])
            }
        })
        .with_latency(Duration::from_millis(50)),
    );
    let mut config = test_config();
    config.fetch.max_concurrent_requests = 10;
    let fetcher = logged_in_fetcher(api.clone(), &config).await;
    assert_eq!(api.logins(), 1);

    let report = fetcher
        .gather_urls_in_batches(&paper(), &roster(10), 10)
        .await
        .unwrap();

    assert_eq!(api.logins(), 2, "ten throttled workers, one re-login");
    assert_eq!(report.succeeded.len(), 10);
    assert!(report.failed.is_empty());
    for i in 1..=10 {
        assert_eq!(api.attempts(&format!("s{i}")), 2);
    }
}

#[tokio::test(start_paused = true)]
async fn rate_limited_max_retries_times_then_success() {
    let api = Arc::new(FakeApi::new(|_, attempt, _| {
        if attempt <= 3 {
            too_many_requests()
        } else {
            sheet(&["https://img/a.jpg"])
        }
    }));
    let config = test_config();
    assert_eq!(config.retry.max_retries, 3);
    let fetcher = logged_in_fetcher(api.clone(), &config).await;

    let outcome = fetcher.fetch_student(&paper(), &StudentId::from("s1")).await;

    assert_eq!(outcome, FetchOutcome::Success(vec!["https://img/a.jpg".into()]));
    assert_eq!(api.attempts("s1"), 4);
    // Initial login plus one re-login per throttled attempt
    assert_eq!(api.logins(), 4);
}

#[tokio::test(start_paused = true)]
async fn payload_rate_limit_triggers_reauthentication() {
    let api = Arc::new(FakeApi::new(|_, attempt, _| {
        if attempt == 1 {
            Reply::Raw(
                200,
                r#"{"code":"FAIL","message":"请求过于频繁","data":null}"#.to_string(),
            )
        } else {
            sheet(&["https://img/a.jpg"])
        }
    }));
    let config = test_config();
    let fetcher = logged_in_fetcher(api.clone(), &config).await;

    let outcome = fetcher.fetch_student(&paper(), &StudentId::from("s1")).await;

    assert_eq!(outcome.kind(), OutcomeKind::Success);
    assert_eq!(api.logins(), 2);
}

#[tokio::test(start_paused = true)]
async fn no_data_is_terminal_and_never_retried() {
    let api = Arc::new(FakeApi::new(|_, _, _| no_data()));
    let config = test_config();
    let fetcher = logged_in_fetcher(api.clone(), &config).await;

    let report = fetcher
        .gather_urls_in_batches(&paper(), &roster(3), 5)
        .await
        .unwrap();

    assert_eq!(report.no_data.len(), 3);
    assert!(report.failed.is_empty());
    assert_eq!(api.attempts("s1"), 1);
}

#[tokio::test(start_paused = true)]
async fn transport_errors_fail_after_budget_with_growing_backoff() {
    let api = Arc::new(FakeApi::new(|_, _, _| Reply::TransportError));
    let config = test_config();
    let fetcher = logged_in_fetcher(api.clone(), &config).await;

    let outcome = fetcher.fetch_student(&paper(), &StudentId::from("s1")).await;

    match outcome {
        FetchOutcome::Failed(error) => assert!(error.contains("connection reset")),
        other => panic!("expected Failed, got {other:?}"),
    }
    let times = api.call_times("s1");
    assert_eq!(times.len(), 4, "first attempt plus three retries");
    let gaps: Vec<_> = times
        .windows(2)
        .map(|w| w[1].duration_since(w[0]).as_secs())
        .collect();
    assert_eq!(gaps, [2, 4, 6]);
}

#[tokio::test(start_paused = true)]
async fn timeouts_and_malformed_replies_are_retried() {
    let api = Arc::new(FakeApi::new(|student, attempt, _| {
        match (student.as_str(), attempt) {
            ("slow", 1) => Reply::Hang,
            ("garbled", 1) => Reply::Raw(200, "<html>gateway</html>".into()),
            ("garbled", 2) => Reply::Raw(200, r#"{"code":"SUCCESS"}"#.into()),
            ("flaky", 1) => Reply::Raw(502, String::new()),
            _ => sheet(&["https://img/ok.jpg"]),
        }
    }));
    let mut config = test_config();
    config.fetch.request_timeout = Duration::from_secs(5);
    let fetcher = logged_in_fetcher(api.clone(), &config).await;

    for student in ["slow", "garbled", "flaky"] {
        let outcome = fetcher.fetch_student(&paper(), &StudentId::from(student)).await;
        assert_eq!(outcome.kind(), OutcomeKind::Success, "{student}");
    }
    assert_eq!(api.attempts("slow"), 2);
    assert_eq!(api.attempts("garbled"), 3);
    assert_eq!(api.attempts("flaky"), 2);
    assert_eq!(api.logins(), 1, "only throttling triggers a login");
}

#[tokio::test(start_paused = true)]
async fn failed_reauthentication_counts_as_an_attempt() {
    let api = Arc::new(FakeApi::new(|_, _, _| too_many_requests()));
    let config = test_config();
    let fetcher = logged_in_fetcher(api.clone(), &config).await;
    api.fail_logins.store(true, Ordering::SeqCst);

    let outcome = fetcher.fetch_student(&paper(), &StudentId::from("s1")).await;

    match outcome {
        FetchOutcome::Failed(error) => assert!(error.contains("re-authentication failed")),
        other => panic!("expected Failed, got {other:?}"),
    }
    assert_eq!(api.attempts("s1"), 4);
    assert!(fetcher.ctx.session.gate().is_open());
}

#[tokio::test(start_paused = true)]
async fn batches_run_strictly_in_order() {
    let api = Arc::new(
        FakeApi::new(|student, _, _| sheet(&[format!("https://img/{student}.jpg")]))
            .with_latency(Duration::from_millis(100)),
    );
    let mut config = test_config();
    // Batch size larger than the concurrency cap
    config.fetch.max_concurrent_requests = 2;
    let fetcher = logged_in_fetcher(api.clone(), &config).await;
    let mut events = fetcher.subscribe();
    let students = roster(10);

    let started = Instant::now();
    let report = fetcher
        .gather_urls_in_batches(&paper(), &students, 4)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    // Batches [s1..s4], [s5..s8], [s9, s10]
    let mut batches = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Event::BatchStarted { students, .. } = event {
            batches.push(students);
        }
    }
    let expected: Vec<Vec<StudentId>> = partition(&students, 4)
        .into_iter()
        .map(|batch| batch.iter().map(|s| s.id.clone()).collect())
        .collect();
    assert_eq!(batches, expected);
    assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), [4, 4, 2]);

    // No request of batch k+1 starts before every request of batch k finished
    let log = api.log.lock().unwrap().clone();
    let position = |call: &Call| log.iter().position(|c| c == call).unwrap();
    for pair in expected.windows(2) {
        let last_finish = pair[0]
            .iter()
            .map(|id| position(&Call::Finish(id.clone())))
            .max()
            .unwrap();
        let first_start = pair[1]
            .iter()
            .map(|id| position(&Call::Start(id.clone())))
            .min()
            .unwrap();
        assert!(last_finish < first_start);
    }

    assert_eq!(api.max_in_flight.load(Ordering::SeqCst), 2);
    assert_eq!(report.urls.len(), 10);
    // Two pauses of one second between three batches, none after the last
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn admission_gate_caps_in_flight_requests() {
    let api = Arc::new(
        FakeApi::new(|_, _, _| no_data()).with_latency(Duration::from_millis(200)),
    );
    let mut config = test_config();
    config.fetch.max_concurrent_requests = 3;
    let fetcher = logged_in_fetcher(api.clone(), &config).await;

    let report = fetcher
        .gather_urls_in_batches(&paper(), &roster(12), 12)
        .await
        .unwrap();

    assert_eq!(report.no_data.len(), 12);
    assert_eq!(api.max_in_flight.load(Ordering::SeqCst), 3);
    assert_eq!(fetcher.available_permits(), 3);
}

#[tokio::test(start_paused = true)]
async fn panicking_worker_is_recorded_as_failed() {
    let api = Arc::new(FakeApi::new(|student, _, _| {
        if student.as_str() == "s2" {
            Reply::Panic
        } else {
            sheet(&["https://img/x.jpg"])
        }
    }));
    let config = test_config();
    let fetcher = logged_in_fetcher(api, &config).await;

    let report = fetcher
        .gather_urls_in_batches(&paper(), &roster(3), 3)
        .await
        .unwrap();

    assert_eq!(report.succeeded.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, StudentId::from("s2"));
    assert!(report.failed[0].error.contains("worker task failed"));
}

#[tokio::test(start_paused = true)]
async fn resolution_events_cover_every_student() {
    let api = Arc::new(FakeApi::new(|student, _, _| {
        if student.as_str() == "s1" {
            no_data()
        } else {
            sheet(&["https://img/1.jpg", "https://img/2.jpg"])
        }
    }));
    let config = test_config();
    let fetcher = logged_in_fetcher(api, &config).await;
    let mut events = fetcher.subscribe();

    fetcher
        .gather_urls_in_batches(&paper(), &roster(2), 5)
        .await
        .unwrap();

    let mut resolved = HashMap::new();
    while let Ok(event) = events.try_recv() {
        if let Event::StudentResolved {
            student_id,
            outcome,
            images,
        } = event
        {
            resolved.insert(student_id, (outcome, images));
        }
    }
    assert_eq!(resolved[&StudentId::from("s1")], (OutcomeKind::NoData, 0));
    assert_eq!(resolved[&StudentId::from("s2")], (OutcomeKind::Success, 2));
}

#[tokio::test]
async fn zero_batch_size_is_rejected() {
    let api = Arc::new(FakeApi::new(|_, _, _| no_data()));
    let config = test_config();
    let fetcher = logged_in_fetcher(api, &config).await;

    assert!(matches!(
        fetcher.gather_urls_in_batches(&paper(), &roster(2), 0).await,
        Err(Error::Config { .. })
    ));
}

#[test]
fn invalid_fetch_settings_are_rejected_up_front() {
    let api: Arc<dyn ExamApi> = Arc::new(FakeApi::new(|_, _, _| no_data()));
    let build = |config: &Config| {
        let session = SessionHandle::new(config.credentials.clone());
        let (event_tx, _) = broadcast::channel(16);
        let coordinator = Arc::new(ReauthCoordinator::new(
            Arc::clone(&api),
            session,
            Duration::ZERO,
            event_tx,
        ));
        SheetFetcher::new(Arc::clone(&api), coordinator, config)
    };

    // Zero permits would park every worker forever
    let mut config = test_config();
    config.fetch.max_concurrent_requests = 0;
    match build(&config) {
        Err(Error::Config { key, .. }) => {
            assert_eq!(key.as_deref(), Some("fetch.max_concurrent_requests"))
        }
        other => panic!("expected config error, got {:?}", other.map(|_| ())),
    }

    // An empty delimiter would split URLs into characters
    let mut config = test_config();
    config.fetch.url_delimiter.clear();
    match build(&config) {
        Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("fetch.url_delimiter")),
        other => panic!("expected config error, got {:?}", other.map(|_| ())),
    }

    assert!(build(&test_config()).is_ok());
}
