//! Mock exam platform built on wiremock

use super::config::TARGET_SCHOOL;
use answersheet_dl::api::endpoints;
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Examination id used by the fixtures
pub const EXAMINATION: &str = "1874512312";
/// Paper id of the English paper
pub const PAPER: i64 = 88123;
/// Title of the English paper
pub const PAPER_TITLE: &str = "Grade 9 English Midterm";
/// School taking the exam
pub const EXAM_SCHOOL: i64 = 31;

/// Fake JPEG content for an image name
pub fn image_bytes(name: &str) -> Vec<u8> {
    let mut bytes = vec![0xff, 0xd8, 0xff, 0xe0];
    bytes.extend_from_slice(format!("scan of {name}").as_bytes());
    bytes
}

/// A wiremock server answering like the exam platform
pub struct MockPlatform {
    /// Underlying server
    pub server: MockServer,
}

impl MockPlatform {
    /// Start an empty platform
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base URL to put in the configuration
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// URL of an image served by [`MockPlatform::mount_image`]
    pub fn image_url(&self, name: &str) -> String {
        format!("{}/scans/{EXAMINATION}/{name}", self.server.uri())
    }

    /// Every login succeeds with `token`, already on the target school
    pub async fn mount_login(&self, token: &str) {
        login_mock(token).mount(&self.server).await;
    }

    /// Login answers with a failure code
    pub async fn mount_rejected_login(&self) {
        Mock::given(method("GET"))
            .and(path(endpoints::LOGIN))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "PASSWORD_ERROR",
                "message": "用户名或密码错误"
            })))
            .mount(&self.server)
            .await;
    }

    /// Answer-card status with an English and a math paper, and the exam's school list
    pub async fn mount_exam(&self) {
        Mock::given(method("GET"))
            .and(path(endpoints::ANSWER_CARD_STATUS))
            .and(query_param("examinationId", EXAMINATION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "SUCCESS",
                "data": [
                    { "courseCode": "MATH", "exampaper": { "id": 88001, "title": "Grade 9 Math Midterm" } },
                    { "courseCode": "ENGLISH", "exampaper": { "id": PAPER, "title": PAPER_TITLE } }
                ]
            })))
            .mount(&self.server)
            .await;

        Mock::given(method("GET"))
            .and(path(endpoints::EXAM_INFO))
            .and(query_param("examinationId", EXAMINATION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "SUCCESS",
                "data": { "schoolInfoList": [ { "schoolId": EXAM_SCHOOL }, { "schoolId": 32 } ] }
            })))
            .mount(&self.server)
            .await;
    }

    /// Roster of the English paper: one class per slice of `(student id, uploaded)`
    pub async fn mount_roster(&self, classes: &[&[(&str, bool)]]) {
        let groups: Vec<_> = classes
            .iter()
            .map(|class| {
                let students: Vec<_> = class
                    .iter()
                    .map(|(id, uploaded)| json!({ "id": id, "uploaded": uploaded }))
                    .collect();
                json!({ "stuList": students })
            })
            .collect();

        Mock::given(method("GET"))
            .and(path(endpoints::ROSTER))
            .and(query_param("exampaperId", PAPER.to_string()))
            .and(query_param("schoolId", EXAM_SCHOOL.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "SUCCESS",
                "data": groups
            })))
            .mount(&self.server)
            .await;
    }

    /// Answer sheet of `student` pointing at `images` (served by this platform)
    pub async fn mount_sheet(&self, student: &str, images: &[&str]) {
        sheet_mock(student, self.sheet_body(images))
            .mount(&self.server)
            .await;
    }

    /// Answer sheet of `student` that must never be requested
    pub async fn forbid_sheet(&self, student: &str) {
        sheet_mock(student, json!({ "code": "SUCCESS", "data": null }))
            .expect(0)
            .mount(&self.server)
            .await;
    }

    /// `student` has no scanned sheet
    pub async fn mount_no_sheet(&self, student: &str) {
        sheet_mock(student, json!({ "code": "SUCCESS", "data": null }))
            .mount(&self.server)
            .await;
    }

    /// Serve an image under [`MockPlatform::image_url`]
    pub async fn mount_image(&self, name: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/scans/{EXAMINATION}/{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(image_bytes(name)))
            .mount(&self.server)
            .await;
    }

    /// Answer-sheet payload for `images`
    pub fn sheet_body(&self, images: &[&str]) -> serde_json::Value {
        let urls: Vec<String> = images.iter().map(|name| self.image_url(name)).collect();
        json!({
            "code": "SUCCESS",
            "data": { "stuAnswerImgurls": urls.join("@##@") }
        })
    }
}

/// Successful login mock for `token`
pub fn login_mock(token: &str) -> Mock {
    Mock::given(method("GET"))
        .and(path(endpoints::LOGIN))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": "SUCCESS",
            "data": { "authtoken": token, "user": { "schoolId": TARGET_SCHOOL } }
        })))
}

/// Answer-sheet mock for `student` answering `body`
pub fn sheet_mock(student: &str, body: serde_json::Value) -> Mock {
    Mock::given(method("GET"))
        .and(path(endpoints::ANSWER_SHEET))
        .and(query_param("exampaperId", PAPER.to_string()))
        .and(query_param("stuUserId", student))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
}

/// Answer-sheet mock answering 429 to requests carrying `token`
pub fn throttled_for(token: &str) -> Mock {
    Mock::given(method("GET"))
        .and(path(endpoints::ANSWER_SHEET))
        .and(header("AuthToken", token))
        .respond_with(ResponseTemplate::new(429))
}
