//! reqwest-backed [`ExamApi`] implementation

use super::{endpoints, ExamApi, LoginGrant, RawReply};
use crate::config::{ApiConfig, Config, Credentials};
use crate::error::{AuthError, Error, Result};
use crate::session::SessionState;
use crate::types::{ClassGroup, CoursePaper, ExaminationId, PaperId, SchoolId, StudentId};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

const SUCCESS_CODE: &str = "SUCCESS";

/// Exam platform client over HTTP
#[derive(Clone, Debug)]
pub struct HttpExamApi {
    client: reqwest::Client,
    base: String,
    api: ApiConfig,
}

impl HttpExamApi {
    /// Build a client from the configuration (base URL, client metadata, connect timeout)
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.api.connect_timeout)
            .build()?;
        Ok(Self::with_client(client, config.base_url()?, config.api.clone()))
    }

    /// Build on top of an existing reqwest client
    pub fn with_client(client: reqwest::Client, base_url: url::Url, api: ApiConfig) -> Self {
        Self {
            client,
            base: base_url.as_str().trim_end_matches('/').to_string(),
            api,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get_data<T: DeserializeOwned>(
        &self,
        path: &'static str,
        session: &SessionState,
        query: &[(&str, &str)],
    ) -> Result<Option<T>> {
        tracing::debug!(endpoint = path, "GET");
        let response = authorize(self.client.get(self.url(path)), session)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::UnexpectedStatus {
                endpoint: path.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        let envelope: Envelope<T> = serde_json::from_str(&body)?;
        envelope.into_data(path)
    }
}

fn authorize(mut request: RequestBuilder, session: &SessionState) -> RequestBuilder {
    for (name, value) in session.headers() {
        request = request.header(name, value);
    }
    request
}

fn transport(e: reqwest::Error) -> Error {
    AuthError::Transport(e.to_string()).into()
}

/// Common `{code, message, data}` response wrapper
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    message: Option<Value>,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn is_success(&self) -> bool {
        matches!(&self.code, Some(Value::String(code)) if code == SUCCESS_CODE)
    }

    fn describe(&self) -> String {
        let text = |value: &Option<Value>| match value {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => "-".to_string(),
            Some(other) => other.to_string(),
        };
        format!("code={} message={}", text(&self.code), text(&self.message))
    }

    /// Payload, or an API error when `data` is absent next to a failure code
    fn into_data(self, endpoint: &str) -> Result<Option<T>> {
        if self.data.is_none() && self.code.is_some() && !self.is_success() {
            return Err(Error::Api {
                endpoint: endpoint.to_string(),
                message: self.describe(),
            });
        }
        Ok(self.data)
    }
}

#[derive(Debug, Deserialize)]
struct LoginData {
    #[serde(default)]
    authtoken: Option<String>,
    #[serde(default)]
    user: Option<LoginUser>,
}

#[derive(Debug, Deserialize)]
struct LoginUser {
    #[serde(rename = "schoolId", default)]
    school_id: Option<SchoolId>,
}

#[derive(Debug, Deserialize)]
struct ExamInfo {
    #[serde(rename = "schoolInfoList", default)]
    schools: Vec<SchoolInfo>,
}

#[derive(Debug, Deserialize)]
struct SchoolInfo {
    #[serde(rename = "schoolId")]
    school_id: SchoolId,
}

#[async_trait::async_trait]
impl ExamApi for HttpExamApi {
    async fn login(&self, credentials: &Credentials) -> Result<LoginGrant> {
        let query = [
            ("username", credentials.username.as_str()),
            ("encryptpwd", credentials.password.as_str()),
            ("clienttype", self.api.client_type.as_str()),
            ("clientversion", self.api.client_version.as_str()),
            ("systemversion", self.api.system_version.as_str()),
        ];
        let response = self
            .client
            .get(self.url(endpoints::LOGIN))
            .query(&query)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(AuthError::LoginStatus(status.as_u16()).into());
        }

        let body = response.text().await.map_err(transport)?;
        let envelope: Envelope<LoginData> = serde_json::from_str(&body)
            .map_err(|e| AuthError::LoginRejected(format!("unreadable response: {e}")))?;
        if !envelope.is_success() {
            return Err(AuthError::LoginRejected(envelope.describe()).into());
        }

        let data = envelope.data.ok_or(AuthError::MissingField("data"))?;
        let token = data
            .authtoken
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::MissingField("authtoken"))?;
        let school_id = data
            .user
            .and_then(|user| user.school_id)
            .ok_or(AuthError::MissingField("user.schoolId"))?;

        tracing::info!(username = %credentials.username, school_id = %school_id, "Logged in");
        Ok(LoginGrant { token, school_id })
    }

    async fn switch_school(&self, session: &SessionState, target: &SchoolId) -> Result<()> {
        let form = [
            ("schoolId", target.as_str()),
            ("clienttype", self.api.client_type.as_str()),
            ("clientversion", self.api.client_version.as_str()),
        ];
        let response = authorize(self.client.post(self.url(endpoints::SWITCH_SCHOOL)), session)
            .form(&form)
            .send()
            .await
            .map_err(transport)?;

        let rejected = |message: String| AuthError::SwitchRejected {
            school_id: target.to_string(),
            message,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(rejected(format!("HTTP {}", status.as_u16())).into());
        }

        let body = response.text().await.map_err(transport)?;
        let envelope: Envelope<Value> = serde_json::from_str(&body)
            .map_err(|e| rejected(format!("unreadable response: {e}")))?;
        if !envelope.is_success() {
            return Err(rejected(envelope.describe()).into());
        }

        tracing::info!(school_id = %target, "Switched school");
        Ok(())
    }

    async fn exam_papers(
        &self,
        session: &SessionState,
        examination: &ExaminationId,
    ) -> Result<Vec<CoursePaper>> {
        let entries: Vec<Value> = self
            .get_data(
                endpoints::ANSWER_CARD_STATUS,
                session,
                &[("examinationId", examination.as_str())],
            )
            .await?
            .unwrap_or_default();

        // Courses without a paper yet come back without `exampaper`
        Ok(entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value::<CoursePaper>(entry) {
                Ok(paper) => Some(paper),
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping answer-card entry");
                    None
                }
            })
            .collect())
    }

    async fn exam_schools(
        &self,
        session: &SessionState,
        examination: &ExaminationId,
    ) -> Result<Vec<SchoolId>> {
        let info: Option<ExamInfo> = self
            .get_data(
                endpoints::EXAM_INFO,
                session,
                &[("examinationId", examination.as_str())],
            )
            .await?;
        Ok(info
            .map(|info| info.schools.into_iter().map(|s| s.school_id).collect())
            .unwrap_or_default())
    }

    async fn roster(
        &self,
        session: &SessionState,
        paper: &PaperId,
        school: &SchoolId,
    ) -> Result<Vec<ClassGroup>> {
        let groups: Option<Vec<ClassGroup>> = self
            .get_data(
                endpoints::ROSTER,
                session,
                &[("exampaperId", paper.as_str()), ("schoolId", school.as_str())],
            )
            .await?;
        Ok(groups.unwrap_or_default())
    }

    async fn fetch_answer_sheet(
        &self,
        session: &SessionState,
        paper: &PaperId,
        student: &StudentId,
    ) -> Result<RawReply> {
        let response = authorize(self.client.get(self.url(endpoints::ANSWER_SHEET)), session)
            .query(&[("exampaperId", paper.as_str()), ("stuUserId", student.as_str())])
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(RawReply { status, body })
    }
}
