//! A wiremock-backed stand-in for the spec registry and the token endpoint.

use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

/// Path the registry accepts uploads on.
pub const UPLOAD_PATH: &str = "/update";
/// Path of the mock OAuth token endpoint.
pub const TOKEN_PATH: &str = "/token";

/// One upload as the registry received it.
#[derive(Debug, Clone)]
pub struct ReceivedUpload {
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub filename: Option<String>,
    pub file: Vec<u8>,
    pub team: Option<String>,
    pub body: Vec<u8>,
}

impl ReceivedUpload {
    fn from_request(request: &Request) -> Self {
        let header = |name: &str| {
            request
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let content_type = header("content-type");
        let parts = content_type
            .as_deref()
            .and_then(boundary_of)
            .map(|b| split_parts(&request.body, &b))
            .unwrap_or_default();

        let mut upload = Self {
            query: request.url.query().map(str::to_string),
            authorization: header("authorization"),
            content_type,
            filename: None,
            file: Vec::new(),
            team: None,
            body: request.body.clone(),
        };
        for part in parts {
            match part.name.as_deref() {
                Some("file") => {
                    upload.filename = part.filename;
                    upload.file = part.data;
                }
                Some("team") => upload.team = Some(String::from_utf8_lossy(&part.data).into_owned()),
                _ => {}
            }
        }
        upload
    }

    /// The uploaded file parsed as JSON.
    pub fn file_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.file).expect("uploaded file is not JSON")
    }
}

/// The mock registry. The server shuts down when this is dropped.
pub struct MockRegistry {
    server: MockServer,
}

impl MockRegistry {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// URL to configure as the uploader URL.
    pub fn upload_url(&self) -> String {
        format!("{}{}", self.server.uri(), UPLOAD_PATH)
    }

    /// URL to put in a service account's `token_uri`.
    pub fn token_url(&self) -> String {
        format!("{}{}", self.server.uri(), TOKEN_PATH)
    }

    /// Accept every upload with 200.
    pub async fn accept_uploads(&self) {
        self.answer_uploads(200).await;
    }

    /// Answer every upload with `status`.
    pub async fn answer_uploads(&self, status: u16) {
        Mock::given(method("POST"))
            .and(path(UPLOAD_PATH))
            .respond_with(ResponseTemplate::new(status).set_body_string("registry says hi"))
            .mount(&self.server)
            .await;
    }

    /// Answer consecutive uploads with `statuses`, then 200 for the rest.
    pub async fn answer_uploads_in_sequence(&self, statuses: &[u16]) {
        for status in statuses {
            Mock::given(method("POST"))
                .and(path(UPLOAD_PATH))
                .respond_with(ResponseTemplate::new(*status).set_body_string("not now"))
                .up_to_n_times(1)
                .mount(&self.server)
                .await;
        }
        self.accept_uploads().await;
    }

    /// Hand out `token` for JWT-bearer grants.
    pub async fn issue_id_tokens(&self, token: &str) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains(
                "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer",
            ))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id_token": token })),
            )
            .mount(&self.server)
            .await;
    }

    /// Uploads received so far, in arrival order.
    pub async fn uploads(&self) -> Vec<ReceivedUpload> {
        self.requests_to(UPLOAD_PATH)
            .await
            .iter()
            .map(ReceivedUpload::from_request)
            .collect()
    }

    /// Form bodies posted to the token endpoint.
    pub async fn token_requests(&self) -> Vec<String> {
        self.requests_to(TOKEN_PATH)
            .await
            .iter()
            .map(|r| String::from_utf8_lossy(&r.body).into_owned())
            .collect()
    }

    async fn requests_to(&self, target: &str) -> Vec<Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path() == target)
            .collect()
    }
}

struct Part {
    name: Option<String>,
    filename: Option<String>,
    data: Vec<u8>,
}

fn boundary_of(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .map(str::trim)
        .find_map(|p| p.strip_prefix("boundary="))
        .map(|b| b.trim_matches('"').to_string())
}

fn split_parts(body: &[u8], boundary: &str) -> Vec<Part> {
    let body = String::from_utf8_lossy(body);
    let delimiter = format!("--{}", boundary);

    body.split(delimiter.as_str())
        .filter_map(|chunk| {
            let chunk = chunk.strip_prefix("\r\n")?;
            let (head, data) = chunk.split_once("\r\n\r\n")?;
            let data = data.strip_suffix("\r\n").unwrap_or(data);
            let disposition = head
                .lines()
                .find(|l| l.to_ascii_lowercase().starts_with("content-disposition"))?;
            Some(Part {
                name: param(disposition, "name"),
                filename: param(disposition, "filename"),
                data: data.as_bytes().to_vec(),
            })
        })
        .collect()
}

fn param(disposition: &str, key: &str) -> Option<String> {
    disposition
        .split(';')
        .map(str::trim)
        .find_map(|p| p.strip_prefix(&format!("{}=", key)))
        .map(|v| v.trim_matches('"').to_string())
}
