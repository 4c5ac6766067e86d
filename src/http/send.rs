//! `POST /send-messages`: accepts JSON or multipart (with an optional
//! `media` file) and runs one dispatch job to completion.

use super::{ApiError, AppState};
use crate::client::{ChatAddress, MediaBlob, Payload};
use crate::config::UploadsConfig;
use crate::dispatch::{DispatchJob, DispatchReport, Outcome};
use axum::Json;
use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::{StatusCode, header};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Request fields, whichever encoding they arrived in.
#[derive(Debug, Default)]
struct SendForm {
    user_id: Option<String>,
    message: Option<String>,
    delay_ms: Option<u64>,
    numbers: Vec<String>,
    media: Option<MediaBlob>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonBody {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    delay: Option<Value>,
    #[serde(default)]
    numbers: Option<Value>,
}

impl SendForm {
    fn from_json(body: JsonBody) -> Result<Self, ApiError> {
        let numbers = match body.numbers {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(raw)) => parse_numbers(&raw)?,
            Some(Value::Array(items)) => number_strings(items)?,
            Some(_) => return Err(ApiError::bad_request("numbers must be an array")),
        };
        let delay_ms = match body.delay {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => Some(
                n.as_u64()
                    .ok_or_else(|| ApiError::bad_request("delay must be a non-negative integer"))?,
            ),
            Some(Value::String(s)) => Some(parse_delay(&s)?),
            Some(_) => return Err(ApiError::bad_request("delay must be a number")),
        };
        Ok(Self {
            user_id: body.user_id,
            message: body.message,
            delay_ms,
            numbers,
            media: None,
        })
    }

    async fn from_multipart(
        mut multipart: Multipart,
        uploads: &UploadsConfig,
    ) -> Result<Self, ApiError> {
        let mut form = Self::default();

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or("").to_string();
            match name.as_str() {
                "media" => {
                    let mime_type = field
                        .content_type()
                        .unwrap_or("application/octet-stream")
                        .to_string();
                    let filename = field.file_name().map(str::to_string);
                    let data = field.bytes().await.map_err(multipart_error)?;
                    if data.is_empty() {
                        continue;
                    }
                    if data.len() > uploads.max_file_size {
                        return Err(ApiError::new(
                            StatusCode::PAYLOAD_TOO_LARGE,
                            format!("File too large (max {} bytes)", uploads.max_file_size),
                        ));
                    }
                    if !uploads.allows(&mime_type) {
                        return Err(ApiError::new(
                            StatusCode::UNSUPPORTED_MEDIA_TYPE,
                            format!("File type not allowed: {mime_type}"),
                        ));
                    }
                    form.media = Some(MediaBlob {
                        mime_type,
                        filename,
                        data,
                        caption: None,
                    });
                }
                "userId" => form.user_id = Some(field.text().await.map_err(multipart_error)?),
                "message" => form.message = Some(field.text().await.map_err(multipart_error)?),
                "delay" => {
                    let raw = field.text().await.map_err(multipart_error)?;
                    if !raw.trim().is_empty() {
                        form.delay_ms = Some(parse_delay(&raw)?);
                    }
                }
                "numbers" => {
                    let raw = field.text().await.map_err(multipart_error)?;
                    form.numbers = parse_numbers(&raw)?;
                }
                _ => {}
            }
        }
        Ok(form)
    }
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::new(e.status(), e.body_text())
}

fn parse_delay(raw: &str) -> Result<u64, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid delay: {raw:?}")))
}

/// Numbers arrive as a JSON array string; a plain comma or newline
/// separated list is accepted too.
fn parse_numbers(raw: &str) -> Result<Vec<String>, ApiError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    match serde_json::from_str::<Vec<Value>>(raw) {
        Ok(items) => number_strings(items),
        Err(_) if !raw.starts_with('[') => Ok(raw
            .split([',', '\n'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()),
        Err(e) => Err(ApiError::bad_request(format!("Invalid numbers list: {e}"))),
    }
}

fn number_strings(items: Vec<Value>) -> Result<Vec<String>, ApiError> {
    items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(ApiError::bad_request(format!("Invalid number entry: {other}"))),
        })
        .collect()
}

fn is_multipart(request: &Request) -> bool {
    request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientView {
    recipient: String,
    status: &'static str,
    attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    success: bool,
    job_id: String,
    sent: usize,
    failed: usize,
    lost: usize,
    results: Vec<RecipientView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<DispatchReport> for SendResponse {
    fn from(report: DispatchReport) -> Self {
        let error = report
            .session_lost
            .then(|| "Session lost during dispatch".to_string());
        Self {
            success: !report.session_lost,
            job_id: report.job_id.to_string(),
            sent: report.sent(),
            failed: report.failed(),
            lost: report.lost(),
            results: report
                .results
                .into_iter()
                .map(|r| RecipientView {
                    recipient: r.recipient.to_string(),
                    status: r.outcome.as_str(),
                    attempts: r.attempts,
                    error: match r.outcome {
                        Outcome::Failed { reason } => Some(reason),
                        _ => None,
                    },
                })
                .collect(),
            error,
        }
    }
}

pub async fn send_messages(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<SendResponse>, ApiError> {
    let form = if is_multipart(&request) {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| ApiError::new(e.status(), e.body_text()))?;
        SendForm::from_multipart(multipart, &state.uploads).await?
    } else {
        let Json(body) = Json::<JsonBody>::from_request(request, &state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        SendForm::from_json(body)?
    };

    let job = build_job(&state, form)?;
    let recipients = job.recipients.len();
    let report = state.pipeline.dispatch(job).await?;
    info!(
        job_id = %report.job_id,
        recipients,
        sent = report.sent(),
        "Send request completed"
    );
    Ok(Json(report.into()))
}

fn build_job(state: &AppState, form: SendForm) -> Result<DispatchJob, ApiError> {
    let user_id = form
        .user_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(ApiError::missing_user_id)?;

    if form.numbers.is_empty() {
        return Err(ApiError::bad_request("No numbers provided"));
    }
    let max = state.messages.max_recipients;
    if form.numbers.len() > max {
        return Err(ApiError::bad_request(format!(
            "Too many numbers: {} (max {max})",
            form.numbers.len()
        )));
    }

    let mut recipients = Vec::with_capacity(form.numbers.len());
    let mut invalid = Vec::new();
    for number in &form.numbers {
        match ChatAddress::parse(number) {
            Ok(address) => recipients.push(address),
            Err(_) => invalid.push(number.as_str()),
        }
    }
    if !invalid.is_empty() {
        return Err(ApiError::bad_request(format!(
            "Invalid numbers: {}",
            invalid.join(", ")
        )));
    }

    let message = form.message.filter(|m| !m.trim().is_empty());
    let payload = match form.media {
        Some(blob) => Payload::Media(MediaBlob {
            caption: message,
            ..blob
        }),
        None => Payload::Text(message.ok_or_else(|| ApiError::bad_request("Missing message"))?),
    };

    Ok(DispatchJob {
        user_id,
        recipients,
        payload,
        delay: form
            .delay_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| state.messages.default_delay()),
        max_retries: state.messages.max_retries,
    })
}
