use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;
use tracing::debug;

use super::payload::{ReportRequest, ReportResponse};
use super::ReportError;

/// Longest response body quoted in an error.
const BODY_EXCERPT: usize = 256;

/// POST one report. No retry: the caller waits for the next interval.
///
/// A zero `request_timeout` waits for the collector indefinitely.
pub async fn send_report(
    client: &reqwest::Client,
    address: &str,
    request: &ReportRequest,
    request_timeout: Duration,
) -> Result<ReportResponse, ReportError> {
    debug!(address, storage = request.data.storage, "Sending usage report");

    let response = bounded(request_timeout, client.post(address).json(request).send()).await?;
    let status = response.status();
    let body = bounded(request_timeout, response.text()).await?;

    parse_report_response(status.as_u16(), &body)
}

async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, ReportError>
where
    F: Future<Output = reqwest::Result<T>>,
{
    let result = if limit.is_zero() {
        fut.await
    } else {
        timeout(limit, fut)
            .await
            .map_err(|_| ReportError::Timeout(limit))?
    };
    result.map_err(|err| ReportError::Network(err.to_string()))
}

/// Success only for HTTP 200 carrying `"errorCode": "OK"`.
pub fn parse_report_response(status: u16, body: &str) -> Result<ReportResponse, ReportError> {
    if status != 200 {
        return Err(ReportError::Status {
            status,
            body: excerpt(body),
        });
    }

    let response: ReportResponse =
        serde_json::from_str(body).map_err(|source| ReportError::MalformedBody {
            body: excerpt(body),
            source,
        })?;

    if response.error_code != "OK" {
        return Err(ReportError::Rejected {
            code: response.error_code,
            message: response.error_msg,
        });
    }
    Ok(response)
}

fn excerpt(body: &str) -> String {
    match body.char_indices().nth(BODY_EXCERPT) {
        Some((end, _)) => format!("{}...", &body[..end]),
        None => body.to_string(),
    }
}
