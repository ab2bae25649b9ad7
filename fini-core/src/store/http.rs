use std::future::Future;

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

use crate::error::{FiniError, Result};
use crate::store::client::{ChunkReceipt, Transport, TransportError};

pub const CAR_CONTENT_TYPE: &str = "application/car";

/// `POST {endpoint}/upload` with a bearer token, one request per chunk.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    upload_url: String,
}

impl HttpTransport {
    pub fn new(endpoint: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("fini/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FiniError::store(format!("http client: {e}")))?;
        Ok(Self {
            client,
            upload_url: format!("{}/upload", endpoint.trim_end_matches('/')),
        })
    }

    pub fn upload_url(&self) -> &str {
        &self.upload_url
    }
}

fn classify(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connect(e.to_string())
    }
}

/// Service error bodies look like `{"ok": false, "error": {"message": ".."}}`.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

fn receipt(body: &str) -> ChunkReceipt {
    let cid = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        v.pointer("/value/cid")
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    ChunkReceipt { cid }
}

impl Transport for HttpTransport {
    fn send_chunk(
        &self,
        token: &str,
        chunk: Bytes,
    ) -> impl Future<Output = std::result::Result<ChunkReceipt, TransportError>> + Send {
        let req = self
            .client
            .post(&self.upload_url)
            .bearer_auth(token)
            .header(CONTENT_TYPE, CAR_CONTENT_TYPE)
            .body(chunk);
        async move {
            let resp = req.send().await.map_err(classify)?;
            let status = resp.status();
            let body = resp.text().await.map_err(classify)?;
            if !status.is_success() {
                return Err(TransportError::Status {
                    status: status.as_u16(),
                    message: error_message(&body),
                });
            }
            Ok(receipt(&body))
        }
    }
}
