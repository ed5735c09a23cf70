#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use arena_folio::arena::{ApiBase, ArenaError, StorageResponse, Transport, UploadForm};

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub base: ApiBase,
    pub endpoint: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

/// In-memory transport with responses queued per endpoint, recording every
/// request so tests can assert on what went over the wire.
#[derive(Clone, Default)]
pub struct FakeTransport {
    responses: Arc<Mutex<HashMap<String, VecDeque<Result<Value, ArenaError>>>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    storage_responses: Arc<Mutex<VecDeque<StorageResponse>>>,
    forms: Arc<Mutex<Vec<(String, UploadForm)>>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, endpoint: &str, payload: Value) {
        self.responses
            .lock()
            .unwrap()
            .entry(endpoint.to_string())
            .or_default()
            .push_back(Ok(payload));
    }

    pub fn respond_err(&self, endpoint: &str, status: u16, detail: &str) {
        self.responses
            .lock()
            .unwrap()
            .entry(endpoint.to_string())
            .or_default()
            .push_back(Err(ArenaError::Http {
                endpoint: endpoint.to_string(),
                status,
                detail: detail.to_string(),
            }));
    }

    pub fn respond_storage(&self, status: u16, body: &str) {
        self.storage_responses
            .lock()
            .unwrap()
            .push_back(StorageResponse {
                status,
                body: body.to_string(),
            });
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, endpoint: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.endpoint == endpoint)
            .collect()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn submitted_forms(&self) -> Vec<(String, UploadForm)> {
        self.forms.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn request(
        &self,
        method: Method,
        base: ApiBase,
        endpoint: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Value, ArenaError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            method,
            base,
            endpoint: endpoint.to_string(),
            query: query.to_vec(),
            body: body.cloned(),
        });
        self.responses
            .lock()
            .unwrap()
            .get_mut(endpoint)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| {
                Err(ArenaError::Http {
                    endpoint: endpoint.to_string(),
                    status: 404,
                    detail: "no fake response queued".to_string(),
                })
            })
    }

    async fn submit_form(&self, url: &str, form: UploadForm) -> Result<StorageResponse, ArenaError> {
        self.forms.lock().unwrap().push((url.to_string(), form));
        Ok(self
            .storage_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(StorageResponse {
                status: 500,
                body: String::new(),
            }))
    }
}
