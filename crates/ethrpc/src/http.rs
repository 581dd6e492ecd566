use {
    alloy_primitives::{Address, Bytes},
    reqwest::{Client, header},
    serde::{Deserialize, Serialize},
    serde_json::Value,
    std::{
        fmt::{Debug, Formatter},
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    },
    url::Url,
};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("decoder error: {0}")]
    Decoder(String),
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    inner: Arc<Inner>,
}

struct Inner {
    url: Url,
    id: AtomicUsize,
    /// Name of the transport used in logs to distinguish different transports.
    name: String,
}

impl HttpTransport {
    pub fn new(client: Client, url: Url, name: String) -> Self {
        Self {
            client,
            inner: Arc::new(Inner {
                url,
                id: AtomicUsize::new(0),
                name,
            }),
        }
    }

    fn next_id(&self) -> usize {
        self.inner.id.fetch_add(1, Ordering::SeqCst)
    }

    /// Executes a single JSON-RPC request and returns its raw `result` value.
    pub async fn execute(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let id = self.next_id();
        let request = Request {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        execute_rpc(self.client.clone(), self.inner.clone(), id, &request).await
    }

    /// Issues an `eth_call` against the latest block.
    pub async fn call(&self, to: Address, data: &[u8]) -> Result<Bytes, TransportError> {
        let params = serde_json::json!([
            {
                "to": to,
                "data": const_hex::encode_prefixed(data),
            },
            "latest",
        ]);
        let result = self.execute("eth_call", params).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| TransportError::Decoder(format!("eth_call result {result} is not a string")))?;
        let bytes = const_hex::decode(hex)
            .map_err(|err| TransportError::Decoder(format!("invalid hex in eth_call result: {err}")))?;
        Ok(bytes.into())
    }
}

impl Debug for HttpTransport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("url", &self.inner.url)
            .finish()
    }
}

#[derive(Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    id: usize,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct Response {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

// Id is only used for logging.
async fn execute_rpc(
    client: Client,
    inner: Arc<Inner>,
    id: usize,
    request: &Request<'_>,
) -> Result<Value, TransportError> {
    let body = serde_json::to_string(request)
        .map_err(|err| TransportError::Decoder(err.to_string()))?;
    tracing::trace!(name = %inner.name, %id, %body, "executing request");
    let response = client
        .post(inner.url.clone())
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-RPC-REQUEST-ID", id.to_string())
        .header("X-RPC-METHOD", request.method)
        .body(body)
        .send()
        .await
        .map_err(|err| {
            tracing::warn!(name = %inner.name, %id, %err, "failed to send request");
            TransportError::Transport(err.to_string())
        })?;
    let status = response.status();
    let text = response.text().await.map_err(|err| {
        tracing::warn!(name = %inner.name, %id, %err, "failed to get response body");
        TransportError::Transport(err.to_string())
    })?;
    // Log the raw text before decoding to get more information on responses
    // that aren't valid json.
    tracing::trace!(name = %inner.name, %id, body = %text.trim(), "received response");
    if !status.is_success() {
        return Err(TransportError::Transport(format!("HTTP error {status}")));
    }

    let response: Response = serde_json::from_str(&text).map_err(|err| {
        TransportError::Decoder(format!(
            "{:?}, raw response: {}, {}, {}",
            err,
            inner.name,
            id,
            text.trim()
        ))
    })?;
    if let Some(error) = response.error {
        return Err(TransportError::Rpc {
            code: error.code,
            message: error.message,
        });
    }
    response
        .result
        .ok_or_else(|| TransportError::Decoder("response carries neither result nor error".into()))
}
