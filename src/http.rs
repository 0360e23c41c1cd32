//! HTTP front end.
//!
//! Serves the protocol requests over HTTP/1.1:
//!
//! | Path                          | Response                              |
//! |-------------------------------|---------------------------------------|
//! | `/probe`, `/{device}/probe`   | device metadata                       |
//! | `/current`                    | latest values (`path`, `at`)          |
//! | `/sample`                     | a range (`from`, `to`, `count`, `path`) |
//! | `/sample?interval=..`         | multipart stream (`heartbeat`, `instanceId`) |
//! | `/assets`                     | assets (`type`, `device`, `removed`, `count`) |
//! | `/asset/{id;id}`              | specific assets                       |
//! | `/metrics`                    | Prometheus text                       |
//! | `/health`                     | liveness                              |

use std::collections::HashMap;
use std::convert::Infallible;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes, Frame};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use mtconnect_buffer::prometheus::{self, PrometheusConfig};
use mtconnect_buffer::{
    Agent, AssetRequest, BufferError, CurrentRequest, SampleRequest, StreamFrame, StreamOptions,
    StreamSession,
};
use mtconnect_types::ErrorCode;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

use crate::format::{self, FormatResult, Formatter, JsonFormatter};

/// Body type of every response.
pub type ResponseBody = UnsyncBoxBody<Bytes, Infallible>;

/// Shared state of the HTTP server.
#[derive(Debug)]
pub struct HttpState {
    agent: Arc<Agent>,
    formatter: Arc<dyn Formatter>,
    stream_defaults: StreamOptions,
    prometheus: PrometheusConfig,
}

impl HttpState {
    pub fn new(agent: Arc<Agent>) -> Self {
        Self {
            agent,
            formatter: Arc::new(JsonFormatter),
            stream_defaults: StreamOptions::default(),
            prometheus: PrometheusConfig::default(),
        }
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn Formatter>) -> Self {
        self.formatter = formatter;
        self
    }

    /// Options every stream starts from before request parameters apply.
    pub fn with_stream_defaults(mut self, options: StreamOptions) -> Self {
        self.stream_defaults = options;
        self
    }

    pub fn with_prometheus(mut self, config: PrometheusConfig) -> Self {
        self.prometheus = config;
        self
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }
}

/// A parsed request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Probe { device: Option<String> },
    Current { device: Option<String> },
    Sample { device: Option<String> },
    Assets { device: Option<String> },
    Asset { ids: Vec<String> },
    Metrics,
    Health,
    NotFound,
}

impl Route {
    /// Map a request path onto a route.
    pub fn parse(path: &str) -> Route {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            [] | ["probe"] => Route::Probe { device: None },
            ["current"] => Route::Current { device: None },
            ["sample"] => Route::Sample { device: None },
            ["assets"] => Route::Assets { device: None },
            ["asset", ids] | ["assets", ids] => Route::Asset {
                ids: ids
                    .split(';')
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect(),
            },
            ["metrics"] => Route::Metrics,
            ["health"] | ["healthz"] => Route::Health,
            [device] | [device, "probe"] => Route::Probe {
                device: Some(device.to_string()),
            },
            [device, "current"] => Route::Current {
                device: Some(device.to_string()),
            },
            [device, "sample"] => Route::Sample {
                device: Some(device.to_string()),
            },
            [device, "assets"] => Route::Assets {
                device: Some(device.to_string()),
            },
            _ => Route::NotFound,
        }
    }
}

/// Decoded query string.
#[derive(Debug, Default)]
struct Params(HashMap<String, String>);

impl Params {
    fn from_uri(uri: &Uri) -> Self {
        let pairs = uri
            .query()
            .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        Params(pairs)
    }

    fn text(&self, name: &str) -> Option<String> {
        self.0.get(name).filter(|v| !v.is_empty()).cloned()
    }

    fn has(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    fn parse<T: FromStr>(&self, name: &str) -> Result<Option<T>, BufferError> {
        match self.0.get(name) {
            None => Ok(None),
            Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
                BufferError::InvalidRequest(format!("invalid value for {}: {:?}", name, raw))
            }),
        }
    }

    fn millis(&self, name: &str) -> Result<Option<Duration>, BufferError> {
        Ok(self.parse::<u64>(name)?.map(Duration::from_millis))
    }
}

/// Accept connections until `shutdown` flips to true.
pub async fn serve(
    listener: TcpListener,
    state: Arc<HttpState>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "HTTP server listening");
    }

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted?,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("HTTP server stopping");
                    return Ok(());
                }
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let state = state.clone();
                async move { Ok::<_, Infallible>(handle(&state, req.method(), req.uri())) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(%peer, "HTTP connection error: {}", e);
            }
        });
    }
}

/// Answer one request.
pub fn handle(state: &HttpState, method: &Method, uri: &Uri) -> Response<ResponseBody> {
    if method != Method::GET && method != Method::HEAD {
        let err = BufferError::InvalidRequest(format!("method {} not allowed", method));
        let mut response = error_response(state, &err);
        *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        return response;
    }

    let route = Route::parse(uri.path());
    let params = Params::from_uri(uri);
    tracing::debug!(?route, "request");

    match dispatch(state, route, &params) {
        Ok(response) => response,
        Err(err) => {
            tracing::debug!(uri = %uri, "request failed: {}", err);
            error_response(state, &err)
        }
    }
}

fn dispatch(state: &HttpState, route: Route, params: &Params) -> Result<Response<ResponseBody>, BufferError> {
    let query = state.agent.query();
    let formatter = state.formatter.as_ref();
    match route {
        Route::Probe { device } => document(formatter, formatter.probe(&query.probe(device.as_deref())?)),
        Route::Current { device } => {
            let request = CurrentRequest {
                device,
                path: params.text("path"),
                at: params.parse("at")?,
            };
            document(formatter, formatter.current(&query.current(&request)?))
        }
        Route::Sample { device } if params.has("interval") => stream(state, device, params),
        Route::Sample { device } => {
            if let Some(presented) = params.parse("instanceId")? {
                query.check_instance(presented)?;
            }
            let request = SampleRequest {
                device,
                path: params.text("path"),
                from: params.parse("from")?,
                to: params.parse("to")?,
                count: params.parse("count")?,
            };
            document(formatter, formatter.sample(&query.sample(&request)?))
        }
        Route::Assets { device } => {
            let request = AssetRequest {
                asset_type: params.text("type"),
                device: device.or_else(|| params.text("device")),
                removed: params.parse("removed")?.unwrap_or(false),
                count: params.parse("count")?,
            };
            document(formatter, formatter.assets(&query.assets(&request)?))
        }
        Route::Asset { ids } => {
            let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
            document(formatter, formatter.assets(&query.asset(&ids)?))
        }
        Route::Metrics => {
            let body = prometheus::format_prometheus(
                &state.agent.metrics().snapshot(),
                &query.header(),
                &state.prometheus,
            );
            Ok(full(StatusCode::OK, prometheus::CONTENT_TYPE, Bytes::from(body)))
        }
        Route::Health => Ok(full(StatusCode::OK, "text/plain", Bytes::from_static(b"OK"))),
        Route::NotFound => Ok(full(
            StatusCode::NOT_FOUND,
            "text/plain",
            Bytes::from_static(b"Not Found"),
        )),
    }
}

fn stream(state: &HttpState, device: Option<String>, params: &Params) -> Result<Response<ResponseBody>, BufferError> {
    let mut options = state.stream_defaults.clone();
    options.device = device;
    options.path = params.text("path");
    options.from = params.parse("from")?;
    options.count = params.parse("count")?;
    options.instance_id = params.parse("instanceId")?;
    if let Some(interval) = params.millis("interval")? {
        options = options.interval(interval);
    }
    if let Some(heartbeat) = params.millis("heartbeat")? {
        options = options.heartbeat(heartbeat);
    }

    StreamSession::validate(state.agent.query(), &options)?;
    let (session, frames) = state.agent.stream(options);
    tracing::debug!("stream opened");

    let body = FrameBody {
        formatter: state.formatter.clone(),
        _session: session,
        frames,
        finished: false,
    };
    let mut response = Response::new(body.boxed_unsync());
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static(format::MULTIPART_CONTENT_TYPE),
    );
    Ok(response)
}

/// Streams frames as multipart parts. Dropping the body (client gone)
/// drops the session, which stops it.
struct FrameBody {
    formatter: Arc<dyn Formatter>,
    _session: StreamSession,
    frames: mpsc::Receiver<StreamFrame>,
    finished: bool,
}

impl Body for FrameBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.frames.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(frame)) => match format::render_part(self.formatter.as_ref(), &frame) {
                Ok(part) => {
                    if frame.is_terminal() {
                        // Nothing follows an error; end without waiting on the task.
                        self.frames.close();
                    }
                    Poll::Ready(Some(Ok(Frame::data(part))))
                }
                Err(e) => {
                    tracing::error!("failed to render stream frame: {}", e);
                    self.finished = true;
                    Poll::Ready(Some(Ok(Frame::data(format::closing_boundary()))))
                }
            },
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(Some(Ok(Frame::data(format::closing_boundary()))))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.finished
    }
}

/// HTTP status for a protocol error code.
pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::OutOfRange | ErrorCode::NoDevice | ErrorCode::AssetNotFound => {
            StatusCode::NOT_FOUND
        }
        ErrorCode::InstanceMismatch => StatusCode::CONFLICT,
        ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn document(formatter: &dyn Formatter, rendered: FormatResult) -> Result<Response<ResponseBody>, BufferError> {
    match rendered {
        Ok(body) => Ok(full(StatusCode::OK, formatter.content_type(), body)),
        Err(e) => {
            tracing::error!("{}", e);
            Ok(internal_error())
        }
    }
}

fn error_response(state: &HttpState, err: &BufferError) -> Response<ResponseBody> {
    let doc = state.agent.query().error_document(err);
    match state.formatter.error(&doc) {
        Ok(body) => full(status_for(err.code()), state.formatter.content_type(), body),
        Err(e) => {
            tracing::error!("{}", e);
            internal_error()
        }
    }
}

fn internal_error() -> Response<ResponseBody> {
    full(
        StatusCode::INTERNAL_SERVER_ERROR,
        "text/plain",
        Bytes::from_static(b"Internal Server Error"),
    )
}

fn full(status: StatusCode, content_type: &'static str, body: Bytes) -> Response<ResponseBody> {
    let mut response = Response::new(Full::new(body).boxed_unsync());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtconnect_types::{Category, DataItemDescription, DeviceDescription, VALUE_KEY};
    use std::collections::BTreeMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn agent() -> Arc<Agent> {
        Arc::new(
            Agent::builder()
                .buffer_size(4)
                .devices(vec![DeviceDescription {
                    uuid: "mill-1".to_string(),
                    name: "mill".to_string(),
                    data_items: vec![
                        DataItemDescription {
                            id: "x".to_string(),
                            name: Some("Xact".to_string()),
                            category: Category::Sample,
                            kind: "POSITION".to_string(),
                            sub_type: None,
                            units: None,
                        },
                        DataItemDescription {
                            id: "asset_chg".to_string(),
                            name: None,
                            category: Category::Event,
                            kind: "ASSET_CHANGED".to_string(),
                            sub_type: None,
                            units: None,
                        },
                    ],
                }])
                .build(),
        )
    }

    fn push(agent: &Agent, value: &str) -> u64 {
        let values = BTreeMap::from([(VALUE_KEY.to_string(), value.to_string())]);
        agent
            .gateway()
            .append("mill", "x", values, agent.clock().now())
            .unwrap()
            .unwrap()
    }

    fn get(state: &HttpState, uri: &str) -> Response<ResponseBody> {
        handle(state, &Method::GET, &uri.parse().unwrap())
    }

    async fn json(response: Response<ResponseBody>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn routes() {
        assert_eq!(Route::parse("/"), Route::Probe { device: None });
        assert_eq!(Route::parse("/probe"), Route::Probe { device: None });
        assert_eq!(
            Route::parse("/mill"),
            Route::Probe {
                device: Some("mill".to_string())
            }
        );
        assert_eq!(
            Route::parse("/mill/sample"),
            Route::Sample {
                device: Some("mill".to_string())
            }
        );
        assert_eq!(
            Route::parse("/asset/T1;T2;"),
            Route::Asset {
                ids: vec!["T1".to_string(), "T2".to_string()]
            }
        );
        assert_eq!(Route::parse("/health"), Route::Health);
        assert_eq!(Route::parse("/a/b/c"), Route::NotFound);
    }

    #[test]
    fn status_mapping() {
        assert_eq!(status_for(ErrorCode::OutOfRange), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorCode::InstanceMismatch), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorCode::InvalidRequest), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn probe_and_current() {
        let state = HttpState::new(agent());
        push(state.agent(), "1.5");

        let response = get(&state, "/mill/probe");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["devices"][0]["uuid"], "mill-1");

        let doc = json(get(&state, "/current?path=//DataItem%5B@type=%22POSITION%22%5D")).await;
        assert_eq!(doc["observations"][0]["data_item"], "x");
    }

    #[tokio::test]
    async fn sample_out_of_range() {
        let state = HttpState::new(agent());
        for i in 0..8 {
            push(state.agent(), &i.to_string());
        }

        let response = get(&state, "/sample?from=2");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let doc = json(response).await;
        assert_eq!(doc["errors"][0]["code"], "OUT_OF_RANGE");
        assert_eq!(doc["header"]["first_sequence"], 5);

        let doc = json(get(&state, "/sample?from=5&count=2")).await;
        assert_eq!(doc["end_sequence"], 7);
        assert_eq!(doc["observations"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn bad_parameters() {
        let state = HttpState::new(agent());

        let response = get(&state, "/sample?count=abc");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["errors"][0]["code"], "INVALID_REQUEST");

        assert_eq!(get(&state, "/lathe/current").status(), StatusCode::NOT_FOUND);
        assert_eq!(get(&state, "/sample?instanceId=1").status(), StatusCode::CONFLICT);

        let response = handle(&state, &Method::POST, &"/current".parse().unwrap());
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn assets() {
        let state = HttpState::new(agent());
        let now = state.agent().clock().now();
        let gateway = state.agent().gateway();
        gateway.upsert_asset("mill", "T1", "CuttingTool", "<T1/>", false, now).unwrap();
        gateway.upsert_asset("mill", "T2", "CuttingTool", "<T2/>", false, now).unwrap();
        gateway.remove_asset("T1", now).unwrap();

        let doc = json(get(&state, "/assets")).await;
        assert_eq!(doc["assets"].as_array().unwrap().len(), 1);

        let doc = json(get(&state, "/mill/assets?removed=true")).await;
        assert_eq!(doc["assets"].as_array().unwrap().len(), 2);

        let doc = json(get(&state, "/asset/T1")).await;
        assert_eq!(doc["assets"][0]["removed"], true);

        assert_eq!(get(&state, "/asset/T9").status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_and_health() {
        let state = HttpState::new(agent());
        push(state.agent(), "1");

        let response = get(&state, "/metrics");
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            prometheus::CONTENT_TYPE
        );
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("mtconnect_"));

        assert_eq!(get(&state, "/health").status(), StatusCode::OK);
        assert_eq!(get(&state, "/nope/nope/nope").status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stream_emits_parts() {
        let state = HttpState::new(agent());
        let seq = push(state.agent(), "1");

        let response = get(&state, &format!("/sample?interval=0&heartbeat=1000&from={}", seq));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            format::MULTIPART_CONTENT_TYPE
        );

        let mut body = response.into_body();
        let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let part = frame.into_data().unwrap();
        let text = String::from_utf8(part.to_vec()).unwrap();
        assert!(text.starts_with("--mtconnect-boundary\r\n"));
        assert!(text.contains("\"end_sequence\":2"));
    }

    #[tokio::test]
    async fn stream_rejects_negative_count() {
        let state = HttpState::new(agent());
        push(state.agent(), "1");
        let response = get(&state, "/sample?interval=0&from=1&count=-2");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stream_ends_after_error_part() {
        let state = HttpState::new(agent());
        let response = get(&state, "/sample?interval=0&heartbeat=60000");
        assert_eq!(response.status(), StatusCode::OK);
        let mut body = response.into_body();

        tokio::time::sleep(Duration::from_millis(20)).await;
        state.agent().reset();

        let mut parts = Vec::new();
        while let Some(frame) = tokio::time::timeout(Duration::from_secs(5), body.frame())
            .await
            .unwrap()
        {
            let data = frame.unwrap().into_data().unwrap();
            parts.push(String::from_utf8(data.to_vec()).unwrap());
        }
        assert_eq!(parts.len(), 2);
        assert!(parts[0].contains("INSTANCE_MISMATCH"));
        assert_eq!(parts[1], "--mtconnect-boundary--\r\n");
    }

    #[tokio::test]
    async fn stream_rejects_stale_resume() {
        let state = HttpState::new(agent());
        for i in 0..8 {
            push(state.agent(), &i.to_string());
        }
        let response = get(&state, "/sample?interval=0&from=1");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn serves_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(serve(listener, Arc::new(HttpState::new(agent())), shutdown_rx));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with("OK"));

        shutdown_tx.send(true).unwrap();
        server.await.unwrap().unwrap();
    }
}
