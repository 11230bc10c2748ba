use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use hyper::client::conn::http1::SendRequest;
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

/// HTTP-01 responder varsayılan dinleme adresi.
///
/// Sunucu adresleri normalde localhost'a bağlanır; responder'ın var olma
/// nedeni ise dışarıdaki ACME sunucusundan erişilebilmektir.
const DEFAULT_ADDRESS: &str = "0.0.0.0:80";

/// Sunucu kapanışına tanınan süre.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Upstream'e iletilen tek bir isteğe tanınan süre.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// RFC 2616 §13.5.1 hop-by-hop başlıkları; upstream'e iletilmez.
const HOP_BY_HOP_HEADERS: [HeaderName; 8] = [
    HeaderName::from_static("connection"),
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-authenticate"),
    HeaderName::from_static("proxy-authorization"),
    HeaderName::from_static("te"),
    HeaderName::from_static("trailers"),
    HeaderName::from_static("transfer-encoding"),
    HeaderName::from_static("upgrade"),
];

/// HTTP-01 responder hataları.
#[derive(Debug, Error)]
pub enum SolverError {
    /// Upstream URI'si kullanılabilir bir host içermiyor.
    #[error("upstream URI'sinden host çıkarılamadı: {uri}")]
    InvalidUpstream { uri: String },
    /// Dinleme soketi açılamadı.
    #[error("{address} adresi dinlenemedi: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    /// Upstream sunucusuna bağlanılamadı.
    #[error("upstream {authority} bağlantısı kurulamadı: {source}")]
    UpstreamConnect {
        authority: String,
        #[source]
        source: std::io::Error,
    },
    /// Upstream ile HTTP alışverişi başarısız oldu.
    #[error("upstream HTTP isteği başarısız: {0}")]
    UpstreamHttp(#[from] hyper::Error),
}

/// HTTP-01 responder yapılandırması.
#[derive(Debug, Clone, Default)]
pub struct HttpSolverConfig {
    /// Dinleme adresi; boş bırakılırsa `0.0.0.0:80` kullanılır.
    pub address: Option<String>,
    /// ACME dışı isteklerin iletileceği upstream; yoksa 404 dönülür.
    pub upstream_uri: Option<Url>,
}

/// `/.well-known/acme-challenge/` isteklerini yanıtlayan küçük HTTP sunucusu.
///
/// Token kümesi işçiler tarafından `add_token`/`discard_token` ile
/// güncellenir. Upstream yapılandırıldığında diğer yollar tek bir kalıcı
/// bağlantı üzerinden şeffaf biçimde iletilir; istek şeması ve Host
/// başlığı yeniden yazılmaz, upstream dış dünyadan gelen istekleri görmeyi
/// beklemelidir.
pub struct HttpChallengeSolver {
    config: HttpSolverConfig,
    tokens: Arc<Mutex<HashSet<String>>>,
    runtime: Mutex<Option<RunningServer>>,
}

struct RunningServer {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    local_addr: SocketAddr,
}

struct SolverState {
    thumbprint: String,
    tokens: Arc<Mutex<HashSet<String>>>,
    upstream: Option<Upstream>,
}

impl HttpChallengeSolver {
    #[must_use]
    pub fn new(config: HttpSolverConfig) -> Self {
        Self {
            config,
            tokens: Arc::new(Mutex::new(HashSet::new())),
            runtime: Mutex::new(None),
        }
    }

    /// Challenge token'ını yayınlanacaklar kümesine ekler.
    pub fn add_token(&self, token: &str) {
        self.tokens
            .lock()
            .expect("token kilidi zehirlenmemeli")
            .insert(token.to_owned());
    }

    /// Challenge token'ını kümeden düşürür.
    pub fn discard_token(&self, token: &str) {
        self.tokens
            .lock()
            .expect("token kilidi zehirlenmemeli")
            .remove(token);
    }

    /// Sunucunun bağlandığı adresi döndürür.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.runtime
            .lock()
            .expect("runtime kilidi zehirlenmemeli")
            .as_ref()
            .map(|running| running.local_addr)
    }

    /// Responder'ı hesap thumbprint'i ile başlatır.
    ///
    /// Upstream yapılandırıldıysa bağlantı hemen kurulur; yapılandırma
    /// hatalarını ilk istekten önce yakalamak için.
    ///
    /// # Errors
    ///
    /// Dinleme soketi açılamazsa veya upstream bağlantısı kurulamazsa
    /// `SolverError` döner.
    pub async fn start(&self, thumbprint: String) -> Result<(), SolverError> {
        let address = self
            .config
            .address
            .clone()
            .unwrap_or_else(|| DEFAULT_ADDRESS.to_owned());

        let upstream = match &self.config.upstream_uri {
            Some(uri) => {
                let upstream = Upstream::from_uri(uri)?;
                info!(upstream = %upstream.authority, "ACME dışı HTTP istekleri upstream'e iletilecek");
                upstream.ensure_connected().await?;
                Some(upstream)
            }
            None => None,
        };

        let state = Arc::new(SolverState {
            thumbprint,
            tokens: Arc::clone(&self.tokens),
            upstream,
        });

        let router = Router::new()
            .route("/.well-known/acme-challenge/:token", any(serve_challenge))
            .fallback(passthrough)
            .with_state(state);

        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| SolverError::Bind {
                address: address.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| SolverError::Bind {
            address: address.clone(),
            source,
        })?;

        info!(address = %local_addr, "HTTP challenge responder dinliyor");

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = shutdown_rx.wait_for(|stopped| *stopped).await;
            });
            if let Err(err) = serve.await {
                error!(error = %err, "HTTP challenge responder sunucu hatası");
            }
        });

        *self.runtime.lock().expect("runtime kilidi zehirlenmemeli") = Some(RunningServer {
            shutdown: shutdown_tx,
            task,
            local_addr,
        });

        Ok(())
    }

    /// Responder'ı kapatır; devam eden isteklere 1 saniye tanınır.
    pub async fn stop(&self) {
        let running = self
            .runtime
            .lock()
            .expect("runtime kilidi zehirlenmemeli")
            .take();

        let Some(running) = running else {
            return;
        };

        let _ = running.shutdown.send(true);

        let mut task = running.task;
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
            warn!("HTTP challenge responder süresinde kapanmadı, iptal ediliyor");
            task.abort();
        }
    }
}

async fn serve_challenge(
    State(state): State<Arc<SolverState>>,
    Path(token): Path<String>,
) -> Response {
    let known = state
        .tokens
        .lock()
        .expect("token kilidi zehirlenmemeli")
        .contains(&token);

    if !known {
        debug!(token = %token, status = 400, "bilinmeyen challenge token'ı");
        return (StatusCode::BAD_REQUEST, "unknown token\n").into_response();
    }

    debug!(token = %token, status = 200, "challenge yanıtı servis edildi");

    // RFC 8555 §8.3: key-authorization = token "." hesap thumbprint'i.
    let body = format!("{token}.{}\n", state.thumbprint);
    (StatusCode::OK, body).into_response()
}

async fn passthrough(State(state): State<Arc<SolverState>>, request: Request) -> Response {
    let Some(upstream) = &state.upstream else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match tokio::time::timeout(UPSTREAM_TIMEOUT, upstream.forward(request)).await {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => {
            error!(error = %err, "istek upstream sunucusuna iletilemedi");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(_) => {
            error!("upstream isteği zaman aşımına uğradı");
            StatusCode::GATEWAY_TIMEOUT.into_response()
        }
    }
}

/// Tek bir kalıcı HTTP/1 bağlantısı üzerinden şeffaf iletim.
struct Upstream {
    authority: String,
    connection: tokio::sync::Mutex<Option<SendRequest<Body>>>,
}

impl Upstream {
    fn from_uri(uri: &Url) -> Result<Self, SolverError> {
        let authority = upstream_authority(uri).ok_or_else(|| SolverError::InvalidUpstream {
            uri: uri.to_string(),
        })?;

        Ok(Self {
            authority,
            connection: tokio::sync::Mutex::new(None),
        })
    }

    async fn ensure_connected(&self) -> Result<(), SolverError> {
        let mut slot = self.connection.lock().await;
        if slot.as_ref().is_some_and(|sender| !sender.is_closed()) {
            return Ok(());
        }

        let stream =
            TcpStream::connect(&self.authority)
                .await
                .map_err(|source| SolverError::UpstreamConnect {
                    authority: self.authority.clone(),
                    source,
                })?;

        let (sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                debug!(error = %err, "upstream bağlantısı kapandı");
            }
        });

        *slot = Some(sender);
        Ok(())
    }

    async fn forward(&self, mut request: Request) -> Result<Response, SolverError> {
        strip_hop_by_hop_headers(request.headers_mut());

        self.ensure_connected().await?;

        // Bağlantı istek boyunca kilitli kalır; upstream tek istemci görür.
        let mut slot = self.connection.lock().await;
        let Some(sender) = slot.as_mut() else {
            return Err(SolverError::UpstreamConnect {
                authority: self.authority.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotConnected, "bağlantı yok"),
            });
        };

        match sender.send_request(request).await {
            Ok(response) => {
                let (parts, body) = response.into_parts();
                Ok(Response::from_parts(parts, Body::new(body)))
            }
            Err(err) => {
                // Hatalı bağlantı düşürülür; bir sonraki istek yeniden bağlanır.
                *slot = None;
                Err(err.into())
            }
        }
    }
}

fn strip_hop_by_hop_headers(headers: &mut axum::http::HeaderMap) {
    for name in &HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

fn upstream_authority(uri: &Url) -> Option<String> {
    let host = match uri.host_str() {
        Some(host) if !host.is_empty() => host.to_owned(),
        _ => "localhost".to_owned(),
    };
    let port = uri.port_or_known_default().unwrap_or(80);
    Some(format!("{host}:{port}"))
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;
    use pretty_assertions::assert_eq;

    use super::*;

    fn sample_state(tokens: &[&str]) -> Arc<SolverState> {
        let set: HashSet<String> = tokens.iter().map(|token| (*token).to_owned()).collect();
        Arc::new(SolverState {
            thumbprint: "THUMB".to_owned(),
            tokens: Arc::new(Mutex::new(set)),
            upstream: None,
        })
    }

    async fn body_string(response: Response) -> String {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("gövde okunmalı")
            .to_bytes();
        String::from_utf8(bytes.to_vec()).expect("gövde UTF-8 olmalı")
    }

    #[tokio::test]
    async fn known_token_serves_key_authorization() {
        let state = sample_state(&["tok-1"]);
        let response = serve_challenge(State(state), Path("tok-1".to_owned())).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "tok-1.THUMB\n");
    }

    #[tokio::test]
    async fn unknown_token_is_rejected_with_400() {
        let state = sample_state(&[]);
        let response = serve_challenge(State(state), Path("tok-1".to_owned())).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_string(response).await, "unknown token\n");
    }

    #[tokio::test]
    async fn passthrough_without_upstream_returns_404() {
        let state = sample_state(&[]);
        let request = Request::builder()
            .uri("/healthz")
            .body(Body::empty())
            .unwrap();

        let response = passthrough(State(state), request).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn tokens_can_be_added_and_discarded() {
        let solver = HttpChallengeSolver::new(HttpSolverConfig::default());
        solver.add_token("tok-1");

        let state = Arc::new(SolverState {
            thumbprint: "T".to_owned(),
            tokens: Arc::clone(&solver.tokens),
            upstream: None,
        });

        let response = serve_challenge(State(Arc::clone(&state)), Path("tok-1".to_owned())).await;
        assert_eq!(response.status(), StatusCode::OK);

        solver.discard_token("tok-1");
        let response = serve_challenge(State(state), Path("tok-1".to_owned())).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn hop_by_hop_headers_are_stripped() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("connection", "keep-alive".parse().unwrap());
        headers.insert("transfer-encoding", "chunked".parse().unwrap());
        headers.insert("upgrade", "websocket".parse().unwrap());
        headers.insert("host", "example.com".parse().unwrap());
        headers.insert("x-custom", "stays".parse().unwrap());

        strip_hop_by_hop_headers(&mut headers);

        assert!(headers.get("connection").is_none());
        assert!(headers.get("transfer-encoding").is_none());
        assert!(headers.get("upgrade").is_none());
        assert!(headers.get("host").is_some());
        assert!(headers.get("x-custom").is_some());
    }

    #[test]
    fn upstream_authority_fills_defaults() {
        let uri = Url::parse("http://127.0.0.1:8080/path").unwrap();
        assert_eq!(upstream_authority(&uri).unwrap(), "127.0.0.1:8080");

        let uri = Url::parse("http://example.com").unwrap();
        assert_eq!(upstream_authority(&uri).unwrap(), "example.com:80");

        let uri = Url::parse("https://example.com").unwrap();
        assert_eq!(upstream_authority(&uri).unwrap(), "example.com:443");
    }
}
