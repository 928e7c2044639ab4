//! HTTP server with the fixed middleware pipeline and graceful shutdown

use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::CorsLayer,
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

use crate::{
    config::Config,
    error::Result,
    middleware::{
        auth_middleware, AuthProvider, CsrfProtect, RateLimit, RequestLogger, SecurityHeaders,
    },
    session::{session_middleware, SessionManager},
};

/// Server instance.
///
/// The middleware pipeline is fixed once `serve` is called; entry order is
/// request-logger, security-headers, rate-limit, session-attach, CSRF gate,
/// auth provider, then the routes. Exit order is the reverse. Additional
/// user middleware belongs on the [`Router`] before it is handed to `serve`
/// (first registered runs outermost).
pub struct Server {
    config: Config,
    auth: Option<Arc<dyn AuthProvider>>,
    session: Option<SessionManager>,
    csrf: Option<CsrfProtect>,
    rate_limit: Option<RateLimit>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        Self {
            config,
            auth: None,
            session: None,
            csrf: None,
            rate_limit: None,
        }
    }

    /// Install an authentication provider behind the shared auth middleware
    pub fn with_auth(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(provider);
        self
    }

    /// Install the session manager
    pub fn with_session(mut self, manager: SessionManager) -> Self {
        self.session = Some(manager);
        self
    }

    /// Install the CSRF gate (requires a session manager)
    pub fn with_csrf(mut self) -> Self {
        self.csrf = Some(CsrfProtect::default());
        self
    }

    /// Install the per-IP rate limiter from configuration
    pub fn with_rate_limit(mut self) -> Self {
        self.rate_limit = Some(RateLimit::new(self.config.rate_limit.clone()));
        self
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn tls_enabled(&self) -> bool {
        self.config.server.tls.is_some()
    }

    /// Apply the fixed pipeline plus the ambient layers.
    ///
    /// Layers are added innermost-first; the last layer added is outermost.
    fn apply_pipeline(&self, app: Router) -> Router {
        use axum::middleware::from_fn_with_state;

        let mut app = app;

        // Innermost: the auth gate, immediately around the routes
        if let Some(provider) = &self.auth {
            app = app.layer(from_fn_with_state(provider.clone(), auth_middleware));
        }

        // CSRF compares against the session, so it sits inside session-attach
        if let Some(csrf) = &self.csrf {
            app = app.layer(from_fn_with_state(csrf.clone(), CsrfProtect::middleware));
        }

        if let Some(manager) = &self.session {
            app = app.layer(from_fn_with_state(manager.clone(), session_middleware));
        }

        if let Some(rate_limit) = &self.rate_limit {
            app = app.layer(from_fn_with_state(
                rate_limit.clone(),
                RateLimit::middleware,
            ));
        }

        app = app.layer(from_fn_with_state(
            SecurityHeaders::new(self.config.security_headers.clone(), self.tls_enabled()),
            SecurityHeaders::middleware,
        ));

        // Request logger heads the pipeline: every inner middleware sees its
        // RequestContext
        app = app.layer(from_fn_with_state(
            RequestLogger::new(self.config.server.trusted_proxies.clone()),
            RequestLogger::middleware,
        ));

        // Ambient layers outside the pipeline proper
        let body_limit = self.config.middleware.body_limit_mb * 1024 * 1024;
        app = app
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new())
                    .on_response(DefaultOnResponse::new()),
            )
            .layer(RequestBodyLimitLayer::new(body_limit))
            .layer(TimeoutLayer::with_status_code(
                http::StatusCode::REQUEST_TIMEOUT,
                self.config.server.request_timeout(),
            ));

        if self.config.middleware.compression {
            app = app.layer(CompressionLayer::new());
        }

        app = app.layer(self.build_cors_layer());

        if self.config.middleware.catch_panic {
            app = app.layer(CatchPanicLayer::custom(handle_panic));
        }

        app
    }

    /// Run the server with the given router, blocking until SIGINT/SIGTERM
    pub async fn serve(self, app: Router) -> Result<()> {
        let shutdown = CancellationToken::new();
        let signal_token = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            signal_token.cancel();
        });

        self.serve_with_shutdown(app, shutdown).await
    }

    /// Run the server until `shutdown` fires, then drain in-flight requests
    pub async fn serve_with_shutdown(
        self,
        app: Router,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let addr = self.config.server.bind_addr();

        tracing::info!("Starting {} on {}", self.config.service.name, addr);
        self.log_middleware_config();

        let app = self.apply_pipeline(app);

        #[cfg(feature = "tls")]
        if let Some(tls_config) = &self.config.server.tls {
            let server_config = crate::tls::load_server_config(tls_config)?;
            let tcp = TcpListener::bind(&addr).await?;
            tracing::info!("Server listening on {} (TLS)", addr);

            let listener = crate::tls::TlsListener::new(tcp, server_config);
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await?;

            tracing::info!("Server shutdown complete");
            return Ok(());
        }

        #[cfg(not(feature = "tls"))]
        if self.config.server.tls.is_some() {
            return Err(crate::error::Error::Config(Box::new(figment::Error::from(
                "TLS is configured but the 'tls' feature is disabled".to_string(),
            ))));
        }

        let listener = TcpListener::bind(&addr).await?;
        tracing::info!("Server listening on {}", addr);

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

        tracing::info!("Server shutdown complete");

        Ok(())
    }

    fn log_middleware_config(&self) {
        tracing::info!("Middleware configuration:");
        tracing::info!("  - Auth provider: {}", self.auth.is_some());
        tracing::info!("  - Sessions: {}", self.session.is_some());
        tracing::info!("  - CSRF gate: {}", self.csrf.is_some());
        tracing::info!("  - Rate limiting: {}", self.rate_limit.is_some());
        tracing::info!(
            "  - Security headers: {}",
            self.config.security_headers.enabled
        );
        tracing::info!(
            "  - Request body limit: {} MB",
            self.config.middleware.body_limit_mb
        );
        tracing::info!("  - Compression: {}", self.config.middleware.compression);
        tracing::info!("  - CORS mode: {}", self.config.middleware.cors_mode);
        tracing::info!(
            "  - Request timeout: {} seconds",
            self.config.server.read_timeout_secs
        );
        tracing::info!("  - TLS: {}", self.tls_enabled());
    }

    /// Build CORS layer based on configuration
    fn build_cors_layer(&self) -> CorsLayer {
        match self.config.middleware.cors_mode.as_str() {
            "permissive" => CorsLayer::permissive(),
            "restrictive" | "disabled" => CorsLayer::new(),
            other => {
                tracing::warn!("Unknown CORS mode: {}, defaulting to permissive", other);
                CorsLayer::permissive()
            }
        }
    }
}

/// Convert a handler panic into a 500 envelope; the payload and backtrace go
/// to the error log, never to the client
fn handle_panic(
    err: Box<dyn std::any::Any + Send + 'static>,
) -> axum::http::Response<axum::body::Body> {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "non-string panic payload".to_string()
    };

    tracing::error!(
        panic = %detail,
        backtrace = %std::backtrace::Backtrace::force_capture(),
        "handler panicked"
    );

    crate::responses::http_500("Internal server error")
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    tracing::info!("Shutdown signal received, draining requests...");
}
