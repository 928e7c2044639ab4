//! Minimal secured service: sessions, CSRF, per-IP rate limiting, static
//! token auth, and validated JSON input.
//!
//! Run with:
//!
//! ```sh
//! cargo run --example secure-api
//! curl http://localhost:8080/health
//! ```

use blueprint::prelude::*;
use std::sync::Arc;
use validator::Validate;

#[derive(Debug, Deserialize, Serialize, Validate)]
struct CreateNote {
    #[validate(length(min = 1, message = "title is required"))]
    title: String,
    body: String,
}

impl CustomValidate for CreateNote {
    fn validate(&self) -> std::result::Result<(), RuleError> {
        if self.body.len() > 10_000 {
            return Err(FieldError::new("body", "note body is too long").into());
        }
        Ok(())
    }
}

blueprint::validate_fields!(CreateNote { title => "title", body => "body" } with rules);

async fn create_note(ValidatedJson(note): ValidatedJson<CreateNote>) -> impl IntoResponse {
    Success::new(note)
}

async fn csrf_token(csrf: CsrfToken) -> impl IntoResponse {
    Success::new(csrf.token().to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = Config::load()?;
    // Local demo over plain HTTP
    config.session.secure = false;

    init_tracing(&config)?;

    let sessions = SessionManager::in_memory(config.session.clone());
    sessions.start_sweeper(std::time::Duration::from_secs(60));

    // An empty authTokenSecret disables auth; set it in config.toml or via
    // BLUEPRINT_SERVER_OPTIONS to require the header.
    let auth: Arc<dyn AuthProvider> = Arc::new(TokenAuth::new(
        config.server.auth_token_header().to_string(),
        config.server.auth_token_secret().to_string(),
    ));

    let app = Router::new()
        .route("/health", get(health))
        .route("/ready", get(readiness))
        .route("/csrf", get(csrf_token))
        .route("/notes", post(create_note));

    Server::new(config)
        .with_session(sessions.clone())
        .with_csrf()
        .with_rate_limit()
        .with_auth(auth)
        .serve(app)
        .await?;

    sessions.shutdown().await;
    Ok(())
}
