//! HTTP middleware.
//!
//! Composed in request order: panic recovery (a `tower-http` layer added in
//! `server`), request id, structured access log, tenancy resolution, then
//! role extraction. Each stage reads and updates the [`RequestContext`]
//! carried in request extensions; handlers never look at raw headers.

use crate::config::{AuthMode, AuthzMode, TenancyMode};
use crate::request_context::{RequestContext, Role};
use crate::server::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::sync::OnceLock;
use std::time::Instant;

const NAMESPACE_MAX_LEN: usize = 63;

fn namespace_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| regex::Regex::new("^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").expect("static regex"))
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": "bad_request", "message": message.into()})),
    )
        .into_response()
}

/// Assigns every request an id and seeds the context.
pub async fn request_id_middleware(mut req: Request<Body>, next: Next) -> Response {
    let context = RequestContext::new(uuid::Uuid::new_v4().to_string());
    req.extensions_mut().insert(context);
    next.run(req).await
}

/// Structured access log with request id, method, uri, status and latency.
pub async fn access_log_middleware(req: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let request_id = req
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_else(|| "unknown".to_string());

    let response = next.run(req).await;

    tracing::info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %response.status(),
        latency_ms = start.elapsed().as_millis() as u64,
        "request processed"
    );
    response
}

fn namespace_from_query(query: Option<&str>) -> Option<String> {
    let query = query?;
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == "namespace").then(|| value.to_string())
    })
}

/// Resolves the request tenant.
///
/// `single` pins every request to `default` and ignores supplied
/// namespaces. `namespace` requires one, from the `?namespace=` query
/// parameter first and the `X-Namespace` header second; a missing or
/// malformed value is rejected before any handler runs.
pub async fn tenancy_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    // Probe endpoints stay reachable without a namespace.
    let path = req.uri().path();
    if path == "/livez" || path == "/healthz" || path == "/readyz" {
        return next.run(req).await;
    }
    let tenant = match state.settings.tenancy.mode {
        TenancyMode::Single => "default".to_string(),
        TenancyMode::Namespace => {
            let candidate = namespace_from_query(req.uri().query()).or_else(|| {
                req.headers()
                    .get("X-Namespace")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            });
            let Some(namespace) = candidate else {
                return bad_request("namespace is required");
            };
            if namespace.len() > NAMESPACE_MAX_LEN || !namespace_pattern().is_match(&namespace) {
                return bad_request(format!("namespace '{namespace}' is not valid"));
            }
            namespace
        }
    };
    if let Some(ctx) = req.extensions_mut().get_mut::<RequestContext>() {
        ctx.tenant = tenant;
    }
    next.run(req).await
}

/// Extracts the caller's role and principal.
///
/// Header mode reads the configured role header. JWT mode verifies a
/// bearer token and reads the configured role claim; a present-but-invalid
/// token is a 401, while no credentials at all leave the request anonymous
/// (reads are open, mutations check the role later).
pub async fn role_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let mut role = Role::Anonymous;
    let mut principal = "anonymous".to_string();

    match state.settings.auth.mode {
        AuthMode::Header => {
            if let Some(value) = req
                .headers()
                .get(state.settings.auth.role_header.as_str())
                .and_then(|v| v.to_str().ok())
            {
                role = if value == state.settings.auth.operator_role {
                    Role::Operator
                } else {
                    Role::Named(value.to_string())
                };
                principal = req
                    .headers()
                    .get(state.settings.auth.principal_header.as_str())
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or(value)
                    .to_string();
            }
        }
        AuthMode::Jwt => {
            let bearer = req
                .headers()
                .get("Authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "));
            if let Some(token) = bearer {
                let Some(verifier) = state.jwt.as_ref() else {
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(json!({"error": "internal", "message": "jwt verifier not configured"})),
                    )
                        .into_response();
                };
                match verifier.verify(token) {
                    Ok(identity) => {
                        role = if identity.role == state.settings.auth.operator_role {
                            Role::Operator
                        } else {
                            Role::Named(identity.role)
                        };
                        principal = identity.subject;
                    }
                    Err(message) => {
                        return (
                            StatusCode::UNAUTHORIZED,
                            Json(json!({"error": "unauthorised", "message": message})),
                        )
                            .into_response();
                    }
                }
            }
        }
    }

    // SAR authorisation applies to mutating requests only.
    if state.settings.authz.mode == AuthzMode::Sar && is_mutation(req.method()) {
        if let Some(authorizer) = state.authorizer.as_ref() {
            match authorizer
                .subject_access_review(&principal, "update", "catalogsources")
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    return (
                        StatusCode::FORBIDDEN,
                        Json(json!({"error": "forbidden", "message": "subject access review denied"})),
                    )
                        .into_response();
                }
                Err(e) => {
                    return (
                        StatusCode::SERVICE_UNAVAILABLE,
                        Json(json!({"error": "service_unavailable", "message": e.to_string()})),
                    )
                        .into_response();
                }
            }
        }
    }

    if let Some(ctx) = req.extensions_mut().get_mut::<RequestContext>() {
        ctx.role = role;
        ctx.principal = principal;
    }
    next.run(req).await
}

fn is_mutation(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Verified identity pulled out of a JWT.
pub struct JwtIdentity {
    pub subject: String,
    pub role: String,
}

/// Prepared JWT verification material.
pub struct JwtVerifier {
    key: jsonwebtoken::DecodingKey,
    validation: jsonwebtoken::Validation,
    role_claim: String,
}

impl JwtVerifier {
    pub fn from_settings(auth: &crate::config::AuthSettings) -> anyhow::Result<JwtVerifier> {
        let (key, algorithm) = if let Some(path) = &auth.jwt_public_key_path {
            let pem = std::fs::read(path)
                .map_err(|e| anyhow::anyhow!("reading jwt public key '{path}': {e}"))?;
            (
                jsonwebtoken::DecodingKey::from_rsa_pem(&pem)?,
                jsonwebtoken::Algorithm::RS256,
            )
        } else if let Some(secret) = &auth.jwt_secret {
            (
                jsonwebtoken::DecodingKey::from_secret(secret.as_bytes()),
                jsonwebtoken::Algorithm::HS256,
            )
        } else {
            anyhow::bail!("jwt auth requires a secret or a public key");
        };
        let mut validation = jsonwebtoken::Validation::new(algorithm);
        if let Some(issuer) = &auth.jwt_issuer {
            validation.set_issuer(&[issuer]);
        }
        if let Some(audience) = &auth.jwt_audience {
            validation.set_audience(&[audience]);
        } else {
            validation.validate_aud = false;
        }
        Ok(JwtVerifier {
            key,
            validation,
            role_claim: auth.jwt_role_claim.clone(),
        })
    }

    pub fn verify(&self, token: &str) -> Result<JwtIdentity, String> {
        let data = jsonwebtoken::decode::<serde_json::Value>(token, &self.key, &self.validation)
            .map_err(|e| format!("invalid token: {e}"))?;
        let claims = data.claims;
        let role = claims
            .get(&self.role_claim)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let subject = claims
            .get("sub")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        Ok(JwtIdentity { subject, role })
    }
}
