//! Passkey HTTP handlers
//!
//! Thin adapters between actix-web and [`PasskeyService`]: they resolve the
//! principal from the trusted upstream header, open the session cookie, call
//! the façade and map its uniform response onto a status code.

use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse};
use log::{debug, error};
use serde::de::DeserializeOwned;

use crate::error::ErrorKind;
use crate::passkey::{
    ActivateRequest, AuthenticateRequest, DeleteRequest, PasskeyResponse, PasskeyService,
    Principal, RegisterRequest, SessionContext,
};
use crate::utils::cookie::CookieFactory;

/// Shared state for the passkey routes
pub struct PasskeyState {
    pub service: PasskeyService,
    pub cookies: CookieFactory,
    /// Header carrying the principal authenticated by the upstream login layer
    pub principal_header: String,
}

impl PasskeyState {
    #[must_use]
    pub fn new(service: PasskeyService, cookies: CookieFactory, principal_header: &str) -> Self {
        Self {
            service,
            cookies,
            principal_header: principal_header.to_string(),
        }
    }

    fn principal(&self, req: &HttpRequest) -> Result<Option<Principal>, HttpResponse> {
        let Some(value) = req.headers().get(self.principal_header.as_str()) else {
            return Ok(None);
        };
        let name = value.to_str().map_err(|_| {
            respond(
                PasskeyResponse::failure(ErrorKind::Validation, "Invalid principal header"),
                None,
                self,
            )
        })?;
        if name.trim().is_empty() {
            return Ok(None);
        }
        Principal::new(name).map(Some).map_err(|e| {
            debug!("Rejected principal header: {e}");
            respond(
                PasskeyResponse::failure(ErrorKind::Validation, "Invalid principal header"),
                None,
                self,
            )
        })
    }

    fn require_principal(&self, req: &HttpRequest) -> Result<Principal, HttpResponse> {
        self.principal(req)?.ok_or_else(|| {
            HttpResponse::Unauthorized().json(PasskeyResponse::failure(
                ErrorKind::Validation,
                "Not logged in",
            ))
        })
    }

    fn session(&self, req: &HttpRequest) -> Result<SessionContext, HttpResponse> {
        let principal = self.principal(req)?;
        Ok(self
            .cookies
            .session_from_request(req)
            .unwrap_or_else(|| SessionContext::new(None))
            .for_principal(principal))
    }
}

/// Status code for a façade response
#[must_use]
pub fn status_for(response: &PasskeyResponse) -> StatusCode {
    match response.error {
        None => StatusCode::OK,
        Some(ErrorKind::Validation) => StatusCode::BAD_REQUEST,
        Some(ErrorKind::StorageUnavailable) => StatusCode::INTERNAL_SERVER_ERROR,
        Some(ErrorKind::Disabled) => StatusCode::SERVICE_UNAVAILABLE,
        Some(_) => StatusCode::UNAUTHORIZED,
    }
}

fn respond(
    response: PasskeyResponse,
    session: Option<&SessionContext>,
    state: &PasskeyState,
) -> HttpResponse {
    let mut builder = HttpResponse::build(status_for(&response));
    if let Some(session) = session {
        match state.cookies.create_session_cookie(session) {
            Ok(cookie) => {
                builder.cookie(cookie);
            }
            Err(e) => error!("Failed to seal session cookie: {e}"),
        }
    }
    builder.json(response)
}

fn parse_body<T: DeserializeOwned + Default>(
    body: &web::Bytes,
    state: &PasskeyState,
) -> Result<T, HttpResponse> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        debug!("Malformed request body: {e}");
        respond(
            PasskeyResponse::failure(ErrorKind::Validation, "Invalid request body"),
            None,
            state,
        )
    })
}

/// `POST /passkey/register/options`
pub async fn registration_options(
    req: HttpRequest,
    state: web::Data<PasskeyState>,
) -> HttpResponse {
    let principal = match state.require_principal(&req) {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    respond(
        state.service.registration_options(&principal).await,
        None,
        &state,
    )
}

/// `POST /passkey/register` with `{credential_data, name}`
pub async fn register(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<PasskeyState>,
) -> HttpResponse {
    let principal = match state.require_principal(&req) {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    let request: RegisterRequest = match parse_body(&body, &state) {
        Ok(request) => request,
        Err(response) => return response,
    };
    respond(state.service.register(&principal, request).await, None, &state)
}

/// `POST /passkey/authenticate/options`
pub async fn authentication_options(
    req: HttpRequest,
    state: web::Data<PasskeyState>,
) -> HttpResponse {
    let session = match state.session(&req) {
        Ok(session) => session,
        Err(response) => return response,
    };
    let response = state.service.authentication_options(&session).await;
    respond(response, Some(&session), &state)
}

/// `POST /passkey/authenticate` with `{assertion_data}`
pub async fn authenticate(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<PasskeyState>,
) -> HttpResponse {
    let mut session = match state.session(&req) {
        Ok(session) => session,
        Err(response) => return response,
    };
    let request: AuthenticateRequest = match parse_body(&body, &state) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let response = state.service.authenticate(&mut session, request).await;
    respond(response, Some(&session), &state)
}

/// `GET /passkey/list`
pub async fn list(req: HttpRequest, state: web::Data<PasskeyState>) -> HttpResponse {
    match state.require_principal(&req) {
        Ok(principal) => respond(state.service.list(&principal).await, None, &state),
        Err(response) => response,
    }
}

/// `POST /passkey/delete` with `{credential_id}`
pub async fn delete(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<PasskeyState>,
) -> HttpResponse {
    let principal = match state.require_principal(&req) {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    let request: DeleteRequest = match parse_body(&body, &state) {
        Ok(request) => request,
        Err(response) => return response,
    };
    respond(state.service.delete(&principal, request).await, None, &state)
}

/// `POST /passkey/activate` with `{activate}`
pub async fn activate(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<PasskeyState>,
) -> HttpResponse {
    let principal = match state.require_principal(&req) {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    let request: ActivateRequest = match parse_body(&body, &state) {
        Ok(request) => request,
        Err(response) => return response,
    };
    respond(state.service.activate(&principal, request).await, None, &state)
}

/// `GET /passkey/activated`
pub async fn activated(req: HttpRequest, state: web::Data<PasskeyState>) -> HttpResponse {
    match state.require_principal(&req) {
        Ok(principal) => respond(
            state.service.activation_status(&principal).await,
            None,
            &state,
        ),
        Err(response) => response,
    }
}

/// `GET /passkey/status`
pub async fn status(req: HttpRequest, state: web::Data<PasskeyState>) -> HttpResponse {
    let session = match state.session(&req) {
        Ok(session) => session,
        Err(response) => return response,
    };
    let response = state.service.status(&session).await;
    respond(response, Some(&session), &state)
}

/// `POST /passkey/logout`: drop the passkey session cookie
pub async fn logout(state: web::Data<PasskeyState>) -> HttpResponse {
    HttpResponse::Ok()
        .cookie(state.cookies.create_expired_cookie())
        .json(PasskeyResponse::ok("Passkey session cleared"))
}

/// Fallback for unknown passkey routes
pub async fn unknown_action() -> HttpResponse {
    HttpResponse::NotFound().json(PasskeyResponse::failure(
        ErrorKind::Validation,
        "Unknown action",
    ))
}

/// Register the passkey routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/passkey")
            .route("/register/options", web::post().to(registration_options))
            .route("/register", web::post().to(register))
            .route(
                "/authenticate/options",
                web::post().to(authentication_options),
            )
            .route("/authenticate", web::post().to(authenticate))
            .route("/list", web::get().to(list))
            .route("/delete", web::post().to(delete))
            .route("/activate", web::post().to(activate))
            .route("/activated", web::get().to(activated))
            .route("/status", web::get().to(status))
            .route("/logout", web::post().to(logout))
            .default_service(web::to(unknown_action)),
    );
}
