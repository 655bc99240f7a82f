use actix_web::{
    cookie::{time::Duration, Cookie, SameSite},
    HttpRequest,
};
use anyhow::Result;

use crate::passkey::SessionContext;
use crate::utils::crypto::{decrypt_data, derive_encryption_key, encrypt_data, ENCRYPTION_KEY_SIZE};

/// Name of the encrypted passkey session cookie
pub const COOKIE_NAME: &str = "passgate_session";

/// Creates and reads the AES-GCM sealed session cookie
#[derive(Clone)]
pub struct CookieFactory {
    encryption_key: [u8; ENCRYPTION_KEY_SIZE],
    cookie_secure: bool,
    session_duration_hours: u64,
}

impl CookieFactory {
    #[must_use]
    pub fn new(session_secret: &str, cookie_secure: bool, session_duration_hours: u64) -> Self {
        Self {
            encryption_key: derive_encryption_key(session_secret.as_bytes()),
            cookie_secure,
            session_duration_hours,
        }
    }

    /// Seal `session` into a cookie
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails
    pub fn create_session_cookie(&self, session: &SessionContext) -> Result<Cookie<'static>> {
        let value = encrypt_data(session, &self.encryption_key)?;
        let hours = i64::try_from(self.session_duration_hours).unwrap_or(i64::MAX / 3600);

        Ok(Cookie::build(COOKIE_NAME, value)
            .http_only(true)
            .secure(self.cookie_secure)
            .same_site(SameSite::Strict)
            .path("/")
            .max_age(Duration::hours(hours))
            .finish())
    }

    /// Open the session cookie of a request, if present and intact
    #[must_use]
    pub fn session_from_request(&self, req: &HttpRequest) -> Option<SessionContext> {
        let cookie = req.cookie(COOKIE_NAME)?;
        match decrypt_data::<SessionContext>(cookie.value(), &self.encryption_key) {
            Ok(session) => Some(session),
            Err(e) => {
                log::warn!("Discarding unreadable session cookie: {e}");
                None
            }
        }
    }

    /// Create an expired cookie to clear the session
    #[must_use]
    pub fn create_expired_cookie(&self) -> Cookie<'static> {
        create_expired_cookie(COOKIE_NAME, self.cookie_secure)
    }
}

/// Create an expired cookie to clear a specific cookie
#[must_use]
pub fn create_expired_cookie(name: &str, secure: bool) -> Cookie<'static> {
    Cookie::build(name.to_owned(), "")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(Duration::seconds(-1))
        .finish()
}
