use chrono::{Duration, Utc};
use rocket::http::uri::Origin;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::request::{FromRequest, Outcome, Request};
use rocket::State;
use rusqlite::params;
use sha2::{Digest, Sha256};

use crate::db::DbPool;
use crate::models::settings::Setting;
use crate::models::user::User;

pub const SESSION_COOKIE: &str = "uzrasine_session";
/// Anti-forgery token for visitors without a session (login and register forms).
pub const CSRF_COOKIE: &str = "uzrasine_csrf";

// ── Client IP request guard ──

/// Best-effort client address: X-Real-IP, then the first X-Forwarded-For hop,
/// then the socket peer.
pub struct ClientIp(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientIp {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let headers = request.headers();

        let forwarded = headers
            .get_one("X-Real-IP")
            .or_else(|| {
                headers
                    .get_one("X-Forwarded-For")
                    .and_then(|chain| chain.split(',').next())
            })
            .map(str::trim)
            .filter(|ip| !ip.is_empty());

        let ip = match forwarded {
            Some(ip) => ip.to_string(),
            None => request
                .client_ip()
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        };
        Outcome::Success(ClientIp(ip))
    }
}

pub struct UserAgent(pub Option<String>);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for UserAgent {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let ua = request
            .headers()
            .get_one("User-Agent")
            .map(|ua| ua.chars().take(255).collect());
        Outcome::Success(UserAgent(ua))
    }
}

// ── Logged-in user guard ──

/// Guard: a user with a live session. Forwards with 401 otherwise, so the
/// login-redirect fallbacks in `routes` can take over. The lookup is cached
/// per request, so `CsrfToken` can reuse it.
#[derive(Clone)]
pub struct SessionUser {
    pub user: User,
    pub session_id: String,
    pub csrf_token: String,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for SessionUser {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let session = request
            .local_cache_async(async {
                let pool = request.guard::<&State<DbPool>>().await.succeeded()?;
                let cookies = request.cookies();
                let session_id = cookies.get_private(SESSION_COOKIE)?.value().to_string();
                match load_session(pool, &session_id) {
                    Some((user, csrf_token)) => Some(SessionUser {
                        user,
                        session_id,
                        csrf_token,
                    }),
                    None => {
                        cookies.remove_private(Cookie::from(SESSION_COOKIE));
                        None
                    }
                }
            })
            .await;

        match session {
            Some(s) => Outcome::Success(s.clone()),
            None => Outcome::Forward(Status::Unauthorized),
        }
    }
}

// ── CSRF token guard ──

/// The token every state-changing form must echo back: the session's own
/// token when logged in, otherwise one kept in a private cookie.
pub struct CsrfToken(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for CsrfToken {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        if let Outcome::Success(session) = request.guard::<SessionUser>().await {
            return Outcome::Success(CsrfToken(session.csrf_token));
        }

        let cookies = request.cookies();
        if let Some(cookie) = cookies.get_private(CSRF_COOKIE) {
            return Outcome::Success(CsrfToken(cookie.value().to_string()));
        }

        let token = new_token();
        let mut cookie = Cookie::new(CSRF_COOKIE, token.clone());
        cookie.set_http_only(true);
        cookie.set_same_site(SameSite::Lax);
        cookie.set_path("/");
        cookies.add_private(cookie);
        Outcome::Success(CsrfToken(token))
    }
}

fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Whether a submitted token matches the expected one. An empty expected
/// token never matches.
pub fn csrf_matches(expected: &str, submitted: &str) -> bool {
    !expected.is_empty() && constant_time_eq(expected.as_bytes(), submitted.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

// ── Password utilities ──

/// bcrypt cost from settings, clamped to what bcrypt accepts.
pub fn hash_cost(pool: &DbPool) -> u32 {
    Setting::get_i64_or(pool, "password_hash_cost", bcrypt::DEFAULT_COST as i64).clamp(4, 31) as u32
}

pub fn hash_password(password: &str, cost: u32) -> Result<String, String> {
    bcrypt::hash(password, cost).map_err(|e| e.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    if hash.is_empty() {
        return false;
    }
    bcrypt::verify(password, hash).unwrap_or(false)
}

// ── Session management ──

pub fn remember_days(pool: &DbPool) -> i64 {
    Setting::get_i64_or(pool, "remember_me_days", 30).clamp(1, 3660)
}

pub fn create_session(
    pool: &DbPool,
    user_id: i64,
    remember: bool,
    ip: Option<&str>,
    ua: Option<&str>,
) -> Result<String, String> {
    let lifetime = if remember {
        Duration::days(remember_days(pool))
    } else {
        Duration::hours(Setting::get_i64_or(pool, "session_expiry_hours", 24).clamp(1, 24 * 366))
    };
    let session_id = uuid::Uuid::new_v4().to_string();
    let csrf_token = new_token();
    let now = Utc::now().naive_utc();
    let expires = now + lifetime;
    let ip_hash = ip.map(hash_ip);

    let conn = pool.get().map_err(|e| e.to_string())?;
    conn.execute(
        "INSERT INTO sessions (id, user_id, created_at, expires_at, remember, ip_hash, user_agent, csrf_token)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![session_id, user_id, now, expires, remember, ip_hash, ua, csrf_token],
    )
    .map_err(|e| e.to_string())?;

    Ok(session_id)
}

/// The user behind an unexpired session, with that session's CSRF token.
pub fn load_session(pool: &DbPool, session_id: &str) -> Option<(User, String)> {
    let conn = pool.get().ok()?;
    let now = Utc::now().naive_utc();
    let (user_id, csrf_token): (i64, String) = conn
        .query_row(
            "SELECT user_id, csrf_token FROM sessions WHERE id = ?1 AND expires_at > ?2",
            params![session_id, now],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .ok()?;
    drop(conn);
    User::get_by_id(pool, user_id).map(|user| (user, csrf_token))
}

pub fn destroy_session(pool: &DbPool, session_id: &str) -> Result<(), String> {
    let conn = pool.get().map_err(|e| e.to_string())?;
    conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])
        .map_err(|e| e.to_string())?;
    Ok(())
}

/// Log a user out everywhere except `keep` (the session making the request).
pub fn destroy_user_sessions(pool: &DbPool, user_id: i64, keep: Option<&str>) -> Result<usize, String> {
    let conn = pool.get().map_err(|e| e.to_string())?;
    conn.execute(
        "DELETE FROM sessions WHERE user_id = ?1 AND id != ?2",
        params![user_id, keep.unwrap_or("")],
    )
    .map_err(|e| e.to_string())
}

pub fn cleanup_expired_sessions(pool: &DbPool) -> Result<usize, String> {
    let conn = pool.get().map_err(|e| e.to_string())?;
    let now = Utc::now().naive_utc();
    conn.execute("DELETE FROM sessions WHERE expires_at <= ?1", params![now])
        .map_err(|e| e.to_string())
}

// ── Cookies ──

/// Persistent cookie for "keep me logged in", browser-session cookie otherwise.
pub fn set_session_cookie(cookies: &CookieJar<'_>, session_id: &str, remember_days: Option<i64>) {
    let mut cookie = Cookie::new(SESSION_COOKIE, session_id.to_string());
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_path("/");
    if let Some(days) = remember_days {
        cookie.set_max_age(rocket::time::Duration::days(days));
    }
    cookies.add_private(cookie);
}

pub fn clear_session_cookie(cookies: &CookieJar<'_>) {
    cookies.remove_private(Cookie::from(SESSION_COOKIE));
}

pub fn hash_ip(ip: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ip.as_bytes());
    hex::encode(hasher.finalize())
}

/// Only same-site absolute paths are accepted as post-login targets.
pub fn safe_next(next: Option<&str>) -> Option<String> {
    let next = next?.trim();
    let local = next.starts_with('/') && !next.starts_with("//") && !next.contains('\\');
    if local && Origin::parse(next).is_ok() {
        Some(next.to_string())
    } else {
        None
    }
}
