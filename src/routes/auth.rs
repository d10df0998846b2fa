use std::sync::Arc;
use std::time::Duration;

use rocket::form::Form;
use rocket::http::{CookieJar, Status};
use rocket::request::FlashMessage;
use rocket::response::{Flash, Redirect};
use rocket::State;
use rocket_dyn_templates::Template;
use serde_json::json;

use super::page_context;
use crate::auth::{self, ClientIp, CsrfToken, SessionUser, UserAgent};
use crate::db::DbPool;
use crate::forms::{CsrfForm, FormErrors, LoginForm, RegistrationForm};
use crate::models::settings::Setting;
use crate::models::user::User;
use crate::rate_limit::LoginThrottle;

const LOGIN_WINDOW: Duration = Duration::from_secs(15 * 60);

fn login_template(
    csrf: &str,
    username: &str,
    next: Option<&str>,
    errors: &FormErrors,
    error: Option<&str>,
    flash: Option<FlashMessage<'_>>,
) -> Template {
    let mut context = page_context("Log in", None, flash);
    context["csrf_token"] = json!(csrf);
    context["username"] = json!(username);
    context["next"] = json!(next);
    context["errors"] = json!(errors);
    context["error"] = json!(error);
    Template::render("login", &context)
}

fn register_template(pool: &DbPool, csrf: &str, username: &str, errors: &FormErrors) -> Template {
    let mut context = page_context("Register", None, None);
    context["csrf_token"] = json!(csrf);
    context["username"] = json!(username);
    context["errors"] = json!(errors);
    context["registration_open"] = json!(Setting::get_bool(pool, "registration_open"));
    Template::render("register", &context)
}

/// Drop the session the browser is presenting, if any, before a new one is
/// issued for it.
fn replace_previous_session(pool: &DbPool, cookies: &CookieJar<'_>) {
    if let Some(cookie) = cookies.get_private(auth::SESSION_COOKIE) {
        if let Err(e) = auth::destroy_session(pool, cookie.value()) {
            log::warn!("Could not end the previous session: {}", e);
        }
    }
}

fn sweep_expired_sessions(pool: &DbPool) {
    match auth::cleanup_expired_sessions(pool) {
        Ok(n) if n > 0 => log::debug!("Removed {} expired session(s)", n),
        Ok(_) => {}
        Err(e) => log::warn!("Expired session cleanup failed: {}", e),
    }
}

// ── Login ──────────────────────────────────────────────

#[get("/login?<next>")]
pub fn login_page(
    session: Option<SessionUser>,
    csrf: CsrfToken,
    next: Option<String>,
    flash: Option<FlashMessage<'_>>,
) -> Result<Template, Redirect> {
    if session.is_some() {
        return Err(Redirect::to(
            auth::safe_next(next.as_deref()).unwrap_or_else(|| "/notes".to_string()),
        ));
    }
    Ok(login_template(
        &csrf.0,
        "",
        auth::safe_next(next.as_deref()).as_deref(),
        &FormErrors::new(),
        None,
        flash,
    ))
}

#[post("/login?<next>", data = "<form>")]
pub fn login_submit(
    form: Form<LoginForm>,
    csrf: CsrfToken,
    next: Option<String>,
    pool: &State<DbPool>,
    throttle: &State<Arc<LoginThrottle>>,
    cookies: &CookieJar<'_>,
    client_ip: ClientIp,
    user_agent: UserAgent,
) -> Result<Flash<Redirect>, Template> {
    let next = auth::safe_next(next.as_deref());
    let fail = |msg: Option<&str>, errors: &FormErrors| {
        login_template(&csrf.0, &form.username, next.as_deref(), errors, msg, None)
    };

    if let Err(errors) = form.validate(&csrf.0) {
        return Err(fail(None, &errors));
    }

    let ip_hash = auth::hash_ip(&client_ip.0);
    let throttle_key = LoginThrottle::key(&ip_hash, &form.username);
    let max_failures = Setting::get_i64_or(pool, "login_rate_limit", 5).max(1) as u64;

    if !throttle.allowed(&throttle_key, max_failures, LOGIN_WINDOW) {
        log::warn!("Login throttled for {}", form.username);
        return Err(fail(
            Some("Too many login attempts. Please try again in 15 minutes."),
            &FormErrors::new(),
        ));
    }

    let user = match User::get_by_username(pool, &form.username) {
        Some(u) if auth::verify_password(&form.password, &u.password_hash) => u,
        _ => {
            throttle.record_failure(&throttle_key);
            log::info!("Failed login for {}", form.username);
            return Err(fail(Some("Invalid username or password."), &FormErrors::new()));
        }
    };

    throttle.clear(&throttle_key);
    sweep_expired_sessions(pool);
    replace_previous_session(pool, cookies);

    match auth::create_session(
        pool,
        user.id,
        form.remember_me,
        Some(&client_ip.0),
        user_agent.0.as_deref(),
    ) {
        Ok(session_id) => {
            let remember = form.remember_me.then(|| auth::remember_days(pool));
            auth::set_session_cookie(cookies, &session_id, remember);
            log::info!("User {} logged in", user.username);
            Ok(Flash::success(
                Redirect::to(next.clone().unwrap_or_else(|| "/notes".to_string())),
                format!("Welcome back, {}.", user.username),
            ))
        }
        Err(e) => {
            log::error!("Session creation failed for {}: {}", user.username, e);
            Err(fail(Some("Could not start a session. Please try again."), &FormErrors::new()))
        }
    }
}

// ── Logout ─────────────────────────────────────────────

fn end_session(
    pool: &DbPool,
    cookies: &CookieJar<'_>,
    csrf: &CsrfToken,
    submitted: &str,
) -> Result<Flash<Redirect>, Status> {
    if !auth::csrf_matches(&csrf.0, submitted) {
        log::warn!("Rejected logout: bad CSRF token");
        return Err(Status::Forbidden);
    }
    if let Some(cookie) = cookies.get_private(auth::SESSION_COOKIE) {
        if let Err(e) = auth::destroy_session(pool, cookie.value()) {
            log::warn!("Could not delete session on logout: {}", e);
        }
    }
    auth::clear_session_cookie(cookies);
    Ok(Flash::success(Redirect::to("/"), "You have been logged out."))
}

#[post("/logout", data = "<form>")]
pub fn logout(
    pool: &State<DbPool>,
    cookies: &CookieJar<'_>,
    csrf: CsrfToken,
    form: Form<CsrfForm>,
) -> Result<Flash<Redirect>, Status> {
    end_session(pool, cookies, &csrf, &form.csrf_token)
}

/// Link form of logout; the token travels in the query string.
#[get("/logout?<csrf_token>")]
pub fn logout_get(
    pool: &State<DbPool>,
    cookies: &CookieJar<'_>,
    csrf: CsrfToken,
    csrf_token: Option<String>,
) -> Result<Flash<Redirect>, Status> {
    end_session(pool, cookies, &csrf, csrf_token.as_deref().unwrap_or_default())
}

// ── Registration ───────────────────────────────────────

#[get("/register")]
pub fn register_page(
    session: Option<SessionUser>,
    csrf: CsrfToken,
    pool: &State<DbPool>,
) -> Result<Template, Redirect> {
    if session.is_some() {
        return Err(Redirect::to("/notes"));
    }
    Ok(register_template(pool, &csrf.0, "", &FormErrors::new()))
}

#[post("/register", data = "<form>")]
pub fn register_submit(
    form: Form<RegistrationForm>,
    csrf: CsrfToken,
    pool: &State<DbPool>,
    cookies: &CookieJar<'_>,
    client_ip: ClientIp,
    user_agent: UserAgent,
) -> Result<Flash<Redirect>, Template> {
    if !Setting::get_bool(pool, "registration_open") {
        return Err(register_template(pool, &csrf.0, &form.username, &FormErrors::new()));
    }

    let mut errors = form.validate(&csrf.0).err().unwrap_or_default();
    if !errors.has("username") && User::username_taken(pool, &form.username) {
        errors.add("username", "Username already in use.");
    }
    if !errors.is_empty() {
        return Err(register_template(pool, &csrf.0, &form.username, &errors));
    }

    let hash = match auth::hash_password(&form.password, auth::hash_cost(pool)) {
        Ok(h) => h,
        Err(e) => {
            log::error!("Password hashing failed: {}", e);
            errors.add("password", "Could not store this password. Please try again.");
            return Err(register_template(pool, &csrf.0, &form.username, &errors));
        }
    };

    let user_id = match User::create(pool, &form.username, &hash) {
        Ok(id) => id,
        Err(e) => {
            // Lost a race with another registration for the same name
            errors.add("username", e);
            return Err(register_template(pool, &csrf.0, &form.username, &errors));
        }
    };
    log::info!("Registered user {} (id {})", form.username, user_id);
    replace_previous_session(pool, cookies);

    match auth::create_session(pool, user_id, false, Some(&client_ip.0), user_agent.0.as_deref()) {
        Ok(session_id) => {
            auth::set_session_cookie(cookies, &session_id, None);
            Ok(Flash::success(
                Redirect::to("/notes"),
                "Your account is ready. Start with your first note.",
            ))
        }
        Err(e) => {
            log::error!("Session creation after registration failed: {}", e);
            Ok(Flash::success(
                Redirect::to("/login"),
                "Your account is ready. Please log in.",
            ))
        }
    }
}

pub fn routes() -> Vec<rocket::Route> {
    routes![
        login_page,
        login_submit,
        logout,
        logout_get,
        register_page,
        register_submit,
    ]
}
