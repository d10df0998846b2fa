use rocket::http::uri::Origin;
use rocket::http::Status;
use rocket::request::FlashMessage;
use rocket::response::Redirect;
use serde_json::{json, Value};

use crate::auth::SessionUser;

pub mod account;
pub mod auth;
pub mod labels;
pub mod notes;
pub mod public;

/// Path prefixes that only make sense when logged in. Unauthenticated GETs
/// under these redirect to the login page, and responses are never cached.
pub const PRIVATE_PREFIXES: &[&str] = &["/notes", "/labels", "/account"];

/// Context shared by every page: title, current user and their CSRF token,
/// one-shot flash message.
pub(crate) fn page_context(
    title: &str,
    session: Option<&SessionUser>,
    flash: Option<FlashMessage<'_>>,
) -> Value {
    let mut context = json!({
        "page_title": title,
        "user": session.map(|s| json!({ "id": s.user.id, "username": s.user.username })),
        "csrf_token": session.map(|s| s.csrf_token.as_str()),
    });

    if let Some(ref f) = flash {
        context["flash_kind"] = json!(f.kind());
        context["flash_msg"] = json!(f.message());
    }

    context
}

/// Fallback for GETs inside a private area: anonymous visitors go to the
/// login page (returning to `origin` afterwards); logged-in users asked for a
/// path nothing matched, so they get a 404.
pub(crate) fn login_redirect(
    session: Option<&SessionUser>,
    origin: &Origin<'_>,
) -> Result<Redirect, Status> {
    if session.is_some() {
        return Err(Status::NotFound);
    }
    Ok(Redirect::to(uri!(auth::login_page(next = Some(origin.to_string())))))
}

/// Page math for list views: (current_page, offset, total_pages).
pub(crate) fn paginate(page: Option<i64>, per_page: i64, total: i64) -> (i64, i64, i64) {
    let per_page = per_page.max(1);
    let total_pages = ((total + per_page - 1) / per_page).max(1);
    let current = page.unwrap_or(1).clamp(1, total_pages);
    (current, (current - 1) * per_page, total_pages)
}
