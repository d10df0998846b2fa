use rocket::form::Form;
use rocket::http::uri::Origin;
use rocket::http::Status;
use rocket::request::FlashMessage;
use rocket::response::{Flash, Redirect};
use rocket::State;
use rocket_dyn_templates::Template;
use serde_json::json;

use super::{login_redirect, page_context};
use crate::auth::{self, SessionUser};
use crate::db::DbPool;
use crate::forms::{FormErrors, PasswordChangeForm};
use crate::models::user::User;

fn password_template(
    session: &SessionUser,
    errors: &FormErrors,
    flash: Option<FlashMessage<'_>>,
) -> Template {
    let mut context = page_context("Change password", Some(session), flash);
    context["errors"] = json!(errors);
    Template::render("account/password", &context)
}

#[get("/password")]
pub fn password_page(session: SessionUser, flash: Option<FlashMessage<'_>>) -> Template {
    password_template(&session, &FormErrors::new(), flash)
}

#[post("/password", data = "<form>")]
pub fn password_submit(
    session: SessionUser,
    pool: &State<DbPool>,
    form: Form<PasswordChangeForm>,
) -> Result<Flash<Redirect>, Template> {
    let user = &session.user;
    let mut errors = form.validate(&session.csrf_token).err().unwrap_or_default();

    if !errors.has("current_password")
        && !auth::verify_password(&form.current_password, &user.password_hash)
    {
        errors.add("current_password", "Current password is incorrect.");
    }
    if !errors.is_empty() {
        return Err(password_template(&session, &errors, None));
    }

    let stored = auth::hash_password(&form.password, auth::hash_cost(pool))
        .and_then(|hash| User::update_password(pool, user.id, &hash));
    if let Err(e) = stored {
        log::error!("Password change failed for user {}: {}", user.id, e);
        errors.add("password", "Could not update the password. Please try again.");
        return Err(password_template(&session, &errors, None));
    }

    match auth::destroy_user_sessions(pool, user.id, Some(&session.session_id)) {
        Ok(n) if n > 0 => log::info!("Password changed for {}; ended {} other session(s)", user.username, n),
        Ok(_) => log::info!("Password changed for {}", user.username),
        Err(e) => log::warn!("Could not end other sessions for {}: {}", user.username, e),
    }

    Ok(Flash::success(
        Redirect::to("/account/password"),
        "Password changed. Other devices have been logged out.",
    ))
}

/// Any GET under /account that no route above accepted.
#[get("/<_path..>", rank = 99)]
pub fn account_login_required(
    _path: std::path::PathBuf,
    session: Option<SessionUser>,
    origin: &Origin<'_>,
) -> Result<Redirect, Status> {
    login_redirect(session.as_ref(), origin)
}

pub fn routes() -> Vec<rocket::Route> {
    routes![password_page, password_submit, account_login_required]
}
