use rocket::form::Form;
use rocket::http::uri::Origin;
use rocket::http::Status;
use rocket::request::FlashMessage;
use rocket::response::{Flash, Redirect};
use rocket::State;
use rocket_dyn_templates::Template;
use serde_json::json;

use super::{login_redirect, page_context};
use crate::auth::SessionUser;
use crate::db::DbPool;
use crate::forms::{CsrfForm, FormErrors, LabelFormData, LABEL_NAME_MAX};
use crate::models::label::Label;

fn list_template(
    pool: &DbPool,
    session: &SessionUser,
    name: &str,
    errors: &FormErrors,
    flash: Option<FlashMessage<'_>>,
) -> Template {
    let user = &session.user;
    let labels: Vec<serde_json::Value> = Label::list_for_user(pool, user.id)
        .iter()
        .map(|l| {
            json!({
                "id": l.id,
                "name": l.name,
                "count": Label::count_notes(pool, l.id, user.id),
            })
        })
        .collect();

    let mut context = page_context("Labels", Some(session), flash);
    context["labels"] = json!(labels);
    context["name"] = json!(name);
    context["errors"] = json!(errors);
    context["name_max"] = json!(LABEL_NAME_MAX);
    Template::render("labels/list", &context)
}

fn edit_template(session: &SessionUser, label_id: i64, name: &str, errors: &FormErrors) -> Template {
    let mut context = page_context("Rename label", Some(session), None);
    context["label_id"] = json!(label_id);
    context["name"] = json!(name);
    context["errors"] = json!(errors);
    context["name_max"] = json!(LABEL_NAME_MAX);
    Template::render("labels/edit", &context)
}

// ── List ───────────────────────────────────────────────

#[get("/")]
pub fn labels_list(
    session: SessionUser,
    pool: &State<DbPool>,
    flash: Option<FlashMessage<'_>>,
) -> Template {
    list_template(pool, &session, "", &FormErrors::new(), flash)
}

// ── Create ─────────────────────────────────────────────

#[post("/new", data = "<form>")]
pub fn labels_create(
    session: SessionUser,
    pool: &State<DbPool>,
    form: Form<LabelFormData>,
) -> Result<Flash<Redirect>, Template> {
    let user = &session.user;
    let clean = form
        .validate(&session.csrf_token)
        .map_err(|errors| list_template(pool, &session, &form.name, &errors, None))?;

    if Label::name_taken(pool, user.id, &clean.name, None) {
        let mut errors = FormErrors::new();
        errors.add("name", "You already have a label with that name.");
        return Err(list_template(pool, &session, &form.name, &errors, None));
    }

    match Label::create(pool, user.id, &clean) {
        Ok(_) => Ok(Flash::success(
            Redirect::to("/labels"),
            format!("Label \"{}\" created.", clean.name),
        )),
        Err(e) => {
            let mut errors = FormErrors::new();
            errors.add("name", e);
            Err(list_template(pool, &session, &form.name, &errors, None))
        }
    }
}

// ── Rename ─────────────────────────────────────────────

#[get("/<id>/edit")]
pub fn labels_edit(session: SessionUser, pool: &State<DbPool>, id: i64) -> Option<Template> {
    let label = Label::find_for_user(pool, id, session.user.id)?;
    Some(edit_template(&session, id, &label.name, &FormErrors::new()))
}

#[post("/<id>/edit", data = "<form>")]
pub fn labels_update(
    session: SessionUser,
    pool: &State<DbPool>,
    id: i64,
    form: Form<LabelFormData>,
) -> Option<Result<Flash<Redirect>, Template>> {
    let user = &session.user;
    Label::find_for_user(pool, id, user.id)?;

    let clean = match form.validate(&session.csrf_token) {
        Ok(c) => c,
        Err(errors) => return Some(Err(edit_template(&session, id, &form.name, &errors))),
    };

    if Label::name_taken(pool, user.id, &clean.name, Some(id)) {
        let mut errors = FormErrors::new();
        errors.add("name", "You already have a label with that name.");
        return Some(Err(edit_template(&session, id, &form.name, &errors)));
    }

    Some(match Label::update(pool, id, user.id, &clean) {
        Ok(()) => Ok(Flash::success(Redirect::to("/labels"), "Label renamed.")),
        Err(e) => {
            let mut errors = FormErrors::new();
            errors.add("name", e);
            Err(edit_template(&session, id, &form.name, &errors))
        }
    })
}

// ── Delete ─────────────────────────────────────────────

#[post("/<id>/delete", data = "<form>")]
pub fn labels_delete(
    session: SessionUser,
    pool: &State<DbPool>,
    id: i64,
    form: Form<CsrfForm>,
) -> Result<Flash<Redirect>, Status> {
    if form.validate(&session.csrf_token).is_err() {
        log::warn!("Rejected label delete for user {}: bad CSRF token", session.user.id);
        return Err(Status::Forbidden);
    }
    let label = Label::find_for_user(pool, id, session.user.id).ok_or(Status::NotFound)?;
    let orphaned = Label::count_notes(pool, id, session.user.id);
    if let Err(e) = Label::delete(pool, id, session.user.id) {
        log::error!("Deleting label {} failed: {}", id, e);
        return Err(Status::InternalServerError);
    }

    let msg = match orphaned {
        0 => format!("Label \"{}\" deleted.", label.name),
        1 => format!("Label \"{}\" deleted. 1 note is now unlabeled.", label.name),
        n => format!("Label \"{}\" deleted. {} notes are now unlabeled.", label.name, n),
    };
    Ok(Flash::success(Redirect::to("/labels"), msg))
}

/// Any GET under /labels that no route above accepted.
#[get("/<_path..>", rank = 99)]
pub fn labels_login_required(
    _path: std::path::PathBuf,
    session: Option<SessionUser>,
    origin: &Origin<'_>,
) -> Result<Redirect, Status> {
    login_redirect(session.as_ref(), origin)
}

pub fn routes() -> Vec<rocket::Route> {
    routes![
        labels_list,
        labels_create,
        labels_edit,
        labels_update,
        labels_delete,
        labels_login_required,
    ]
}
