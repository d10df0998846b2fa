use rocket::form::Form;
use rocket::http::uri::Origin;
use rocket::http::Status;
use rocket::request::FlashMessage;
use rocket::response::{Flash, Redirect};
use rocket::State;
use rocket_dyn_templates::Template;
use serde_json::json;

use super::{login_redirect, page_context, paginate};
use crate::auth::SessionUser;
use crate::db::DbPool;
use crate::forms::{CsrfForm, FormErrors, NoteFormData, NOTE_CONTENT_MAX, NOTE_TITLE_MAX};
use crate::models::label::Label;
use crate::models::note::{LabelFilter, Note, NoteFilter};
use crate::models::settings::Setting;

fn form_template(
    pool: &DbPool,
    session: &SessionUser,
    note_id: Option<i64>,
    values: &serde_json::Value,
    errors: &FormErrors,
) -> Template {
    let title = if note_id.is_some() { "Edit note" } else { "New note" };
    let mut context = page_context(title, Some(session), None);
    context["note_id"] = json!(note_id);
    context["form"] = values.clone();
    context["errors"] = json!(errors);
    context["labels"] = json!(Label::list_for_user(pool, session.user.id));
    context["title_max"] = json!(NOTE_TITLE_MAX);
    context["content_max"] = json!(NOTE_CONTENT_MAX);
    Template::render("notes/form", &context)
}

fn label_ids(pool: &DbPool, user_id: i64) -> Vec<i64> {
    Label::list_for_user(pool, user_id)
        .into_iter()
        .map(|l| l.id)
        .collect()
}

// ── List / search ──────────────────────────────────────

#[get("/?<q>&<label>&<page>")]
pub fn notes_list(
    session: SessionUser,
    pool: &State<DbPool>,
    q: Option<String>,
    label: Option<String>,
    page: Option<i64>,
    flash: Option<FlashMessage<'_>>,
) -> Template {
    let user = &session.user;
    let filter = NoteFilter {
        title: q.clone().filter(|q| !q.trim().is_empty()),
        label: LabelFilter::from_param(label.as_deref()),
    };

    let per_page = Setting::get_i64_or(pool, "notes_per_page", 20).clamp(1, 200);
    let total = Note::count_for_user(pool, user.id, &filter);
    let (current_page, offset, total_pages) = paginate(page, per_page, total);
    let notes = Note::list_for_user(pool, user.id, &filter, per_page, offset);

    let mut context = page_context("Notes", Some(&session), flash);
    context["notes"] = json!(notes);
    context["labels"] = json!(Label::list_for_user(pool, user.id));
    context["q"] = json!(q.unwrap_or_default());
    context["label_filter"] = json!(filter.label.as_param());
    context["current_page"] = json!(current_page);
    context["total_pages"] = json!(total_pages);
    context["total"] = json!(total);

    Template::render("notes/list", &context)
}

// ── Create ─────────────────────────────────────────────

#[get("/new?<label>")]
pub fn notes_new(session: SessionUser, pool: &State<DbPool>, label: Option<i64>) -> Template {
    // Preselect the label the user was browsing, if it is theirs
    let preselect = label
        .filter(|id| Label::find_for_user(pool, *id, session.user.id).is_some())
        .map(|id| id.to_string())
        .unwrap_or_default();
    let values = json!({ "title": "", "content": "", "label": preselect });
    form_template(pool, &session, None, &values, &FormErrors::new())
}

#[post("/new", data = "<form>")]
pub fn notes_create(
    session: SessionUser,
    pool: &State<DbPool>,
    form: Form<NoteFormData>,
) -> Result<Flash<Redirect>, Template> {
    let user = &session.user;
    let clean = form
        .validate(&label_ids(pool, user.id), &session.csrf_token)
        .map_err(|errors| form_template(pool, &session, None, &json!(*form), &errors))?;

    match Note::create(pool, user.id, &clean) {
        Ok(id) => {
            log::debug!("User {} created note {}", user.id, id);
            Ok(Flash::success(Redirect::to("/notes"), "Note created."))
        }
        Err(e) => {
            let mut errors = FormErrors::new();
            errors.add("label", e);
            Err(form_template(pool, &session, None, &json!(*form), &errors))
        }
    }
}

// ── View ───────────────────────────────────────────────

#[get("/<id>")]
pub fn notes_view(
    session: SessionUser,
    pool: &State<DbPool>,
    id: i64,
    flash: Option<FlashMessage<'_>>,
) -> Option<Template> {
    let note = Note::find_for_user(pool, id, session.user.id)?;
    let mut context = page_context(&note.title, Some(&session), flash);
    context["note"] = json!(note);
    Some(Template::render("notes/view", &context))
}

// ── Edit ───────────────────────────────────────────────

#[get("/<id>/edit")]
pub fn notes_edit(session: SessionUser, pool: &State<DbPool>, id: i64) -> Option<Template> {
    let note = Note::find_for_user(pool, id, session.user.id)?;
    let values = json!({
        "title": note.title,
        "content": note.content,
        "label": note.label_id.map(|l| l.to_string()).unwrap_or_default(),
    });
    Some(form_template(pool, &session, Some(id), &values, &FormErrors::new()))
}

#[post("/<id>/edit", data = "<form>")]
pub fn notes_update(
    session: SessionUser,
    pool: &State<DbPool>,
    id: i64,
    form: Form<NoteFormData>,
) -> Option<Result<Flash<Redirect>, Template>> {
    let user = &session.user;
    Note::find_for_user(pool, id, user.id)?;

    let clean = match form.validate(&label_ids(pool, user.id), &session.csrf_token) {
        Ok(c) => c,
        Err(errors) => return Some(Err(form_template(pool, &session, Some(id), &json!(*form), &errors))),
    };

    Some(match Note::update(pool, id, user.id, &clean) {
        Ok(()) => Ok(Flash::success(
            Redirect::to(format!("/notes/{}", id)),
            "Note saved.",
        )),
        Err(e) => {
            let mut errors = FormErrors::new();
            errors.add("label", e);
            Err(form_template(pool, &session, Some(id), &json!(*form), &errors))
        }
    })
}

// ── Delete ─────────────────────────────────────────────

#[post("/<id>/delete", data = "<form>")]
pub fn notes_delete(
    session: SessionUser,
    pool: &State<DbPool>,
    id: i64,
    form: Form<CsrfForm>,
) -> Result<Flash<Redirect>, Status> {
    if form.validate(&session.csrf_token).is_err() {
        log::warn!("Rejected note delete for user {}: bad CSRF token", session.user.id);
        return Err(Status::Forbidden);
    }
    if Note::find_for_user(pool, id, session.user.id).is_none() {
        return Err(Status::NotFound);
    }
    if let Err(e) = Note::delete(pool, id, session.user.id) {
        log::error!("Deleting note {} failed: {}", id, e);
        return Err(Status::InternalServerError);
    }
    Ok(Flash::success(Redirect::to("/notes"), "Note deleted."))
}

/// Any GET under /notes that no route above accepted.
#[get("/<_path..>", rank = 99)]
pub fn notes_login_required(
    _path: std::path::PathBuf,
    session: Option<SessionUser>,
    origin: &Origin<'_>,
) -> Result<Redirect, Status> {
    login_redirect(session.as_ref(), origin)
}

pub fn routes() -> Vec<rocket::Route> {
    routes![
        notes_list,
        notes_new,
        notes_create,
        notes_view,
        notes_edit,
        notes_update,
        notes_delete,
        notes_login_required,
    ]
}
