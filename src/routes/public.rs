use rocket::request::FlashMessage;
use rocket::State;
use rocket_dyn_templates::Template;
use serde_json::json;

use super::page_context;
use crate::auth::SessionUser;
use crate::db::DbPool;
use crate::models::label::Label;
use crate::models::note::{Note, NoteFilter};
use crate::models::settings::Setting;

// ── Landing page ───────────────────────────────────────

#[get("/")]
pub fn index(
    session: Option<SessionUser>,
    pool: &State<DbPool>,
    flash: Option<FlashMessage<'_>>,
) -> Template {
    let mut context = page_context("Home", session.as_ref(), flash);
    let user = session.as_ref().map(|s| &s.user);

    match user {
        Some(u) => {
            let recent = Note::list_for_user(pool, u.id, &NoteFilter::default(), 5, 0);
            context["recent_notes"] = json!(recent);
            context["note_count"] = json!(Note::count_for_user(pool, u.id, &NoteFilter::default()));
            context["label_count"] = json!(Label::count_for_user(pool, u.id));
        }
        None => {
            context["registration_open"] = json!(Setting::get_bool(pool, "registration_open"));
        }
    }

    Template::render("index", &context)
}

pub fn routes() -> Vec<rocket::Route> {
    routes![index]
}
