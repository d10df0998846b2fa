#[macro_use]
extern crate rocket;

use std::sync::Arc;

use rocket::fairing::{Fairing, Info, Kind};
use rocket::fs::FileServer;
use rocket::http::Header;
use rocket::response::content::RawHtml;
use rocket::{Build, Rocket};
use rocket_dyn_templates::Template;

mod auth;
mod boot;
mod db;
mod forms;
mod models;
mod rate_limit;
mod routes;
mod tasks;


use rate_limit::LoginThrottle;

/// Keeps browsers and proxies from caching pages that show a user's notes.
pub struct NoCachePrivate;

#[rocket::async_trait]
impl Fairing for NoCachePrivate {
    fn info(&self) -> Info {
        Info { name: "No-Cache Private Pages", kind: Kind::Response }
    }

    async fn on_response<'r>(&self, req: &'r rocket::Request<'_>, res: &mut rocket::Response<'r>) {
        let path = req.uri().path().as_str();
        let private = routes::PRIVATE_PREFIXES
            .iter()
            .any(|prefix| path == *prefix || path.starts_with(&format!("{}/", prefix)));
        if private {
            res.set_header(Header::new("Cache-Control", "no-store, no-cache, must-revalidate, max-age=0"));
            res.set_header(Header::new("Pragma", "no-cache"));
        }
    }
}

#[catch(401)]
fn unauthorized() -> RawHtml<&'static str> {
    RawHtml("<html><body style='font-family:sans-serif;text-align:center;padding:80px'><h1>401</h1><p>Please log in to continue.</p><a href='/login'>Log in</a></body></html>")
}

#[catch(403)]
fn forbidden() -> RawHtml<&'static str> {
    RawHtml("<html><body style='font-family:sans-serif;text-align:center;padding:80px'><h1>403</h1><p>This form has expired. Reload the page and try again.</p><a href='/'>← Home</a></body></html>")
}

#[catch(404)]
fn not_found() -> RawHtml<&'static str> {
    RawHtml("<html><body style='font-family:sans-serif;text-align:center;padding:80px'><h1>404</h1><p>Page not found.</p><a href='/'>← Home</a></body></html>")
}

#[catch(422)]
fn unprocessable() -> RawHtml<&'static str> {
    RawHtml("<html><body style='font-family:sans-serif;text-align:center;padding:80px'><h1>422</h1><p>The submitted form was incomplete.</p><a href='javascript:history.back()'>← Back</a></body></html>")
}

#[catch(500)]
fn server_error() -> RawHtml<&'static str> {
    RawHtml("<html><body style='font-family:sans-serif;text-align:center;padding:80px'><h1>500</h1><p>Internal server error.</p><a href='/'>← Home</a></body></html>")
}

/// Assemble the application around an already-migrated pool.
pub fn build(pool: db::DbPool) -> Rocket<Build> {
    rocket::build()
        .manage(pool)
        .manage(Arc::new(LoginThrottle::new()))
        .attach(Template::fairing())
        .attach(NoCachePrivate)
        .mount("/static", FileServer::from("static"))
        .mount("/", routes::public::routes())
        .mount("/", routes::auth::routes())
        .mount("/notes", routes::notes::routes())
        .mount("/labels", routes::labels::routes())
        .mount("/account", routes::account::routes())
        .register("/", catchers![unauthorized, forbidden, not_found, unprocessable, server_error])
}

#[launch]
fn rocket() -> _ {
    env_logger::init();

    let db_path = db::db_path();
    boot::run(&db_path);

    let pool = db::init_pool().expect("Failed to initialize database pool");

    // Schema downgrade: revert to the given version and exit without serving
    if let Ok(raw) = std::env::var("UZRASINE_ROLLBACK_TO") {
        let target: i64 = raw
            .trim()
            .parse()
            .expect("UZRASINE_ROLLBACK_TO must be a migration version number");
        let reverted = db::rollback_to(&pool, target).expect("Failed to roll back migrations");
        log::info!("Reverted {} migration(s); schema is at version {}", reverted, target);
        std::process::exit(0);
    }

    let applied = db::run_migrations(&pool).expect("Failed to run database migrations");
    if applied > 0 {
        log::info!("Database schema upgraded ({} migration(s))", applied);
    }
    db::seed_defaults(&pool).expect("Failed to seed default settings");
    log::info!("{} registered user(s)", models::user::User::count(&pool));

    build(pool).attach(tasks::BackgroundTasks)
}
