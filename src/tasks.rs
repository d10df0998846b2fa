use rocket::fairing::{Fairing, Info, Kind};
use rocket::tokio;
use rocket::{Orbit, Rocket};
use std::sync::Arc;
use std::time::Duration;

use crate::auth;
use crate::db::DbPool;
use crate::models::settings::Setting;
use crate::rate_limit::LoginThrottle;

/// Periodic housekeeping: expired sessions and stale login-throttle entries.
pub struct BackgroundTasks;

#[rocket::async_trait]
impl Fairing for BackgroundTasks {
    fn info(&self) -> Info {
        Info {
            name: "Background Tasks",
            kind: Kind::Liftoff,
        }
    }

    async fn on_liftoff(&self, rocket: &Rocket<Orbit>) {
        let Some(pool) = rocket.state::<DbPool>().cloned() else {
            log::error!("[task] No database pool in managed state; background tasks disabled");
            return;
        };
        let throttle = rocket.state::<Arc<LoginThrottle>>().cloned();

        tokio::spawn(async move {
            loop {
                let minutes = Setting::get_i64_or(&pool, "task_session_cleanup_interval", 30).max(1) as u64;
                tokio::time::sleep(Duration::from_secs(minutes * 60)).await;

                // rusqlite is blocking; keep it off the async workers
                let p = pool.clone();
                match tokio::task::spawn_blocking(move || auth::cleanup_expired_sessions(&p)).await {
                    Ok(Ok(count)) if count > 0 => {
                        log::info!("[task] Cleaned up {} expired sessions", count)
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => log::error!("[task] Session cleanup failed: {}", e),
                    Err(e) => log::error!("[task] Session cleanup panicked: {}", e),
                }

                if let Some(ref t) = throttle {
                    let dropped = t.cleanup(Duration::from_secs(15 * 60));
                    if dropped > 0 {
                        log::debug!("[task] Dropped {} stale login throttle entries", dropped);
                    }
                }
            }
        });
    }
}
