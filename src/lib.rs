#[macro_use]
extern crate rocket;

pub mod api;
pub mod app_state;
pub mod clipboard;
pub mod config;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod prompt;
pub mod session;
pub mod types;

use std::sync::Arc;

use rocket::{Build, Rocket};

// `session` 与同名模块冲突，路由里写全路径
use api::{copy, health, model_info, submit};
use app_state::AppState;

/// 组装 Rocket 实例：挂载路由并托管共享状态
pub fn build_rocket(state: Arc<AppState>) -> Rocket<Build> {
    rocket::build()
        .manage(state)
        .mount(
            "/",
            routes![
                health,
                model_info,
                submit,
                api::session,
                copy,
            ],
        )
}
