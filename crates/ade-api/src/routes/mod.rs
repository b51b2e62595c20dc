pub mod admin;
pub mod auth;
pub mod configurations;
pub mod documents;
pub mod runs;

use axum::routing::{get, post, put};
use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/sessions", post(auth::login))
        .route("/auth/sessions", axum::routing::delete(auth::logout))
        .route(
            "/workspaces/:workspace_id/configurations",
            post(configurations::create),
        )
        .route(
            "/workspaces/:workspace_id/configurations/import",
            post(configurations::import),
        )
        .route(
            "/workspaces/:workspace_id/configurations/:configuration_id/validate",
            post(configurations::validate),
        )
        .route(
            "/workspaces/:workspace_id/configurations/:configuration_id/publish",
            post(configurations::publish),
        )
        .route(
            "/workspaces/:workspace_id/configurations/:configuration_id/files/*path",
            put(configurations::put_file)
                .get(configurations::get_file)
                .delete(configurations::delete_file),
        )
        .route(
            "/workspaces/:workspace_id/configurations/:configuration_id/file-list",
            get(configurations::list_files),
        )
        .route(
            "/workspaces/:workspace_id/configurations/:configuration_id/file-rename",
            post(configurations::rename_file),
        )
        .route(
            "/workspaces/:workspace_id/configurations/:configuration_id/directories/*path",
            put(configurations::create_directory).delete(configurations::delete_directory),
        )
        .route(
            "/workspaces/:workspace_id/configurations/:configuration_id/export",
            get(configurations::export),
        )
        .route("/workspaces/:workspace_id/documents", post(documents::upload))
        .route("/workspaces/:workspace_id/runs", post(runs::submit))
        .route("/workspaces/:workspace_id/runs/:run_id", get(runs::read))
        .route("/admin/users", post(admin::create_user).get(admin::list_users))
        .route(
            "/admin/users/:user_id/roles",
            post(admin::assign_role),
        )
        .route(
            "/admin/system-settings/:key",
            get(admin::get_setting).put(admin::put_setting),
        )
}
