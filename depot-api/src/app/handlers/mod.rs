mod admin;
mod artifacts;
mod health;

pub use admin::{maintenance_status, request_snapshot};
pub use artifacts::{download_artifact, list_artifacts, upload_artifact};
pub use health::{handler_404, health};
