pub mod app;
pub mod bindings;
pub mod config;
pub mod deployments;
pub mod errors;
pub mod figures;
pub mod handlers;
pub mod layout;
pub mod models;
pub mod queries;
pub mod reference;
pub mod selection;
pub mod source;
pub mod state;
pub mod status;
pub mod ui;

pub use app::router;
pub use config::Config;
pub use state::AppState;
