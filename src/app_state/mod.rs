/// Application state management for rs_podgate
mod app_state;

pub use app_state::AppState;
