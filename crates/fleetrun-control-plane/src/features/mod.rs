pub mod dispatch;
pub mod target_selection;
