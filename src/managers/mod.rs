pub mod history;
pub mod synthesis;
