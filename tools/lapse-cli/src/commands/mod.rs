pub mod check;
pub mod delete;
pub mod import;
pub mod list;
pub mod render;
pub mod upgrade;
