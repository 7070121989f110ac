pub mod dispatch;
pub mod nearby;
