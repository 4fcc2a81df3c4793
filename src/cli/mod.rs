pub mod app;
pub mod check;
pub mod commands;
pub mod context;
pub mod dispatch;
pub mod env;
pub mod plan;
pub mod run;
pub mod runtime;
