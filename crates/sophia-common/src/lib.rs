#![allow(async_fn_in_trait)]

pub mod alerts;
pub mod db;
pub mod dispatch;
pub mod engine;
pub mod executor;
pub mod learning;
pub mod logging;
pub mod model;
pub mod recommend;
pub mod revenue;
pub mod run_id;
