#![forbid(unsafe_code)]

//! Shared library behind the `douyin_sync` binary: configuration, video id
//! resolution, the TikHub and Feishu Bitable adapters, and the reconciliation
//! logic that decides which spreadsheet rows need fresh data.

pub mod bitable;
pub mod brands;
pub mod config;
pub mod ident;
pub mod parse;
pub mod reconcile;
pub mod subtitle;
pub mod tikhub;
