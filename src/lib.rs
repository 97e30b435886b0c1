//! Apple Scan
//!
//! りんごの切断面写真から切ってからの経過日数を推定するクライアント。
//! 推定そのものはリモートAPIが行い、ここでは写真の取得・圧縮・送信、
//! 認証、履歴の管理を担う。

pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod history;
pub mod logging;
pub mod photo;
pub mod scan;
