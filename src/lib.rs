//! 메디센스 코어
//!
//! 환자/의사 건강 모니터링 대시보드의 데이터 계층. SQLite 저장소 위에
//! 변경 브로드캐스트 버스를 얹어, 구독한 쿼리가 문서 변경 때마다 전체
//! 결과를 다시 받는 구조다. UI 셸은 이 크레이트의 공개 API만 호출한다.

pub mod appointments;
pub mod auth;
pub mod chat;
pub mod db;
pub mod error;
pub mod models;
pub mod registry;
pub mod roster;
pub mod sharing;
pub mod vitals;
pub mod watcher;

pub use db::{Collection, Db};
pub use error::{AppError, AppResult};
pub use models::*;
pub use watcher::{WatchEvent, Watcher};
