//! 기기 레지스트리 핸드셰이크
//!
//! 기기 한 대를 계정 하나에 묶고, 해제 시 깨끗하게 풀어준다.
//!
//! connect/disconnect는 레지스트리와 계정에 대한 두 번의 쓰기로
//! 이루어지며 원자적이지 않다. 중간에 실패하면 레지스트리와 계정이
//! 어긋난 채 남는 창이 있고, 이 설계는 그 창을 트랜잭션으로 막는 대신
//! 알려진 틈으로 받아들인다.

use crate::db::Db;
use crate::error::{AppError, AppResult};
use crate::models::VitalsSnapshot;
use chrono::Utc;

/// 기기를 계정에 연결한다.
///
/// - 레지스트리에 없는 기기: NotFound
/// - 다른 계정이 소유 중: AlreadyAssigned (양쪽 계정 모두 건드리지 않음)
/// - 이미 이 계정이 소유: 레지스트리 쓰기 없이 성공 (재연결 멱등성)
pub fn connect_device(db: &Db, device_id: &str, account_id: &str) -> AppResult<()> {
    let entry = db
        .get_device(device_id)?
        .ok_or_else(|| AppError::NotFound(format!("device {}", device_id)))?;

    match entry.owner_id.as_deref() {
        Some(owner) if owner != account_id => {
            log::warn!(
                "[registry] connect refused: {} already assigned to another account",
                device_id
            );
            return Err(AppError::AlreadyAssigned(format!("device {}", device_id)));
        }
        Some(_) => {
            // 멱등 재연결: 계정 쪽 링크만 보정한다
            let account = db
                .get_account(account_id)?
                .ok_or_else(|| AppError::NotFound(format!("account {}", account_id)))?;
            if account.connected_device_id.as_deref() != Some(device_id) {
                db.set_connected_device(account_id, Some(device_id))?;
            }
        }
        None => {
            // 두 쓰기 사이의 부분 실패는 허용된 비일관성 창
            db.assign_device(device_id, account_id)?;
            db.set_connected_device(account_id, Some(device_id))?;
        }
    }

    log::info!("[registry] device {} connected to {}", device_id, account_id);
    Ok(())
}

/// 계정의 기기 연결을 해제하고, 표시용 생체신호를 초기값으로 되돌린다.
///
/// 연결된 기기가 없으면 NotFound. 두 번 연속 호출해도 crash 없이
/// 두 번째는 이 오류로 끝난다.
pub fn disconnect_device(db: &Db, account_id: &str) -> AppResult<()> {
    let account = db
        .get_account(account_id)?
        .ok_or_else(|| AppError::NotFound(format!("account {}", account_id)))?;
    let device_id = account
        .connected_device_id
        .ok_or_else(|| AppError::NotFound("no device linked".to_string()))?;

    db.release_device(&device_id)?;
    db.set_connected_device(account_id, None)?;
    db.update_current_vitals(account_id, &VitalsSnapshot::zeroed(Utc::now()))?;

    log::info!("[registry] device {} disconnected from {}", device_id, account_id);
    Ok(())
}
