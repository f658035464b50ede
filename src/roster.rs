//! 담당 환자 목록 + 접속 상태 판정 (의사 측)
//!
//! "Live"는 온라인 여부가 아니라 바이탈 미러가 최근에 갱신됐는지로
//! 판정하고, 온라인 플래그보다 우선한다. 연결된 기기는 앱이 꺼진
//! 동안에도 미러를 갱신하므로 오프라인이어도 Live일 수 있다. 마지막
//! 갱신이 20초보다 오래되면 is_online에 따라 SignedIn/Offline이 된다.

use crate::db::Db;
use crate::error::{AppError, AppResult};
use crate::models::*;
use chrono::{DateTime, Duration, Utc};

/// 미러 갱신이 이 시간 안에 있어야 Live로 본다.
pub const LIVE_WINDOW_SECS: i64 = 20;

/// 이력 조회 기본 건수
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Live,
    SignedIn,
    Offline,
}

/// 계정 하나의 접속 상태를 판정한다. 미러 신선도가 온라인 플래그보다
/// 먼저다 (기기 스트림은 앱 종료 후에도 미러를 채운다).
pub fn presence(account: &Account, now: DateTime<Utc>) -> PresenceStatus {
    if let Some(snapshot) = &account.current_vitals {
        if now - snapshot.last_updated <= Duration::seconds(LIVE_WINDOW_SECS) {
            return PresenceStatus::Live;
        }
    }
    if account.is_online {
        PresenceStatus::SignedIn
    } else {
        PresenceStatus::Offline
    }
}

/// 담당 환자 목록 (의사 전용)
pub fn assigned_patients(db: &Db, session: &Session) -> AppResult<Vec<Account>> {
    if session.role != Role::Doctor {
        return Err(AppError::PermissionDenied(
            "only doctors have a patient roster".to_string(),
        ));
    }
    db.list_assigned_patients(&session.account_id)
}

/// 환자가 이 세션의 담당이고 요구한 공유 스위치가 켜져 있는지 확인한다.
fn authorize_patient(db: &Db, session: &Session, patient_id: &str, need_live: bool) -> AppResult<Account> {
    let patient = db
        .get_account(patient_id)?
        .ok_or_else(|| AppError::NotFound(format!("account {}", patient_id)))?;
    if patient.assigned_doctor_id.as_deref() != Some(session.account_id.as_str()) {
        return Err(AppError::PermissionDenied(
            "not the assigned doctor".to_string(),
        ));
    }
    let allowed = if need_live { patient.sharing.live } else { patient.sharing.history };
    if !allowed {
        return Err(AppError::PermissionDenied(
            "patient has disabled this sharing option".to_string(),
        ));
    }
    Ok(patient)
}

/// 환자의 실시간 바이탈 미러. live 공유가 꺼져 있으면 거부.
pub fn live_vitals(db: &Db, session: &Session, patient_id: &str) -> AppResult<Option<VitalsSnapshot>> {
    let patient = authorize_patient(db, session, patient_id, true)?;
    Ok(patient.current_vitals)
}

/// 환자의 바이탈 이력 (최신순). history 공유가 꺼져 있으면 거부.
pub fn vitals_history(
    db: &Db,
    session: &Session,
    patient_id: &str,
    limit: Option<u32>,
) -> AppResult<Vec<VitalsSample>> {
    authorize_patient(db, session, patient_id, false)?;
    db.vitals_history(patient_id, limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
}

/// 대시보드 상단 요약 수치
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RosterStats {
    pub total: usize,
    pub live: usize,
    pub signed_in: usize,
    pub offline: usize,
}

pub fn roster_stats(db: &Db, session: &Session, now: DateTime<Utc>) -> AppResult<RosterStats> {
    let patients = assigned_patients(db, session)?;
    let mut stats = RosterStats { total: patients.len(), live: 0, signed_in: 0, offline: 0 };
    for patient in &patients {
        match presence(patient, now) {
            PresenceStatus::Live => stats.live += 1,
            PresenceStatus::SignedIn => stats.signed_in += 1,
            PresenceStatus::Offline => stats.offline += 1,
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Db, Session, Account, Account) {
        let db = Db::open_in_memory().unwrap();
        let doctor = Account::new_doctor("dseo".into(), "Dr. Seo".into(), "MED-5".into());
        let mut patient = Account::new_patient("jung".into(), "Jung".into(), 63, "Male".into());
        patient.assigned_doctor_id = Some(doctor.id.clone());
        db.insert_account(&doctor, "h").unwrap();
        db.insert_account(&patient, "h").unwrap();
        let d = Session { account_id: doctor.id.clone(), role: Role::Doctor };
        (db, d, doctor, patient)
    }

    #[test]
    fn test_presence_fresh_mirror_beats_offline_flag() {
        let now = Utc::now();
        let mut account = Account::new_patient("a".into(), "A".into(), 30, "Male".into());

        // 기기 스트림 시나리오: 앱은 꺼져 있지만 미러는 갱신 중
        account.current_vitals =
            Some(VitalsSnapshot::new(VitalsReading::zeroed(), now - Duration::seconds(5)));
        assert_eq!(presence(&account, now), PresenceStatus::Live);

        // 미러가 식으면 오프라인으로
        account.current_vitals =
            Some(VitalsSnapshot::new(VitalsReading::zeroed(), now - Duration::seconds(21)));
        assert_eq!(presence(&account, now), PresenceStatus::Offline);
    }

    #[test]
    fn test_presence_live_window() {
        let now = Utc::now();
        let mut account = Account::new_patient("a".into(), "A".into(), 30, "Male".into());
        account.is_online = true;

        assert_eq!(presence(&account, now), PresenceStatus::SignedIn);

        account.current_vitals =
            Some(VitalsSnapshot::new(VitalsReading::zeroed(), now - Duration::seconds(5)));
        assert_eq!(presence(&account, now), PresenceStatus::Live);

        // 21초 전 갱신은 창 밖
        account.current_vitals =
            Some(VitalsSnapshot::new(VitalsReading::zeroed(), now - Duration::seconds(21)));
        assert_eq!(presence(&account, now), PresenceStatus::SignedIn);
    }

    #[test]
    fn test_roster_requires_doctor() {
        let (db, _, _, patient) = setup();
        let s = Session { account_id: patient.id, role: Role::Patient };
        assert!(matches!(
            assigned_patients(&db, &s),
            Err(AppError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_live_vitals_gated_on_sharing() {
        let (db, d, _, patient) = setup();
        db.set_sharing(&patient.id, SharingPermissions { live: true, history: true }).unwrap();
        let snapshot = VitalsSnapshot::new(VitalsReading::zeroed(), Utc::now());
        db.update_current_vitals(&patient.id, &snapshot).unwrap();

        assert!(live_vitals(&db, &d, &patient.id).unwrap().is_some());

        db.set_sharing(&patient.id, SharingPermissions { live: false, history: true }).unwrap();
        assert!(matches!(
            live_vitals(&db, &d, &patient.id),
            Err(AppError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_history_gated_and_limited() {
        let (db, d, _, patient) = setup();
        db.set_sharing(&patient.id, SharingPermissions { live: true, history: true }).unwrap();
        for _ in 0..3 {
            db.append_sample(&patient.id, &VitalsReading::zeroed(), RecordKind::AutoLog).unwrap();
        }

        let history = vitals_history(&db, &d, &patient.id, Some(2)).unwrap();
        assert_eq!(history.len(), 2);

        db.set_sharing(&patient.id, SharingPermissions { live: true, history: false }).unwrap();
        assert!(matches!(
            vitals_history(&db, &d, &patient.id, None),
            Err(AppError::PermissionDenied(_))
        ));
        // live 미러 조회는 history 스위치와 무관
        assert!(live_vitals(&db, &d, &patient.id).is_ok());
    }

    #[test]
    fn test_unassigned_patient_denied() {
        let (db, d, _, _) = setup();
        let stranger = Account::new_patient("oh".into(), "Oh".into(), 25, "Female".into());
        db.insert_account(&stranger, "h").unwrap();
        assert!(matches!(
            live_vitals(&db, &d, &stranger.id),
            Err(AppError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_roster_stats() {
        let (db, d, doctor, patient) = setup();
        let mut second = Account::new_patient("yoo".into(), "Yoo".into(), 47, "Female".into());
        second.assigned_doctor_id = Some(doctor.id.clone());
        db.insert_account(&second, "h").unwrap();

        let now = Utc::now();
        db.set_online(&patient.id, true).unwrap();
        db.update_current_vitals(&patient.id, &VitalsSnapshot::zeroed(now)).unwrap();

        let stats = roster_stats(&db, &d, now).unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.live, 1);
        assert_eq!(stats.signed_in, 0);
        assert_eq!(stats.offline, 1);
    }
}
