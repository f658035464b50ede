//! 의사 연결 + 데이터 공유 설정 (환자 측)
//!
//! 의사와 연결하면 실시간/이력 공유가 모두 켜진 상태로 시작하고,
//! 이후 환자가 개별 스위치를 끌 수 있다.

use crate::db::Db;
use crate::error::{AppError, AppResult};
use crate::models::*;

/// 연결 가능한 의사 목록
pub fn list_doctors(db: &Db) -> AppResult<Vec<Account>> {
    db.list_accounts_by_role(Role::Doctor)
}

/// 의사와 연결. 공유 스위치는 둘 다 켜진 채 시작한다.
pub fn connect_to_doctor(db: &Db, session: &Session, doctor_id: &str) -> AppResult<()> {
    if session.role != Role::Patient {
        return Err(AppError::PermissionDenied(
            "only patients can connect to a doctor".to_string(),
        ));
    }
    let doctor = db
        .get_account(doctor_id)?
        .ok_or_else(|| AppError::NotFound(format!("account {}", doctor_id)))?;
    if doctor.role != Role::Doctor {
        return Err(AppError::Custom(format!("{} is not a doctor account", doctor_id)));
    }
    db.assign_doctor(
        &session.account_id,
        doctor_id,
        SharingPermissions { live: true, history: true },
    )?;
    log::info!(
        "[sharing] patient {} connected to doctor {}",
        session.account_id,
        doctor_id
    );
    Ok(())
}

/// 공유 스위치 갱신. 연결된 의사가 없으면 거부한다.
pub fn set_sharing(db: &Db, session: &Session, permissions: SharingPermissions) -> AppResult<()> {
    let me = db
        .get_account(&session.account_id)?
        .ok_or_else(|| AppError::NotFound(format!("account {}", session.account_id)))?;
    if me.assigned_doctor_id.is_none() {
        return Err(AppError::Custom("no doctor connected".to_string()));
    }
    db.set_sharing(&session.account_id, permissions)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Db, Session, Account, Account) {
        let db = Db::open_in_memory().unwrap();
        let doctor = Account::new_doctor("dmoon".into(), "Dr. Moon".into(), "MED-3".into());
        let patient = Account::new_patient("choi".into(), "Choi".into(), 41, "Female".into());
        db.insert_account(&doctor, "h").unwrap();
        db.insert_account(&patient, "h").unwrap();
        let p = Session { account_id: patient.id.clone(), role: Role::Patient };
        (db, p, doctor, patient)
    }

    #[test]
    fn test_connect_enables_both_switches() {
        let (db, p, doctor, patient) = setup();
        connect_to_doctor(&db, &p, &doctor.id).unwrap();

        let me = db.get_account(&patient.id).unwrap().unwrap();
        assert_eq!(me.assigned_doctor_id.as_deref(), Some(doctor.id.as_str()));
        assert!(me.sharing.live);
        assert!(me.sharing.history);
    }

    #[test]
    fn test_connect_rejects_non_doctor_target() {
        let (db, p, _, _) = setup();
        let other = Account::new_patient("han".into(), "Han".into(), 30, "Male".into());
        db.insert_account(&other, "h").unwrap();
        assert!(connect_to_doctor(&db, &p, &other.id).is_err());
    }

    #[test]
    fn test_doctor_cannot_connect_as_patient() {
        let (db, _, doctor, _) = setup();
        let s = Session { account_id: doctor.id.clone(), role: Role::Doctor };
        assert!(matches!(
            connect_to_doctor(&db, &s, &doctor.id),
            Err(AppError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_set_sharing_requires_connection() {
        let (db, p, doctor, patient) = setup();
        let off = SharingPermissions { live: false, history: true };
        assert!(set_sharing(&db, &p, off).is_err());

        connect_to_doctor(&db, &p, &doctor.id).unwrap();
        set_sharing(&db, &p, off).unwrap();

        let me = db.get_account(&patient.id).unwrap().unwrap();
        assert!(!me.sharing.live);
        assert!(me.sharing.history);
    }

    #[test]
    fn test_list_doctors_excludes_patients() {
        let (db, _, doctor, _) = setup();
        let doctors = list_doctors(&db).unwrap();
        assert_eq!(doctors.len(), 1);
        assert_eq!(doctors[0].id, doctor.id);
    }
}
