//! 진료 예약
//!
//! 환자/의사 어느 쪽이든 예약을 요청할 수 있고, 상태 전이는 의사만
//! 수행한다. 전이 규칙 자체는 `AppointmentStatus::can_transition_to`에
//! 있다.

use crate::db::Db;
use crate::error::{AppError, AppResult};
use crate::models::*;

/// 예약 요청 입력
#[derive(Debug, Clone, serde::Deserialize)]
pub struct AppointmentRequest {
    /// 상대 계정 id (환자가 요청하면 의사, 의사가 요청하면 환자)
    pub counterpart_id: String,
    pub date: String,
    pub time: String,
    pub kind: String,
    pub location: Option<String>,
}

/// 예약 요청. Pending 상태로 생성된다.
///
/// 환자는 담당 의사에게만 요청할 수 있고, 의사는 실제 환자 계정에만
/// 잡을 수 있다.
pub fn request_appointment(
    db: &Db,
    session: &Session,
    req: AppointmentRequest,
) -> AppResult<Appointment> {
    let counterpart = db
        .get_account(&req.counterpart_id)?
        .ok_or_else(|| AppError::NotFound(format!("account {}", req.counterpart_id)))?;

    let (doctor_id, patient_id) = match session.role {
        Role::Patient => {
            let me = db
                .get_account(&session.account_id)?
                .ok_or_else(|| AppError::NotFound(format!("account {}", session.account_id)))?;
            if me.assigned_doctor_id.as_deref() != Some(counterpart.id.as_str()) {
                return Err(AppError::PermissionDenied(
                    "appointments can only be requested with the assigned doctor".to_string(),
                ));
            }
            (counterpart.id, session.account_id.clone())
        }
        Role::Doctor => {
            if counterpart.role != Role::Patient {
                return Err(AppError::Custom(format!(
                    "{} is not a patient account",
                    counterpart.id
                )));
            }
            (session.account_id.clone(), counterpart.id)
        }
    };

    let apt = Appointment::new(doctor_id, patient_id, req.date, req.time, req.kind, req.location);
    db.insert_appointment(&apt)?;
    log::info!("[appointments] requested {} ({})", apt.id, apt.date);
    Ok(apt)
}

/// 예약 상태 변경 (의사 전용). 허용되지 않은 전이는 거부한다.
pub fn set_status(
    db: &Db,
    session: &Session,
    appointment_id: &str,
    status: AppointmentStatus,
) -> AppResult<Appointment> {
    if session.role != Role::Doctor {
        return Err(AppError::PermissionDenied(
            "only doctors can change appointment status".to_string(),
        ));
    }
    let apt = db
        .get_appointment(appointment_id)?
        .ok_or_else(|| AppError::NotFound(format!("appointment {}", appointment_id)))?;
    if apt.doctor_id != session.account_id {
        return Err(AppError::PermissionDenied(
            "appointment belongs to another doctor".to_string(),
        ));
    }
    if !apt.status.can_transition_to(status) {
        return Err(AppError::Custom(format!(
            "cannot move appointment from {} to {}",
            apt.status.as_str(),
            status.as_str()
        )));
    }
    db.set_appointment_status(appointment_id, status)?;
    log::info!(
        "[appointments] {} {} -> {}",
        appointment_id,
        apt.status.as_str(),
        status.as_str()
    );
    Ok(Appointment { status, ..apt })
}

/// 특정 날짜의 일정을 시간순으로 돌려준다. 취소/완료 건은 제외.
pub fn todays_schedule(db: &Db, doctor_id: &str, date: &str) -> AppResult<Vec<Appointment>> {
    let mut schedule: Vec<Appointment> = db
        .list_appointments_for_doctor(doctor_id)?
        .into_iter()
        .filter(|a| {
            a.date == date
                && matches!(
                    a.status,
                    AppointmentStatus::Pending | AppointmentStatus::Confirmed
                )
        })
        .collect();
    schedule.sort_by(|a, b| a.time.cmp(&b.time));
    Ok(schedule)
}

/// 승인 대기 중인 예약 수
pub fn pending_count(db: &Db, doctor_id: &str) -> AppResult<usize> {
    let count = db
        .list_appointments_for_doctor(doctor_id)?
        .iter()
        .filter(|a| a.status == AppointmentStatus::Pending)
        .count();
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Db, Session, Session, Account, Account) {
        let db = Db::open_in_memory().unwrap();
        let doctor = Account::new_doctor("dlee".into(), "Dr. Lee".into(), "MED-7".into());
        let mut patient = Account::new_patient("park".into(), "Park".into(), 54, "Male".into());
        patient.assigned_doctor_id = Some(doctor.id.clone());
        db.insert_account(&doctor, "h").unwrap();
        db.insert_account(&patient, "h").unwrap();
        let d = Session { account_id: doctor.id.clone(), role: Role::Doctor };
        let p = Session { account_id: patient.id.clone(), role: Role::Patient };
        (db, d, p, doctor, patient)
    }

    fn req(counterpart: &str, date: &str, time: &str) -> AppointmentRequest {
        AppointmentRequest {
            counterpart_id: counterpart.to_string(),
            date: date.to_string(),
            time: time.to_string(),
            kind: "Checkup".to_string(),
            location: Some("Room 204".to_string()),
        }
    }

    #[test]
    fn test_patient_requests_with_assigned_doctor() {
        let (db, _, p, doctor, patient) = setup();
        let apt = request_appointment(&db, &p, req(&doctor.id, "2026-09-02", "10:00")).unwrap();
        assert_eq!(apt.status, AppointmentStatus::Pending);
        assert_eq!(apt.doctor_id, doctor.id);
        assert_eq!(apt.patient_id, patient.id);
        assert_eq!(db.list_appointments_for_patient(&patient.id).unwrap().len(), 1);
    }

    #[test]
    fn test_patient_cannot_request_with_other_doctor() {
        let (db, _, p, _, _) = setup();
        let other = Account::new_doctor("x".into(), "Dr. X".into(), "MED-9".into());
        db.insert_account(&other, "h").unwrap();
        assert!(matches!(
            request_appointment(&db, &p, req(&other.id, "2026-09-02", "10:00")),
            Err(AppError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_doctor_schedules_with_patient() {
        let (db, d, _, doctor, patient) = setup();
        let apt = request_appointment(&db, &d, req(&patient.id, "2026-09-03", "14:30")).unwrap();
        assert_eq!(apt.doctor_id, doctor.id);
        assert_eq!(apt.patient_id, patient.id);
    }

    #[test]
    fn test_status_transitions() {
        let (db, d, p, doctor, _) = setup();
        let apt = request_appointment(&db, &p, req(&doctor.id, "2026-09-02", "10:00")).unwrap();

        let apt = set_status(&db, &d, &apt.id, AppointmentStatus::Confirmed).unwrap();
        assert_eq!(apt.status, AppointmentStatus::Confirmed);

        // Confirmed -> Pending은 허용되지 않는 전이
        assert!(set_status(&db, &d, &apt.id, AppointmentStatus::Pending).is_err());

        let apt = set_status(&db, &d, &apt.id, AppointmentStatus::Completed).unwrap();
        assert_eq!(apt.status, AppointmentStatus::Completed);
        assert!(set_status(&db, &d, &apt.id, AppointmentStatus::Cancelled).is_err());
    }

    #[test]
    fn test_patient_cannot_set_status() {
        let (db, _, p, doctor, _) = setup();
        let apt = request_appointment(&db, &p, req(&doctor.id, "2026-09-02", "10:00")).unwrap();
        assert!(matches!(
            set_status(&db, &p, &apt.id, AppointmentStatus::Confirmed),
            Err(AppError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_other_doctor_cannot_touch_appointment() {
        let (db, _, p, doctor, _) = setup();
        let apt = request_appointment(&db, &p, req(&doctor.id, "2026-09-02", "10:00")).unwrap();
        let other = Account::new_doctor("x".into(), "Dr. X".into(), "MED-9".into());
        db.insert_account(&other, "h").unwrap();
        let s = Session { account_id: other.id, role: Role::Doctor };
        assert!(matches!(
            set_status(&db, &s, &apt.id, AppointmentStatus::Confirmed),
            Err(AppError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_todays_schedule_sorted_and_filtered() {
        let (db, d, p, doctor, patient) = setup();
        request_appointment(&db, &p, req(&doctor.id, "2026-09-02", "15:00")).unwrap();
        request_appointment(&db, &p, req(&doctor.id, "2026-09-02", "09:00")).unwrap();
        request_appointment(&db, &p, req(&doctor.id, "2026-09-05", "11:00")).unwrap();
        let cancelled =
            request_appointment(&db, &d, req(&patient.id, "2026-09-02", "12:00")).unwrap();
        set_status(&db, &d, &cancelled.id, AppointmentStatus::Cancelled).unwrap();

        let schedule = todays_schedule(&db, &doctor.id, "2026-09-02").unwrap();
        assert_eq!(schedule.len(), 2);
        assert_eq!(schedule[0].time, "09:00");
        assert_eq!(schedule[1].time, "15:00");
    }

    #[test]
    fn test_pending_count() {
        let (db, d, p, doctor, _) = setup();
        assert_eq!(pending_count(&db, &doctor.id).unwrap(), 0);
        let a = request_appointment(&db, &p, req(&doctor.id, "2026-09-02", "10:00")).unwrap();
        request_appointment(&db, &p, req(&doctor.id, "2026-09-04", "10:00")).unwrap();
        assert_eq!(pending_count(&db, &doctor.id).unwrap(), 2);
        set_status(&db, &d, &a.id, AppointmentStatus::Confirmed).unwrap();
        assert_eq!(pending_count(&db, &doctor.id).unwrap(), 1);
    }
}
