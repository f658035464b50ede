//! 메시징 + 처방전 전송
//!
//! 대화 키는 두 참여자 id를 정렬해 이어붙인 결정적 값이라 누가 먼저
//! 말을 걸든 같은 대화로 수렴합니다. 전송 순서는 보장되지 않으므로
//! 조회 측에서 타임스탬프로 재정렬합니다.

use crate::db::Db;
use crate::error::{AppError, AppResult};
use crate::models::*;
use chrono::Utc;
use uuid::Uuid;

/// 결정적 대화 키. chat_id(a, b) == chat_id(b, a).
pub fn chat_id(a: &str, b: &str) -> String {
    let mut pair = [a, b];
    pair.sort();
    pair.join("_")
}

/// 텍스트 메시지 전송. 저장된(타임스탬프 확정) 메시지를 돌려준다.
pub fn send_message(db: &Db, session: &Session, receiver_id: &str, body: &str) -> AppResult<Message> {
    if body.trim().is_empty() {
        return Err(AppError::Custom("Message body is empty".to_string()));
    }
    let message = Message {
        id: Uuid::new_v4().to_string(),
        chat_id: chat_id(&session.account_id, receiver_id),
        sender_id: session.account_id.clone(),
        receiver_id: receiver_id.to_string(),
        body: body.to_string(),
        kind: MessageKind::Text,
        content: None,
        created_at: None, // 서버 타임스탬프는 커밋 시점에 확정
    };
    db.insert_message(&message)
}

/// 처방전 작성 입력
#[derive(Debug, Clone, serde::Deserialize)]
pub struct PrescriptionInput {
    pub diagnosis: String,
    pub medications: Vec<MedicationItem>,
    pub notes: String,
}

/// 처방전 전송 (의사 전용)
///
/// 불변 처방 레코드를 남기고, 같은 내용을 페이로드로 담은 prescription
/// 메시지를 대화에 미러링한다.
pub fn send_prescription(
    db: &Db,
    session: &Session,
    patient_id: &str,
    input: PrescriptionInput,
) -> AppResult<Prescription> {
    if session.role != Role::Doctor {
        return Err(AppError::PermissionDenied(
            "only doctors can prescribe".to_string(),
        ));
    }

    let medications: Vec<MedicationItem> = input
        .medications
        .into_iter()
        .filter(|m| !m.name.trim().is_empty())
        .collect();
    if input.diagnosis.trim().is_empty() && medications.is_empty() {
        return Err(AppError::Custom(
            "Enter a diagnosis or at least one medication".to_string(),
        ));
    }

    let doctor = db
        .get_account(&session.account_id)?
        .ok_or_else(|| AppError::NotFound(format!("account {}", session.account_id)))?;
    let doctor_reg_id = doctor
        .registration_id
        .clone()
        .unwrap_or_else(|| "N/A".to_string());

    let prescription = Prescription {
        id: Uuid::new_v4().to_string(),
        patient_id: patient_id.to_string(),
        doctor_id: doctor.id.clone(),
        doctor_name: doctor.full_name.clone(),
        doctor_reg_id: doctor_reg_id.clone(),
        diagnosis: input.diagnosis.clone(),
        medications: medications.clone(),
        notes: input.notes.clone(),
        created_at: Utc::now(),
    };
    db.insert_prescription(&prescription)?;

    let message = Message {
        id: Uuid::new_v4().to_string(),
        chat_id: chat_id(&doctor.id, patient_id),
        sender_id: doctor.id.clone(),
        receiver_id: patient_id.to_string(),
        body: "Prescription Sent".to_string(), // 구버전 클라이언트용 대체 텍스트
        kind: MessageKind::Prescription,
        content: Some(PrescriptionContent {
            diagnosis: input.diagnosis,
            medications,
            notes: input.notes,
            doctor_name: doctor.full_name,
            doctor_reg_id,
            date: prescription.created_at,
        }),
        created_at: None,
    };
    db.insert_message(&message)?;

    log::info!(
        "[chat] prescription {} sent to patient {}",
        prescription.id,
        patient_id
    );
    Ok(prescription)
}

/// 대화 조회. created_at 미확정 메시지는 "지금"으로 취급해 정렬한다.
/// 키는 메시지당 한 번만 평가한다 - sort_key()의 "지금"이 비교마다
/// 달라지면 전순서가 깨진다.
pub fn chat_messages(db: &Db, a: &str, b: &str) -> AppResult<Vec<Message>> {
    let mut messages = db.messages_for_chat(&chat_id(a, b))?;
    messages.sort_by_cached_key(|m| m.sort_key());
    Ok(messages)
}

/// 환자의 처방전 목록. 본인 또는 담당 의사만 볼 수 있다.
pub fn prescriptions_for(db: &Db, session: &Session, patient_id: &str) -> AppResult<Vec<Prescription>> {
    if session.account_id != patient_id {
        let patient = db
            .get_account(patient_id)?
            .ok_or_else(|| AppError::NotFound(format!("account {}", patient_id)))?;
        if patient.assigned_doctor_id.as_deref() != Some(session.account_id.as_str()) {
            return Err(AppError::PermissionDenied(
                "not the assigned doctor".to_string(),
            ));
        }
    }
    db.prescriptions_for_patient(patient_id)
}
