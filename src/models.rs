use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 계정 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Doctor,
    Patient,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Doctor => "doctor",
            Role::Patient => "patient",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "doctor" => Some(Role::Doctor),
            "patient" => Some(Role::Patient),
            _ => None,
        }
    }
}

/// 데이터 공유 권한 (환자가 담당 의사에게 허용한 범위)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharingPermissions {
    pub live: bool,
    pub history: bool,
}

/// 생체신호 측정값 (한 시점)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalsReading {
    pub heart_rate: i32,     // bpm
    pub spo2: i32,           // %
    pub body_temp: f64,      // °C
    pub room_temp: f64,      // °C
    pub humidity: i32,       // %
    pub ecg: f64,            // 파형 값
    pub ecg_peak: bool,      // R파 피크 여부
}

impl VitalsReading {
    /// 기기 해제 시 표시용 초기값
    pub fn zeroed() -> Self {
        Self {
            heart_rate: 0,
            spo2: 0,
            body_temp: 0.0,
            room_temp: 0.0,
            humidity: 0,
            ecg: 0.0,
            ecg_peak: false,
        }
    }
}

/// 라이브 미러 - 계정에 덮어쓰는 최신 생체신호
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalsSnapshot {
    #[serde(flatten)]
    pub reading: VitalsReading,
    pub last_updated: DateTime<Utc>,
}

impl VitalsSnapshot {
    pub fn new(reading: VitalsReading, at: DateTime<Utc>) -> Self {
        Self { reading, last_updated: at }
    }

    pub fn zeroed(at: DateTime<Utc>) -> Self {
        Self::new(VitalsReading::zeroed(), at)
    }
}

/// 계정 (의사 또는 환자)
///
/// password_hash는 인증 경로에서만 다루므로 모델에 싣지 않는다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub username: String,
    pub full_name: String,
    pub role: Role,
    pub registration_id: Option<String>, // 의사 면허번호
    pub age: Option<i32>,                // 환자 전용
    pub gender: Option<String>,
    pub assigned_doctor_id: Option<String>,
    pub sharing: SharingPermissions,
    pub connected_device_id: Option<String>,
    pub current_vitals: Option<VitalsSnapshot>,
    pub is_online: bool,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new_doctor(username: String, full_name: String, registration_id: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            username,
            full_name,
            role: Role::Doctor,
            registration_id: Some(registration_id),
            age: None,
            gender: None,
            assigned_doctor_id: None,
            sharing: SharingPermissions::default(),
            connected_device_id: None,
            current_vitals: None,
            is_online: false,
            created_at: Utc::now(),
        }
    }

    pub fn new_patient(username: String, full_name: String, age: i32, gender: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            username,
            full_name,
            role: Role::Patient,
            registration_id: None,
            age: Some(age),
            gender: Some(gender),
            assigned_doctor_id: None,
            sharing: SharingPermissions::default(),
            connected_device_id: None,
            current_vitals: None,
            is_online: false,
            created_at: Utc::now(),
        }
    }
}

/// 이력 레코드 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    AutoLog,
    ManualSnapshot,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::AutoLog => "auto_log",
            RecordKind::ManualSnapshot => "manual_snapshot",
        }
    }

    pub fn parse(s: &str) -> Option<RecordKind> {
        match s {
            "auto_log" => Some(RecordKind::AutoLog),
            "manual_snapshot" => Some(RecordKind::ManualSnapshot),
            _ => None,
        }
    }
}

/// 생체신호 이력 레코드 (append-only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VitalsSample {
    pub id: String,
    pub account_id: String,
    #[serde(flatten)]
    pub reading: VitalsReading,
    pub kind: RecordKind,
    pub recorded_at: DateTime<Utc>, // 저장 시점에 스토어가 찍는다
}

/// 예약 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "Pending",
            AppointmentStatus::Confirmed => "Confirmed",
            AppointmentStatus::Cancelled => "Cancelled",
            AppointmentStatus::Completed => "Completed",
        }
    }

    pub fn parse(s: &str) -> Option<AppointmentStatus> {
        match s {
            "Pending" => Some(AppointmentStatus::Pending),
            "Confirmed" => Some(AppointmentStatus::Confirmed),
            "Cancelled" => Some(AppointmentStatus::Cancelled),
            "Completed" => Some(AppointmentStatus::Completed),
            _ => None,
        }
    }

    /// 상태 전이는 단방향. Cancelled/Completed는 종료 상태.
    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Completed) | (Confirmed, Cancelled)
        )
    }
}

/// 진료 예약
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub doctor_id: String,
    pub patient_id: String,
    pub date: String, // YYYY-MM-DD
    pub time: String, // HH:MM
    pub kind: String, // 예: General Checkup, Follow-up
    pub location: Option<String>,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
}

impl Appointment {
    pub fn new(
        doctor_id: String,
        patient_id: String,
        date: String,
        time: String,
        kind: String,
        location: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            doctor_id,
            patient_id,
            date,
            time,
            kind,
            location,
            status: AppointmentStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// 메시지 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Prescription,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Prescription => "prescription",
        }
    }

    pub fn parse(s: &str) -> Option<MessageKind> {
        match s {
            "text" => Some(MessageKind::Text),
            "prescription" => Some(MessageKind::Prescription),
            _ => None,
        }
    }
}

/// 채팅 메시지
///
/// created_at이 None이면 서버 타임스탬프 미확정 상태. 정렬 시 "지금"으로 취급한다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub body: String,
    pub kind: MessageKind,
    pub content: Option<PrescriptionContent>, // kind가 prescription일 때 내장 페이로드
    pub created_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn sort_key(&self) -> DateTime<Utc> {
        self.created_at.unwrap_or_else(Utc::now)
    }
}

/// 처방 약품 항목
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationItem {
    pub name: String,
    pub dosage: String,
    pub frequency: String,
    pub duration: String,
}

/// 메시지에 내장되는 처방 페이로드
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrescriptionContent {
    pub diagnosis: String,
    pub medications: Vec<MedicationItem>,
    pub notes: String,
    pub doctor_name: String,
    pub doctor_reg_id: String,
    pub date: DateTime<Utc>,
}

/// 처방전 (의사가 한 번 작성, 이후 불변)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prescription {
    pub id: String,
    pub patient_id: String,
    pub doctor_id: String,
    pub doctor_name: String,
    pub doctor_reg_id: String,
    pub diagnosis: String,
    pub medications: Vec<MedicationItem>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

/// 기기 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Ready,
    Assigned,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Ready => "ready",
            DeviceStatus::Assigned => "assigned",
        }
    }

    pub fn parse(s: &str) -> Option<DeviceStatus> {
        match s {
            "ready" => Some(DeviceStatus::Ready),
            "assigned" => Some(DeviceStatus::Assigned),
            _ => None,
        }
    }
}

/// 기기 레지스트리 항목 (하드웨어 주소가 기본 키)
///
/// 불변식: assigned이면 owner_id는 항상 Some, ready이면 항상 None.
/// 핸드셰이크가 비원자적이라 일시적으로 깨질 수 있다 (registry 모듈 참고).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub device_id: String,
    pub owner_id: Option<String>,
    pub status: DeviceStatus,
    pub assigned_at: Option<DateTime<Utc>>,
}

/// 인증된 세션. 전역 상태 대신 모든 연산에 명시적으로 넘긴다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub account_id: String,
    pub role: Role,
}
