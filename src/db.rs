//! SQLite 문서 스토어 + 변경 브로드캐스트
//!
//! 컬렉션별 테이블에 문서를 저장하고, 커밋된 쓰기마다 해당 컬렉션을
//! 브로드캐스트 버스에 발행합니다. 워처(watcher)는 이 버스를 구독해
//! 변경 시 재조회합니다.

use crate::error::{AppError, AppResult};
use crate::models::*;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use uuid::Uuid;

/// 변경 버스 채널 크기. 수신자가 밀리면 lagged로 처리되고 워처가 재조회한다.
const CHANGE_BUS_CAPACITY: usize = 64;

/// 스토어가 다루는 컬렉션
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Users,
    VitalsHistory,
    Appointments,
    Messages,
    Prescriptions,
    Devices,
}

/// 스토어 핸들. 복제 가능하며 태스크 간 공유된다.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
    changes: broadcast::Sender<Collection>,
}

/// 기본 데이터베이스 경로
fn default_db_path() -> AppResult<PathBuf> {
    let data_dir = dirs::data_local_dir()
        .ok_or_else(|| AppError::Custom("Cannot find data directory".to_string()))?;
    let app_dir = data_dir.join("medisense");
    std::fs::create_dir_all(&app_dir)?;
    Ok(app_dir.join("medisense.db"))
}

impl Db {
    /// 지정 경로의 데이터베이스 열기
    pub fn open<P: AsRef<Path>>(path: P) -> AppResult<Db> {
        let conn = Connection::open(path.as_ref())?;
        log::info!("[DB] opened database at {:?}", path.as_ref());
        Db::from_connection(conn)
    }

    /// 기본 경로의 데이터베이스 열기
    pub fn open_default() -> AppResult<Db> {
        Db::open(default_db_path()?)
    }

    /// 인메모리 데이터베이스 (테스트용)
    pub fn open_in_memory() -> AppResult<Db> {
        Db::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> AppResult<Db> {
        create_tables(&conn)?;
        run_migrations(&conn)?;
        let (changes, _) = broadcast::channel(CHANGE_BUS_CAPACITY);
        Ok(Db {
            conn: Arc::new(Mutex::new(conn)),
            changes,
        })
    }

    fn conn(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Custom("Database lock error".to_string()))
    }

    /// 변경 버스 구독. 구독 이후의 쓰기에 대해 컬렉션 이벤트를 받는다.
    pub fn subscribe(&self) -> broadcast::Receiver<Collection> {
        self.changes.subscribe()
    }

    /// 커밋된 쓰기를 버스에 발행. 수신자가 없으면 조용히 버린다.
    fn notify(&self, collection: Collection) {
        let _ = self.changes.send(collection);
    }

    // ============ 계정 ============

    pub fn insert_account(&self, account: &Account, password_hash: &str) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"INSERT INTO users
               (id, username, password_hash, full_name, role, registration_id, age, gender,
                assigned_doctor_id, share_live, share_history, connected_device_id,
                current_vitals, is_online, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"#,
            params![
                account.id,
                account.username,
                password_hash,
                account.full_name,
                account.role.as_str(),
                account.registration_id,
                account.age,
                account.gender,
                account.assigned_doctor_id,
                account.sharing.live as i32,
                account.sharing.history as i32,
                account.connected_device_id,
                account
                    .current_vitals
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                account.is_online as i32,
                account.created_at.to_rfc3339(),
            ],
        )?;
        drop(conn);
        self.notify(Collection::Users);
        Ok(())
    }

    pub fn get_account(&self, id: &str) -> AppResult<Option<Account>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM users WHERE id = ?1",
            ACCOUNT_COLUMNS
        ))?;
        let result = stmt.query_row([id], map_account).optional()?;
        Ok(result)
    }

    /// 인증 전용: 사용자명으로 계정과 비밀번호 해시를 함께 조회
    pub fn get_account_for_auth(&self, username: &str) -> AppResult<Option<(Account, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, password_hash FROM users WHERE username = ?1",
            ACCOUNT_COLUMNS
        ))?;
        let result = stmt
            .query_row([username], |row| {
                let account = map_account(row)?;
                let hash: String = row.get(14)?;
                Ok((account, hash))
            })
            .optional()?;
        Ok(result)
    }

    pub fn list_accounts_by_role(&self, role: Role) -> AppResult<Vec<Account>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM users WHERE role = ?1 ORDER BY created_at",
            ACCOUNT_COLUMNS
        ))?;
        let rows = stmt.query_map([role.as_str()], map_account)?;
        collect_rows(rows)
    }

    /// 담당 의사에게 배정된 환자 목록
    pub fn list_assigned_patients(&self, doctor_id: &str) -> AppResult<Vec<Account>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM users WHERE role = 'patient' AND assigned_doctor_id = ?1 ORDER BY created_at",
            ACCOUNT_COLUMNS
        ))?;
        let rows = stmt.query_map([doctor_id], map_account)?;
        collect_rows(rows)
    }

    pub fn set_online(&self, account_id: &str, online: bool) -> AppResult<()> {
        self.update_account(
            account_id,
            "UPDATE users SET is_online = ?2 WHERE id = ?1",
            params![account_id, online as i32],
        )
    }

    /// 담당 의사 배정 + 공유 권한을 한 번에 갱신 (연결 동작)
    pub fn assign_doctor(
        &self,
        patient_id: &str,
        doctor_id: &str,
        sharing: SharingPermissions,
    ) -> AppResult<()> {
        self.update_account(
            patient_id,
            "UPDATE users SET assigned_doctor_id = ?2, share_live = ?3, share_history = ?4 WHERE id = ?1",
            params![patient_id, doctor_id, sharing.live as i32, sharing.history as i32],
        )
    }

    pub fn set_sharing(&self, patient_id: &str, sharing: SharingPermissions) -> AppResult<()> {
        self.update_account(
            patient_id,
            "UPDATE users SET share_live = ?2, share_history = ?3 WHERE id = ?1",
            params![patient_id, sharing.live as i32, sharing.history as i32],
        )
    }

    pub fn set_connected_device(&self, account_id: &str, device_id: Option<&str>) -> AppResult<()> {
        self.update_account(
            account_id,
            "UPDATE users SET connected_device_id = ?2 WHERE id = ?1",
            params![account_id, device_id],
        )
    }

    /// 라이브 미러 덮어쓰기
    pub fn update_current_vitals(&self, account_id: &str, snapshot: &VitalsSnapshot) -> AppResult<()> {
        let json = serde_json::to_string(snapshot)?;
        self.update_account(
            account_id,
            "UPDATE users SET current_vitals = ?2 WHERE id = ?1",
            params![account_id, json],
        )
    }

    fn update_account(
        &self,
        account_id: &str,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> AppResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(sql, params)?;
        drop(conn);
        if updated == 0 {
            return Err(AppError::NotFound(format!("account {}", account_id)));
        }
        self.notify(Collection::Users);
        Ok(())
    }

    // ============ 생체신호 이력 ============

    /// 이력 레코드 추가. 타임스탬프는 저장 시점에 스토어가 찍는다.
    pub fn append_sample(
        &self,
        account_id: &str,
        reading: &VitalsReading,
        kind: RecordKind,
    ) -> AppResult<VitalsSample> {
        let sample = VitalsSample {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            reading: reading.clone(),
            kind,
            recorded_at: Utc::now(),
        };
        let conn = self.conn()?;
        conn.execute(
            r#"INSERT INTO vitals_history
               (id, account_id, heart_rate, spo2, body_temp, room_temp, humidity, ecg, ecg_peak, kind, recorded_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
            params![
                sample.id,
                sample.account_id,
                sample.reading.heart_rate,
                sample.reading.spo2,
                sample.reading.body_temp,
                sample.reading.room_temp,
                sample.reading.humidity,
                sample.reading.ecg,
                sample.reading.ecg_peak as i32,
                sample.kind.as_str(),
                sample.recorded_at.to_rfc3339(),
            ],
        )?;
        drop(conn);
        self.notify(Collection::VitalsHistory);
        Ok(sample)
    }

    /// 최신순 이력 조회
    pub fn vitals_history(&self, account_id: &str, limit: u32) -> AppResult<Vec<VitalsSample>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT id, account_id, heart_rate, spo2, body_temp, room_temp, humidity, ecg, ecg_peak, kind, recorded_at
               FROM vitals_history WHERE account_id = ?1
               ORDER BY recorded_at DESC LIMIT ?2"#,
        )?;
        let rows = stmt.query_map(params![account_id, limit], |row| {
            Ok(VitalsSample {
                id: row.get(0)?,
                account_id: row.get(1)?,
                reading: VitalsReading {
                    heart_rate: row.get(2)?,
                    spo2: row.get(3)?,
                    body_temp: row.get(4)?,
                    room_temp: row.get(5)?,
                    humidity: row.get(6)?,
                    ecg: row.get(7)?,
                    ecg_peak: row.get::<_, i32>(8)? != 0,
                },
                kind: RecordKind::parse(&row.get::<_, String>(9)?).unwrap_or(RecordKind::AutoLog),
                recorded_at: parse_ts(&row.get::<_, String>(10)?),
            })
        })?;
        collect_rows(rows)
    }

    // ============ 예약 ============

    pub fn insert_appointment(&self, apt: &Appointment) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"INSERT INTO appointments
               (id, doctor_id, patient_id, date, time, kind, location, status, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
            params![
                apt.id,
                apt.doctor_id,
                apt.patient_id,
                apt.date,
                apt.time,
                apt.kind,
                apt.location,
                apt.status.as_str(),
                apt.created_at.to_rfc3339(),
            ],
        )?;
        drop(conn);
        self.notify(Collection::Appointments);
        Ok(())
    }

    pub fn get_appointment(&self, id: &str) -> AppResult<Option<Appointment>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM appointments WHERE id = ?1",
            APPOINTMENT_COLUMNS
        ))?;
        let result = stmt.query_row([id], map_appointment).optional()?;
        Ok(result)
    }

    pub fn list_appointments_for_doctor(&self, doctor_id: &str) -> AppResult<Vec<Appointment>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM appointments WHERE doctor_id = ?1 ORDER BY created_at",
            APPOINTMENT_COLUMNS
        ))?;
        let rows = stmt.query_map([doctor_id], map_appointment)?;
        collect_rows(rows)
    }

    pub fn list_appointments_for_patient(&self, patient_id: &str) -> AppResult<Vec<Appointment>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM appointments WHERE patient_id = ?1 ORDER BY created_at",
            APPOINTMENT_COLUMNS
        ))?;
        let rows = stmt.query_map([patient_id], map_appointment)?;
        collect_rows(rows)
    }

    pub fn set_appointment_status(&self, id: &str, status: AppointmentStatus) -> AppResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE appointments SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        drop(conn);
        if updated == 0 {
            return Err(AppError::NotFound(format!("appointment {}", id)));
        }
        self.notify(Collection::Appointments);
        Ok(())
    }

    // ============ 메시지 ============

    /// 메시지 저장. created_at(서버 타임스탬프)을 커밋 시점에 확정해 돌려준다.
    pub fn insert_message(&self, message: &Message) -> AppResult<Message> {
        let mut stored = message.clone();
        stored.created_at = Some(Utc::now());
        let content_json = stored
            .content
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let conn = self.conn()?;
        conn.execute(
            r#"INSERT INTO messages
               (id, chat_id, sender_id, receiver_id, body, kind, content, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                stored.id,
                stored.chat_id,
                stored.sender_id,
                stored.receiver_id,
                stored.body,
                stored.kind.as_str(),
                content_json,
                stored.created_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        drop(conn);
        self.notify(Collection::Messages);
        Ok(stored)
    }

    /// 대화의 모든 메시지. 전송 순서는 보장하지 않으므로 호출측이 재정렬한다.
    pub fn messages_for_chat(&self, chat_id: &str) -> AppResult<Vec<Message>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT id, chat_id, sender_id, receiver_id, body, kind, content, created_at
               FROM messages WHERE chat_id = ?1"#,
        )?;
        let rows = stmt.query_map([chat_id], |row| {
            Ok(Message {
                id: row.get(0)?,
                chat_id: row.get(1)?,
                sender_id: row.get(2)?,
                receiver_id: row.get(3)?,
                body: row.get(4)?,
                kind: MessageKind::parse(&row.get::<_, String>(5)?).unwrap_or(MessageKind::Text),
                content: row
                    .get::<_, Option<String>>(6)?
                    .and_then(|s| serde_json::from_str(&s).ok()),
                created_at: row.get::<_, Option<String>>(7)?.map(|s| parse_ts(&s)),
            })
        })?;
        collect_rows(rows)
    }

    // ============ 처방전 ============

    pub fn insert_prescription(&self, rx: &Prescription) -> AppResult<()> {
        let medications = serde_json::to_string(&rx.medications)?;
        let conn = self.conn()?;
        conn.execute(
            r#"INSERT INTO prescriptions
               (id, patient_id, doctor_id, doctor_name, doctor_reg_id, diagnosis, medications, notes, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
            params![
                rx.id,
                rx.patient_id,
                rx.doctor_id,
                rx.doctor_name,
                rx.doctor_reg_id,
                rx.diagnosis,
                medications,
                rx.notes,
                rx.created_at.to_rfc3339(),
            ],
        )?;
        drop(conn);
        self.notify(Collection::Prescriptions);
        Ok(())
    }

    pub fn prescriptions_for_patient(&self, patient_id: &str) -> AppResult<Vec<Prescription>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT id, patient_id, doctor_id, doctor_name, doctor_reg_id, diagnosis, medications, notes, created_at
               FROM prescriptions WHERE patient_id = ?1 ORDER BY created_at DESC"#,
        )?;
        let rows = stmt.query_map([patient_id], |row| {
            Ok(Prescription {
                id: row.get(0)?,
                patient_id: row.get(1)?,
                doctor_id: row.get(2)?,
                doctor_name: row.get(3)?,
                doctor_reg_id: row.get(4)?,
                diagnosis: row.get(5)?,
                medications: serde_json::from_str(&row.get::<_, String>(6)?).unwrap_or_default(),
                notes: row.get(7)?,
                created_at: parse_ts(&row.get::<_, String>(8)?),
            })
        })?;
        collect_rows(rows)
    }

    // ============ 기기 레지스트리 ============

    /// 레지스트리에 기기 등록 (이미 있으면 무시)
    pub fn register_device(&self, device_id: &str) -> AppResult<()> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO devices (device_id, owner_id, status, assigned_at) VALUES (?1, NULL, 'ready', NULL)",
            [device_id],
        )?;
        drop(conn);
        if inserted > 0 {
            self.notify(Collection::Devices);
        }
        Ok(())
    }

    pub fn get_device(&self, device_id: &str) -> AppResult<Option<DeviceEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT device_id, owner_id, status, assigned_at FROM devices WHERE device_id = ?1",
        )?;
        let result = stmt
            .query_row([device_id], |row| {
                Ok(DeviceEntry {
                    device_id: row.get(0)?,
                    owner_id: row.get(1)?,
                    status: DeviceStatus::parse(&row.get::<_, String>(2)?)
                        .unwrap_or(DeviceStatus::Ready),
                    assigned_at: row.get::<_, Option<String>>(3)?.map(|s| parse_ts(&s)),
                })
            })
            .optional()?;
        Ok(result)
    }

    pub fn assign_device(&self, device_id: &str, owner_id: &str) -> AppResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE devices SET owner_id = ?2, status = 'assigned', assigned_at = ?3 WHERE device_id = ?1",
            params![device_id, owner_id, Utc::now().to_rfc3339()],
        )?;
        drop(conn);
        if updated == 0 {
            return Err(AppError::NotFound(format!("device {}", device_id)));
        }
        self.notify(Collection::Devices);
        Ok(())
    }

    pub fn release_device(&self, device_id: &str) -> AppResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE devices SET owner_id = NULL, status = 'ready', assigned_at = NULL WHERE device_id = ?1",
            [device_id],
        )?;
        drop(conn);
        if updated == 0 {
            return Err(AppError::NotFound(format!("device {}", device_id)));
        }
        self.notify(Collection::Devices);
        Ok(())
    }
}

const ACCOUNT_COLUMNS: &str = "id, username, full_name, role, registration_id, age, gender, \
     assigned_doctor_id, share_live, share_history, connected_device_id, current_vitals, is_online, created_at";

const APPOINTMENT_COLUMNS: &str =
    "id, doctor_id, patient_id, date, time, kind, location, status, created_at";

fn map_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        username: row.get(1)?,
        full_name: row.get(2)?,
        role: Role::parse(&row.get::<_, String>(3)?).unwrap_or(Role::Patient),
        registration_id: row.get(4)?,
        age: row.get(5)?,
        gender: row.get(6)?,
        assigned_doctor_id: row.get(7)?,
        sharing: SharingPermissions {
            live: row.get::<_, i32>(8)? != 0,
            history: row.get::<_, i32>(9)? != 0,
        },
        connected_device_id: row.get(10)?,
        current_vitals: row
            .get::<_, Option<String>>(11)?
            .and_then(|s| serde_json::from_str(&s).ok()),
        is_online: row.get::<_, i32>(12)? != 0,
        created_at: parse_ts(&row.get::<_, String>(13)?),
    })
}

fn map_appointment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Appointment> {
    Ok(Appointment {
        id: row.get(0)?,
        doctor_id: row.get(1)?,
        patient_id: row.get(2)?,
        date: row.get(3)?,
        time: row.get(4)?,
        kind: row.get(5)?,
        location: row.get(6)?,
        status: AppointmentStatus::parse(&row.get::<_, String>(7)?)
            .unwrap_or(AppointmentStatus::Pending),
        created_at: parse_ts(&row.get::<_, String>(8)?),
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> AppResult<Vec<T>> {
    let mut result = Vec::new();
    for row in rows {
        result.push(row?);
    }
    Ok(result)
}

/// 테이블 생성
fn create_tables(conn: &Connection) -> AppResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            full_name TEXT NOT NULL,
            role TEXT NOT NULL,
            registration_id TEXT,
            age INTEGER,
            gender TEXT,
            assigned_doctor_id TEXT,
            share_live INTEGER NOT NULL DEFAULT 0,
            share_history INTEGER NOT NULL DEFAULT 0,
            connected_device_id TEXT,
            current_vitals TEXT,
            is_online INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS vitals_history (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            heart_rate INTEGER NOT NULL,
            spo2 INTEGER NOT NULL,
            body_temp REAL NOT NULL,
            room_temp REAL NOT NULL,
            humidity INTEGER NOT NULL,
            ecg REAL NOT NULL,
            ecg_peak INTEGER NOT NULL DEFAULT 0,
            kind TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS appointments (
            id TEXT PRIMARY KEY,
            doctor_id TEXT NOT NULL,
            patient_id TEXT NOT NULL,
            date TEXT NOT NULL,
            time TEXT NOT NULL,
            kind TEXT NOT NULL,
            location TEXT,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            chat_id TEXT NOT NULL,
            sender_id TEXT NOT NULL,
            receiver_id TEXT NOT NULL,
            body TEXT NOT NULL,
            kind TEXT NOT NULL,
            content TEXT,
            created_at TEXT
        );

        CREATE TABLE IF NOT EXISTS prescriptions (
            id TEXT PRIMARY KEY,
            patient_id TEXT NOT NULL,
            doctor_id TEXT NOT NULL,
            doctor_name TEXT NOT NULL,
            doctor_reg_id TEXT NOT NULL,
            diagnosis TEXT NOT NULL,
            medications TEXT NOT NULL,
            notes TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS devices (
            device_id TEXT PRIMARY KEY,
            owner_id TEXT,
            status TEXT NOT NULL DEFAULT 'ready',
            assigned_at TEXT
        );

        -- 인덱스 생성
        CREATE INDEX IF NOT EXISTS idx_users_role ON users(role);
        CREATE INDEX IF NOT EXISTS idx_users_assigned_doctor ON users(assigned_doctor_id);
        CREATE INDEX IF NOT EXISTS idx_vitals_history_account ON vitals_history(account_id, recorded_at);
        CREATE INDEX IF NOT EXISTS idx_appointments_doctor ON appointments(doctor_id);
        CREATE INDEX IF NOT EXISTS idx_appointments_patient ON appointments(patient_id);
        CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id);
        CREATE INDEX IF NOT EXISTS idx_prescriptions_patient ON prescriptions(patient_id);
        "#,
    )?;
    Ok(())
}

/// 마이그레이션 실행
fn run_migrations(conn: &Connection) -> AppResult<()> {
    // 초기 배포분에는 humidity 컬럼이 없었다
    let _ = conn.execute(
        "ALTER TABLE vitals_history ADD COLUMN humidity INTEGER NOT NULL DEFAULT 0",
        [],
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Db {
        Db::open_in_memory().unwrap()
    }

    fn sample_reading() -> VitalsReading {
        VitalsReading {
            heart_rate: 72,
            spo2: 98,
            body_temp: 36.6,
            room_temp: 24.0,
            humidity: 50,
            ecg: 50.0,
            ecg_peak: false,
        }
    }

    #[test]
    fn test_account_round_trip() {
        let db = test_db();
        let doctor = Account::new_doctor("droy".into(), "Dr. Roy".into(), "MED-1234".into());
        db.insert_account(&doctor, "hash").unwrap();

        let loaded = db.get_account(&doctor.id).unwrap().unwrap();
        assert_eq!(loaded.username, "droy");
        assert_eq!(loaded.role, Role::Doctor);
        assert_eq!(loaded.registration_id.as_deref(), Some("MED-1234"));
        assert!(loaded.current_vitals.is_none());
        assert!(!loaded.is_online);
    }

    #[test]
    fn test_duplicate_username_rejected() {
        let db = test_db();
        let a = Account::new_patient("kim".into(), "Kim".into(), 30, "Female".into());
        let b = Account::new_patient("kim".into(), "Other Kim".into(), 40, "Male".into());
        db.insert_account(&a, "h1").unwrap();
        assert!(db.insert_account(&b, "h2").is_err());
    }

    #[test]
    fn test_current_vitals_json_round_trip() {
        let db = test_db();
        let patient = Account::new_patient("lee".into(), "Lee".into(), 52, "Male".into());
        db.insert_account(&patient, "hash").unwrap();

        let snap = VitalsSnapshot::new(sample_reading(), Utc::now());
        db.update_current_vitals(&patient.id, &snap).unwrap();

        let loaded = db.get_account(&patient.id).unwrap().unwrap();
        let mirror = loaded.current_vitals.unwrap();
        assert_eq!(mirror.reading, snap.reading);
    }

    #[test]
    fn test_vitals_history_newest_first_with_limit() {
        let db = test_db();
        for i in 0..5 {
            let mut r = sample_reading();
            r.heart_rate = 60 + i;
            db.append_sample("acc-1", &r, RecordKind::AutoLog).unwrap();
        }
        let history = db.vitals_history("acc-1", 3).unwrap();
        assert_eq!(history.len(), 3);
        for pair in history.windows(2) {
            assert!(pair[0].recorded_at >= pair[1].recorded_at);
        }
    }

    #[test]
    fn test_message_gets_server_timestamp() {
        let db = test_db();
        let msg = Message {
            id: Uuid::new_v4().to_string(),
            chat_id: "a_b".into(),
            sender_id: "a".into(),
            receiver_id: "b".into(),
            body: "Hello".into(),
            kind: MessageKind::Text,
            content: None,
            created_at: None,
        };
        let stored = db.insert_message(&msg).unwrap();
        assert!(stored.created_at.is_some());

        let loaded = db.messages_for_chat("a_b").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].created_at, stored.created_at);
    }

    #[test]
    fn test_device_assign_release() {
        let db = test_db();
        db.register_device("AA11BB").unwrap();
        db.assign_device("AA11BB", "acc-1").unwrap();

        let entry = db.get_device("AA11BB").unwrap().unwrap();
        assert_eq!(entry.status, DeviceStatus::Assigned);
        assert_eq!(entry.owner_id.as_deref(), Some("acc-1"));
        assert!(entry.assigned_at.is_some());

        db.release_device("AA11BB").unwrap();
        let entry = db.get_device("AA11BB").unwrap().unwrap();
        assert_eq!(entry.status, DeviceStatus::Ready);
        assert!(entry.owner_id.is_none());
    }

    #[test]
    fn test_update_missing_account_is_not_found() {
        let db = test_db();
        let err = db.set_online("nope", true).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_write_publishes_collection_event() {
        let db = test_db();
        let mut rx = db.subscribe();
        db.register_device("CC22DD").unwrap();
        assert_eq!(rx.try_recv().unwrap(), Collection::Devices);
    }
}
