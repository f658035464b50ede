//! 생체신호 생성/업로드 파이프라인
//!
//! 생성(시뮬레이션)과 업로드(저장 정책)를 분리합니다. 생성부는 순수
//! 함수이고, 업로더는 틱마다 두 가지 독립 정책을 적용합니다:
//!
//! - 이력 append: auto_log 레코드 추가. 시뮬레이션 경로는
//!   history_min_interval로 쓰기량을 제한하고, 기기 스트림 경로는
//!   제한 없이 기록한다.
//! - 라이브 미러: 공유 권한(live)이 켜져 있고 외부 기기가 연결되어
//!   있지 않을 때만 계정의 current_vitals를 덮어쓴다. 기기가 연결되면
//!   그 필드는 기기 쪽 기록 경로가 독점한다.
//!
//! 틱 단위 저장 실패는 로그만 남기고 버립니다. 다음 틱이 자연스럽게
//! 재시도하는 셈이므로 재시도 큐는 두지 않습니다.

use crate::db::Db;
use crate::error::AppResult;
use crate::models::{RecordKind, VitalsReading, VitalsSample, VitalsSnapshot};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::interval;

/// 파이프라인 설정
#[derive(Debug, Clone)]
pub struct VitalsConfig {
    /// 샘플 생성 주기
    pub tick_interval: Duration,
    /// 시뮬레이션 경로의 이력 쓰기 최소 간격 (조정 가능)
    pub history_min_interval: Duration,
}

impl Default for VitalsConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            history_min_interval: Duration::from_secs(5),
        }
    }
}

// ============ 생성부 (순수) ============

/// ECG 파형 한 점. P-QRS-T 주기를 흉내내며 R파에서 피크 플래그를 세운다.
pub fn ecg_wave<R: Rng>(tick: u64, rng: &mut R) -> (f64, bool) {
    let step = tick % 40;
    let mut val = 50.0;
    let mut peak = false;

    if (5..10).contains(&step) {
        val += 5.0; // P파
    } else if step == 12 {
        val -= 10.0; // Q
    } else if step == 13 {
        val += 80.0; // R
        peak = true;
    } else if step == 14 {
        val -= 20.0; // S
    } else if (20..28).contains(&step) {
        val += 8.0; // T파
    }

    val += rng.gen_range(-2.0..2.0);
    (val, peak)
}

/// 시뮬레이션 샘플 생성. I/O 없음.
pub fn simulate_reading<R: Rng>(rng: &mut R, tick: u64) -> VitalsReading {
    let (ecg, ecg_peak) = ecg_wave(tick, rng);
    VitalsReading {
        heart_rate: rng.gen_range(60..100),
        spo2: rng.gen_range(94..100),
        body_temp: round1(rng.gen_range(36.0..37.5)),
        room_temp: round1(rng.gen_range(22.0..26.0)),
        humidity: rng.gen_range(40..=60),
        ecg,
        ecg_peak,
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

// ============ 업로더 ============

/// 레코더 상태 기계
///
/// Idle → Generating은 뷰 마운트 시 암묵적으로, Generating → Recording은
/// 사용자의 시작 동작으로 전이한다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    /// 생성 없음
    Idle,
    /// 틱 동작, 값은 표시만 하고 저장하지 않음
    Generating,
    /// 틱 동작 + 저장
    Recording,
}

/// 루프-로컬 생성 상태
struct TickContext {
    rng: StdRng,
    tick: u64,
    last_history_save: Option<DateTime<Utc>>,
}

impl TickContext {
    fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            tick: 0,
            last_history_save: None,
        }
    }
}

/// 한 계정의 생체신호 레코더
#[derive(Clone)]
pub struct VitalsRecorder {
    db: Db,
    account_id: String,
    config: VitalsConfig,
    state: Arc<RwLock<RecorderState>>,
    latest: Arc<RwLock<Option<VitalsReading>>>,
}

impl VitalsRecorder {
    pub fn new(db: Db, account_id: String) -> Self {
        Self::with_config(db, account_id, VitalsConfig::default())
    }

    pub fn with_config(db: Db, account_id: String, config: VitalsConfig) -> Self {
        Self {
            db,
            account_id,
            config,
            state: Arc::new(RwLock::new(RecorderState::Idle)),
            latest: Arc::new(RwLock::new(None)),
        }
    }

    pub fn state(&self) -> RecorderState {
        // 락 오염은 복구 가능 - 값은 Copy라 마지막 쓰기를 그대로 읽는다
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: RecorderState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = next;
    }

    /// 마지막으로 생성된(화면에 보이는) 값
    pub fn latest(&self) -> Option<VitalsReading> {
        self.latest.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// 뷰 마운트: 시뮬레이션 표시 시작
    pub fn start_generating(&self) {
        if self.state() == RecorderState::Idle {
            self.set_state(RecorderState::Generating);
        }
    }

    /// 사용자 시작 동작: 저장 시작
    pub fn start_recording(&self) {
        log::info!("[vitals] recording started for {}", self.account_id);
        self.set_state(RecorderState::Recording);
    }

    /// 사용자 중지 동작: 표시로 복귀
    pub fn stop_recording(&self) {
        log::info!("[vitals] recording stopped for {}", self.account_id);
        self.set_state(RecorderState::Generating);
    }

    /// 뷰 언마운트: 틱 루프 종료 신호
    pub fn stop(&self) {
        self.set_state(RecorderState::Idle);
    }

    /// 틱 한 번: 샘플 생성 후 상태에 따라 저장 정책 적용
    fn tick_once(&self, cx: &mut TickContext) -> Option<VitalsReading> {
        let state = self.state();
        if state == RecorderState::Idle {
            return None;
        }

        let reading = simulate_reading(&mut cx.rng, cx.tick);
        cx.tick += 1;
        *self.latest.write().unwrap_or_else(|e| e.into_inner()) = Some(reading.clone());

        if state == RecorderState::Recording {
            self.upload(&reading, cx);
        }
        Some(reading)
    }

    /// 저장 정책 적용. 개별 쓰기 실패는 틱을 멈추지 않는다.
    fn upload(&self, reading: &VitalsReading, cx: &mut TickContext) {
        let now = Utc::now();

        let account = match self.db.get_account(&self.account_id) {
            Ok(Some(a)) => a,
            Ok(None) => {
                log::warn!("[vitals] account {} missing, dropping tick", self.account_id);
                return;
            }
            Err(e) => {
                log::warn!("[vitals] account lookup failed: {}", e);
                return;
            }
        };

        // 라이브 미러: 공유 중 + 기기 미연결일 때만. 기기가 연결되어
        // 있으면 이 필드는 기기 기록 경로가 소유한다.
        let sharing_live = account.sharing.live && account.assigned_doctor_id.is_some();
        if sharing_live && account.connected_device_id.is_none() {
            let snapshot = VitalsSnapshot::new(reading.clone(), now);
            if let Err(e) = self.db.update_current_vitals(&self.account_id, &snapshot) {
                log::warn!("[vitals] live mirror update failed: {}", e);
            }
        }

        // 이력 append (시뮬레이션 경로는 간격 제한)
        let due = match cx.last_history_save {
            None => true,
            Some(last) => (now - last).to_std().unwrap_or_default() >= self.config.history_min_interval,
        };
        if due {
            match self.db.append_sample(&self.account_id, reading, RecordKind::AutoLog) {
                Ok(_) => cx.last_history_save = Some(now),
                Err(e) => log::warn!("[vitals] history append failed: {}", e),
            }
        }
    }

    /// 수동 스냅샷: 화면의 현재 값을 manual_snapshot으로 1건 저장.
    /// 녹화 상태와 무관하게 동작하지만, 아직 표시된 값이 없으면
    /// 지어내지 않고 거부한다.
    pub fn save_snapshot(&self) -> AppResult<VitalsSample> {
        let reading = self.latest().ok_or_else(|| {
            crate::error::AppError::Custom("No vitals to snapshot yet".to_string())
        })?;
        let sample = self
            .db
            .append_sample(&self.account_id, &reading, RecordKind::ManualSnapshot)?;
        log::info!("[vitals] snapshot saved: {}", sample.id);
        Ok(sample)
    }

    /// 틱 루프. 상태가 Idle로 돌아오면 종료한다.
    pub async fn run(&self) {
        let mut ticker = interval(self.config.tick_interval);
        let mut cx = TickContext::new();
        log::info!("[vitals] tick loop started for {}", self.account_id);

        loop {
            ticker.tick().await;
            if self.state() == RecorderState::Idle {
                log::info!("[vitals] tick loop stopped for {}", self.account_id);
                break;
            }
            self.tick_once(&mut cx);
        }
    }
}

/// 기기 스트림 수신 경로: 제한 없이 이력에 적고, 공유가 켜져 있으면
/// 미러도 갱신한다. 기기가 연결된 동안 미러는 이 경로가 독점한다.
pub fn ingest_device_reading(db: &Db, account_id: &str, reading: &VitalsReading) -> AppResult<VitalsSample> {
    let sample = db.append_sample(account_id, reading, RecordKind::AutoLog)?;
    let account = db
        .get_account(account_id)?
        .ok_or_else(|| crate::error::AppError::NotFound(format!("account {}", account_id)))?;
    if account.sharing.live {
        db.update_current_vitals(account_id, &VitalsSnapshot::new(reading.clone(), Utc::now()))?;
    }
    Ok(sample)
}
