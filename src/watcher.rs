//! 라이브 문서 워처
//!
//! 컬렉션에 대한 푸시 구독을 수립합니다. 구독 직후 현재 결과 집합을
//! 한 번 전달하고, 이후 해당 컬렉션에 변경이 생길 때마다 전체 결과를
//! 재조회해 다시 전달합니다. 연속 변경의 중복 제거는 하지 않습니다
//! (마지막 값이 이긴다).
//!
//! 필터 파라미터(활성 계정 등)가 바뀌면 기존 워처를 cancel하고 새로
//! 만들어야 합니다. 워처를 놓아두면 해제된 뷰에 계속 이벤트가 쏟아지는
//! 것이 이 시스템의 대표적인 버그 경로입니다.

use crate::db::{Collection, Db};
use crate::error::AppResult;
use crate::models::{Account, Appointment, Message};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// 워처가 전달하는 이벤트
#[derive(Debug, Clone)]
pub enum WatchEvent<T> {
    /// 전체 결과 집합 (초기 1회 + 변경 시마다)
    Update(Vec<T>),
    /// 조회 실패. 뷰는 빈/오류 상태로 내려가야 하며 crash하지 않는다.
    Error(String),
}

/// 취소 가능한 구독 핸들
pub struct Watcher<T> {
    rx: mpsc::UnboundedReceiver<WatchEvent<T>>,
    task: JoinHandle<()>,
}

impl<T> Watcher<T> {
    /// 다음 이벤트 수신. 취소된 뒤에는 None.
    pub async fn next(&mut self) -> Option<WatchEvent<T>> {
        self.rx.recv().await
    }

    /// 비수신 대기 확인 (테스트용)
    pub fn try_next(&mut self) -> Option<WatchEvent<T>> {
        self.rx.try_recv().ok()
    }

    /// 구독 해제. 이후 핸들러 호출이 없고 서버측 자원이 풀린다.
    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl<T> Drop for Watcher<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// 컬렉션 하나에 대해 워처를 수립한다.
///
/// query는 등호 조건으로 필터링된 전체 결과를 돌려주는 클로저.
pub fn watch<T, F>(db: &Db, collection: Collection, query: F) -> Watcher<T>
where
    T: Send + 'static,
    F: Fn(&Db) -> AppResult<Vec<T>> + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let db = db.clone();
    let mut changes = db.subscribe();

    let task = tokio::spawn(async move {
        // 최초 1회 전달
        if !deliver(&db, &query, &tx) {
            return;
        }

        loop {
            match changes.recv().await {
                Ok(c) if c == collection => {
                    if !deliver(&db, &query, &tx) {
                        return;
                    }
                }
                Ok(_) => {} // 다른 컬렉션의 변경은 무시
                Err(RecvError::Lagged(skipped)) => {
                    // 이벤트를 놓쳤으면 재조회로 따라잡는다
                    log::warn!("[watcher] change bus lagged, skipped {} events", skipped);
                    if !deliver(&db, &query, &tx) {
                        return;
                    }
                }
                Err(RecvError::Closed) => return,
            }
        }
    });

    Watcher { rx, task }
}

/// 재조회 후 전달. 수신측이 사라졌으면 false.
fn deliver<T, F>(db: &Db, query: &F, tx: &mpsc::UnboundedSender<WatchEvent<T>>) -> bool
where
    F: Fn(&Db) -> AppResult<Vec<T>>,
{
    let event = match query(db) {
        Ok(items) => WatchEvent::Update(items),
        Err(e) => {
            log::warn!("[watcher] query failed: {}", e);
            WatchEvent::Error(e.to_string())
        }
    };
    tx.send(event).is_ok()
}

// ============ 뷰별 워처 ============

/// 계정 문서 하나를 관찰 (대시보드 셸이 자기 계정을 구독)
pub fn watch_account(db: &Db, account_id: &str) -> Watcher<Account> {
    let id = account_id.to_string();
    watch(db, Collection::Users, move |db| {
        Ok(db.get_account(&id)?.into_iter().collect())
    })
}

/// 담당 환자 명단 관찰 (의사 대시보드)
pub fn watch_assigned_patients(db: &Db, doctor_id: &str) -> Watcher<Account> {
    let id = doctor_id.to_string();
    watch(db, Collection::Users, move |db| db.list_assigned_patients(&id))
}

/// 의사의 예약 목록 관찰
pub fn watch_doctor_appointments(db: &Db, doctor_id: &str) -> Watcher<Appointment> {
    let id = doctor_id.to_string();
    watch(db, Collection::Appointments, move |db| {
        db.list_appointments_for_doctor(&id)
    })
}

/// 환자의 예약 목록 관찰
pub fn watch_patient_appointments(db: &Db, patient_id: &str) -> Watcher<Appointment> {
    let id = patient_id.to_string();
    watch(db, Collection::Appointments, move |db| {
        db.list_appointments_for_patient(&id)
    })
}

/// 두 참여자의 대화 관찰. 전달 전에 타임스탬프로 재정렬한다.
pub fn watch_chat(db: &Db, a: &str, b: &str) -> Watcher<Message> {
    let chat_id = crate::chat::chat_id(a, b);
    watch(db, Collection::Messages, move |db| {
        let mut messages = db.messages_for_chat(&chat_id)?;
        // 미확정 타임스탬프는 비교마다 값이 달라지므로 키를 캐시한다
        messages.sort_by_cached_key(|m| m.sort_key());
        Ok(messages)
    })
}
