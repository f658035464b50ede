//! 인증 모듈
//!
//! 계정 생성/로그인/로그아웃. 비밀번호는 bcrypt 해시로 저장합니다.
//! 인증 결과는 Session 값으로 돌려주며, 전역 상태 대신 이 값을 각
//! 연산에 명시적으로 넘깁니다.

use crate::db::Db;
use crate::error::{AppError, AppResult};
use crate::models::{Account, Role, Session};

/// 회원가입 입력
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SignupInput {
    pub role: Role,
    pub username: String,
    pub password: String,
    pub full_name: String,
    pub registration_id: Option<String>, // 의사 필수
    pub age: Option<i32>,                // 환자 필수
    pub gender: Option<String>,
}

const MIN_PASSWORD_LEN: usize = 6;

/// 회원가입. 역할별 필수 항목을 검증하고 계정을 만든다.
pub fn signup(db: &Db, input: SignupInput) -> AppResult<Session> {
    if input.full_name.trim().is_empty() {
        return Err(AppError::Auth("Full name is required".to_string()));
    }
    if input.username.trim().is_empty() {
        return Err(AppError::Auth("Username is required".to_string()));
    }
    if input.password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::Auth(
            "Password should be at least 6 characters".to_string(),
        ));
    }

    let account = match input.role {
        Role::Doctor => {
            let registration_id = input
                .registration_id
                .filter(|r| !r.trim().is_empty())
                .ok_or_else(|| {
                    AppError::Auth("Doctors must provide a registration ID".to_string())
                })?;
            Account::new_doctor(input.username.clone(), input.full_name, registration_id)
        }
        Role::Patient => {
            let age = input
                .age
                .ok_or_else(|| AppError::Auth("Patients must provide an age".to_string()))?;
            let gender = input.gender.unwrap_or_else(|| "Other".to_string());
            Account::new_patient(input.username.clone(), input.full_name, age, gender)
        }
    };

    if db.get_account_for_auth(&input.username)?.is_some() {
        return Err(AppError::Auth(
            "This username is already taken".to_string(),
        ));
    }

    let hash = bcrypt::hash(&input.password, bcrypt::DEFAULT_COST)
        .map_err(|e| AppError::Custom(format!("Password hash error: {}", e)))?;
    db.insert_account(&account, &hash)?;

    log::info!("[auth] account created: {} ({})", account.username, account.role.as_str());
    Ok(Session {
        account_id: account.id,
        role: account.role,
    })
}

/// 로그인. 환자는 접속 표시(is_online)를 켠다.
pub fn login(db: &Db, username: &str, password: &str) -> AppResult<Session> {
    let (account, hash) = db
        .get_account_for_auth(username)?
        .ok_or(AppError::InvalidCredentials)?;

    let valid = bcrypt::verify(password, &hash)
        .map_err(|e| AppError::Custom(format!("Password verify error: {}", e)))?;
    if !valid {
        log::warn!("[auth] failed login attempt for {}", username);
        return Err(AppError::InvalidCredentials);
    }

    if account.role == Role::Patient {
        db.set_online(&account.id, true)?;
    }

    log::info!("[auth] user logged in: {}", username);
    Ok(Session {
        account_id: account.id,
        role: account.role,
    })
}

/// 로그아웃. 환자의 접속 표시를 끈다.
pub fn logout(db: &Db, session: &Session) -> AppResult<()> {
    if session.role == Role::Patient {
        db.set_online(&session.account_id, false)?;
    }
    log::info!("[auth] user logged out: {}", session.account_id);
    Ok(())
}
