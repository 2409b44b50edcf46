//! Bearer 토큰 검증 및 방 접근 제어

use crate::error::AuthError;
use crate::room::ParticipantMeta;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha1 = Hmac<Sha1>;

/// 토큰에서 확인된 사용자 정보
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl Identity {
    pub fn meta(&self) -> ParticipantMeta {
        ParticipantMeta {
            display_name: self.display_name.clone(),
            email: self.email.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    exp: u64,
    nonce: String,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// HMAC-SHA1 서명 토큰 발급/검증기
#[derive(Clone)]
pub struct TokenAuthority {
    secret: String,
    ttl: u64,
}

impl TokenAuthority {
    /// secret이 비어있으면 None
    pub fn new(secret: &str, ttl: u64) -> Option<Self> {
        if secret.is_empty() {
            return None;
        }
        Some(Self {
            secret: secret.to_string(),
            ttl,
        })
    }

    fn sign(&self, payload: &str) -> Result<String, AuthError> {
        let mut mac = HmacSha1::new_from_slice(self.secret.as_bytes())
            .map_err(|_| AuthError::NotConfigured)?;
        mac.update(payload.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    /// 토큰 발급 (`payload.signature`)
    pub fn issue(&self, identity: &Identity) -> Result<String, AuthError> {
        let random: u64 = rand::random();
        let claims = Claims {
            sub: identity.id.clone(),
            email: identity.email.clone(),
            name: identity.display_name.clone(),
            exp: now_secs() + self.ttl,
            nonce: format!("{:x}", random),
        };
        let json = serde_json::to_vec(&claims).map_err(|_| AuthError::AuthenticationFailed)?;
        let payload = BASE64.encode(json);
        let signature = self.sign(&payload)?;
        Ok(format!("{}.{}", payload, signature))
    }

    /// 토큰 검증
    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        self.verify_at(token, now_secs())
    }

    fn verify_at(&self, token: &str, now: u64) -> Result<Identity, AuthError> {
        let (payload, signature) = token
            .split_once('.')
            .ok_or(AuthError::AuthenticationFailed)?;

        let signature = BASE64
            .decode(signature)
            .map_err(|_| AuthError::AuthenticationFailed)?;
        let mut mac = HmacSha1::new_from_slice(self.secret.as_bytes())
            .map_err(|_| AuthError::NotConfigured)?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| AuthError::AuthenticationFailed)?;

        let json = BASE64
            .decode(payload)
            .map_err(|_| AuthError::AuthenticationFailed)?;
        let claims: Claims =
            serde_json::from_slice(&json).map_err(|_| AuthError::AuthenticationFailed)?;

        if claims.exp <= now || claims.sub.is_empty() {
            return Err(AuthError::AuthenticationFailed);
        }

        Ok(Identity {
            id: claims.sub,
            email: claims.email,
            display_name: claims.name,
        })
    }
}

/// 방 참여 권한
#[derive(Debug, Clone)]
pub enum AccessPolicy {
    /// 인증된 사용자는 모든 방에 참여 가능
    Open,
    /// resource_id -> 허용 사용자 (None이면 전체 허용)
    Grants(HashMap<String, Option<HashSet<String>>>),
}

impl AccessPolicy {
    /// `resource=user|user;resource=*` 형식 파싱
    pub fn parse(grants: Option<&str>) -> Self {
        let Some(grants) = grants else {
            return AccessPolicy::Open;
        };

        let mut table = HashMap::new();
        for entry in grants.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let Some((resource, users)) = entry.split_once('=') else {
                tracing::warn!(entry = %entry, "Ignoring malformed room grant");
                continue;
            };
            let users = users.trim();
            let allowed = if users == "*" {
                None
            } else {
                Some(
                    users
                        .split('|')
                        .map(|u| u.trim().to_string())
                        .filter(|u| !u.is_empty())
                        .collect(),
                )
            };
            table.insert(resource.trim().to_string(), allowed);
        }
        AccessPolicy::Grants(table)
    }

    pub fn may_join(&self, resource_id: &str, participant_id: &str) -> bool {
        match self {
            AccessPolicy::Open => true,
            AccessPolicy::Grants(grants) => match grants.get(resource_id) {
                Some(None) => true,
                Some(Some(users)) => users.contains(participant_id),
                None => false,
            },
        }
    }
}

/// `Authorization: Bearer` 헤더 또는 `?token=` 쿼리에서 토큰 추출
pub fn bearer_token<'a>(
    headers: &'a axum::http::HeaderMap,
    query_token: Option<&'a str>,
) -> Option<&'a str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .or(query_token)
        .filter(|t| !t.is_empty())
}
