use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::path::PathBuf;
use tokio::task::spawn_blocking;
use tracing::{debug, warn};

use crate::config::Config;
use crate::cryptography::primitives::MasterKey;
use crate::domain::gate::{allow_autofill, evaluate};
use crate::session_management::session::{SessionError, SessionManager};
use crate::vault::header::VaultPaths;
use crate::vault::service::{ServiceError, VaultService};

use super::protocol::{
    CredentialItem, GetCredentialsParams, HealthData, ItemsData, PhishingCheckParams, Response,
    SaveCredentialParams, SaveData, UnlockData, UnlockParams, WireCode,
};

/// Request state for one extension connection: the single session plus the
/// vault service bound at unlock.
pub struct Host {
    session: SessionManager,
    service: Option<VaultService>,
    default_dir: PathBuf,
}

impl Host {
    pub fn new(config: &Config) -> Self {
        Self {
            session: SessionManager::with_ttl(config.session_ttl),
            service: None,
            default_dir: config.vault_dir.clone(),
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Clear the session and drop the unlocked service. Run on signal and
    /// on connection teardown.
    pub fn shutdown(&mut self) {
        self.session.clear();
        if let Some(mut svc) = self.service.take() {
            svc.lock();
        }
    }

    /// Handle one raw frame body, producing exactly one response.
    pub async fn handle(&mut self, raw: &[u8]) -> Response {
        let value: Value = match serde_json::from_slice(raw) {
            Ok(v) => v,
            Err(_) => return Response::err(WireCode::BadJson, "request is not valid JSON"),
        };
        let Some(kind) = value.get("type").and_then(Value::as_str).map(String::from) else {
            return Response::err(WireCode::BadRequest, "missing request type");
        };
        debug!(kind = %kind, "request");

        match kind.as_str() {
            "health" => Response::ok(json!(HealthData {
                version: env!("CARGO_PKG_VERSION"),
            })),
            "unlock" => self.handle_unlock(value).await,
            "lock" => self.handle_lock(&value),
            "getCredentials" => self.handle_get(&value),
            "saveCredential" => self.handle_save(&value),
            "phishingCheck" => handle_phishing_check(&value),
            other => {
                warn!(kind = other, "unsupported request type");
                Response::err(WireCode::Unsupported, "unsupported request type")
            }
        }
    }

    async fn handle_unlock(&mut self, value: Value) -> Response {
        let params: UnlockParams = match parse_params(&value) {
            Ok(p) => p,
            Err(resp) => return resp,
        };
        let dir = params
            .dir
            .map(PathBuf::from)
            .unwrap_or_else(|| self.default_dir.clone());

        // Drop any previous session before a fresh unlock.
        self.session.clear();
        if let Some(mut old) = self.service.take() {
            old.lock();
        }

        let mut service = match VaultService::open(VaultPaths::new(dir.clone())) {
            Ok(s) => s,
            Err(e) => return service_error_response(e),
        };

        // Argon2 runs for hundreds of ms; keep it off the reactor and off
        // the session mutex.
        let master = params.master_password;
        let joined = spawn_blocking(move || {
            let result = service.unlock(master.expose_secret());
            (service, result)
        })
        .await;
        let (service, unlocked) = match joined {
            Ok(pair) => pair,
            Err(_) => return Response::err(WireCode::InvalidState, "unlock task failed"),
        };
        let mek = match unlocked {
            Ok(mek) => mek,
            Err(e) => return service_error_response(e),
        };

        match self.session.establish(dir, mek) {
            Ok((token, ttl_seconds)) => {
                self.service = Some(service);
                Response::ok(json!(UnlockData { token, ttl_seconds }))
            }
            Err(_) => Response::err(WireCode::InvalidState, "session could not be established"),
        }
    }

    fn handle_lock(&mut self, value: &Value) -> Response {
        if let Err(resp) = self.authenticate(value) {
            return resp;
        }
        self.shutdown();
        Response::ok_empty()
    }

    fn handle_get(&mut self, value: &Value) -> Response {
        let (mek, _dir) = match self.authenticate(value) {
            Ok(granted) => granted,
            Err(resp) => return resp,
        };
        let params: GetCredentialsParams = match parse_params(value) {
            Ok(p) => p,
            Err(resp) => return resp,
        };
        // Defense in depth: the client ran this gate too, but its verdict
        // is never trusted.
        if !allow_autofill(
            &params.domain_etld1,
            &params.exact_host,
            params.require_exact_host,
            Some(&params.exact_host),
        ) {
            return Response::err(WireCode::EtldMismatch, "domain gate rejected the read");
        }
        let Some(service) = self.service.as_ref() else {
            return Response::err(WireCode::Unauthorized, "vault is not unlocked");
        };

        let fetched = match &params.username {
            Some(user) => match service.get_with(&mek, &params.domain_etld1, user) {
                Ok(c) => Some(c),
                Err(ServiceError::NotFound) => None,
                Err(e) => return service_error_response(e),
            },
            None => match service.get_first_with(&mek, &params.domain_etld1) {
                Ok(c) => c,
                Err(e) => return service_error_response(e),
            },
        };

        match fetched {
            Some(credential) => Response::ok(
                serde_json::to_value(ItemsData {
                    items: vec![CredentialItem {
                        username: credential.username,
                        password: credential.secret,
                    }],
                })
                .unwrap_or_else(|_| json!({ "items": [] })),
            ),
            None => Response::err(WireCode::NoCredentials, "no credentials for this site"),
        }
    }

    fn handle_save(&mut self, value: &Value) -> Response {
        let (mek, _dir) = match self.authenticate(value) {
            Ok(granted) => granted,
            Err(resp) => return resp,
        };
        let params: SaveCredentialParams = match parse_params(value) {
            Ok(p) => p,
            Err(resp) => return resp,
        };
        if !allow_autofill(
            &params.domain_etld1,
            &params.exact_host,
            params.require_exact_host,
            Some(&params.exact_host),
        ) {
            return Response::err(WireCode::EtldMismatch, "domain gate rejected the save");
        }
        let Some(service) = self.service.as_ref() else {
            return Response::err(WireCode::Unauthorized, "vault is not unlocked");
        };

        match service.save_with(
            &mek,
            &params.domain_etld1,
            &params.username,
            params.password.expose_secret(),
        ) {
            Ok((id, _created)) => Response::ok(json!(SaveData { saved: true, id })),
            Err(e) => service_error_response(e),
        }
    }

    /// Validate token+nonce for a privileged request. Failures that clear
    /// the session also drop the unlocked service so no MEK copy outlives
    /// it.
    fn authenticate(&mut self, value: &Value) -> Result<(MasterKey, PathBuf), Response> {
        let token = value.get("token").and_then(Value::as_str).unwrap_or("");
        let nonce = value.get("nonce").and_then(Value::as_str).unwrap_or("");
        match self.session.validate(token, nonce) {
            Ok(granted) => Ok(granted),
            Err(e) => {
                let code = match e {
                    SessionError::Expired => WireCode::SessionExpired,
                    SessionError::NonceReplay => WireCode::NonceReplay,
                    SessionError::InvalidState => WireCode::InvalidState,
                    SessionError::Unauthorized | SessionError::Rng => WireCode::Unauthorized,
                };
                if matches!(e, SessionError::Expired | SessionError::InvalidState) {
                    if let Some(mut svc) = self.service.take() {
                        svc.lock();
                    }
                }
                Err(Response::err(code, e.to_string()))
            }
        }
    }
}

fn handle_phishing_check(value: &Value) -> Response {
    let params: PhishingCheckParams = match parse_params(value) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let verdict = evaluate(
        &params.url,
        params.saved_etld1.as_deref(),
        params.exact_host.as_deref(),
        true,
    );
    let data = serde_json::to_value(&verdict).unwrap_or_else(|_| json!({ "ok": false }));
    if verdict.ok {
        Response::ok(data)
    } else {
        Response::err_with_data(WireCode::PhishingBlock, "page failed the phishing gate", data)
    }
}

fn parse_params<T: DeserializeOwned>(value: &Value) -> Result<T, Response> {
    serde_json::from_value(value.clone())
        .map_err(|_| Response::err(WireCode::BadRequest, "malformed request parameters"))
}

/// Map service failures onto the closed wire-code set. Crypto failures are
/// deliberately generic: the wire never distinguishes a wrong password from
/// corrupt material.
fn service_error_response(e: ServiceError) -> Response {
    let code = match &e {
        ServiceError::UnlockFailed | ServiceError::Bio => WireCode::UnlockFailed,
        ServiceError::Locked => WireCode::Unauthorized,
        ServiceError::NotFound => WireCode::NoCredentials,
        ServiceError::Crypto(_) => WireCode::EncryptFailed,
        ServiceError::Header(crate::vault::header::HeaderError::DecryptFail) => {
            WireCode::UnlockFailed
        }
        ServiceError::Conflict
        | ServiceError::Store(_)
        | ServiceError::Header(_)
        | ServiceError::Other(_) => WireCode::DbError,
        ServiceError::Policy(_) | ServiceError::AlreadyInitialized => WireCode::BadRequest,
    };
    // Keep wire messages generic; detail stays in the logs.
    warn!(error = %e, code = code.as_str(), "request failed");
    Response::err(code, "operation failed")
}
