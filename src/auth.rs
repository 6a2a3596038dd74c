use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};

use crate::limits::MAX_ID_LEN;

/// Shared cleartext password for every login. The login name is the acting user id,
/// so it has to be a usable id before a password is even asked for.
#[derive(Debug)]
pub struct SalonesAuthSource {
    password: String,
}

impl SalonesAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

fn check_login_name(user: Option<&str>) -> Result<&str, String> {
    match user {
        None | Some("") => Err("a user name is required".into()),
        Some(u) if u.len() > MAX_ID_LEN => {
            Err(format!("user name exceeds {MAX_ID_LEN} bytes"))
        }
        Some(u) => Ok(u),
    }
}

#[async_trait]
impl AuthSource for SalonesAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let user = check_login_name(login.user()).map_err(|msg| {
            tracing::warn!("rejected login: {msg}");
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "FATAL".to_owned(),
                "28000".to_owned(),
                msg,
            )))
        })?;
        tracing::debug!(user, "password login");
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
