use log::debug;

use crate::api::{ApiError, SocmediaClient, User};

/// The authenticated user and their bearer token. Built on login/register,
/// dropped on logout; passed explicitly to whatever needs it.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
    pub token: String,
}

impl Session {
    pub async fn login(
        api: &SocmediaClient,
        email: &str,
        password: &str,
    ) -> Result<Self, ApiError> {
        let auth = api.login(email, password).await?;
        Ok(Self {
            user: auth.user,
            token: auth.token,
        })
    }

    pub async fn register(
        api: &SocmediaClient,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<Self, ApiError> {
        let auth = api.register(username, email, password).await?;
        Ok(Self {
            user: auth.user,
            token: auth.token,
        })
    }

    /// Validate a cached token against the profile endpoint. A rejected
    /// token yields `None` so the caller can drop it from the cache.
    pub async fn restore(api: &SocmediaClient, token: &str) -> Result<Option<Self>, ApiError> {
        match api.profile(token).await {
            Ok(user) => Ok(Some(Self {
                user,
                token: token.to_owned(),
            })),
            Err(ApiError::Unauthorized) => {
                debug!("cached token rejected by the API, discarding it");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stale_token_is_discarded_on_restore() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut conn, _)) = listener.accept() {
                let mut buf = [0u8; 4096];
                let _ = std::io::Read::read(&mut conn, &mut buf);
                let _ = std::io::Write::write_all(
                    &mut conn,
                    b"HTTP/1.1 401 Unauthorized\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                );
            }
        });

        let api = SocmediaClient::new(format!("http://{addr}"));
        let restored = Session::restore(&api, "stale").await.unwrap();
        assert!(restored.is_none());
    }
}
