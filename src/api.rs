use std::collections::HashMap;
use std::fmt::Display;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Image URL sent with a post when the author attaches none.
pub const PLACEHOLDER_IMAGE: &str = "/placeholder.svg?height=100&width=100";

pub struct SocmediaClient {
    base: String,
    http: Client,
}

#[derive(Debug)]
pub enum ApiError {
    Http(reqwest::Error),
    Scheme(serde_json::Error),
    InvalidCredentials,
    DuplicateAccount,
    Unauthorized,
    Validation(&'static str),
    Server { status: u16, message: String },
}

impl Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http(e) => e.fmt(f),
            Self::Scheme(e) => e.fmt(f),
            Self::InvalidCredentials => write!(f, "incorrect email or password"),
            Self::DuplicateAccount => write!(f, "email is already in use"),
            Self::Unauthorized => write!(f, "not signed in, or the session has expired"),
            Self::Validation(msg) => f.write_str(msg),
            Self::Server { status, message } => {
                write!(f, "API returned status {status}: {message}")
            }
        }
    }
}
impl std::error::Error for ApiError {}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Login and register respond with the user fields plus a bearer token.
#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    #[serde(flatten)]
    pub user: User,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub username: String,
    pub content: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub likes: u32,
    #[serde(default)]
    pub comments: Vec<Comment>,
    /// Emoji symbol to the ids of the users reacting with it. Set semantics:
    /// a user appears at most once per emoji, and in at most one emoji's set.
    #[serde(default)]
    pub reactions: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub username: String,
    pub content: String,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<DateTime<Utc>>,
}

pub struct CreatePost<'a> {
    client: &'a SocmediaClient,
    token: &'a str,
    content: &'a str,
    image: Option<String>,
}

impl SocmediaClient {
    pub fn new(base: String) -> Self {
        Self {
            base,
            http: Client::new(),
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        let res = self
            .http
            .post(format!("{}/api/auth/login", self.base))
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(ApiError::Http)?;

        if res.status().is_client_error() {
            return Err(ApiError::InvalidCredentials);
        }
        expect_json(res).await
    }

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, ApiError> {
        let res = self
            .http
            .post(format!("{}/api/auth/register", self.base))
            .json(&serde_json::json!({
                "username": username,
                "email": email,
                "password": password,
            }))
            .send()
            .await
            .map_err(ApiError::Http)?;

        if res.status().is_client_error() {
            return Err(ApiError::DuplicateAccount);
        }
        expect_json(res).await
    }

    pub async fn profile(&self, token: &str) -> Result<User, ApiError> {
        let res = self
            .http
            .get(format!("{}/api/auth/profile", self.base))
            .bearer_auth(token)
            .send()
            .await
            .map_err(ApiError::Http)?;

        expect_json(res).await
    }

    pub async fn posts(&self, token: &str) -> Result<Vec<Post>, ApiError> {
        let res = self
            .http
            .get(format!("{}/api/auth/posts", self.base))
            .bearer_auth(token)
            .send()
            .await
            .map_err(ApiError::Http)?;

        expect_json(res).await
    }

    pub fn create_post<'a>(&'a self, token: &'a str, content: &'a str) -> CreatePost<'a> {
        CreatePost {
            client: self,
            token,
            content,
            image: None,
        }
    }

    pub async fn add_comment(
        &self,
        token: &str,
        post_id: &str,
        content: &str,
        username: &str,
    ) -> Result<Comment, ApiError> {
        let res = self
            .http
            .post(format!("{}/api/auth/comments/{post_id}", self.base))
            .bearer_auth(token)
            .json(&serde_json::json!({ "content": content, "username": username }))
            .send()
            .await
            .map_err(ApiError::Http)?;

        expect_json(res).await
    }

    /// The API takes the full recomputed reaction map, not a delta.
    pub async fn set_reactions(
        &self,
        token: &str,
        post_id: &str,
        reactions: &HashMap<String, Vec<String>>,
    ) -> Result<Post, ApiError> {
        let res = self
            .http
            .post(format!("{}/api/auth/reactions/{post_id}", self.base))
            .bearer_auth(token)
            .json(&serde_json::json!({ "reactions": reactions }))
            .send()
            .await
            .map_err(ApiError::Http)?;

        expect_json(res).await
    }
}

impl<'a> CreatePost<'a> {
    pub fn image(mut self, image: String) -> Self {
        self.image = Some(image);
        self
    }

    pub async fn send(&self) -> Result<Post, ApiError> {
        let res = self
            .client
            .http
            .post(format!("{}/api/auth/posts", self.client.base))
            .bearer_auth(self.token)
            .json(&serde_json::json!({
                "content": self.content,
                "image": self.image.as_deref().unwrap_or(PLACEHOLDER_IMAGE),
                "createdAt": Utc::now(),
                "comments": [],
                "reactions": {},
            }))
            .send()
            .await
            .map_err(ApiError::Http)?;

        expect_json(res).await
    }
}

async fn expect_json<T: DeserializeOwned>(res: reqwest::Response) -> Result<T, ApiError> {
    match res.status() {
        s if s.is_success() => {
            let body = res.text().await.map_err(ApiError::Http)?;
            serde_json::from_str(&body).map_err(ApiError::Scheme)
        }
        StatusCode::UNAUTHORIZED => Err(ApiError::Unauthorized),
        s => {
            let message = res.text().await.unwrap_or_default();
            Err(ApiError::Server {
                status: s.as_u16(),
                message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serve_once(response: String) -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut conn, _)) = listener.accept() {
                let mut buf = [0u8; 4096];
                let _ = std::io::Read::read(&mut conn, &mut buf);
                let _ = std::io::Write::write_all(&mut conn, response.as_bytes());
            }
        });
        format!("http://{addr}")
    }

    fn json_response(body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
        )
    }

    #[test]
    fn decodes_auth_response() {
        let body = r#"{"id":"u1","username":"james","email":"j@example.com","avatar":"/a.jpg","token":"tok"}"#;
        let auth: AuthResponse = serde_json::from_str(body).unwrap();
        assert_eq!(auth.user.username, "james");
        assert_eq!(auth.user.avatar.as_deref(), Some("/a.jpg"));
        assert_eq!(auth.token, "tok");
    }

    #[test]
    fn decodes_feed_payload() {
        let body = r#"[{
            "id": "p1",
            "username": "james",
            "content": "beach day",
            "image": null,
            "createdAt": "2024-10-05T12:00:00Z",
            "likes": 15,
            "comments": [{"id": "c1", "username": "ann", "content": "nice"}],
            "reactions": {"👍": ["u2", "u3"]}
        }]"#;
        let posts: Vec<Post> = serde_json::from_str(body).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].likes, 15);
        assert_eq!(posts[0].comments[0].username, "ann");
        assert_eq!(posts[0].reactions["👍"], vec!["u2", "u3"]);
        assert!(posts[0].comments[0].created_at.is_none());
    }

    #[test]
    fn tolerates_minimal_post_payload() {
        let body = r#"[{"id": "p1", "username": "james", "content": "hi"}]"#;
        let posts: Vec<Post> = serde_json::from_str(body).unwrap();
        assert!(posts[0].comments.is_empty());
        assert!(posts[0].reactions.is_empty());
        assert_eq!(posts[0].likes, 0);
    }

    #[tokio::test]
    async fn login_maps_client_errors_to_invalid_credentials() {
        let base = serve_once(
            "HTTP/1.1 401 Unauthorized\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                .to_owned(),
        );
        let api = SocmediaClient::new(base);
        match api.login("j@example.com", "wrong").await {
            Err(ApiError::InvalidCredentials) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn posts_decode_over_the_wire() {
        let base = serve_once(json_response(
            r#"[{"id": "p1", "username": "james", "content": "hi"}]"#,
        ));
        let api = SocmediaClient::new(base);
        let posts = api.posts("tok").await.unwrap();
        assert_eq!(posts[0].id, "p1");
    }
}
