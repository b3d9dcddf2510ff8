use chrono::{serde::ts_seconds, DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, TokenData, Validation};
use rocket::{
    http::Status,
    outcome::{try_outcome, IntoOutcome},
    request::{FromRequest, Outcome},
    Request, State,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Error;
use crate::model::{api::id::ApiId, mongodb::Id};

pub const AUTH_TOKEN_COOKIE: &str = "auth_token";

const BEARER_PREFIX: &str = "Bearer ";

/// Proof that the request was made by a particular user.
///
/// Tokens are issued by the account service; we only verify them. A token
/// is accepted from the `auth_token` cookie or an `Authorization: Bearer`
/// header, in that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthToken {
    pub user: Id,
}

impl AuthToken {
    pub fn new(user: Id) -> Self {
        Self { user }
    }

    /// Sign this token, valid for `ttl`.
    pub fn encode(self, secret: &[u8], ttl: Duration) -> String {
        let claims = Claims {
            subject: self.user.into(),
            expire_at: Utc::now() + ttl,
        };
        jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret),
        )
        .expect("JWT encoding is infallible with default settings")
    }

    /// Verify a signed token.
    pub fn decode(token: &str, secret: &[u8]) -> Result<Self, Error> {
        let token = jsonwebtoken::decode(
            token,
            &DecodingKey::from_secret(secret),
            &Validation::default(),
        )
        .map(|data: TokenData<Claims>| Self::new(data.claims.subject.into()))?;
        Ok(token)
    }
}

/// Token claims: the user plus an expiry datetime.
#[derive(Serialize, Deserialize)]
struct Claims {
    #[serde(rename = "sub")]
    subject: ApiId,
    #[serde(rename = "exp", with = "ts_seconds")]
    expire_at: DateTime<Utc>,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthToken {
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        // Unwrap is safe as `Config` is always managed.
        let config = req.guard::<&State<Config>>().await.unwrap();

        let raw = req
            .cookies()
            .get(AUTH_TOKEN_COOKIE)
            .map(|cookie| cookie.value().to_string())
            .or_else(|| {
                req.headers()
                    .get_one("Authorization")
                    .and_then(|header| header.strip_prefix(BEARER_PREFIX))
                    .map(str::to_string)
            });
        // Forward so that anonymous requests reach the 401 catcher.
        let raw = try_outcome!(raw.or_forward(Status::Unauthorized));

        match Self::decode(&raw, config.jwt_secret()) {
            Ok(token) => Outcome::Success(token),
            Err(err) => {
                debug!("Rejected auth token: {err}");
                Outcome::Error((Status::Unauthorized, err))
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_what_it_encodes() {
        let user = Id::new();
        let token = AuthToken::new(user).encode(b"secret", Duration::minutes(5));
        assert_eq!(AuthToken::decode(&token, b"secret").unwrap().user, user);
    }

    #[test]
    fn rejects_wrong_secret_and_expired_tokens() {
        let token = AuthToken::new(Id::new()).encode(b"secret", Duration::minutes(5));
        assert!(matches!(
            AuthToken::decode(&token, b"other"),
            Err(Error::Jwt(_))
        ));

        // Beyond the default 60 second leeway.
        let expired = AuthToken::new(Id::new()).encode(b"secret", Duration::minutes(-5));
        let err = AuthToken::decode(&expired, b"secret").unwrap_err();
        assert_eq!(err.code(), "TOKEN_EXPIRED");
    }
}
