use jsonwebtoken::errors::{Error as JwtError, ErrorKind as JwtErrorKind};
use mongodb::{bson::oid::Error as OidError, error::Error as DbError};
use rocket::{
    http::Status,
    response::{self, Responder},
    serde::json::Json,
    Request,
};
use serde::Serialize;
use thiserror::Error;

use crate::model::{common::options::OptionsError, mongodb::Id};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error(transparent)]
    OidParse(#[from] OidError),
    #[error("Poll {0} not found")]
    PollNotFound(Id),
    #[error("Poll {0} is not accepting votes")]
    PollNotActive(Id),
    #[error("The creator of poll {0} cannot vote on it")]
    CreatorCannotVote(Id),
    #[error("Already voted on poll {0}")]
    AlreadyVoted(Id),
    #[error("Approved membership of group {0} is required")]
    GroupMembershipRequired(Id),
    #[error("Access denied: {0}")]
    AccessDenied(String),
    #[error("Option {option} does not exist on poll {poll}")]
    InvalidOption { poll: Id, option: u32 },
    #[error("Results of poll {0} are not visible")]
    ResultsHidden(Id),
    #[error("Only the creator may modify poll {0}")]
    NotPollCreator(Id),
    #[error("Invalid poll: {0}")]
    InvalidPoll(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Stored poll data is malformed: {0}")]
    MalformedOptions(#[from] OptionsError),
}

impl Error {
    /// HTTP status reported to the client.
    pub fn status(&self) -> Status {
        match self {
            Self::Db(_) | Self::MalformedOptions(_) => Status::InternalServerError,
            Self::Jwt(_) => Status::Unauthorized,
            Self::OidParse(_)
            | Self::PollNotActive(_)
            | Self::InvalidOption { .. }
            | Self::InvalidPoll(_) => Status::BadRequest,
            Self::PollNotFound(_) => Status::NotFound,
            Self::CreatorCannotVote(_)
            | Self::GroupMembershipRequired(_)
            | Self::AccessDenied(_)
            | Self::ResultsHidden(_)
            | Self::NotPollCreator(_) => Status::Forbidden,
            Self::AlreadyVoted(_) | Self::Conflict(_) => Status::Conflict,
        }
    }

    /// Machine-readable error code reported to the client.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Db(_) | Self::MalformedOptions(_) => "INTERNAL_ERROR",
            Self::Jwt(err) => match err.kind() {
                JwtErrorKind::ExpiredSignature => "TOKEN_EXPIRED",
                _ => "INVALID_TOKEN",
            },
            Self::OidParse(_) => "INVALID_ID",
            Self::PollNotFound(_) => "POLL_NOT_FOUND",
            Self::PollNotActive(_) => "POLL_NOT_ACTIVE",
            Self::CreatorCannotVote(_) => "CREATOR_CANNOT_VOTE",
            Self::AlreadyVoted(_) => "ALREADY_VOTED",
            Self::GroupMembershipRequired(_) => "GROUP_MEMBERSHIP_REQUIRED",
            Self::AccessDenied(_) => "ACCESS_DENIED",
            Self::InvalidOption { .. } => "INVALID_OPTION",
            Self::ResultsHidden(_) => "RESULTS_HIDDEN",
            Self::NotPollCreator(_) => "NOT_POLL_CREATOR",
            Self::InvalidPoll(_) => "INVALID_POLL",
            Self::Conflict(_) => "CONFLICT",
        }
    }

    /// Is this a failure of our own infrastructure rather than of the request?
    pub fn is_internal(&self) -> bool {
        self.status().class().is_server_error()
    }
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        let message = if self.is_internal() {
            error!("{self}");
            "Internal server error".to_string()
        } else {
            debug!("{self}");
            self.to_string()
        };
        let body = ErrorBody {
            error: self.code(),
            message,
        };
        (status, Json(body)).respond_to(req)
    }
}

/// Render errors raised by Rocket itself (bad routes, failed guards,
/// unparseable bodies) in the same shape as our own.
#[catch(default)]
pub fn default_catcher(status: Status, _req: &Request<'_>) -> (Status, Json<ErrorBody>) {
    let error = match status.code {
        400 => "BAD_REQUEST",
        401 => "UNAUTHORIZED",
        403 => "FORBIDDEN",
        404 => "NOT_FOUND",
        422 => "UNPROCESSABLE_ENTITY",
        500..=599 => "INTERNAL_ERROR",
        _ => "REQUEST_FAILED",
    };
    let body = ErrorBody {
        error,
        message: status.reason_lossy().to_string(),
    };
    (status, Json(body))
}
