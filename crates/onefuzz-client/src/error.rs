pub struct ClientError(pub(crate) ErrorImpl);

#[non_exhaustive]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ClientErrorKind {
    /// The request never reached the server, or the server's response could
    /// not be parsed.
    Transport,

    /// The server rejected the request with the `{status, title, detail}`
    /// error shape.
    Api,
}

mod detail {
    #[derive(Debug)]
    pub(crate) enum ClientError {
        Http(reqwest::Error),
        Api { status: u16, title: String, detail: String },
    }
}

use std::fmt;

pub(crate) use self::detail::ClientError as ErrorImpl;

impl ClientError {
    pub fn kind(&self) -> ClientErrorKind {
        match &self.0 {
            ErrorImpl::Http(_) => ClientErrorKind::Transport,
            ErrorImpl::Api { .. } => ClientErrorKind::Api,
        }
    }

    /// The `title` field of the server's error body, if this was an API
    /// error rather than a transport failure.
    pub fn title(&self) -> Option<&str> {
        match &self.0 {
            ErrorImpl::Api { title, .. } => Some(title),
            ErrorImpl::Http(_) => None,
        }
    }
}

impl fmt::Debug for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            ErrorImpl::Http(e) => e.fmt(f),
            ErrorImpl::Api { status, title, detail } => write!(f, "{status} {title}: {detail}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.0 {
            ErrorImpl::Http(e) => Some(e),
            ErrorImpl::Api { .. } => None,
        }
    }
}

impl From<reqwest::Error> for ErrorImpl {
    fn from(error: reqwest::Error) -> Self {
        Self::Http(error)
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(error: reqwest::Error) -> Self {
        Self(error.into())
    }
}

impl From<ErrorImpl> for ClientError {
    fn from(error: ErrorImpl) -> Self {
        Self(error)
    }
}
