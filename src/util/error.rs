use std::fmt;

#[derive(Debug)]
pub struct Error(Repr);

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadFormat,
    BadType,
    IO,
    NotFound,
    Internal,
    Custom
}

impl Error {
    pub fn new<E>(error: E) -> Error
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error(Repr::Custom(ErrorKind::Custom, error.into()))
    }

    // an error of a given kind carrying a formatted message
    pub fn with<E>(kind: ErrorKind, error: E) -> Error
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error(Repr::Custom(kind, error.into()))
    }

    pub fn kind(&self) -> ErrorKind {
        match &self.0 {
            Repr::Custom(c, _) => *c,
            Repr::Simple(c) => *c,
            Repr::SimpleMessage(c, _) => *c
        }
    }

    pub fn new_const(kind : ErrorKind, message: &'static str) -> Self {
        Error(Repr::SimpleMessage(kind, message))
    }
}

impl From<ErrorKind> for Error {
    fn from(e: ErrorKind) -> Self {
        Error(Repr::Simple(e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::with(ErrorKind::IO, e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Repr::Simple(k) => write!(f, "{:?}", k),
            Repr::SimpleMessage(k, m) => write!(f, "{:?}: {}", k, m),
            Repr::Custom(k, e) => write!(f, "{:?}: {}", k, e)
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.0 {
            Repr::Custom(_, e) => Some(e.as_ref()),
            _ => None
        }
    }
}

#[derive(Debug)]
enum Repr {
    Simple(ErrorKind),
    SimpleMessage(ErrorKind, &'static str),
    Custom(ErrorKind, Box<dyn std::error::Error + Send + Sync>)
}
