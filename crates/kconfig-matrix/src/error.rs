use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or inconsistent build definitions.
    Config,
    /// A `kernel_config` module declared no `meta` file.
    MissingMetadata,
    /// Inconsistent action graph (duplicate outputs, bad args, cycles).
    Graph,
    /// An external tool exited unsuccessfully.
    ExternalTool,
    Io,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    msg: String,
}

impl Error {
    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Config, msg)
    }

    pub fn new<M: Into<String>>(kind: ErrorKind, msg: M) -> Self {
        Self {
            kind,
            msg: msg.into(),
        }
    }

    pub fn missing_metadata(module: &str) -> Self {
        Self::new(
            ErrorKind::MissingMetadata,
            format!("kernel_config '{module}': missing meta field"),
        )
    }

    pub fn graph<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Graph, msg)
    }

    pub fn external_tool(tool: &str, status: impl fmt::Display) -> Self {
        Self::new(ErrorKind::ExternalTool, format!("{tool} failed: {status}"))
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::msg(format!("json encode error: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
