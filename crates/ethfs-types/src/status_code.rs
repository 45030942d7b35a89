/// Numeric status code.
#[allow(non_camel_case_types)]
pub type status_code_t = u16;

/// Common status codes (0-999).
pub mod StatusCode {
    use super::status_code_t;

    pub const OK: status_code_t = 0;
    pub const NOT_IMPLEMENTED: status_code_t = 1;
    pub const DATA_CORRUPTION: status_code_t = 2;
    pub const INVALID_ARG: status_code_t = 3;
    pub const INVALID_CONFIG: status_code_t = 4;
    pub const INVALID_FORMAT: status_code_t = 33;
    pub const READ_ONLY_MODE: status_code_t = 34;
    pub const IO_ERROR: status_code_t = 69;
    pub const FOUND_BUG: status_code_t = 998;
    pub const UNKNOWN: status_code_t = 999;
}

/// Remote store / RPC status codes (2xxx).
pub mod RemoteCode {
    use super::status_code_t;

    pub const UNAVAILABLE: status_code_t = 2000;
    pub const REJECTED: status_code_t = 2001;
    pub const TIMEOUT: status_code_t = 2005;
    pub const INVALID_ADDR: status_code_t = 2006;
    pub const COMMIT_FAILED: status_code_t = 2010;
    pub const BAD_RESPONSE: status_code_t = 2011;
}

/// Namespace status codes (3xxx).
pub mod NamespaceCode {
    use super::status_code_t;

    pub const NOT_FOUND: status_code_t = 3000;
    pub const NOT_EMPTY: status_code_t = 3001;
    pub const NOT_DIRECTORY: status_code_t = 3003;
    pub const TOO_MANY_REDIRECTS: status_code_t = 3005;
    pub const IS_DIRECTORY: status_code_t = 3006;
    pub const EXISTS: status_code_t = 3007;
    pub const NO_PERMISSION: status_code_t = 3008;
    pub const INCONSISTENT: status_code_t = 3009;
    pub const DECODE_ERROR: status_code_t = 3010;
    pub const FILE_TOO_LARGE: status_code_t = 3011;
}

/// Status code category, derived from the numeric range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCodeType {
    Common,
    Remote,
    Namespace,
    Invalid,
}

/// Determine the category of a status code.
pub fn type_of(code: status_code_t) -> StatusCodeType {
    match code {
        0..=999 => StatusCodeType::Common,
        2000..=2999 => StatusCodeType::Remote,
        3000..=3999 => StatusCodeType::Namespace,
        _ => StatusCodeType::Invalid,
    }
}

/// Convert a status code to its human-readable name.
pub fn to_string(code: status_code_t) -> &'static str {
    match code {
        StatusCode::OK => "OK",
        StatusCode::NOT_IMPLEMENTED => "NotImplemented",
        StatusCode::DATA_CORRUPTION => "DataCorruption",
        StatusCode::INVALID_ARG => "InvalidArg",
        StatusCode::INVALID_CONFIG => "InvalidConfig",
        StatusCode::INVALID_FORMAT => "InvalidFormat",
        StatusCode::READ_ONLY_MODE => "ReadOnlyMode",
        StatusCode::IO_ERROR => "IOError",
        StatusCode::FOUND_BUG => "FoundBug",
        StatusCode::UNKNOWN => "Unknown",

        RemoteCode::UNAVAILABLE => "Remote::Unavailable",
        RemoteCode::REJECTED => "Remote::Rejected",
        RemoteCode::TIMEOUT => "Remote::Timeout",
        RemoteCode::INVALID_ADDR => "Remote::InvalidAddr",
        RemoteCode::COMMIT_FAILED => "Remote::CommitFailed",
        RemoteCode::BAD_RESPONSE => "Remote::BadResponse",

        NamespaceCode::NOT_FOUND => "Namespace::NotFound",
        NamespaceCode::NOT_EMPTY => "Namespace::NotEmpty",
        NamespaceCode::NOT_DIRECTORY => "Namespace::NotDirectory",
        NamespaceCode::TOO_MANY_REDIRECTS => "Namespace::TooManyRedirects",
        NamespaceCode::IS_DIRECTORY => "Namespace::IsDirectory",
        NamespaceCode::EXISTS => "Namespace::Exists",
        NamespaceCode::NO_PERMISSION => "Namespace::NoPermission",
        NamespaceCode::INCONSISTENT => "Namespace::Inconsistent",
        NamespaceCode::DECODE_ERROR => "Namespace::DecodeError",
        NamespaceCode::FILE_TOO_LARGE => "Namespace::FileTooLarge",

        _ => "UnknownStatusCode",
    }
}

/// Convert a status code to the POSIX errno reported to filesystem callers.
pub fn to_errno(code: status_code_t) -> i32 {
    match code {
        StatusCode::INVALID_ARG => libc::EINVAL,
        StatusCode::NOT_IMPLEMENTED => libc::ENOSYS,
        StatusCode::READ_ONLY_MODE => libc::EROFS,

        RemoteCode::REJECTED => libc::EACCES,
        RemoteCode::TIMEOUT => libc::ETIMEDOUT,

        NamespaceCode::NOT_FOUND => libc::ENOENT,
        NamespaceCode::NOT_EMPTY => libc::ENOTEMPTY,
        NamespaceCode::NOT_DIRECTORY => libc::ENOTDIR,
        NamespaceCode::TOO_MANY_REDIRECTS => libc::ELOOP,
        NamespaceCode::IS_DIRECTORY => libc::EISDIR,
        NamespaceCode::EXISTS => libc::EEXIST,
        NamespaceCode::NO_PERMISSION => libc::EPERM,
        NamespaceCode::FILE_TOO_LARGE => libc::EFBIG,

        _ => libc::EIO,
    }
}
