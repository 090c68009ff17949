/// Minimum password length accepted at registration and password change.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Maximum email address length per RFC 5321.
pub const MAX_EMAIL_LENGTH: usize = 254;

/// Maximum length of a collection (table) name.
pub const MAX_COLLECTION_NAME_LENGTH: usize = 63;

/// bcrypt cost factor used when the configuration does not override it.
pub const DEFAULT_PASSWORD_HASH_COST: u32 = 10;

/// Token lifetime: 1 hour in seconds.
pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

/// Signing algorithm used when none is configured.
pub const DEFAULT_TOKEN_ALGORITHM: &str = "HS256";

/// Required length of the token encryption key (AES-256).
pub const TOKEN_ENCRYPTION_KEY_LENGTH: usize = 32;

/// Account lockout: failed login attempts before the account is blocked.
pub const DEFAULT_MAX_INVALID_LOGIN_ATTEMPTS: u32 = 5;

/// Account lockout: failed password changes before the account is blocked.
pub const DEFAULT_MAX_INVALID_CHANGE_PASSWORD_ATTEMPTS: u32 = 5;

/// Default database connection pool size.
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

/// Default number of documents returned by a read.
pub const DEFAULT_READ_LIMIT: u64 = 100;

/// Upper bound on documents returned by a single read.
pub const MAX_READ_LIMIT: u64 = 1000;

/// Maximum accepted request body in bytes (1 MB).
pub const MAX_BODY_BYTES: usize = 1_048_576;

/// Body field carrying the replacement password in a password change.
pub const NEW_PASSWORD_FIELD: &str = "newPassword";

/// Fields the library maintains on every document.
pub const ID_FIELD: &str = "_id";
pub const VERSION_FIELD: &str = "version";
pub const CREATED_AT_FIELD: &str = "createdAt";
pub const UPDATED_AT_FIELD: &str = "updatedAt";
pub const IS_DELETED_FIELD: &str = "isDeleted";
pub const DELETED_AT_FIELD: &str = "deletedAt";

/// Sub-document holding the authentication state of an account.
pub const AUTH_FIELD: &str = "auth";

pub const RESERVED_FIELDS: [&str; 7] = [
    ID_FIELD,
    VERSION_FIELD,
    CREATED_AT_FIELD,
    UPDATED_AT_FIELD,
    IS_DELETED_FIELD,
    DELETED_AT_FIELD,
    AUTH_FIELD,
];

/// Query parameters that shape a read instead of filtering it.
pub const QUERY_LIMIT: &str = "limit";
pub const QUERY_SKIP: &str = "skip";
pub const QUERY_SORT: &str = "sort";
