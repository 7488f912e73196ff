use std::time::Duration;

/// Application name
pub const APP_NAME: &str = "Mimigram";

/// Separator between the two sorted participant ids of a 1:1 conversation key
pub const DIRECT_KEY_SEPARATOR: &str = "-";

/// Namespace prefix of group conversation keys
pub const GROUP_KEY_PREFIX: &str = "group:";

/// How long after sending a message its author may still edit it
pub const EDIT_WINDOW: Duration = Duration::from_secs(30 * 60);

/// Display name used when a reply's original author has no profile
pub const UNKNOWN_SENDER_NAME: &str = "User";

/// Default HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 3000;

/// Maximum JSON request body (images and voice clips travel inline)
pub const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;
