//! Host keys: the opaque `[user[:password]@]host[:port]` strings clients use to address an FTP
//! server.

pub const DEFAULT_FTP_PORT: u16 = 21;
pub const ANONYMOUS_USER: &str = "anonymous";

/// Connection parameters parsed from a host key.
///
/// Recomputed for every request; never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCredentials {
    pub host: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl HostCredentials {
    /// Split `host_key` into host, user and password.
    ///
    /// The user info ends at the last `@` so passwords may contain `@`; the password starts after
    /// the first `:` of the user info. Empty user or password segments are treated as absent.
    pub fn parse(host_key: &str) -> Self {
        let Some((user_info, host)) = host_key.rsplit_once('@') else {
            return Self {
                host: host_key.to_owned(),
                user: None,
                password: None,
            };
        };

        let (user, password) = match user_info.split_once(':') {
            Some((user, password)) => (user, Some(password)),
            None => (user_info, None),
        };

        Self {
            host: host.to_owned(),
            user: non_empty(user),
            password: password.and_then(non_empty),
        }
    }

    /// `host:port` address for the control connection, defaulting to port 21.
    pub fn address(&self) -> String {
        let host = self.host.trim();
        if let Some(rest) = host.strip_prefix('[') {
            // Bracketed IPv6 literal, with or without a port.
            return if rest.contains("]:") {
                host.to_owned()
            } else {
                format!("{host}:{DEFAULT_FTP_PORT}")
            };
        }

        match host.matches(':').count() {
            0 => format!("{host}:{DEFAULT_FTP_PORT}"),
            1 => host.to_owned(),
            // Bare IPv6 literal.
            _ => format!("[{host}]:{DEFAULT_FTP_PORT}"),
        }
    }

    /// User and password for `USER`/`PASS`, falling back to anonymous login.
    pub fn login(&self) -> (&str, &str) {
        (
            self.user.as_deref().unwrap_or(ANONYMOUS_USER),
            self.password.as_deref().unwrap_or(""),
        )
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_owned())
}

/// Mask a host name for log output.
///
/// Short hosts (8 characters or fewer) keep their first `len - ceil(len / 4)` characters, longer
/// ones keep the first 8. The rest is replaced with `*`.
pub fn mask_host(host: &str) -> String {
    let len = host.chars().count();
    let keep = if len <= 8 { len - len.div_ceil(4) } else { 8 };

    host.chars()
        .enumerate()
        .map(|(i, c)| if i < keep { c } else { '*' })
        .collect()
}

/// Mask the host portion of a raw host key; credentials are dropped entirely.
pub fn mask_host_key(host_key: &str) -> String {
    mask_host(&HostCredentials::parse(host_key).host)
}
