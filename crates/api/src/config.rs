use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tandem_auth::{JwtIdentityConfig, RemoteIdentityConfig};
use tandem_store::PostgrestConfig;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub auth_mode: AuthMode,
    pub remote_identity: Option<RemoteIdentityConfig>,
    pub jwt: Option<JwtIdentityConfig>,
    pub store_mode: StoreMode,
    pub postgrest: Option<PostgrestConfig>,
    pub default_locale: String,
    pub supported_locales: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Remote,
    Jwt,
}

impl AuthMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthMode::Remote => "remote",
            AuthMode::Jwt => "jwt",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Postgrest,
    Memory,
}

impl StoreMode {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreMode::Postgrest => "postgrest",
            StoreMode::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StartupError {}

impl ApiConfig {
    pub fn load() -> Result<Self, StartupError> {
        let mut merged = HashMap::new();

        if let Ok(config_path) = std::env::var("TANDEM_CONFIG_PATH") {
            let config_path = config_path.trim();
            if !config_path.is_empty() {
                let file_kv = parse_env_file(config_path)?;
                merged.extend(file_kv);
            }
        }

        merged.extend(std::env::vars());

        Self::from_kv(&merged)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, StartupError> {
        let bind_addr = parse_socket_addr(
            kv.get("TANDEM_BIND_ADDR"),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 3000),
            "TANDEM_BIND_ADDR",
        )?;

        let auth_mode = parse_auth_mode(kv.get("TANDEM_AUTH_MODE"))?;
        let store_mode = parse_store_mode(kv.get("TANDEM_STORE_MODE"))?;

        let dev_allow_nonlocal_bind =
            parse_bool(kv.get("TANDEM_DEV_ALLOW_NONLOCAL_BIND")).unwrap_or(false);

        if !bind_addr.ip().is_loopback() && store_mode == StoreMode::Memory {
            if dev_allow_nonlocal_bind && bind_addr.ip().is_unspecified() {
                // Containers publish on 0.0.0.0; the escape hatch is dev-only.
            } else {
                return Err(StartupError {
                    code: "ERR_NONLOCAL_BIND_REQUIRES_STORE",
                    message: "non-local bind requires the postgrest store; refuse startup"
                        .to_string(),
                });
            }
        }

        let supabase_url = optional_nonempty(kv, "SUPABASE_URL");
        let anon_key = optional_nonempty(kv, "SUPABASE_ANON_KEY");

        let (remote_identity, jwt) = match auth_mode {
            AuthMode::Remote => {
                let auth_timeout_ms =
                    parse_u64(kv.get("TANDEM_AUTH_TIMEOUT_MS"), 2000, "TANDEM_AUTH_TIMEOUT_MS")?;
                let remote = RemoteIdentityConfig {
                    base_url: require_nonempty(kv, "SUPABASE_URL")?,
                    api_key: require_nonempty(kv, "SUPABASE_ANON_KEY")?,
                    timeout: Duration::from_millis(auth_timeout_ms),
                };
                (Some(remote), None)
            }
            AuthMode::Jwt => {
                let leeway_secs =
                    parse_u64(kv.get("TANDEM_JWT_LEEWAY_SECS"), 60, "TANDEM_JWT_LEEWAY_SECS")?;
                let audience = optional_nonempty(kv, "TANDEM_JWT_AUDIENCE")
                    .unwrap_or_else(|| "authenticated".to_string());
                let jwt = JwtIdentityConfig {
                    secret: require_nonempty(kv, "SUPABASE_JWT_SECRET")?,
                    audience,
                    leeway: Duration::from_secs(leeway_secs),
                };
                (None, Some(jwt))
            }
        };

        let postgrest = match store_mode {
            StoreMode::Memory => None,
            StoreMode::Postgrest => {
                let base_url = supabase_url.clone().ok_or_else(|| missing("SUPABASE_URL"))?;
                let api_key = optional_nonempty(kv, "SUPABASE_SERVICE_ROLE_KEY")
                    .or_else(|| anon_key.clone())
                    .ok_or_else(|| missing("SUPABASE_SERVICE_ROLE_KEY"))?;
                let store_timeout_ms = parse_u64(
                    kv.get("TANDEM_STORE_TIMEOUT_MS"),
                    5000,
                    "TANDEM_STORE_TIMEOUT_MS",
                )?;
                let table = optional_nonempty(kv, "TANDEM_USERS_TABLE")
                    .unwrap_or_else(|| "users".to_string());
                if !is_identifier(&table) {
                    return Err(StartupError {
                        code: "ERR_INVALID_CONFIG",
                        message: "TANDEM_USERS_TABLE must be ascii alphanumerics or '_'"
                            .to_string(),
                    });
                }

                Some(PostgrestConfig {
                    base_url,
                    api_key,
                    table,
                    timeout: Duration::from_millis(store_timeout_ms),
                })
            }
        };

        let supported_locales = parse_locales(kv.get("TANDEM_SUPPORTED_LOCALES"))?;
        let default_locale = optional_nonempty(kv, "TANDEM_DEFAULT_LOCALE")
            .unwrap_or_else(|| "en".to_string());
        if !supported_locales.contains(&default_locale) {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "TANDEM_DEFAULT_LOCALE must be one of TANDEM_SUPPORTED_LOCALES"
                    .to_string(),
            });
        }

        Ok(Self {
            bind_addr,
            auth_mode,
            remote_identity,
            jwt,
            store_mode,
            postgrest,
            default_locale,
            supported_locales,
        })
    }
}

fn parse_env_file(path: &str) -> Result<HashMap<String, String>, StartupError> {
    let contents = std::fs::read_to_string(path).map_err(|_| StartupError {
        code: "ERR_CONFIG_FILE_READ",
        message: format!("failed to read config file at {}", path),
    })?;

    parse_env_lines(&contents)
}

fn parse_env_lines(contents: &str) -> Result<HashMap<String, String>, StartupError> {
    let mut kv = HashMap::new();

    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| StartupError {
            code: "ERR_CONFIG_FILE_PARSE",
            message: format!("invalid config line {} (expected KEY=VALUE)", idx + 1),
        })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(StartupError {
                code: "ERR_CONFIG_FILE_PARSE",
                message: format!("invalid config line {} (empty key)", idx + 1),
            });
        }

        kv.insert(key.to_string(), strip_quotes(value.trim()));
    }

    Ok(kv)
}

fn strip_quotes(s: &str) -> String {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return s[1..bytes.len() - 1].to_string();
        }
    }
    s.to_string()
}

fn missing(key: &'static str) -> StartupError {
    StartupError {
        code: "ERR_MISSING_CONFIG",
        message: format!("missing required config key {}", key),
    }
}

fn optional_nonempty(kv: &HashMap<String, String>, key: &str) -> Option<String> {
    kv.get(key)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn require_nonempty(
    kv: &HashMap<String, String>,
    key: &'static str,
) -> Result<String, StartupError> {
    optional_nonempty(kv, key).ok_or_else(|| missing(key))
}

fn parse_socket_addr(
    value: Option<&String>,
    default: SocketAddr,
    key: &'static str,
) -> Result<SocketAddr, StartupError> {
    match value {
        None => Ok(default),
        Some(v) => v.trim().parse::<SocketAddr>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be a valid host:port socket address", key),
        }),
    }
}

fn parse_u64(value: Option<&String>, default: u64, key: &'static str) -> Result<u64, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<u64>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_auth_mode(value: Option<&String>) -> Result<AuthMode, StartupError> {
    let mode = value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or("remote");

    match mode {
        "remote" => Ok(AuthMode::Remote),
        "jwt" => Ok(AuthMode::Jwt),
        _ => Err(StartupError {
            code: "ERR_INVALID_CONFIG",
            message: "TANDEM_AUTH_MODE must be remote or jwt".to_string(),
        }),
    }
}

fn parse_store_mode(value: Option<&String>) -> Result<StoreMode, StartupError> {
    let mode = value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or("postgrest");

    match mode {
        "postgrest" => Ok(StoreMode::Postgrest),
        "memory" => Ok(StoreMode::Memory),
        _ => Err(StartupError {
            code: "ERR_INVALID_CONFIG",
            message: "TANDEM_STORE_MODE must be postgrest or memory".to_string(),
        }),
    }
}

fn parse_locales(value: Option<&String>) -> Result<Vec<String>, StartupError> {
    let raw = value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or("en,cs,fr");

    let mut locales = Vec::new();
    for locale in raw.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if locale.len() != 2 || !locale.bytes().all(|b| b.is_ascii_lowercase()) {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: format!(
                    "TANDEM_SUPPORTED_LOCALES entry `{}` must be two lowercase letters",
                    locale
                ),
            });
        }
        if !locales.iter().any(|l| l == locale) {
            locales.push(locale.to_string());
        }
    }

    if locales.is_empty() {
        return Err(StartupError {
            code: "ERR_INVALID_CONFIG",
            message: "TANDEM_SUPPORTED_LOCALES must list at least one locale".to_string(),
        });
    }

    Ok(locales)
}

fn parse_bool(value: Option<&String>) -> Option<bool> {
    let value = value.map(|v| v.trim()).filter(|v| !v.is_empty())?;

    match value {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_ok_env() -> HashMap<String, String> {
        HashMap::from([
            (
                "SUPABASE_URL".to_string(),
                "https://project.supabase.co".to_string(),
            ),
            ("SUPABASE_ANON_KEY".to_string(), "anon-key".to_string()),
        ])
    }

    #[test]
    fn defaults_apply_to_minimal_env() {
        let cfg = ApiConfig::from_kv(&minimal_ok_env()).unwrap();
        assert_eq!(cfg.bind_addr, "127.0.0.1:3000".parse().unwrap());
        assert_eq!(cfg.auth_mode, AuthMode::Remote);
        assert_eq!(cfg.store_mode, StoreMode::Postgrest);
        assert_eq!(cfg.default_locale, "en");
        assert_eq!(cfg.supported_locales, vec!["en", "cs", "fr"]);

        let remote = cfg.remote_identity.unwrap();
        assert_eq!(remote.timeout, Duration::from_millis(2000));

        // store key falls back to the anon key
        let store = cfg.postgrest.unwrap();
        assert_eq!(store.api_key, "anon-key");
        assert_eq!(store.table, "users");
        assert_eq!(store.timeout, Duration::from_millis(5000));
    }

    #[test]
    fn service_role_key_is_preferred_for_store() {
        let mut env = minimal_ok_env();
        env.insert(
            "SUPABASE_SERVICE_ROLE_KEY".to_string(),
            "service-key".to_string(),
        );
        let cfg = ApiConfig::from_kv(&env).unwrap();
        assert_eq!(cfg.postgrest.unwrap().api_key, "service-key");
    }

    #[test]
    fn remote_auth_requires_identity_url() {
        let mut env = minimal_ok_env();
        env.remove("SUPABASE_URL");
        let err = ApiConfig::from_kv(&env).unwrap_err();
        assert_eq!(err.code, "ERR_MISSING_CONFIG");
        assert!(err.message.contains("SUPABASE_URL"));
    }

    #[test]
    fn jwt_mode_requires_secret() {
        let mut env = HashMap::from([
            ("TANDEM_AUTH_MODE".to_string(), "jwt".to_string()),
            ("TANDEM_STORE_MODE".to_string(), "memory".to_string()),
        ]);
        let err = ApiConfig::from_kv(&env).unwrap_err();
        assert_eq!(err.code, "ERR_MISSING_CONFIG");

        env.insert("SUPABASE_JWT_SECRET".to_string(), "s3cret".to_string());
        let cfg = ApiConfig::from_kv(&env).unwrap();
        let jwt = cfg.jwt.unwrap();
        assert_eq!(jwt.audience, "authenticated");
        assert_eq!(jwt.leeway, Duration::from_secs(60));
        assert!(cfg.remote_identity.is_none());
        assert!(cfg.postgrest.is_none());
    }

    #[test]
    fn non_local_bind_with_memory_store_fails() {
        let mut env = minimal_ok_env();
        env.insert("TANDEM_STORE_MODE".to_string(), "memory".to_string());
        env.insert("TANDEM_BIND_ADDR".to_string(), "0.0.0.0:3000".to_string());
        let err = ApiConfig::from_kv(&env).unwrap_err();
        assert_eq!(err.code, "ERR_NONLOCAL_BIND_REQUIRES_STORE");

        env.insert(
            "TANDEM_DEV_ALLOW_NONLOCAL_BIND".to_string(),
            "true".to_string(),
        );
        assert!(ApiConfig::from_kv(&env).is_ok());
    }

    #[test]
    fn invalid_modes_and_numbers_fail() {
        for (key, value) in [
            ("TANDEM_AUTH_MODE", "oidc"),
            ("TANDEM_STORE_MODE", "sqlite"),
            ("TANDEM_AUTH_TIMEOUT_MS", "soon"),
            ("TANDEM_BIND_ADDR", "localhost"),
            ("TANDEM_USERS_TABLE", "users;drop"),
        ] {
            let mut env = minimal_ok_env();
            env.insert(key.to_string(), value.to_string());
            let err = ApiConfig::from_kv(&env).unwrap_err();
            assert_eq!(err.code, "ERR_INVALID_CONFIG", "{}={}", key, value);
        }
    }

    #[test]
    fn locales_are_validated() {
        let mut env = minimal_ok_env();
        env.insert("TANDEM_SUPPORTED_LOCALES".to_string(), "en,CZ".to_string());
        assert_eq!(
            ApiConfig::from_kv(&env).unwrap_err().code,
            "ERR_INVALID_CONFIG"
        );

        env.insert("TANDEM_SUPPORTED_LOCALES".to_string(), "cs, fr, cs".to_string());
        assert_eq!(
            ApiConfig::from_kv(&env).unwrap_err().code,
            "ERR_INVALID_CONFIG"
        );

        env.insert("TANDEM_DEFAULT_LOCALE".to_string(), "fr".to_string());
        let cfg = ApiConfig::from_kv(&env).unwrap();
        assert_eq!(cfg.supported_locales, vec!["cs", "fr"]);
        assert_eq!(cfg.default_locale, "fr");
    }

    #[test]
    fn env_file_lines_parse_with_quotes_and_comments() {
        let kv = parse_env_lines(
            "# local overrides\nSUPABASE_URL=\"http://127.0.0.1:54321\"\n\nSUPABASE_ANON_KEY='k'\n",
        )
        .unwrap();
        assert_eq!(kv["SUPABASE_URL"], "http://127.0.0.1:54321");
        assert_eq!(kv["SUPABASE_ANON_KEY"], "k");

        let err = parse_env_lines("NOT A PAIR").unwrap_err();
        assert_eq!(err.code, "ERR_CONFIG_FILE_PARSE");
        let err = parse_env_lines("=value").unwrap_err();
        assert_eq!(err.code, "ERR_CONFIG_FILE_PARSE");
    }
}
