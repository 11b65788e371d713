use reqwest::Url;

use crate::ClientError;

pub const RPC_PATH: &str = "/api/trpc";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildProfile {
    Development,
    Production,
}

impl BuildProfile {
    /// Debug builds count as development.
    pub const fn current() -> Self {
        if cfg!(debug_assertions) {
            BuildProfile::Development
        } else {
            BuildProfile::Production
        }
    }
}

/// Where the client runs. Chosen at compile time through the `native`
/// feature, never detected at runtime.
pub trait Platform: Send + Sync + 'static {
    const NAME: &'static str;

    /// Server origin used by development builds without an override.
    const DEV_ORIGIN: &'static str;

    /// Whether production builds may call the page's own origin.
    const SAME_ORIGIN: bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WebPlatform;

impl Platform for WebPlatform {
    const NAME: &'static str = "web";
    const DEV_ORIGIN: &'static str = "http://localhost:3000";
    const SAME_ORIGIN: bool = true;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NativePlatform;

impl Platform for NativePlatform {
    const NAME: &'static str = "native";
    const DEV_ORIGIN: &'static str = "http://localhost:3000";
    const SAME_ORIGIN: bool = false;
}

#[cfg(feature = "native")]
pub type CurrentPlatform = NativePlatform;

#[cfg(not(feature = "native"))]
pub type CurrentPlatform = WebPlatform;

/// Resolves the RPC endpoint for platform `P`.
///
/// Order: explicit override, then the development default, then the page's
/// own origin for browser production builds. Anything else is
/// [`ClientError::MissingBaseUrl`].
pub fn resolve_endpoint<P: Platform>(
    override_url: Option<&str>,
    profile: BuildProfile,
    page_origin: Option<&str>,
) -> Result<Url, ClientError> {
    let override_url = override_url.map(str::trim).filter(|s| !s.is_empty());
    let page_origin = page_origin.map(str::trim).filter(|s| !s.is_empty());

    let base = match (override_url, profile, page_origin) {
        (Some(url), _, _) => url,
        (None, BuildProfile::Development, _) => P::DEV_ORIGIN,
        (None, BuildProfile::Production, Some(origin)) if P::SAME_ORIGIN => origin,
        _ => return Err(ClientError::MissingBaseUrl),
    };

    endpoint_from_base(base)
}

fn endpoint_from_base(base: &str) -> Result<Url, ClientError> {
    let invalid = |message: String| ClientError::InvalidBaseUrl {
        url: base.to_string(),
        message,
    };

    let mut url = Url::parse(base).map_err(|err| invalid(err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https".to_string()));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("must not carry a query or fragment".to_string()));
    }

    let path = url.path().trim_end_matches('/');
    if !path.ends_with(RPC_PATH) {
        let joined = format!("{}{}", path, RPC_PATH);
        url.set_path(&joined);
    } else {
        let trimmed = path.to_string();
        url.set_path(&trimmed);
    }

    Ok(url)
}
