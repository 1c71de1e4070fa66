use crate::role::Role;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Directory holding project and user config files
pub const CONFIG_DIR: &str = ".gatekeeper";

/// A validation error in the configuration
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

/// How a caller's role is compared against a route's allowed roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Role must be one of the allowed roles
    #[default]
    Exact,
    /// Role must rank at least as high as the lowest allowed role
    Hierarchy,
}

impl MatchMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "exact" | "allowlist" | "allow-list" => Some(Self::Exact),
            "hierarchy" | "rank" => Some(Self::Hierarchy),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Hierarchy => "hierarchy",
        }
    }
}

/// A protected path prefix and the roles allowed through it
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RouteConfig {
    pub prefix: String,
    pub roles: Vec<Role>,
}

impl RouteConfig {
    pub fn new(prefix: &str, roles: &[Role]) -> Self {
        Self {
            prefix: prefix.to_string(),
            roles: roles.to_vec(),
        }
    }
}

/// Gate behaviour
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GateConfig {
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default = "default_max_session_age_secs")]
    pub max_session_age_secs: u64,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_unauthorized_path")]
    pub unauthorized_path: String,
    #[serde(default)]
    pub mode: MatchMode,
    /// Prefixes the gate runs on at all; empty means every path
    #[serde(default)]
    pub matcher: Vec<String>,
}

fn default_cookie_name() -> String {
    "auth-session".to_string()
}

fn default_max_session_age_secs() -> u64 {
    24 * 60 * 60
}

fn default_login_path() -> String {
    "/login".to_string()
}

fn default_unauthorized_path() -> String {
    "/unauthorized".to_string()
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            max_session_age_secs: default_max_session_age_secs(),
            login_path: default_login_path(),
            unauthorized_path: default_unauthorized_path(),
            mode: MatchMode::default(),
            matcher: Vec::new(),
        }
    }
}

impl GateConfig {
    pub fn max_session_age_ms(&self) -> i64 {
        i64::try_from(self.max_session_age_secs)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000)
    }
}

/// Decision audit log settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub audit: AuditConfig,
}

impl Config {
    /// Config with the built-in route table and matcher
    pub fn with_builtin_routes() -> Self {
        let routes = vec![
            RouteConfig::new("/provider/workspace", &[Role::Provider, Role::Admin]),
            RouteConfig::new("/patient/pwa", &[Role::Patient, Role::Admin]),
            RouteConfig::new("/admin/hospital", &[Role::Admin]),
            RouteConfig::new("/onboarding/hospital", &[Role::Admin]),
        ];
        let gate = GateConfig {
            matcher: ["/provider", "/patient", "/admin", "/onboarding"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            ..GateConfig::default()
        };

        Config {
            gate,
            routes,
            audit: AuditConfig::default(),
        }
    }

    /// Load configuration from default paths
    /// Priority: local (.gatekeeper/config.local.toml) > project (.gatekeeper/config.toml)
    /// > user (~/.gatekeeper/config.toml) > built-in routes
    pub fn load() -> Result<Self> {
        let mut config = Self::with_builtin_routes();

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(CONFIG_DIR).join("config.toml");
            if user_config.exists() {
                config.merge(Self::load_from(&user_config)?);
            }
        }

        let project_config = Path::new(CONFIG_DIR).join("config.toml");
        if project_config.exists() {
            config.merge(Self::load_from(&project_config)?);
        }

        // Should be gitignored
        let local_config = Path::new(CONFIG_DIR).join("config.local.toml");
        if local_config.exists() {
            config.merge(Self::load_from(&local_config)?);
        }

        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Load a single file on top of the built-in routes
    pub fn load_with_builtins(path: &Path) -> Result<Self> {
        let mut config = Self::with_builtin_routes();
        config.merge(Self::load_from(path)?);
        Ok(config)
    }

    /// Merge another config into this one (other takes priority)
    /// Gate scalars are overridden when they differ from the defaults, so a
    /// later layer cannot reset an earlier layer's custom value back to the
    /// default by writing the default explicitly.
    /// A non-empty route table replaces ours wholesale, along with its matcher.
    pub fn merge(&mut self, other: Config) {
        let defaults = GateConfig::default();

        if other.gate.cookie_name != defaults.cookie_name {
            self.gate.cookie_name = other.gate.cookie_name;
        }
        if other.gate.max_session_age_secs != defaults.max_session_age_secs {
            self.gate.max_session_age_secs = other.gate.max_session_age_secs;
        }
        if other.gate.login_path != defaults.login_path {
            self.gate.login_path = other.gate.login_path;
        }
        if other.gate.unauthorized_path != defaults.unauthorized_path {
            self.gate.unauthorized_path = other.gate.unauthorized_path;
        }
        if other.gate.mode != defaults.mode {
            self.gate.mode = other.gate.mode;
        }

        // The matcher scopes a particular route table, so they travel together
        if !other.routes.is_empty() {
            self.routes = other.routes;
            self.gate.matcher = other.gate.matcher;
        } else if !other.gate.matcher.is_empty() {
            self.gate.matcher = other.gate.matcher;
        }

        if other.audit.path.is_some() {
            self.audit.path = other.audit.path;
        }
    }

    /// Validate configuration and return any errors found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.gate.cookie_name.trim().is_empty() {
            errors.push(ValidationError {
                field: "gate.cookie_name".to_string(),
                message: "Must not be empty".to_string(),
            });
        }

        if self.gate.max_session_age_secs == 0 {
            errors.push(ValidationError {
                field: "gate.max_session_age_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        for (field, path) in [
            ("gate.login_path", &self.gate.login_path),
            ("gate.unauthorized_path", &self.gate.unauthorized_path),
        ] {
            if !path.starts_with('/') {
                errors.push(ValidationError {
                    field: field.to_string(),
                    message: format!("Path '{}' must start with '/'", path),
                });
            } else if let Some(route) = self.routes.iter().find(|r| path.starts_with(&r.prefix)) {
                errors.push(ValidationError {
                    field: field.to_string(),
                    message: format!(
                        "Path '{}' is protected by route '{}' and would redirect to itself",
                        path, route.prefix
                    ),
                });
            }
        }

        for (i, matcher) in self.gate.matcher.iter().enumerate() {
            if !matcher.starts_with('/') {
                errors.push(ValidationError {
                    field: format!("gate.matcher[{}]", i),
                    message: format!("Prefix '{}' must start with '/'", matcher),
                });
            }
        }

        let mut seen = HashSet::new();
        for (i, route) in self.routes.iter().enumerate() {
            if !route.prefix.starts_with('/') {
                errors.push(ValidationError {
                    field: format!("routes[{}].prefix", i),
                    message: format!("Prefix '{}' must start with '/'", route.prefix),
                });
            }
            if route.roles.is_empty() {
                errors.push(ValidationError {
                    field: format!("routes[{}].roles", i),
                    message: format!("Route '{}' must allow at least one role", route.prefix),
                });
            }
            if !seen.insert(route.prefix.as_str()) {
                errors.push(ValidationError {
                    field: format!("routes[{}].prefix", i),
                    message: format!("Duplicate prefix '{}'", route.prefix),
                });
            }
            if !covers(&self.gate.matcher, &route.prefix) {
                errors.push(ValidationError {
                    field: format!("routes[{}].prefix", i),
                    message: format!(
                        "Prefix '{}' is outside the matcher, so the gate never sees it",
                        route.prefix
                    ),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Matcher entries cover themselves and everything below them,
/// like a `/prefix/:path*` route pattern.
pub fn in_scope(matcher: &[String], path: &str) -> bool {
    if matcher.is_empty() {
        return true;
    }
    matcher.iter().any(|m| {
        let m = m.trim_end_matches('/');
        m.is_empty()
            || path
                .strip_prefix(m)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    })
}

/// True if every path a route `prefix` protects falls inside the matcher.
/// Route matching is plain starts-with, so the prefix must sit strictly below
/// a matcher entry at a `/` boundary; a prefix equal to an entry would still
/// match paths like `/adminx` that the matcher skips.
pub fn covers(matcher: &[String], prefix: &str) -> bool {
    if matcher.is_empty() {
        return true;
    }
    matcher.iter().any(|m| {
        let base = format!("{}/", m.trim_end_matches('/'));
        prefix.starts_with(&base)
    })
}
