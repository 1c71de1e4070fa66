//! Route policy table and the access gate.
//!
//! The gate maps a request path to the roles allowed through it and
//! decides between letting the request pass and redirecting it to the
//! login or unauthorized page. Evaluation is pure: it reads only the
//! request, the immutable policy table and the clock value handed in.

use crate::config::{self, Config, GateConfig, MatchMode};
use crate::cookie;
use crate::role::{join_roles, Role};
use crate::session::{extract_session, resolve_role, InvalidReason, SessionCheck};
use url::form_urlencoded;

/// A protected prefix and the roles permitted through it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePolicy {
    pub prefix: String,
    pub allowed: Vec<Role>,
}

impl RoutePolicy {
    pub fn new(prefix: &str, allowed: &[Role]) -> Self {
        Self {
            prefix: prefix.to_string(),
            allowed: allowed.to_vec(),
        }
    }

    /// Check a role against this route under the given mode
    pub fn permits(&self, role: Role, mode: MatchMode) -> bool {
        match mode {
            MatchMode::Exact => self.allowed.contains(&role),
            MatchMode::Hierarchy => self
                .allowed
                .iter()
                .copied()
                .min_by_key(Role::rank)
                .is_some_and(|floor| role.at_least(floor)),
        }
    }
}

/// Ordered, immutable set of route policies
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    routes: Vec<RoutePolicy>,
}

impl PolicyTable {
    pub fn new(routes: Vec<RoutePolicy>) -> Self {
        Self { routes }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config
                .routes
                .iter()
                .map(|r| RoutePolicy::new(&r.prefix, &r.roles))
                .collect(),
        )
    }

    pub fn routes(&self) -> &[RoutePolicy] {
        &self.routes
    }

    /// Find the longest registered prefix that `path` starts with.
    /// On equal lengths the earlier entry wins.
    pub fn match_path(&self, path: &str) -> Option<&RoutePolicy> {
        let mut best: Option<&RoutePolicy> = None;
        for route in &self.routes {
            if !path.starts_with(&route.prefix) {
                continue;
            }
            if best.map_or(true, |b| route.prefix.len() > b.prefix.len()) {
                best = Some(route);
            }
        }
        best
    }
}

/// An inbound request as the gate sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Request target; a query string or fragment is ignored
    pub target: String,
    /// Decoded session cookie value, if the request carried one
    pub cookie: Option<String>,
}

impl Request {
    pub fn new(target: &str, cookie: Option<&str>) -> Self {
        Self {
            target: target.to_string(),
            cookie: cookie.map(String::from),
        }
    }

    /// Build a request from a raw `Cookie:` header, picking out `cookie_name`
    pub fn from_cookie_header(target: &str, header: Option<&str>, cookie_name: &str) -> Self {
        Self {
            target: target.to_string(),
            cookie: header.and_then(|h| cookie::find(h, cookie_name)),
        }
    }

    /// The path portion of the target
    pub fn pathname(&self) -> &str {
        let end = self
            .target
            .find(|c| c == '?' || c == '#')
            .unwrap_or(self.target.len());
        &self.target[..end]
    }
}

/// What to do with a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    RedirectToLogin {
        from: String,
    },
    RedirectToUnauthorized {
        from: String,
        required: Vec<Role>,
        current: Role,
    },
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::RedirectToLogin { .. } => "redirect_login",
            Decision::RedirectToUnauthorized { .. } => "redirect_unauthorized",
        }
    }
}

/// A decision plus the facts that led to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub path: String,
    pub decision: Decision,
    /// Prefix of the matched route, if any
    pub route: Option<String>,
    pub role: Role,
    /// Set when the session cookie was looked at and rejected
    pub invalid: Option<InvalidReason>,
    /// True when the path is outside the matcher and was never evaluated
    pub skipped: bool,
}

/// The access gate
#[derive(Debug, Clone)]
pub struct Gate {
    table: PolicyTable,
    settings: GateConfig,
}

impl Gate {
    pub fn new(table: PolicyTable, settings: GateConfig) -> Self {
        Self { table, settings }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(PolicyTable::from_config(config), config.gate.clone())
    }

    pub fn table(&self) -> &PolicyTable {
        &self.table
    }

    pub fn settings(&self) -> &GateConfig {
        &self.settings
    }

    /// Build a request from a raw `Cookie:` header using the configured cookie name
    pub fn request(&self, target: &str, cookie_header: Option<&str>) -> Request {
        Request::from_cookie_header(target, cookie_header, &self.settings.cookie_name)
    }

    /// Decide on `path` with the given session cookie value, at the current time
    pub fn authorize(&self, path: &str, cookie: Option<&str>) -> Decision {
        self.authorize_at(path, cookie, now_ms())
    }

    /// Decide on `path` with the given session cookie value at `now_ms`
    pub fn authorize_at(&self, path: &str, cookie: Option<&str>, now_ms: i64) -> Decision {
        self.evaluate(&Request::new(path, cookie), now_ms).decision
    }

    /// Full evaluation of a request at `now_ms`
    pub fn evaluate(&self, request: &Request, now_ms: i64) -> Evaluation {
        let path = request.pathname();
        let mut eval = Evaluation {
            path: path.to_string(),
            decision: Decision::Allow,
            route: None,
            role: Role::Guest,
            invalid: None,
            skipped: false,
        };

        if !config::in_scope(&self.settings.matcher, path) {
            eval.skipped = true;
            return eval;
        }

        let Some(route) = self.table.match_path(path) else {
            return eval;
        };
        eval.route = Some(route.prefix.clone());

        let check = extract_session(
            request.cookie.as_deref(),
            now_ms,
            self.settings.max_session_age_ms(),
        );
        if let SessionCheck::Invalid(reason) = &check {
            tracing::debug!(path, route = %route.prefix, %reason, "invalid session, redirecting to login");
            eval.invalid = Some(reason.clone());
            eval.decision = Decision::RedirectToLogin {
                from: path.to_string(),
            };
            return eval;
        }

        let role = resolve_role(&check);
        eval.role = role;
        if !route.permits(role, self.settings.mode) {
            tracing::debug!(
                path,
                route = %route.prefix,
                role = %role,
                required = %join_roles(&route.allowed),
                "role not permitted"
            );
            eval.decision = Decision::RedirectToUnauthorized {
                from: path.to_string(),
                required: route.allowed.clone(),
                current: role,
            };
        }

        eval
    }

    /// Redirect target for a decision, or `None` to pass the request through.
    /// Query values are form-urlencoded.
    pub fn location(&self, decision: &Decision) -> Option<String> {
        match decision {
            Decision::Allow => None,
            Decision::RedirectToLogin { from } => {
                let query = form_urlencoded::Serializer::new(String::new())
                    .append_pair("from", from)
                    .finish();
                Some(format!("{}?{}", self.settings.login_path, query))
            }
            Decision::RedirectToUnauthorized {
                from,
                required,
                current,
            } => {
                let query = form_urlencoded::Serializer::new(String::new())
                    .append_pair("from", from)
                    .append_pair("required", &join_roles(required))
                    .append_pair("current", current.as_str())
                    .finish();
                Some(format!("{}?{}", self.settings.unauthorized_path, query))
            }
        }
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
