use crate::{
    audit::AuditLog,
    config::Config,
    policy::{now_ms, Evaluation, Gate, Request},
    role::{join_roles, Role},
    session::{is_valid_wallet_address, Session},
};
use anyhow::{anyhow, bail, Context as _, Result};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::ExitCode;

/// Exit code for a request that would be redirected
const EXIT_REDIRECT: u8 = 2;

pub struct Context {
    pub config: Config,
    pub gate: Gate,
    pub audit: RefCell<Option<AuditLog>>,
}

impl Context {
    pub fn new(config: Config, audit: Option<AuditLog>) -> Self {
        let gate = Gate::from_config(&config);
        Self {
            config,
            gate,
            audit: RefCell::new(audit),
        }
    }

    /// Evaluate a request and record it in the audit log, if one is open
    fn decide(&self, request: &Request, now: i64) -> Result<Report> {
        let eval = self.gate.evaluate(request, now);
        let location = self.gate.location(&eval.decision);
        if let Some(audit) = self.audit.borrow_mut().as_mut() {
            audit.gate_decision(&eval, location.as_deref())?;
        }
        Ok(Report::new(&eval, location))
    }
}

/// One evaluated request, as printed by `check --json` and `replay`
#[derive(Debug, Serialize)]
pub struct Report {
    pub path: String,
    pub decision: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
}

impl Report {
    fn new(eval: &Evaluation, location: Option<String>) -> Self {
        Self {
            path: eval.path.clone(),
            decision: eval.decision.as_str(),
            location,
            role: eval.role,
            route: eval.route.clone(),
            invalid_reason: eval.invalid.as_ref().map(|r| r.to_string()),
        }
    }

    fn is_allow(&self) -> bool {
        self.location.is_none()
    }
}

/// `check`: evaluate a single request
pub fn run_check(
    ctx: &Context,
    path: &str,
    cookie: Option<&str>,
    cookie_header: Option<&str>,
    now: Option<i64>,
    json: bool,
) -> Result<ExitCode> {
    let request = match cookie_header {
        Some(header) => ctx.gate.request(path, Some(header)),
        None => Request::new(path, cookie),
    };
    let report = ctx.decide(&request, now.unwrap_or_else(now_ms))?;

    if json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        println!("{}", describe(report.location.as_deref()));
        if let Some(reason) = &report.invalid_reason {
            eprintln!("session: {}", reason);
        }
    }

    Ok(if report.is_allow() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_REDIRECT)
    })
}

/// One line of `replay` input
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplayLine {
    path: String,
    #[serde(default)]
    cookie: Option<String>,
    #[serde(default)]
    cookie_header: Option<String>,
    #[serde(default)]
    now: Option<i64>,
}

/// `replay`: evaluate JSON-lines requests from a file (`-` for stdin)
pub fn run_replay(ctx: &Context, input: &Path) -> Result<ExitCode> {
    let reader: Box<dyn BufRead> = if input == Path::new("-") {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let file = std::fs::File::open(input)
            .with_context(|| format!("opening {}", input.display()))?;
        Box::new(BufReader::new(file))
    };

    let mut errors = 0usize;
    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.with_context(|| format!("reading line {}", line_no))?;
        if line.trim().is_empty() {
            continue;
        }

        let entry: ReplayLine = match serde_json::from_str(&line) {
            Ok(entry) => entry,
            Err(e) => {
                errors += 1;
                tracing::warn!(line = line_no, error = %e, "skipping unreadable replay line");
                eprintln!("line {}: {}", line_no, e);
                if let Some(audit) = ctx.audit.borrow_mut().as_mut() {
                    audit.replay_error(line_no, &e.to_string())?;
                }
                continue;
            }
        };

        let request = match &entry.cookie_header {
            Some(header) => ctx.gate.request(&entry.path, Some(header)),
            None => Request::new(&entry.path, entry.cookie.as_deref()),
        };
        let report = ctx.decide(&request, entry.now.unwrap_or_else(now_ms))?;
        println!("{}", serde_json::to_string(&report)?);
    }

    Ok(if errors == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// `routes`: print the effective policy table
pub fn run_routes(ctx: &Context) -> Result<ExitCode> {
    let settings = ctx.gate.settings();
    println!("Cookie: {}", settings.cookie_name);
    println!("Max session age: {}s", settings.max_session_age_secs);
    println!("Mode: {}", settings.mode.as_str());
    if settings.matcher.is_empty() {
        println!("Matcher: <all paths>");
    } else {
        println!("Matcher: {}", settings.matcher.join(", "));
    }
    println!("\nRoutes:");
    if ctx.gate.table().routes().is_empty() {
        println!("  (none, every path is public)");
    }
    for route in ctx.gate.table().routes() {
        println!("  {:<28} {}", route.prefix, join_roles(&route.allowed));
    }
    Ok(ExitCode::SUCCESS)
}

/// `mint`: print a session cookie payload for local testing
pub fn run_mint(
    ctx: &Context,
    subject: &str,
    role: &str,
    wallet: Option<&str>,
    age_secs: u64,
    encode: bool,
    header: bool,
) -> Result<ExitCode> {
    if subject.is_empty() {
        bail!("Subject must not be empty");
    }
    let role = Role::from_str(role)
        .ok_or_else(|| anyhow!("Invalid role: {}. Use: admin, provider, patient, guest", role))?;

    let age_ms = i64::try_from(age_secs)
        .ok()
        .and_then(|s| s.checked_mul(1000))
        .ok_or_else(|| anyhow!("Age out of range: {}s", age_secs))?;
    let mut session = Session::issue(subject, role, now_ms().saturating_sub(age_ms));
    if let Some(address) = wallet {
        if !is_valid_wallet_address(address) {
            bail!("Invalid wallet address: {}", address);
        }
        session = session.with_wallet(address);
    }

    let value = if encode || header {
        session.to_encoded_cookie_value()?
    } else {
        session.to_cookie_value()?
    };
    if header {
        println!("{}={}", ctx.config.gate.cookie_name, value);
    } else {
        println!("{}", value);
    }
    Ok(ExitCode::SUCCESS)
}

/// `validate`: report every configuration problem
pub fn run_validate(ctx: &Context) -> Result<ExitCode> {
    match ctx.config.validate() {
        Ok(()) => {
            println!(
                "Configuration OK ({} routes)",
                ctx.config.routes.len()
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(errors) => {
            for error in &errors {
                eprintln!("{}", error);
            }
            eprintln!("{} error(s)", errors.len());
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Render a redirect location the way `check` prints it
fn describe(location: Option<&str>) -> String {
    match location {
        None => "ALLOW".to_string(),
        Some(location) => format!("REDIRECT {}", location),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Decision;
    use std::io::Write;

    const NOW: i64 = 1_700_000_000_000;

    fn context() -> Context {
        Context::new(Config::with_builtin_routes(), None)
    }

    #[test]
    fn test_decide_reports_redirect() {
        let ctx = context();
        let report = ctx
            .decide(&Request::new("/onboarding/hospital/step-2", None), NOW)
            .unwrap();
        assert_eq!(report.decision, "redirect_login");
        assert_eq!(
            report.location.as_deref(),
            Some("/login?from=%2Fonboarding%2Fhospital%2Fstep-2")
        );
        assert_eq!(report.route.as_deref(), Some("/onboarding/hospital"));
        assert_eq!(report.invalid_reason.as_deref(), Some("no session cookie"));
    }

    #[test]
    fn test_report_json_omits_empty_fields() {
        let ctx = context();
        let report = ctx.decide(&Request::new("/about", None), NOW).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "path": "/about", "decision": "allow", "role": "guest" })
        );
    }

    #[test]
    fn test_decide_writes_audit_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gate.jsonl");
        let audit = AuditLog::open(&path, "test").unwrap();
        let ctx = Context::new(Config::with_builtin_routes(), Some(audit));

        ctx.decide(&Request::new("/admin/hospital", None), NOW).unwrap();
        ctx.decide(&Request::new("/", None), NOW).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_replay_counts_bad_lines() {
        let mut input = tempfile::NamedTempFile::new().unwrap();
        writeln!(input, r#"{{"path":"/admin/hospital"}}"#).unwrap();
        writeln!(input).unwrap();
        writeln!(input, "not json").unwrap();
        writeln!(
            input,
            r#"{{"path":"/patient/pwa","cookie":"{{\"uid\":\"u\",\"role\":\"patient\",\"timestamp\":{}}}","now":{}}}"#,
            NOW, NOW
        )
        .unwrap();

        let code = run_replay(&context(), input.path()).unwrap();
        assert_eq!(code, ExitCode::FAILURE);
    }

    #[test]
    fn test_replay_all_good() {
        let mut input = tempfile::NamedTempFile::new().unwrap();
        writeln!(input, r#"{{"path":"/dashboard"}}"#).unwrap();
        writeln!(input, r#"{{"path":"/admin/hospital","cookieHeader":"a=b"}}"#).unwrap();
        let code = run_replay(&context(), input.path()).unwrap();
        assert_eq!(code, ExitCode::SUCCESS);
    }

    #[test]
    fn test_replay_missing_file() {
        let err = run_replay(&context(), Path::new("/nonexistent/requests.jsonl")).unwrap_err();
        assert!(format!("{:#}", err).contains("opening"));
    }

    #[test]
    fn test_check_exit_codes() {
        let ctx = context();
        let code = run_check(&ctx, "/dashboard", None, None, Some(NOW), true).unwrap();
        assert_eq!(code, ExitCode::SUCCESS);
        let code = run_check(&ctx, "/admin/hospital", None, None, Some(NOW), true).unwrap();
        assert_eq!(code, ExitCode::from(EXIT_REDIRECT));
    }

    #[test]
    fn test_mint_rejects_bad_input() {
        let ctx = context();
        assert!(run_mint(&ctx, "u1", "root", None, 0, false, false).is_err());
        assert!(run_mint(&ctx, "", "admin", None, 0, false, false).is_err());
        assert!(run_mint(&ctx, "u1", "admin", Some("mock-user"), 0, false, false).is_err());
        assert!(run_mint(&ctx, "u1", "admin", None, u64::MAX, false, false).is_err());
        assert!(run_mint(&ctx, "u1", "admin", None, 0, true, true).is_ok());
    }

    #[test]
    fn test_validate_exit_code() {
        assert_eq!(run_validate(&context()).unwrap(), ExitCode::SUCCESS);

        let mut config = Config::with_builtin_routes();
        config.gate.max_session_age_secs = 0;
        let ctx = Context::new(config, None);
        assert_eq!(run_validate(&ctx).unwrap(), ExitCode::FAILURE);
    }

    #[test]
    fn test_describe() {
        let ctx = context();
        assert_eq!(describe(ctx.gate.location(&Decision::Allow).as_deref()), "ALLOW");
        let decision = Decision::RedirectToUnauthorized {
            from: "/patient/pwa".to_string(),
            required: vec![Role::Patient, Role::Admin],
            current: Role::Provider,
        };
        assert_eq!(
            describe(ctx.gate.location(&decision).as_deref()),
            "REDIRECT /unauthorized?from=%2Fpatient%2Fpwa&required=patient%2Cadmin&current=provider"
        );
    }
}
