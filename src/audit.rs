use crate::policy::{Decision, Evaluation};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Append-only JSONL log of gate decisions
pub struct AuditLog {
    run_id: String,
    file: File,
}

#[derive(Serialize)]
struct Event<'a> {
    ts: DateTime<Utc>,
    run_id: &'a str,
    #[serde(rename = "type")]
    event_type: &'a str,
    #[serde(flatten)]
    data: serde_json::Value,
}

impl AuditLog {
    pub fn open(path: &Path, run_id: &str) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening audit log {}", path.display()))?;

        Ok(Self {
            run_id: run_id.to_string(),
            file,
        })
    }

    pub fn log(&mut self, event_type: &str, data: serde_json::Value) -> Result<()> {
        let event = Event {
            ts: Utc::now(),
            run_id: &self.run_id,
            event_type,
            data,
        };
        let line = serde_json::to_string(&event)?;
        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        Ok(())
    }

    /// Log one gate decision
    pub fn gate_decision(&mut self, eval: &Evaluation, location: Option<&str>) -> Result<()> {
        let mut data = serde_json::json!({
            "path": eval.path,
            "decision": eval.decision.as_str(),
            "route": eval.route,
            "role": eval.role,
            "location": location,
        });
        if let Some(reason) = &eval.invalid {
            data["invalid_reason"] = serde_json::json!(reason.as_str());
            data["invalid_detail"] = serde_json::json!(reason.to_string());
        }
        if let Decision::RedirectToUnauthorized { required, .. } = &eval.decision {
            data["required"] = serde_json::json!(required);
        }
        if eval.skipped {
            data["skipped"] = serde_json::json!(true);
        }
        self.log("gate_decision", data)
    }

    /// Log a replay input line that could not be read
    pub fn replay_error(&mut self, line: usize, error: &str) -> Result<()> {
        self.log(
            "replay_error",
            serde_json::json!({ "line": line, "error": error }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::policy::{Gate, Request};

    const NOW: i64 = 1_700_000_000_000;

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_gate_decision_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("gate.jsonl");
        let gate = Gate::from_config(&Config::with_builtin_routes());
        let mut log = AuditLog::open(&path, "run-1").unwrap();

        let eval = gate.evaluate(&Request::new("/admin/hospital", None), NOW);
        let location = gate.location(&eval.decision);
        log.gate_decision(&eval, location.as_deref()).unwrap();

        let cookie = format!(r#"{{"uid":"u1","role":"patient","timestamp":{}}}"#, NOW);
        let eval = gate.evaluate(&Request::new("/admin/hospital", Some(&cookie)), NOW);
        log.gate_decision(&eval, gate.location(&eval.decision).as_deref())
            .unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);

        assert_eq!(lines[0]["type"], "gate_decision");
        assert_eq!(lines[0]["run_id"], "run-1");
        assert_eq!(lines[0]["decision"], "redirect_login");
        assert_eq!(lines[0]["invalid_reason"], "missing");
        assert_eq!(lines[0]["role"], "guest");
        assert!(lines[0]["ts"].is_string());

        assert_eq!(lines[1]["decision"], "redirect_unauthorized");
        assert_eq!(lines[1]["role"], "patient");
        assert_eq!(lines[1]["required"], serde_json::json!(["admin"]));
        assert!(lines[1].get("invalid_reason").is_none());
    }

    #[test]
    fn test_appends_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gate.jsonl");

        AuditLog::open(&path, "a")
            .unwrap()
            .replay_error(3, "bad json")
            .unwrap();
        AuditLog::open(&path, "b")
            .unwrap()
            .replay_error(7, "bad json")
            .unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["run_id"], "a");
        assert_eq!(lines[1]["line"], 7);
    }
}
