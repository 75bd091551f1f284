//! Start every installed module and record what happened.

use std::fmt;

use crate::contracts::{ModuleInfo, ModuleRuntime};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationOutcome {
    Started,
    AlreadyActive,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ActivationRecord {
    pub module: ModuleInfo,
    pub outcome: ActivationOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct ActivationReport {
    pub records: Vec<ActivationRecord>,
}

impl ActivationReport {
    pub fn failures(&self) -> impl Iterator<Item = &ActivationRecord> {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, ActivationOutcome::Failed(_)))
    }

    /// Fixed-width table, one row per module.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for r in &self.records {
            let status = match r.outcome {
                ActivationOutcome::Failed(_) => "*FAILED*",
                _ => "STARTED",
            };
            out.push_str(&format!(
                "{:>5} {:<70} | {:<20} | {} | {}\n",
                format!("[{}]", r.module.id),
                r.module.symbolic_name,
                r.module.version,
                status,
                r.module.location,
            ));
        }
        out
    }
}

impl fmt::Display for ActivationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Start every module in id order. A module that fails to start is
/// recorded and logged; it never stops the others from starting.
pub async fn activate_all(runtime: &dyn ModuleRuntime) -> ActivationReport {
    let mut report = ActivationReport::default();
    for module in runtime.modules() {
        let info = module.info().clone();
        let outcome = if module.state() == crate::contracts::ModuleState::Active {
            ActivationOutcome::AlreadyActive
        } else {
            match module.start().await {
                Ok(()) => ActivationOutcome::Started,
                Err(err) => {
                    tracing::warn!(module = %info.symbolic_name, error = %format!("{err:#}"), "module failed to start");
                    ActivationOutcome::Failed(format!("{err:#}"))
                }
            }
        };
        report.records.push(ActivationRecord {
            module: info,
            outcome,
        });
    }
    report
}
