//! Output formatting for CLI commands.
//!
//! Every formatter returns the rendered text; the binary decides where it
//! is written. Secret outputs are masked unless explicitly requested.

use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{StackConfig, ValidationResult};
use crate::error::{PoisonedDependencyError, ProviderError};
use crate::graph::{DeclarationMode, ResolveAction, ResourceId, SECRET_PLACEHOLDER};
use crate::planner::{ActionType, DeploymentPlan, TeardownReport};
use crate::reconciler::{DestroyReport, StackOutputs, UpReport};
use crate::state::{LockInfo, ResourceRecord, StackState};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "Wave")]
    wave: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Resolved resource row for table display.
#[derive(Tabled)]
struct ResolvedRow {
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "ID")]
    provider_id: String,
}

/// Recorded resource row for table display.
#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Mode")]
    mode: String,
    #[tabled(rename = "ID")]
    provider_id: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a deployment plan. `detailed` adds the known properties of
    /// every resource.
    #[must_use]
    pub fn format_plan(&self, plan: &DeploymentPlan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(plan),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    fn format_plan_text(plan: &DeploymentPlan, detailed: bool) -> String {
        if !plan.has_changes() {
            return format!(
                "{} No changes required - {}.\n",
                "✓".green(),
                plan.summary()
            );
        }

        let mut output = String::new();
        let _ = writeln!(output, "\nDeployment Plan");
        let _ = writeln!(output, "   Config hash: {}\n", short(&plan.config_hash));

        let rows: Vec<PlanActionRow> = plan
            .actions
            .iter()
            .map(|a| PlanActionRow {
                wave: a.wave,
                action: Self::format_action_type(a.action_type),
                resource: a.resource.to_string(),
                reason: Self::truncate(&a.reason, 48),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            for action in plan.actions.iter().filter(|a| !a.properties.is_null()) {
                let _ = writeln!(output, "\n{}", action.resource.to_string().bold());
                let properties =
                    serde_json::to_string_pretty(&action.properties).unwrap_or_default();
                for line in properties.lines() {
                    let _ = writeln!(output, "   {line}");
                }
            }
        }

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to delete ({} waves)\n",
            plan.count(ActionType::Create).to_string().green(),
            (plan.count(ActionType::Update) + plan.count(ActionType::Refresh))
                .to_string()
                .yellow(),
            plan.count(ActionType::Delete).to_string().red(),
            plan.wave_count()
        );
        output
    }

    /// Formats the outcome of `up`.
    #[must_use]
    pub fn format_up(&self, report: &UpReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(&UpJson::from(report)),
            OutputFormat::Text => Self::format_up_text(report),
        }
    }

    fn format_up_text(report: &UpReport) -> String {
        let resolution = &report.resolution;
        let mut output = if report.is_success() {
            format!("{} Stack is up to date\n\n", "✓".green())
        } else if resolution.cancelled {
            format!("{} Update cancelled\n\n", "⚠".yellow())
        } else {
            format!("{} Update failed\n\n", "✗".red())
        };

        let rows: Vec<ResolvedRow> = resolution
            .resolved
            .iter()
            .map(|r| ResolvedRow {
                action: Self::format_resolve_action(r.action),
                resource: r.id.to_string(),
                provider_id: Self::truncate(&r.provider_id, 36),
            })
            .collect();
        if !rows.is_empty() {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        let _ = write!(
            output,
            "\nResources: {} created, {} updated, {} unchanged, {} read, {} deleted\n",
            resolution.count(ResolveAction::Created),
            resolution.count(ResolveAction::Updated),
            resolution.count(ResolveAction::Unchanged),
            resolution.count(ResolveAction::Read),
            report.pruned.deleted.len()
        );
        let _ = writeln!(output, "Duration: {:.1}s", resolution.elapsed.as_secs_f64());

        Self::write_failures(
            &mut output,
            &resolution.failures,
            &resolution.poisoned,
            &resolution.skipped,
        );
        Self::write_failures(
            &mut output,
            &report.pruned.failures,
            &report.pruned.poisoned,
            &report.pruned.skipped,
        );

        if let Some(outputs) = &report.outputs {
            Self::write_outputs(&mut output, outputs);
        }
        output
    }

    fn write_outputs(output: &mut String, outputs: &StackOutputs) {
        let _ = writeln!(output, "\nOutputs:");
        let _ = writeln!(output, "   domain: https://{}", outputs.domain);
        if !outputs.ingress_ips.is_empty() {
            let _ = writeln!(output, "   ingress: {}", outputs.ingress_ips.join(", "));
        }
        if outputs.kubeconfig {
            let _ = writeln!(
                output,
                "   kubeconfig: {} (halldyll kubeconfig)",
                SECRET_PLACEHOLDER.dimmed()
            );
        }
    }

    /// Formats the outcome of `destroy`.
    #[must_use]
    pub fn format_destroy(&self, report: &DestroyReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(&TeardownJson::from(&report.teardown)),
            OutputFormat::Text => {
                let teardown = &report.teardown;
                let mut output = if teardown.is_success() {
                    format!("{} Stack destroyed\n\n", "✓".green())
                } else {
                    format!("{} Destroy incomplete\n\n", "✗".red())
                };
                for id in &teardown.deleted {
                    let _ = writeln!(output, "   {} {id}", "-".red());
                }
                for id in &teardown.forgotten {
                    let _ = writeln!(output, "   {} {id} (lookup, forgotten)", "-".dimmed());
                }
                Self::write_failures(
                    &mut output,
                    &teardown.failures,
                    &teardown.poisoned,
                    &teardown.skipped,
                );
                if !report.state.is_empty() {
                    let _ = writeln!(
                        output,
                        "\n{} resource(s) still recorded.",
                        report.state.len()
                    );
                }
                output
            }
        }
    }

    fn write_failures(
        output: &mut String,
        failures: &[ProviderError],
        poisoned: &[PoisonedDependencyError],
        skipped: &[ResourceId],
    ) {
        if !failures.is_empty() {
            let _ = writeln!(output, "\n{} Failed:", "✗".red());
            for failure in failures {
                let _ = writeln!(output, "   - {failure}");
            }
        }
        if !poisoned.is_empty() {
            let _ = writeln!(output, "\n{} Not attempted:", "⚠".yellow());
            for p in poisoned {
                let _ = writeln!(output, "   - {p}");
            }
        }
        if !skipped.is_empty() {
            let _ = writeln!(output, "\n{} Cancelled before:", "⚠".yellow());
            for id in skipped {
                let _ = writeln!(output, "   - {id}");
            }
        }
    }

    /// Formats recorded state. Secret outputs are masked unless
    /// `show_secrets` is set.
    #[must_use]
    pub fn format_state(&self, state: &StackState, show_secrets: bool) -> String {
        match self.format {
            OutputFormat::Json => {
                if show_secrets {
                    return to_json(state);
                }
                let mut masked = state.clone();
                for record in masked.resources.values_mut() {
                    record.outputs = masked_outputs(record);
                }
                to_json(&masked)
            }
            OutputFormat::Text => Self::format_state_text(state, show_secrets),
        }
    }

    fn format_state_text(state: &StackState, show_secrets: bool) -> String {
        let mut output = String::new();

        let _ = write!(output, "\nState: {}/{}\n\n", state.project, state.stack);
        let _ = writeln!(output, "   Version: {}", state.version);
        let _ = writeln!(output, "   Config hash: {}", short(&state.config_hash));
        let _ = writeln!(output, "   Last updated: {}", state.last_updated);
        let _ = writeln!(output, "   Resources: {}\n", state.len());

        if !state.is_empty() {
            let rows: Vec<RecordRow> = state
                .resources
                .values()
                .map(|r| RecordRow {
                    kind: r.id.kind.clone(),
                    name: r.id.name.clone(),
                    mode: match r.mode {
                        DeclarationMode::Managed => String::from("managed"),
                        DeclarationMode::Lookup => String::from("lookup"),
                    },
                    provider_id: Self::truncate(&r.provider_id, 36),
                    updated: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                })
                .collect();
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        if show_secrets {
            for record in state.resources.values() {
                let _ = writeln!(output, "\n{}", record.id.to_string().bold());
                let outputs = serde_json::to_string_pretty(&record.outputs).unwrap_or_default();
                for line in outputs.lines() {
                    let _ = writeln!(output, "   {line}");
                }
            }
        }

        if !state.history.is_empty() {
            let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
            for entry in state.history.iter().rev().take(5) {
                let status = if entry.success { "✓" } else { "✗" };
                let _ = write!(
                    output,
                    "     {status} {} - {} ({} resources)",
                    entry.timestamp.format("%Y-%m-%d %H:%M"),
                    entry.operation,
                    entry.resources.len()
                );
                if let Some(error) = &entry.error {
                    let _ = write!(output, ": {error}");
                }
                output.push('\n');
            }
        }

        output
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(
        &self,
        config: &StackConfig,
        result: &ValidationResult,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "valid": result.errors.is_empty(),
                "project": config.project.name,
                "stack": config.project.stack,
                "errors": result
                    .errors
                    .iter()
                    .map(|e| serde_json::json!({ "field": e.field, "message": e.message }))
                    .collect::<Vec<_>>(),
                "warnings": result.warnings,
            })),
            OutputFormat::Text => {
                let mut output = format!(
                    "{} Configuration is valid ({}/{})\n",
                    "✓".green(),
                    config.project.name,
                    config.project.stack
                );
                if show_warnings && !result.warnings.is_empty() {
                    let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats lock information.
    #[must_use]
    pub fn format_lock(&self, lock: &LockInfo) -> String {
        match self.format {
            OutputFormat::Json => to_json(lock),
            OutputFormat::Text => format!(
                "{} State locked by {} for {} (id {}, expires in {}s)\n",
                "🔒".yellow(),
                lock.holder,
                lock.operation,
                lock.lock_id,
                lock.remaining_secs()
            ),
        }
    }

    /// Formats a one-line status message.
    #[must_use]
    pub fn message(&self, success: bool, message: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "status": if success { "success" } else { "error" },
                "message": message,
            })),
            OutputFormat::Text if success => format!("{} {message}", "✓".green()),
            OutputFormat::Text => format!("{} {message}", "✗".red()),
        }
    }

    /// Formats an action type with color.
    fn format_action_type(action_type: ActionType) -> String {
        match action_type {
            ActionType::Create => "+create".green().to_string(),
            ActionType::Update => "~update".yellow().to_string(),
            ActionType::Refresh => "~refresh?".yellow().to_string(),
            ActionType::Delete => "-delete".red().to_string(),
            ActionType::Read => "<=read".cyan().to_string(),
            ActionType::Unchanged => "unchanged".dimmed().to_string(),
        }
    }

    /// Formats a resolve action with color.
    fn format_resolve_action(action: ResolveAction) -> String {
        match action {
            ResolveAction::Created => "+created".green().to_string(),
            ResolveAction::Updated => "~updated".yellow().to_string(),
            ResolveAction::Read => "<=read".cyan().to_string(),
            ResolveAction::Unchanged => "unchanged".dimmed().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

fn short(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}

/// Outputs of `record` with every secret path replaced by the placeholder.
fn masked_outputs(record: &ResourceRecord) -> Value {
    let mut outputs = record.outputs.clone();
    for path in &record.secret_outputs {
        let pointer = format!("/{}", path.replace('.', "/"));
        if let Some(value) = outputs.pointer_mut(&pointer) {
            *value = Value::String(SECRET_PLACEHOLDER.to_string());
        }
    }
    outputs
}

// JSON serialization helpers

#[derive(Serialize)]
struct UpJson<'a> {
    success: bool,
    cancelled: bool,
    elapsed_secs: f64,
    resources: Vec<ResolvedJson>,
    failures: Vec<String>,
    poisoned: Vec<String>,
    skipped: Vec<String>,
    pruned: TeardownJson,
    outputs: Option<&'a StackOutputs>,
}

#[derive(Serialize)]
struct ResolvedJson {
    id: String,
    action: ResolveAction,
    provider_id: String,
}

#[derive(Serialize)]
struct TeardownJson {
    success: bool,
    deleted: Vec<String>,
    forgotten: Vec<String>,
    failures: Vec<String>,
    poisoned: Vec<String>,
    skipped: Vec<String>,
}

fn strings<T: ToString>(items: &[T]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

impl<'a> From<&'a UpReport> for UpJson<'a> {
    fn from(report: &'a UpReport) -> Self {
        let resolution = &report.resolution;
        Self {
            success: report.is_success(),
            cancelled: resolution.cancelled,
            elapsed_secs: resolution.elapsed.as_secs_f64(),
            resources: resolution
                .resolved
                .iter()
                .map(|r| ResolvedJson {
                    id: r.id.to_string(),
                    action: r.action,
                    provider_id: r.provider_id.clone(),
                })
                .collect(),
            failures: strings(&resolution.failures),
            poisoned: strings(&resolution.poisoned),
            skipped: strings(&resolution.skipped),
            pruned: TeardownJson::from(&report.pruned),
            outputs: report.outputs.as_ref(),
        }
    }
}

impl From<&TeardownReport> for TeardownJson {
    fn from(report: &TeardownReport) -> Self {
        Self {
            success: report.is_success(),
            deleted: strings(&report.deleted),
            forgotten: strings(&report.forgotten),
            failures: strings(&report.failures),
            poisoned: strings(&report.poisoned),
            skipped: strings(&report.skipped),
        }
    }
}
