use super::{Project, cancel_on_ctrl_c, plan::print_plan};
use colored::Colorize;
use stackflow_cloud::{ExecutionResult, Outcome};
use stackflow_core::RunStatus;

pub async fn handle(project: &Project, yes: bool) -> anyhow::Result<()> {
    println!("{}", "Planning...".blue().bold());
    let stack = project.load_stack()?;
    project.print_header(&stack);

    let engine = project.engine();
    let plan = engine.plan(&stack).await?;
    println!();
    print_plan(&plan);

    if !plan.has_changes {
        println!();
        println!("{}", "✓ Everything is up to date".green().bold());
        return Ok(());
    }

    if !yes {
        println!();
        println!(
            "{}",
            "Warning: this will create, modify or delete real resources.".yellow()
        );
        println!("Re-run with --yes to apply");
        return Ok(());
    }

    println!();
    println!(
        "{}",
        format!("Applying with concurrency {}...", project.settings.concurrency).blue()
    );

    let cancel = cancel_on_ctrl_c();
    let result = engine.apply(&stack, &cancel).await?;

    println!();
    print_result(&result);

    if result.status != RunStatus::Succeeded {
        anyhow::bail!("Apply {}: {}", result.status, result.summary());
    }

    let exports = result.exports(&stack)?;
    if !exports.is_empty() {
        println!();
        println!("{}", "Outputs:".blue().bold());
        for (name, value) in &exports {
            println!("  {} = {}", name.cyan(), super::outputs::display_value(value));
        }
    }
    Ok(())
}

/// One line per executed step, then the run summary
pub fn print_result(result: &ExecutionResult) {
    for record in &result.records {
        let label = record.label();
        let line = match record.outcome {
            Outcome::Created | Outcome::Updated | Outcome::Replaced => {
                format!("  ✓ {} {}", label, record.outcome).green()
            }
            Outcome::Deleted => format!("  ✓ {} {}", label, record.outcome).red(),
            Outcome::Retained => format!("  ✓ {} retained (left in place)", label).yellow(),
            Outcome::Unchanged => format!("  = {} unchanged", label).dimmed(),
            Outcome::Failed => format!("  ✗ {} failed", label).red().bold(),
            Outcome::Skipped => format!("  - {} skipped (a dependency failed)", label).yellow(),
            Outcome::Cancelled => format!("  - {} cancelled", label).yellow(),
        };
        println!("{}", line);

        if let Some(error) = &record.error {
            println!("      {}", error.red());
        }
        if record.attempts > 1 {
            println!("      attempts: {}", record.attempts);
        }
    }

    println!();
    let summary = format!(
        "{} in {:.1}s: {}",
        result.status,
        result.duration_ms as f64 / 1000.0,
        result.summary()
    );
    match result.status {
        RunStatus::Succeeded => println!("{}", summary.green().bold()),
        RunStatus::Failed => println!("{}", summary.red().bold()),
        RunStatus::Cancelled => println!("{}", summary.yellow().bold()),
    }
}
