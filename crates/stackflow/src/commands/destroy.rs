use super::{Project, apply::print_result, cancel_on_ctrl_c, plan::print_plan};
use colored::Colorize;
use stackflow_core::RunStatus;

pub async fn handle(project: &Project, yes: bool) -> anyhow::Result<()> {
    // only the stack name is needed; resources come from the recorded state
    let stack = project.load_stack()?;
    project.print_header(&stack);

    let engine = project.engine();
    let plan = engine.plan_destroy(stack.name()).await?;
    println!();
    print_plan(&plan);

    if plan.is_empty() {
        return Ok(());
    }

    if !yes {
        println!();
        println!(
            "{}",
            format!(
                "Warning: every resource of {} will be deleted (retained ones are only forgotten).",
                stack.name()
            )
            .yellow()
        );
        println!("Re-run with --yes to destroy");
        return Ok(());
    }

    println!();
    println!("{}", "Destroying...".red().bold());

    let cancel = cancel_on_ctrl_c();
    let result = engine.destroy(stack.name(), &cancel).await?;

    println!();
    print_result(&result);

    if result.status != RunStatus::Succeeded {
        anyhow::bail!("Destroy {}: {}", result.status, result.summary());
    }
    Ok(())
}
