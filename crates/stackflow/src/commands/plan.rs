use super::Project;
use colored::Colorize;
use stackflow_core::{Action, Plan, PlanKind, RemovalPolicy};

pub async fn handle(project: &Project) -> anyhow::Result<()> {
    let stack = project.load_stack()?;
    project.print_header(&stack);

    let engine = project.engine();
    let plan = engine.plan(&stack).await?;

    println!();
    print_plan(&plan);
    Ok(())
}

/// Print every step with its action symbol, then the summary line
pub fn print_plan(plan: &Plan) {
    if plan.is_empty() {
        match plan.kind {
            PlanKind::Apply => println!("{}", "No resources declared".yellow()),
            PlanKind::Destroy => println!("{}", "Nothing recorded to destroy".yellow()),
        }
        return;
    }

    println!("{}", "Plan:".blue().bold());
    for step in &plan.steps {
        let symbol = step.action.symbol();
        let line = format!("  {} {} ({})", symbol, step.label(), step.kind);
        let line = match step.action {
            Action::Create => line.green(),
            Action::Update => line.yellow(),
            Action::Replace => line.magenta(),
            Action::Delete => line.red(),
            Action::NoOp => line.dimmed(),
        };
        println!("{}", line);

        if !step.changed.is_empty() {
            let attributes = step.changed.join(", ");
            match step.action {
                Action::Replace => println!("      forces replacement: {}", attributes),
                _ => println!("      changed: {}", attributes),
            }
        }
        if let Some(prior) = &step.prior
            && matches!(step.action, Action::Delete | Action::Replace)
        {
            println!("      instance: {}", prior.id.dimmed());
        }
        if step.action == Action::Delete && step.removal == RemovalPolicy::Retain {
            println!("      retained: only forgotten, the instance is left in place");
        }
    }

    println!();
    if plan.has_changes {
        println!("{}", plan.summary().to_string().bold());
    } else {
        println!(
            "{} ({})",
            "No changes".green().bold(),
            plan.summary()
        );
    }
}
