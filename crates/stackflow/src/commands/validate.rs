use super::Project;
use colored::Colorize;

pub async fn handle(project: &Project) -> anyhow::Result<()> {
    println!("{}", "Validating stack...".blue());
    println!(
        "Stack file: {}",
        project.stack_file.display().to_string().cyan()
    );

    let stack = project.load_stack()?;
    let graph = stack.build()?;

    println!("{}", "✓ Stack is valid".green().bold());
    println!();
    println!("Summary:");
    println!("  Stack: {}", stack.name().cyan());
    println!(
        "  Resources: {} ({} dependencies)",
        graph.len(),
        graph.edge_count()
    );
    for resource in graph.resources() {
        let dependencies = graph.dependencies_of(&resource.name);
        if dependencies.is_empty() {
            println!("    - {} ({})", resource.name.cyan(), resource.kind);
        } else {
            println!(
                "    - {} ({}) <- {}",
                resource.name.cyan(),
                resource.kind,
                dependencies.join(", ")
            );
        }
    }

    if !stack.exports().is_empty() {
        println!("  Exports: {}", stack.exports().len());
        for export in stack.exports() {
            let sources: Vec<String> = export
                .value
                .references()
                .iter()
                .map(|r| r.to_string())
                .collect();
            println!("    - {} {}", export.name.cyan(), sources.join(" ").dimmed());
        }
    }
    Ok(())
}
