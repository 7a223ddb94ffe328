use super::Project;
use colored::Colorize;

/// Print the resources grouped in waves: every resource of a wave only
/// depends on resources of earlier waves.
pub async fn handle(project: &Project) -> anyhow::Result<()> {
    let stack = project.load_stack()?;
    let graph = stack.build()?;

    println!("Stack: {}", stack.name().cyan());
    for (i, wave) in graph.waves().iter().enumerate() {
        println!();
        println!("{}", format!("Wave {}", i + 1).blue().bold());
        for resource in wave {
            let dependencies = graph.dependencies_of(&resource.name);
            if dependencies.is_empty() {
                println!("  {} ({})", resource.name, resource.kind.dimmed());
            } else {
                println!(
                    "  {} ({}) after {}",
                    resource.name,
                    resource.kind.dimmed(),
                    dependencies.join(", ")
                );
            }
        }
    }
    Ok(())
}
