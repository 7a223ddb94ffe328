use super::Project;
use colored::Colorize;

pub async fn handle(project: &Project, json: bool) -> anyhow::Result<()> {
    let stack = project.load_stack()?;
    let engine = project.engine();
    let exports = engine.outputs(&stack).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&exports)?);
        return Ok(());
    }

    if exports.is_empty() {
        println!("{}", "No exports declared".yellow());
        return Ok(());
    }
    for (name, value) in &exports {
        println!("{} = {}", name.cyan(), display_value(value));
    }
    Ok(())
}

/// Strings without quotes, anything else as JSON
pub fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
