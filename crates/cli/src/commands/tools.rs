//! `thinkloop tools`: list the built-in tools.

use super::load_config;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let registry = thinkloop_tools::default_registry(&config.tools)
        .map_err(|e| format!("Invalid tools workspace: {e}"))?;

    println!("Workspace: {}", config.tools.resolved_workspace().display());
    println!();

    for tool in registry.list() {
        let flag = if tool.dangerous { " ⚠️  dangerous" } else { "" };
        println!("{} [{}]{flag}", tool.name, tool.category);
        println!("    {}", tool.description);
        for param in &tool.parameters {
            let required = if param.required { "required" } else { "optional" };
            println!(
                "    - {} ({}, {required}): {}",
                param.name,
                param.kind.as_str(),
                param.description
            );
        }
        println!();
    }
    Ok(())
}
