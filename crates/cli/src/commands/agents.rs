//! `thinkloop agents`: list the configured agents.

use super::load_config;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;

    for definition in config.agent_definitions() {
        let caps = definition
            .to_capabilities(&config)
            .map_err(|e| format!("Agent '{}' is invalid: {e}", definition.name))?;

        println!("{}", definition.name);
        println!("    {}", caps.description);
        if caps.authorized_tools.is_empty() {
            println!("    tools:      (all)");
        } else {
            println!("    tools:      {}", caps.authorized_tools.join(", "));
        }
        println!(
            "    limits:     {} reasoning turns, {} memory turns",
            caps.max_reasoning_turns, caps.max_memory_turns
        );
        if !caps.specialization_tags.is_empty() {
            println!("    tags:       {}", caps.specialization_tags.join(", "));
        }
        println!();
    }
    Ok(())
}
