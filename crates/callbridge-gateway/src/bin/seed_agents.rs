//! Seed demo agents into the agent store.
//! Run with the gateway stopped (sled holds an exclusive lock): cargo run --bin seed-agents

use anyhow::Context;
use callbridge_core::{AgentProfile, AgentStore};
use callbridge_gateway::GatewayConfig;

fn demo_agents() -> Vec<AgentProfile> {
    let mut support = AgentProfile::new("support", "Customer Support", "Joanna");
    support.business_name = "Callbridge Support".into();
    support.initial_message = "Hello! I am your support assistant. How can I help you today?".into();
    support.custom_prompt =
        "You are a helpful, empathetic customer support agent. Keep your answers concise and helpful.".into();

    let mut sales = AgentProfile::new("sales", "Sales Representative", "Matthew");
    sales.business_name = "Callbridge Sales".into();
    sales.initial_message = "Hi there! I'm here to help you find the best products. What are you looking for?".into();
    sales.custom_prompt =
        "You are an energetic and persuasive sales representative. Focus on benefits and closing the deal. Keep it short."
            .into();
    sales.llm_model = "anthropic/claude-3-haiku".into();

    let mut tech = AgentProfile::new("tech", "Tech Support", "Stephen");
    tech.business_name = "Callbridge Tech".into();
    tech.initial_message = "Greetings. I am the technical support unit. State your technical issue.".into();
    tech.custom_prompt =
        "You are a precise and logical technical support engineer. Provide step-by-step solutions.".into();
    tech.llm_model = "meta-llama/llama-3-70b-instruct".into();

    vec![support, sales, tech]
}

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cfg = GatewayConfig::load().context("loading gateway config")?;
    let store = AgentStore::open(Some(&cfg.storage_path))
        .with_context(|| format!("opening agent store at {}", cfg.storage_path))?;

    let removed = store.clear_agents()?;
    println!("[SEED] Cleared {} existing agent(s) in {}", removed, cfg.storage_path);

    for agent in demo_agents() {
        store.upsert_agent(&agent)?;
        println!("[SEED] {:<22} id={}  media stream: /media-stream/{}", agent.name, agent.id, agent.id);
    }
    println!("[SEED] Complete.");
    Ok(())
}
