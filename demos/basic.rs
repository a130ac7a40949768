//! # Basic Demo
//!
//! Walks the identity engine through the canonical consolidation story:
//! a fresh primary, a linked secondary, and a merge of two clusters.

use idlink_rs::{Fragment, IdentityEngine, MemoryStore};

fn main() -> anyhow::Result<()> {
    println!("=== Idlink Basic Demo ===\n");

    let engine = IdentityEngine::new(Box::new(MemoryStore::new()));

    // A brand new customer signs up with an email.
    let view = engine.identify(&Fragment::new(Some("doc@fluxkompensator.io"), None))?;
    println!("first contact:\n{}\n", serde_json::to_string_pretty(&view)?);

    // The same email shows up again, now paired with a phone number: the
    // cluster grows a secondary carrying the new combination.
    let view = engine.identify(&Fragment::new(
        Some("doc@fluxkompensator.io"),
        Some("5551955"),
    ))?;
    println!("new phone linked:\n{}\n", serde_json::to_string_pretty(&view)?);

    // Meanwhile an apparently unrelated order arrives with only a phone.
    let view = engine.identify(&Fragment::new(None, Some("5552015")))?;
    println!("separate cluster:\n{}\n", serde_json::to_string_pretty(&view)?);

    // A later order carries the known email together with that phone,
    // proving both clusters are the same person. The older primary wins and
    // the younger one is demoted.
    let view = engine.identify(&Fragment::new(
        Some("doc@fluxkompensator.io"),
        Some("5552015"),
    ))?;
    println!("merged identity:\n{}", serde_json::to_string_pretty(&view)?);

    Ok(())
}
