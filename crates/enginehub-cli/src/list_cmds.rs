//! Listing commands: `engines`, `ps`, `images`, `pods`, `volumes`, `networks`.
//!
//! Every listing fans out across all connected engines unless `--engine`
//! narrows it, and prints either a table or, with `--json`, the records.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Serialize;

use enginehub_core::{EngineId, ListOptions};

use crate::session::Hub;

/// Print records as pretty JSON.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{out}");
    Ok(())
}

/// Parse repeated `key=value` filter flags into engine filters.
pub fn parse_filters(raw: &[String]) -> Result<HashMap<String, Vec<String>>> {
    let mut filters: HashMap<String, Vec<String>> = HashMap::new();
    for item in raw {
        let (key, value) = split_pair(item)?;
        filters.entry(key.to_string()).or_default().push(value.to_string());
    }
    Ok(filters)
}

/// Split `key=value`.
pub fn split_pair(item: &str) -> Result<(&str, &str)> {
    item.split_once('=')
        .filter(|(k, _)| !k.is_empty())
        .with_context(|| format!("expected key=value, got {item:?}"))
}

fn short(id: &str) -> &str {
    let id = id.strip_prefix("sha256:").unwrap_or(id);
    &id[..id.len().min(12)]
}

fn human_size(bytes: i64) -> String {
    const UNITS: [&str; 5] = ["B", "kB", "MB", "GB", "TB"];
    let mut size = bytes.max(0) as f64;
    let mut unit = 0;
    while size >= 1000.0 && unit < UNITS.len() - 1 {
        size /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}B")
    } else {
        format!("{size:.1}{}", UNITS[unit])
    }
}

/// `enginehub engines`: registered endpoints, optionally with engine info.
pub async fn run_engines(hub: &Hub, info: bool, json: bool) -> Result<()> {
    let connections = hub.registry.connections();

    if info {
        let infos = hub.registry.list_infos(&ListOptions::default()).await?;
        if json {
            return print_json(&infos);
        }
        println!(
            "{:<24} {:<10} {:<12} {:>5} {:>10} {:>11}",
            "ENGINE", "KIND", "VERSION", "CPUS", "MEMORY", "CONTAINERS"
        );
        for i in &infos {
            println!(
                "{:<24} {:<10} {:<12} {:>5} {:>10} {:>11}",
                i.engine.engine_id.as_str(),
                i.engine.engine_kind.to_string(),
                i.server_version,
                i.cpus,
                human_size(i.memory),
                format!("{}/{}", i.containers_running, i.containers),
            );
        }
        return Ok(());
    }

    if json {
        return print_json(&connections);
    }
    println!(
        "{:<24} {:<8} {:<10} {:<10} ADDRESS",
        "ENGINE", "KIND", "STATUS", "CONNECTED"
    );
    for c in &connections {
        println!(
            "{:<24} {:<8} {:<10} {:<10} {}",
            c.engine_id.as_str(),
            c.endpoint.kind.to_string(),
            c.status.to_string(),
            if c.connected { "yes" } else { "no" },
            c.endpoint.address,
        );
    }
    Ok(())
}

/// `enginehub ps`: containers across engines.
pub async fn run_ps(hub: &Hub, options: &ListOptions, json: bool) -> Result<()> {
    let mut containers = hub.registry.list_containers_with(options).await?;
    containers.sort_by(|a, b| b.created.cmp(&a.created));

    if json {
        return print_json(&containers);
    }
    println!(
        "{:<12} {:<24} {:<28} {:<10} {:<16} ENGINE",
        "ID", "NAME", "IMAGE", "STATE", "POD"
    );
    for c in &containers {
        let name = c
            .names
            .first()
            .map(|n| n.trim_start_matches('/'))
            .unwrap_or_default();
        let pod = c.pod.as_ref().map(|p| p.name.as_str()).unwrap_or("-");
        println!(
            "{:<12} {:<24} {:<28} {:<10} {:<16} {}",
            short(&c.id),
            name,
            c.image,
            c.state,
            pod,
            c.engine.engine_id,
        );
    }
    Ok(())
}

/// `enginehub images`: images across engines.
pub async fn run_images(hub: &Hub, options: &ListOptions, json: bool) -> Result<()> {
    let images = hub.registry.list_images(options).await?;

    if json {
        return print_json(&images);
    }
    println!("{:<12} {:<40} {:>10} {:<9} ENGINE", "ID", "TAG", "SIZE", "MANIFEST");
    for i in &images {
        let tag = i.repo_tags.first().map(String::as_str).unwrap_or("<none>");
        println!(
            "{:<12} {:<40} {:>10} {:<9} {}",
            short(&i.id),
            tag,
            human_size(i.size),
            if i.is_manifest { "yes" } else { "" },
            i.engine.engine_id,
        );
    }
    Ok(())
}

/// `enginehub pods`: pods on native engines.
pub async fn run_pods(hub: &Hub, engine: Option<&EngineId>, json: bool) -> Result<()> {
    let pods = hub.registry.list_pods(engine).await?;

    if json {
        return print_json(&pods);
    }
    println!("{:<12} {:<24} {:<10} {:>10} ENGINE", "ID", "NAME", "STATUS", "CONTAINERS");
    for p in &pods {
        println!(
            "{:<12} {:<24} {:<10} {:>10} {}",
            short(&p.id),
            p.name,
            p.status,
            p.containers.len(),
            p.engine.engine_id,
        );
    }
    Ok(())
}

/// `enginehub volumes`: volumes across engines, optionally with usage.
pub async fn run_volumes(hub: &Hub, usage: bool, json: bool) -> Result<()> {
    let volumes = hub.registry.list_volumes(usage).await;

    if json {
        return print_json(&volumes);
    }
    println!("{:<32} {:<8} {:>10} {:>5} ENGINE", "NAME", "DRIVER", "SIZE", "REFS");
    for v in &volumes {
        let (size, refs) = match &v.usage {
            Some(u) => (human_size(u.size), u.ref_count.to_string()),
            None => ("-".to_string(), "-".to_string()),
        };
        println!(
            "{:<32} {:<8} {:>10} {:>5} {}",
            v.name, v.driver, size, refs, v.engine.engine_id
        );
    }
    Ok(())
}

/// `enginehub networks`: networks across engines.
pub async fn run_networks(hub: &Hub, json: bool) -> Result<()> {
    let networks = hub.registry.list_networks().await;

    if json {
        return print_json(&networks);
    }
    println!("{:<12} {:<24} {:<10} {:<8} ENGINE", "ID", "NAME", "DRIVER", "SCOPE");
    for n in &networks {
        println!(
            "{:<12} {:<24} {:<10} {:<8} {}",
            short(&n.id),
            n.name,
            n.driver,
            n.scope,
            n.engine.engine_id,
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_group_by_key() {
        let raw = vec![
            "label=app=web".to_string(),
            "label=tier=front".to_string(),
            "status=running".to_string(),
        ];
        let filters = parse_filters(&raw).unwrap();
        assert_eq!(filters["label"], vec!["app=web", "tier=front"]);
        assert_eq!(filters["status"], vec!["running"]);
    }

    #[test]
    fn pair_without_key_is_rejected() {
        assert!(split_pair("=x").is_err());
        assert!(split_pair("novalue").is_err());
        assert_eq!(split_pair("a=").unwrap(), ("a", ""));
    }

    #[test]
    fn short_strips_digest_prefix() {
        assert_eq!(short("sha256:0123456789abcdef"), "0123456789ab");
        assert_eq!(short("abc"), "abc");
    }

    #[test]
    fn sizes_are_decimal_units() {
        assert_eq!(human_size(512), "512B");
        assert_eq!(human_size(1_500_000), "1.5MB");
        assert_eq!(human_size(-3), "-3B");
    }
}
