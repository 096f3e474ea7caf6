//! `keys`: manage stored registration API keys.

use anyhow::{Context, Result};
use console::style;
use serde::Serialize;

use crate::keystore::{ApiKey, KeyStore};
use crate::{CliError, KeysCommand};

#[derive(Serialize)]
struct KeyView<'a> {
    id: u64,
    name: &'a str,
    value: String,
    created_at: &'a str,
}

impl<'a> KeyView<'a> {
    fn new(key: &'a ApiKey, show_value: bool) -> Self {
        Self {
            id: key.id,
            name: &key.name,
            value: if show_value {
                key.value.clone()
            } else {
                key.masked_value()
            },
            created_at: &key.created_at,
        }
    }
}

pub(crate) fn cmd_keys(store: &mut KeyStore, action: &KeysCommand, quiet: bool) -> Result<()> {
    match action {
        KeysCommand::List { json, show_values } => list(store, *json, *show_values),
        KeysCommand::Add { name, value } => {
            let key = store.create(name, value)?;
            if !quiet {
                eprintln!(
                    "{} Added API key #{} ({})",
                    style("✓").green(),
                    key.id,
                    style(&key.name).cyan()
                );
            }
            Ok(())
        },
        KeysCommand::Remove { id } => {
            if !store.delete(*id)? {
                return Err(CliError::Usage(format!("No API key with id {id}")).into());
            }
            if !quiet {
                eprintln!("{} Removed API key #{id}", style("✓").green());
            }
            Ok(())
        },
    }
}

fn list(store: &KeyStore, json: bool, show_values: bool) -> Result<()> {
    let views: Vec<KeyView<'_>> = store
        .list()
        .into_iter()
        .map(|k| KeyView::new(k, show_values))
        .collect();

    if json {
        let out = serde_json::to_string_pretty(&views).context("Failed to encode key list")?;
        println!("{out}");
        return Ok(());
    }

    eprintln!(
        "{} {}",
        style("API keys").bold().underlined(),
        style(format!("({})", store.path().display())).dim()
    );
    if store.is_empty() {
        eprintln!("  {}", style("No API keys stored").dim());
        return Ok(());
    }
    for view in &views {
        eprintln!(
            "  {} {} {} {}",
            style(format!("#{}", view.id)).yellow(),
            style(view.name).cyan(),
            view.value,
            style(view.created_at).dim()
        );
    }
    Ok(())
}
