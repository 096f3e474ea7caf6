//! Interactive prompts: credential selection and reconnect confirmation.
//!
//! Prompts are only shown on a real terminal. Non-interactive mode never
//! prompts; ambiguous choices become usage errors (exit code 2).

use {
    crate::CliError,
    crate::keystore::{ApiKey, KeyStore},
    anyhow::Result,
    dialoguer::{Confirm, Error as DialoguerError, Input, Password, Select, theme::ColorfulTheme},
    log::{debug, info},
    std::io::IsTerminal,
};

fn usage_err(message: impl Into<String>) -> anyhow::Error {
    CliError::Usage(message.into()).into()
}

pub(crate) fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Interactive prompt requires a terminal; use --non-interactive with --key",
        ))
    }
}

pub(crate) fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Prompt cancelled".to_string()).into()
            } else {
                usage_err(format!("Prompt failed: {io_err}"))
            }
        },
    }
}

/// Resolve the credential the kiosk runs with.
///
/// An explicit selector (id or name) must match. Without one, a single
/// stored key is used directly and several keys are offered in a menu.
pub(crate) fn choose_key(
    store: &mut KeyStore,
    selector: Option<&str>,
    non_interactive: bool,
) -> Result<ApiKey> {
    if let Some(selector) = selector {
        debug!("Looking up credential {selector:?}");
        return store
            .find(selector)
            .cloned()
            .ok_or_else(|| usage_err(format!("No API key matches '{selector}'")));
    }

    let keys: Vec<ApiKey> = store.list().into_iter().cloned().collect();
    match keys.as_slice() {
        [] if non_interactive => Err(usage_err(
            "No API keys stored; add one with `scanlink keys add <NAME> <VALUE>`",
        )),
        [] => {
            ensure_interactive_terminal()?;
            create_key_interactive(store)
        },
        [only] => {
            info!("Using API key #{} ({})", only.id, only.name);
            Ok(only.clone())
        },
        _ if non_interactive => Err(usage_err(
            "Several API keys stored; choose one with --key <ID|NAME>",
        )),
        _ => {
            ensure_interactive_terminal()?;
            select_key(&keys)
        },
    }
}

fn select_key(keys: &[ApiKey]) -> Result<ApiKey> {
    let items: Vec<String> = keys
        .iter()
        .map(|k| format!("#{} {} ({}, {})", k.id, k.name, k.masked_value(), k.created_at))
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select an API key")
        .items(&items)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => Ok(keys[index].clone()),
        None => Err(CliError::Cancelled("No API key selected".to_string()).into()),
    }
}

fn create_key_interactive(store: &mut KeyStore) -> Result<ApiKey> {
    eprintln!("No API keys stored yet. Add one to continue.");

    let name: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Key name")
        .interact_text()
        .map_err(map_prompt_error)?;
    let value = Password::with_theme(&ColorfulTheme::default())
        .with_prompt("Key value")
        .interact()
        .map_err(map_prompt_error)?;

    Ok(store.create(&name, &value)?)
}

/// Ask whether to retry connecting to the scanner.
pub(crate) fn confirm_reconnect(reason: &str) -> Result<bool> {
    ensure_interactive_terminal()?;
    let answer = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("{reason}. Try to reconnect?"))
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?;
    Ok(answer.unwrap_or(false))
}
