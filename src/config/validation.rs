use crate::config::types::{HandlerRef, IndicationSpec, MenuDefinition, SessionSettings, WindowSettings};
use crate::crawler::{Step, StepKind};
use crate::ConfigError;
use scraper::Selector;
use toml::{Table, Value};
use url::Url;

/// Validates the default configuration tree of a portal bundle
pub fn validate_bundle(tree: &Table) -> Result<(), ConfigError> {
    let menus = section(tree, "menu")?;
    let indications = section(tree, "indication")?;

    validate_menus(&menus, &indications)?;
    validate_indications(&indications)?;
    validate_plans(tree, "target", &menus, false)?;
    validate_plans(tree, "reference", &menus, true)?;
    validate_window(tree)?;
    validate_session(tree, &menus)?;
    Ok(())
}

/// Returns the table at `key`, or an empty one when absent
fn section(tree: &Table, key: &str) -> Result<Table, ConfigError> {
    match tree.get(key) {
        Some(Value::Table(table)) => Ok(table.clone()),
        Some(_) => Err(ConfigError::Validation(format!(
            "'{}' must be a table",
            key
        ))),
        None => Ok(Table::new()),
    }
}

/// Validates menu definitions and their indication references
fn validate_menus(menus: &Table, indications: &Table) -> Result<(), ConfigError> {
    for (name, value) in menus {
        if !value.is_table() {
            return Err(ConfigError::Validation(format!(
                "Menu '{}' must be a table",
                name
            )));
        }

        let menu: MenuDefinition = value.clone().try_into().map_err(|e| {
            ConfigError::Validation(format!("Menu '{}' is malformed: {}", name, e))
        })?;

        if let Some(url) = &menu.url {
            validate_url(url).map_err(|reason| {
                ConfigError::Validation(format!("Menu '{}' has an invalid url: {}", name, reason))
            })?;
        }

        for (indication, reference) in &menu.indication {
            let reference: HandlerRef = reference.clone().try_into().map_err(|_| {
                ConfigError::Validation(format!(
                    "Indication '{}' of menu '{}' must name a handler or a list of handlers",
                    indication, name
                ))
            })?;

            // A lone empty name leaves only the derived `<menu>_<indication>`
            if matches!(&reference, HandlerRef::Chain(names) if names.iter().any(|n| n.is_empty())) {
                return Err(ConfigError::Validation(format!(
                    "Indication '{}' of menu '{}' has an empty handler name",
                    indication, name
                )));
            }

            if !indications.contains_key(indication) {
                return Err(ConfigError::Validation(format!(
                    "Menu '{}' refers to undefined indication '{}'",
                    name, indication
                )));
            }
        }
    }

    Ok(())
}

/// Validates indication predicates
fn validate_indications(indications: &Table) -> Result<(), ConfigError> {
    for (name, value) in indications {
        let spec: IndicationSpec = value.clone().try_into().map_err(|e| {
            ConfigError::Validation(format!("Indication '{}' is malformed: {}", name, e))
        })?;

        if spec.selector.is_none() && spec.contains.is_none() {
            return Err(ConfigError::Validation(format!(
                "Indication '{}' needs a selector or a contains text",
                name
            )));
        }

        if let Some(selector) = &spec.selector {
            if Selector::parse(selector).is_err() {
                return Err(ConfigError::Validation(format!(
                    "Indication '{}' has an invalid selector '{}'",
                    name, selector
                )));
            }
        }
    }

    Ok(())
}

/// Validates every step list under `target` or `reference`
fn validate_plans(
    tree: &Table,
    key: &str,
    menus: &Table,
    allow_empty: bool,
) -> Result<(), ConfigError> {
    for (name, value) in &section(tree, key)? {
        let steps: Vec<Step> = value.clone().try_into().map_err(|e| {
            ConfigError::Validation(format!("{} '{}' is not a step list: {}", key, name, e))
        })?;

        if steps.is_empty() && !allow_empty {
            return Err(ConfigError::Validation(format!(
                "{} '{}' has no steps",
                key, name
            )));
        }

        for step in &steps {
            validate_step(step, menus)
                .map_err(|reason| ConfigError::Validation(format!("{} '{}': {}", key, name, reason)))?;
        }
    }

    Ok(())
}

fn validate_step(step: &Step, menus: &Table) -> Result<(), String> {
    if step.kind == StepKind::Visit && step.menu.is_empty() {
        return Err("visit step without a menu".to_string());
    }

    if !step.menu.is_empty() && !menus.contains_key(&step.menu) {
        return Err(format!("step names unknown menu '{}'", step.menu));
    }

    if step.kind == StepKind::Task && step.handler.is_none() {
        return Err(format!("task step {} has no handler", step));
    }

    Ok(())
}

/// Validates window limits
fn validate_window(tree: &Table) -> Result<(), ConfigError> {
    let Some(value) = tree.get("window") else {
        return Ok(());
    };

    let window: WindowSettings = value
        .clone()
        .try_into()
        .map_err(|e| ConfigError::Validation(format!("'window' is malformed: {}", e)))?;

    if window.max_days < 1 || window.max_days > 366 {
        return Err(ConfigError::Validation(format!(
            "window.max_days must be between 1 and 366, got {}",
            window.max_days
        )));
    }

    if window.lookback_months > 120 {
        return Err(ConfigError::Validation(format!(
            "window.lookback_months must be at most 120, got {}",
            window.lookback_months
        )));
    }

    if window.date_field.is_empty() {
        return Err(ConfigError::Validation(
            "window.date_field cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates session-expiry settings
fn validate_session(tree: &Table, menus: &Table) -> Result<(), ConfigError> {
    let Some(value) = tree.get("session") else {
        return Ok(());
    };

    let session: SessionSettings = value
        .clone()
        .try_into()
        .map_err(|e| ConfigError::Validation(format!("'session' is malformed: {}", e)))?;

    if session.ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "session.ttl_secs must be greater than zero".to_string(),
        ));
    }

    if let Some(bootstrap) = &session.bootstrap {
        validate_step(bootstrap, menus)
            .map_err(|reason| ConfigError::Validation(format!("session.bootstrap: {}", reason)))?;
    }

    Ok(())
}

/// Checks that a menu URL is an absolute http(s) address
fn validate_url(url: &str) -> Result<(), String> {
    let parsed = Url::parse(url).map_err(|e| e.to_string())?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("unsupported scheme '{}'", other)),
    }
}
