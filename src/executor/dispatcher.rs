/// Action dispatcher: one `Action` against the current label map.
use crate::agent_engine::state::Action;
use crate::errors::PilotResult;
use crate::executor::input::InputDriver;
use crate::executor::text_input::{expand_newline_escapes, requires_clipboard};
use crate::perception::types::{LabelMap, LabelMapEntry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Performed,
    /// The label is not in the current map; nothing was done.
    Skipped { label: String },
    /// The input backend has no such key; nothing was done.
    UnknownKey { key: String },
    /// Stop the batch and re-capture.
    Refresh,
}

pub fn dispatch(
    action: &Action,
    labels: &LabelMap,
    driver: &mut dyn InputDriver,
) -> PilotResult<DispatchOutcome> {
    match action {
        Action::Click { label } => {
            let Some(entry) = labels.get(label) else {
                tracing::warn!(label = %label, "label not present in the screenshot, skipping CLICK");
                return Ok(DispatchOutcome::Skipped {
                    label: label.clone(),
                });
            };
            tracing::info!(label = %label, text = %entry.text, "click");
            click_entry(entry, driver)?;
            Ok(DispatchOutcome::Performed)
        }

        Action::Type { text, label } => {
            if let Some(label) = label {
                match labels.get(label) {
                    Some(entry) => click_entry(entry, driver)?,
                    None => tracing::warn!(
                        label = %label,
                        "label not present in the screenshot, typing into the focused element"
                    ),
                }
            }
            let text = expand_newline_escapes(text);
            if requires_clipboard(&text) {
                tracing::info!(chars = text.chars().count(), "type via clipboard paste");
                driver.paste(&text)?;
            } else {
                tracing::info!(chars = text.chars().count(), "type via keystrokes");
                driver.type_text(&text)?;
            }
            Ok(DispatchOutcome::Performed)
        }

        Action::Press {
            modifier,
            second_modifier,
            key,
        } => {
            if !driver.supports_key(key) {
                tracing::warn!(key = %key, "key not supported by the input backend, skipping PRESS");
                return Ok(DispatchOutcome::UnknownKey { key: key.clone() });
            }
            let modifiers: Vec<_> = [*modifier, *second_modifier].into_iter().flatten().collect();
            tracing::info!(%action, "press");
            if modifiers.is_empty() {
                driver.press(key)?;
            } else {
                driver.hotkey(&modifiers, key)?;
            }
            Ok(DispatchOutcome::Performed)
        }

        Action::Refresh => Ok(DispatchOutcome::Refresh),
    }
}

/// Move to the element centre, focus its window if needed, then click.
fn click_entry(entry: &LabelMapEntry, driver: &mut dyn InputDriver) -> PilotResult<()> {
    let center = entry.rect.center();
    driver.move_to(center)?;
    if !driver.window_focused_at(center)? {
        tracing::debug!(x = center.x, y = center.y, "window not focused, extra focus click");
        driver.click()?;
    }
    driver.click()
}
