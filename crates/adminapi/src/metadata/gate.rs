use shell_core::Console;
use tracing::debug;

use super::messages::render;
use super::{MdsAction, MessageCatalog, MetadataState, MetadataStorage, CURRENT_VERSION};
use crate::availability::Operation;
use crate::{AdminError, Instance};

/// Applies the operation's registered actions for the installed metadata state.
///
/// Notes and warnings go to `console` and every matching rule is applied in
/// order; the first matching `RaiseError` aborts. An exact version match
/// skips all rules.
pub async fn check_metadata_preconditions(
    operation: Operation,
    instance: &mut Instance,
    metadata: &dyn MetadataStorage,
    messages: &dyn MessageCatalog,
    console: &dyn Console,
) -> Result<MetadataState, AdminError> {
    let validations = operation.availability().metadata_validations;
    if validations.is_empty() {
        return Ok(MetadataState::Equal);
    }

    let state = metadata.state(instance.session()).await?;
    if state == MetadataState::Equal {
        return Ok(state);
    }
    debug!("Metadata state for {operation}: {state}");

    let mut installed_version = None;
    for validation in validations.iter().filter(|v| v.states.contains(state)) {
        let Some(template) = messages.lookup(operation.name(), state) else {
            continue;
        };
        if validation.action == MdsAction::None {
            continue;
        }

        let installed = match installed_version {
            Some(v) => v,
            None => *installed_version.insert(metadata.installed_version(instance.session()).await?),
        };
        let message = render(
            &template,
            &installed.to_string(),
            &CURRENT_VERSION.to_string(),
        );

        match validation.action {
            MdsAction::Note => console.print_note(&message),
            MdsAction::Warn => console.print_warning(&message),
            MdsAction::RaiseError => return Err(AdminError::Metadata(message)),
            MdsAction::None => {}
        }
    }

    Ok(state)
}
