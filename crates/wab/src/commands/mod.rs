//! Builtin command definitions.
//!
//! The registry's source set is this statically assembled list; adding a
//! command means adding a module here and one entry to `builtin()`.

use std::{sync::Arc, time::Duration};

use wab_core::{registry::CommandSpec, state::ChatStore};

mod ping;
mod reset;

pub fn builtin(store: ChatStore) -> Vec<CommandSpec> {
    vec![
        {
            let mut spec = CommandSpec::new(&["ping", "pong"], Arc::new(ping::Ping));
            spec.description = Some("Round-trip latency check".to_string());
            spec.category = Some("testing".to_string());
            spec.cooldown = Some(Duration::from_secs(5));
            spec
        },
        {
            let mut spec = CommandSpec::new(&["reset"], Arc::new(reset::Reset { store }));
            spec.description = Some("Clear your conversation history".to_string());
            spec.category = Some("chat".to_string());
            spec
        },
    ]
}
