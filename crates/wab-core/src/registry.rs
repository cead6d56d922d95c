//! Command registry: every declared alias maps to one command definition.
//!
//! The source set is a statically assembled list (built in the binary crate)
//! rather than a filesystem scan; the validation contract is the same: a
//! definition with no usable alias is skipped with a log line, and one bad
//! definition never prevents the rest from registering.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{dispatch::CommandInvocation, Result};

/// The execution half of a command definition.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn run(&self, inv: CommandInvocation) -> Result<()>;
}

/// Immutable command definition, registered once at startup.
///
/// `group_only` / `private_only` / `min_args` / `cooldown` are declared
/// policy enforced by the dispatcher before the handler runs.
#[derive(Clone)]
pub struct CommandSpec {
    pub aliases: Vec<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub group_only: bool,
    pub private_only: bool,
    pub min_args: usize,
    pub cooldown: Option<Duration>,
    pub handler: Arc<dyn CommandHandler>,
}

impl CommandSpec {
    pub fn new(aliases: &[&str], handler: Arc<dyn CommandHandler>) -> Self {
        Self {
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            description: None,
            category: None,
            group_only: false,
            private_only: false,
            min_args: 0,
            cooldown: None,
            handler,
        }
    }

    /// Primary name used in logs and error notices.
    pub fn name(&self) -> &str {
        self.aliases.first().map(String::as_str).unwrap_or("?")
    }
}

/// Read-only after startup; share via `Arc`.
pub struct CommandRegistry {
    specs: Vec<CommandSpec>,
}

impl CommandRegistry {
    /// Validate and register a set of definitions.
    ///
    /// Aliases are lower-cased; duplicates across the registry are dropped
    /// with a warning (first registrant wins). A definition whose alias set
    /// ends up empty is skipped entirely.
    pub fn register(definitions: impl IntoIterator<Item = CommandSpec>) -> Self {
        let mut specs: Vec<CommandSpec> = Vec::new();

        for mut spec in definitions {
            let mut aliases = Vec::new();
            for raw in spec.aliases.drain(..) {
                let alias = raw.trim().to_lowercase();
                if alias.is_empty() {
                    warn!("skipping empty alias in command definition");
                    continue;
                }
                let taken = specs.iter().any(|s| s.aliases.contains(&alias))
                    || aliases.contains(&alias);
                if taken {
                    warn!(alias = %alias, "alias already registered, keeping first registrant");
                    continue;
                }
                aliases.push(alias);
            }

            if aliases.is_empty() {
                warn!("skipping command definition with no usable aliases");
                continue;
            }

            spec.aliases = aliases;
            specs.push(spec);
        }

        let registered: Vec<&str> = specs.iter().flat_map(|s| s.aliases.iter()).map(String::as_str).collect();
        info!(commands = ?registered, "command registry ready");

        Self { specs }
    }

    /// Case-insensitive lookup across all alias sets. Linear scan: the
    /// registry is small and read-only.
    pub fn resolve(&self, token: &str) -> Option<&CommandSpec> {
        let token = token.to_lowercase();
        self.specs
            .iter()
            .find(|s| s.aliases.iter().any(|a| *a == token))
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl CommandHandler for Noop {
        async fn run(&self, _inv: CommandInvocation) -> Result<()> {
            Ok(())
        }
    }

    fn spec(aliases: &[&str]) -> CommandSpec {
        CommandSpec::new(aliases, Arc::new(Noop))
    }

    #[test]
    fn resolve_is_case_insensitive() {
        let registry = CommandRegistry::register([spec(&["ping", "pong"])]);
        let a = registry.resolve("PING").unwrap();
        let b = registry.resolve("ping").unwrap();
        assert_eq!(a.name(), "ping");
        assert_eq!(b.name(), "ping");
        assert!(registry.resolve("pong").is_some());
    }

    #[test]
    fn first_registrant_wins_on_collision() {
        let registry = CommandRegistry::register([spec(&["reset"]), spec(&["reset", "clear"])]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.resolve("reset").unwrap().name(), "reset");
        // The second definition keeps its non-colliding alias.
        assert_eq!(registry.resolve("clear").unwrap().name(), "clear");
    }

    #[test]
    fn definitions_without_usable_aliases_are_skipped() {
        let registry = CommandRegistry::register([spec(&["", "  "]), spec(&["ping"])]);
        assert_eq!(registry.len(), 1);
        assert!(registry.resolve("ping").is_some());
    }

    #[test]
    fn aliases_are_normalized_to_lowercase() {
        let registry = CommandRegistry::register([spec(&["Ping"])]);
        assert!(registry.resolve("ping").is_some());
        assert!(registry.resolve("PING").is_some());
    }

    #[test]
    fn unknown_token_resolves_to_none() {
        let registry = CommandRegistry::register([spec(&["ping"])]);
        assert!(registry.resolve("weather").is_none());
    }
}
