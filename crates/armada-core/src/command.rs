//! Console command registration and execution
//!
//! Commands are owner-scoped like every other registration, so a module's
//! commands disappear when it unloads. Lookup accepts the primary name or
//! any alias; execution splits the input line on whitespace and hands the
//! remaining words to the handler.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use armada_api::model::OwnerToken;
use async_trait::async_trait;
use tracing::{debug, warn};

/// Name, aliases and help line of one command
#[derive(Clone, Debug)]
pub struct CommandInfo {
    pub name: String,
    pub aliases: Vec<String>,
    pub description: String,
}

impl CommandInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            description: description.into(),
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Run the command with the words following its name. The returned
    /// string is what the invoking console prints.
    async fn execute(&self, args: &[&str]) -> anyhow::Result<String>;
}

struct RegisteredCommand {
    owner: OwnerToken,
    info: CommandInfo,
    handler: Arc<dyn CommandHandler>,
}

/// Command execution failures
#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    Unknown(String),

    #[error("empty command line")]
    EmptyLine,

    #[error("command '{command}' failed: {source}")]
    Failed {
        command: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Owner-scoped command table
pub struct CommandProvider {
    commands: RwLock<HashMap<String, Arc<RegisteredCommand>>>,
}

impl CommandProvider {
    pub fn new() -> Self {
        Self {
            commands: RwLock::new(HashMap::new()),
        }
    }

    /// Register a command under `owner`. A name collision replaces the
    /// previous command and is logged.
    pub fn register(&self, owner: OwnerToken, info: CommandInfo, handler: Arc<dyn CommandHandler>) {
        debug!(command = %info.name, owner = %owner, "registered command");
        let registered = Arc::new(RegisteredCommand {
            owner,
            info: info.clone(),
            handler,
        });
        if let Ok(mut commands) = self.commands.write() {
            if commands.insert(info.name.clone(), registered).is_some() {
                warn!(command = %info.name, "replaced existing command");
            }
        }
    }

    /// Remove every command registered under `owner`.
    pub fn unregister(&self, owner: OwnerToken) -> usize {
        let mut removed = 0;
        if let Ok(mut commands) = self.commands.write() {
            let before = commands.len();
            commands.retain(|_, command| command.owner != owner);
            removed = before - commands.len();
        }
        removed
    }

    pub fn command_count(&self, owner: OwnerToken) -> usize {
        self.commands
            .read()
            .map(|commands| {
                commands
                    .values()
                    .filter(|command| command.owner == owner)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Look up a command by primary name or alias.
    pub fn command(&self, name: &str) -> Option<CommandInfo> {
        self.find(name).map(|command| command.info.clone())
    }

    /// All registered commands, sorted by name.
    pub fn commands(&self) -> Vec<CommandInfo> {
        let mut infos: Vec<CommandInfo> = self
            .commands
            .read()
            .map(|commands| {
                commands
                    .values()
                    .map(|command| command.info.clone())
                    .collect()
            })
            .unwrap_or_default();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    fn find(&self, name: &str) -> Option<Arc<RegisteredCommand>> {
        self.commands
            .read()
            .map(|commands| {
                commands.get(name).cloned().or_else(|| {
                    commands
                        .values()
                        .find(|command| command.info.aliases.iter().any(|alias| alias == name))
                        .cloned()
                })
            })
            .unwrap_or(None)
    }

    /// Execute one console line.
    pub async fn execute(&self, line: &str) -> Result<String, CommandError> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Err(CommandError::EmptyLine);
        };
        let Some(command) = self.find(name) else {
            return Err(CommandError::Unknown(name.to_string()));
        };

        let args: Vec<&str> = words.collect();
        command
            .handler
            .execute(&args)
            .await
            .map_err(|source| CommandError::Failed {
                command: command.info.name.clone(),
                source,
            })
    }
}

impl Default for CommandProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoCommand;

    #[async_trait]
    impl CommandHandler for EchoCommand {
        async fn execute(&self, args: &[&str]) -> anyhow::Result<String> {
            Ok(args.join(" "))
        }
    }

    #[tokio::test]
    async fn test_execute_by_name_and_alias() {
        let provider = CommandProvider::new();
        provider.register(
            OwnerToken::random(),
            CommandInfo::new("echo", "prints its arguments").alias("say"),
            Arc::new(EchoCommand),
        );

        assert_eq!(provider.execute("echo one two").await.unwrap(), "one two");
        assert_eq!(provider.execute("say three").await.unwrap(), "three");
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let provider = CommandProvider::new();
        let error = provider.execute("missing").await.unwrap_err();
        assert!(matches!(error, CommandError::Unknown(_)));

        assert!(matches!(
            provider.execute("   ").await.unwrap_err(),
            CommandError::EmptyLine
        ));
    }

    #[tokio::test]
    async fn test_unregister_is_owner_scoped() {
        let provider = CommandProvider::new();
        let module_a = OwnerToken::random();
        let module_b = OwnerToken::random();
        provider.register(
            module_a,
            CommandInfo::new("alpha", ""),
            Arc::new(EchoCommand),
        );
        provider.register(
            module_b,
            CommandInfo::new("beta", ""),
            Arc::new(EchoCommand),
        );

        assert_eq!(provider.unregister(module_a), 1);
        assert!(provider.command("alpha").is_none());
        assert!(provider.command("beta").is_some());
        assert_eq!(provider.command_count(module_b), 1);
    }
}
