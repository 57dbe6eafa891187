//! Ledger maintenance tool.
//!
//! ```text
//! labelledger-admin migrate
//! labelledger-admin backup <file>
//! labelledger-admin restore <file>
//! labelledger-admin expire-invites
//! ```
//!
//! The database comes from `DATABASE_URL` (see `LedgerConfig::from_env`).

use std::path::PathBuf;

use anyhow::{bail, Context};
use labelledger_infra::{LedgerConfig, LedgerService, LedgerStore, NotificationBus};

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Migrate,
    Backup(PathBuf),
    Restore(PathBuf),
    ExpireInvites,
}

impl Command {
    fn parse(mut args: impl Iterator<Item = String>) -> anyhow::Result<Self> {
        let Some(name) = args.next() else {
            bail!("usage: labelledger-admin <migrate|backup FILE|restore FILE|expire-invites>");
        };
        let command = match name.as_str() {
            "migrate" => Command::Migrate,
            "backup" => Command::Backup(args.next().context("backup needs a target file")?.into()),
            "restore" => Command::Restore(args.next().context("restore needs a source file")?.into()),
            "expire-invites" => Command::ExpireInvites,
            other => bail!("unknown command `{other}`"),
        };
        if let Some(extra) = args.next() {
            bail!("unexpected argument `{extra}`");
        }
        Ok(command)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    labelledger_observability::init();

    let command = Command::parse(std::env::args().skip(1))?;
    let config = LedgerConfig::from_env().context("invalid ledger configuration")?;

    // Connecting runs the migrations.
    let store = LedgerStore::connect(&config)
        .await
        .with_context(|| format!("failed to open {}", config.database_url))?;

    match command {
        Command::Migrate => {
            tracing::info!(database = %config.database_url, "schema is up to date");
        }
        Command::Backup(path) => {
            store
                .backup_to(&path)
                .await
                .with_context(|| format!("backup to {} failed", path.display()))?;
            tracing::info!(target_file = %path.display(), "backup written");
        }
        Command::Restore(path) => {
            store
                .restore_from(&path)
                .await
                .with_context(|| format!("restore from {} failed", path.display()))?;
            tracing::info!(source_file = %path.display(), "ledger restored");
        }
        Command::ExpireInvites => {
            let ledger = LedgerService::new(store.clone(), &config, NotificationBus::default());
            let expired = ledger.expire_stale_invites().await?;
            tracing::info!(expired, "stale invites expired");
        }
    }

    store.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<Command> {
        Command::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn parses_each_command() {
        assert_eq!(parse(&["migrate"]).unwrap(), Command::Migrate);
        assert_eq!(parse(&["backup", "/tmp/a.db"]).unwrap(), Command::Backup("/tmp/a.db".into()));
        assert_eq!(parse(&["restore", "b.db"]).unwrap(), Command::Restore("b.db".into()));
        assert_eq!(parse(&["expire-invites"]).unwrap(), Command::ExpireInvites);
    }

    #[test]
    fn rejects_bad_invocations() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["backup"]).is_err());
        assert!(parse(&["migrate", "now"]).is_err());
        assert!(parse(&["vacuum"]).is_err());
    }
}
